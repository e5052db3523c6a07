//! Orchestrator lifecycle: run loop, pause/resume, shutdown.

use std::sync::atomic::Ordering;

use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::storage::now_millis;

use super::{PassKind, SyncOrchestrator, SyncState};

fn sync_timer(config: &SyncConfig) -> Interval {
    let period = config.sync_interval();
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

impl SyncOrchestrator {
    /// Main loop. Spawn once; returns after [`shutdown()`](Self::shutdown).
    ///
    /// Reacts to the periodic timer, connectivity transitions, config
    /// updates and high-priority enqueues. Passes started here never wait
    /// for one already running.
    #[tracing::instrument(skip(self))]
    pub async fn run(&self) {
        let mut shutdown_rx = self.shutdown.subscribe();
        if *shutdown_rx.borrow() {
            return;
        }
        let mut connectivity_rx = self.connectivity_rx.clone();
        let mut config_rx = self.config_rx.lock().await;
        let mut timer = sync_timer(&self.config.read());

        crate::metrics::set_online(self.network_allowed());
        self.set_state(self.resting_state());
        info!(state = %self.state(), connectivity = %self.connectivity(), "Sync orchestrator running");

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }

                Ok(()) = config_rx.changed() => {
                    let new_config = config_rx.borrow_and_update().clone();
                    if self.apply_config(new_config) {
                        timer = sync_timer(&self.config.read());
                    }
                }

                Ok(()) = connectivity_rx.changed() => {
                    self.on_connectivity_change().await;
                }

                _ = timer.tick() => {
                    self.on_timer().await;
                }

                _ = self.wake.notified() => {
                    self.on_wake().await;
                }
            }
        }

        info!("Sync orchestrator run loop stopped");
    }

    /// Stop the run loop. Waits for an in-flight pass to reach a safe point;
    /// a remote call already sent always completes.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        let shutdown_start = std::time::Instant::now();
        info!("Initiating sync orchestrator shutdown...");
        self.shutdown.send_replace(true);

        let _pass = self.pass_lock.lock().await;
        if let Ok(counts) = self.queue.counts().await {
            info!(
                pending = counts.pending,
                awaiting_user = counts.awaiting_user,
                dead_letter = counts.dead_letter,
                "Queue left for next session"
            );
        }
        info!(elapsed_ms = shutdown_start.elapsed().as_millis() as u64, "Sync orchestrator shutdown complete");
    }

    /// Stop starting passes until [`resume()`](Self::resume). A pass in
    /// flight finishes.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
        info!("Sync paused");
        self.settle();
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
        info!("Sync resumed");
        self.settle();
        self.wake.notify_one();
    }

    /// App moved to the foreground (`true`) or background (`false`).
    pub fn set_foreground(&self, foreground: bool) {
        let was = self.foreground.swap(foreground, Ordering::AcqRel);
        if was == foreground {
            return;
        }
        debug!(foreground, "App visibility changed");
        self.settle();
        if foreground {
            self.wake.notify_one();
        }
    }

    /// Move to the resting state unless a pass owns the state.
    fn settle(&self) {
        if !self.state().is_busy() {
            self.set_state(self.resting_state());
        }
    }

    /// Returns whether the sync interval changed.
    fn apply_config(&self, new_config: SyncConfig) -> bool {
        info!(
            sync_interval_secs = new_config.sync_interval_secs,
            max_retries = new_config.max_retries,
            wifi_only = new_config.wifi_only,
            "Config updated"
        );
        self.queue.set_retry_policy(
            new_config.max_retries,
            new_config.retry_delay(),
            new_config.max_retry_delay(),
        );
        let interval_changed = {
            let mut config = self.config.write();
            let changed = config.sync_interval_secs != new_config.sync_interval_secs;
            *config = new_config;
            changed
        };
        // wifi_only / background_sync may change what "resting" means
        self.settle();
        crate::metrics::set_online(self.network_allowed());
        interval_changed
    }

    async fn on_connectivity_change(&self) {
        let allowed = self.network_allowed();
        crate::metrics::set_online(allowed);
        info!(connectivity = %self.connectivity(), sync_allowed = allowed, "Connectivity changed");

        let state = self.state();
        if !allowed {
            // A running pass notices between operations
            if !state.is_busy() {
                self.set_state(SyncState::WaitingForNetwork);
            }
            return;
        }

        if state == SyncState::WaitingForNetwork {
            self.set_state(self.resting_state());
            if !self.is_paused() {
                self.start_pass(PassKind::Incremental).await;
            }
        }
    }

    async fn on_timer(&self) {
        match self.cache.invalidate_expired(now_millis()).await {
            Ok(0) => {}
            Ok(removed) => {
                debug!(removed, "Expired cache records removed");
                crate::metrics::record_expired(removed);
            }
            Err(e) => {
                warn!(error = %e, "Failed to remove expired cache records");
                crate::metrics::record_storage_error("invalidate_expired");
            }
        }

        if matches!(self.state(), SyncState::Idle | SyncState::Error)
            && self.network_allowed()
            && !self.is_paused()
        {
            self.start_pass(PassKind::Full).await;
        }
    }

    async fn on_wake(&self) {
        if self.state() == SyncState::Idle && self.network_allowed() && !self.is_paused() {
            self.start_pass(PassKind::Incremental).await;
        }
    }

    async fn start_pass(&self, kind: PassKind) {
        if let Err(e) = self.run_pass(kind, false).await {
            debug!(pass = %kind, error = %e, "Scheduled pass did not run");
        }
    }
}
