// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Network reachability as reported by the host platform.
//!
//! The host owns a `watch::Sender<Connectivity>` and publishes transitions;
//! the orchestrator reacts to every change.

/// Current network link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Connectivity {
    #[default]
    Offline,
    Cellular,
    Wifi,
}

impl Connectivity {
    #[must_use]
    pub fn is_online(&self) -> bool {
        !matches!(self, Self::Offline)
    }

    /// Whether syncing is allowed on this link.
    #[must_use]
    pub fn allows_sync(&self, wifi_only: bool) -> bool {
        match self {
            Self::Offline => false,
            Self::Cellular => !wifi_only,
            Self::Wifi => true,
        }
    }
}

impl std::fmt::Display for Connectivity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Offline => write!(f, "Offline"),
            Self::Cellular => write!(f, "Cellular"),
            Self::Wifi => write!(f, "Wifi"),
        }
    }
}
