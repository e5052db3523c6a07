//! Opaque record payloads.
//!
//! A [`Payload`] is the serialized JSON body of a record as it crosses the
//! cache and queue boundary. Storage layers only ever see bytes and a hash,
//! which keeps them indifferent to schema changes on the server. Callers
//! that know the expected shape can [`decode`](Payload::decode) into their
//! own types.
//!
//! # Example
//!
//! ```
//! use offline_sync::Payload;
//! use serde_json::json;
//!
//! let payload = Payload::from_value(&json!({"plate": "AB12 CDE", "mileage": 41200}));
//! assert_eq!(payload.to_value().unwrap()["mileage"], 41200);
//! assert_eq!(payload.content_hash().len(), 64);
//! ```

use std::fmt;
use std::sync::OnceLock;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::storage::traits::StorageError;

/// Serialized JSON body of a record.
#[derive(Clone)]
pub struct Payload {
    bytes: Vec<u8>,
    /// Lazily computed SHA-256 of `bytes` (hex)
    hash: OnceLock<String>,
}

impl Payload {
    /// Serialize a JSON value into a payload.
    pub fn from_value(value: &Value) -> Self {
        // Serializing a `Value` into a Vec cannot fail
        let bytes = serde_json::to_vec(value).unwrap_or_default();
        Self::from_trusted_bytes(bytes)
    }

    /// Serialize any typed record into a payload.
    pub fn from_typed<T: Serialize>(record: &T) -> Result<Self, StorageError> {
        let bytes = serde_json::to_vec(record)?;
        Ok(Self::from_trusted_bytes(bytes))
    }

    /// Wrap raw bytes, checking that they hold a JSON document.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, StorageError> {
        serde_json::from_slice::<serde::de::IgnoredAny>(&bytes)?;
        Ok(Self::from_trusted_bytes(bytes))
    }

    pub(crate) fn from_trusted_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            hash: OnceLock::new(),
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Parse into an untyped JSON value.
    pub fn to_value(&self) -> Result<Value, StorageError> {
        Ok(serde_json::from_slice(&self.bytes)?)
    }

    /// Parse into a caller-provided type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StorageError> {
        Ok(serde_json::from_slice(&self.bytes)?)
    }

    /// Hex SHA-256 of the serialized bytes.
    #[must_use]
    pub fn content_hash(&self) -> &str {
        self.hash.get_or_init(|| hash_bytes(&self.bytes))
    }
}

/// Hex SHA-256 of arbitrary bytes.
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for Payload {}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("len", &self.bytes.len())
            .field("hash", &self.content_hash())
            .finish()
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self::from_value(&value)
    }
}

impl From<&Value> for Payload {
    fn from(value: &Value) -> Self {
        Self::from_value(value)
    }
}
