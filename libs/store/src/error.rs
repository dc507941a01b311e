//! Coordination store error types.

use thiserror::Error;

/// Errors returned by a coordination store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No live node exists at the key.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// A live node already exists at the key.
    #[error("key already exists: {0}")]
    KeyExists(String),

    /// The node holds a different value than the caller expected.
    #[error("value mismatch for key: {0}")]
    ValueMismatch(String),

    /// The store cannot be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Internal store failure.
    #[error("internal store error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Returns true if the error reports a missing key.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::KeyNotFound(_))
    }

    /// Returns true if the node holds someone else's value.
    pub fn is_value_mismatch(&self) -> bool {
        matches!(self, StoreError::ValueMismatch(_))
    }

    /// Returns true if the error reports a create conflict.
    pub fn is_key_exists(&self) -> bool {
        matches!(self, StoreError::KeyExists(_))
    }
}
