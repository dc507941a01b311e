//! Bulletin board error types.

use stager_models::ModelError;
use stager_store::StoreError;
use thiserror::Error;

/// Errors returned by presence and task queue operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BbsError {
    /// No live presence is registered for the service.
    #[error("no {service} present")]
    NoPresence { service: &'static str },

    /// A task with this guid has already been desired.
    #[error("task already desired: {0}")]
    TaskExists(String),

    /// A stored record could not be decoded.
    #[error("invalid record at {key}: {source}")]
    InvalidRecord {
        key: String,
        #[source]
        source: ModelError,
    },

    /// The coordination store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A model could not be encoded.
    #[error(transparent)]
    Codec(#[from] ModelError),
}

impl BbsError {
    /// Returns true if no provider was present, as opposed to a store failure.
    pub fn is_no_presence(&self) -> bool {
        matches!(self, BbsError::NoPresence { .. })
    }
}
