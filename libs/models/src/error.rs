//! Error types for model encoding and validation.

use thiserror::Error;

/// Errors that can occur when encoding, decoding, or validating models.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A field failed validation.
    #[error("invalid {field}: {message}")]
    Validation { field: String, message: String },
}

impl ModelError {
    /// Build a validation error for a field.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        ModelError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Returns true if this error came from request validation.
    pub fn is_validation(&self) -> bool {
        matches!(self, ModelError::Validation { .. })
    }
}

impl From<serde_json::Error> for ModelError {
    fn from(err: serde_json::Error) -> Self {
        ModelError::Serialization(err.to_string())
    }
}
