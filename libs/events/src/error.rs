//! Error types for event handling.

use thiserror::Error;

/// Errors that can occur when building or serializing events.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventError {
    /// A required meta field is missing or empty.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// The event could not be turned into a canonical byte sequence.
    #[error("canonicalization failed: {0}")]
    Canonicalization(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for EventError {
    fn from(err: serde_json::Error) -> Self {
        EventError::Serialization(err.to_string())
    }
}
