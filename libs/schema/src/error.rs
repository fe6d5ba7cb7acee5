//! Error types for schema lookup and validation.

use thiserror::Error;

/// Errors raised while resolving or applying a schema.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// No schema is registered for this type and version.
    #[error("no schema available for {event_type} {version}")]
    Unavailable { event_type: String, version: String },

    /// No schema version is known for this event type.
    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    /// The document violates one or more schema constraints.
    #[error(
        "{event_type} {version} failed schema validation: {}",
        .violations.join("; ")
    )]
    ValidationFailed {
        event_type: String,
        version: String,
        violations: Vec<String>,
        document: serde_json::Value,
    },

    /// A schema document could not be parsed or compiled.
    #[error("invalid schema for {event_type} {version}: {reason}")]
    InvalidSchema {
        event_type: String,
        version: String,
        reason: String,
    },

    /// The event could not be turned into a JSON document.
    #[error("failed to serialize event: {0}")]
    Serialization(String),
}

impl SchemaError {
    /// Returns true if the schema itself was missing or unusable, as opposed
    /// to the document being invalid.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            SchemaError::Unavailable { .. }
                | SchemaError::UnknownEventType(_)
                | SchemaError::InvalidSchema { .. }
        )
    }

    /// Returns the violated constraints for a failed validation.
    pub fn violations(&self) -> &[String] {
        match self {
            SchemaError::ValidationFailed { violations, .. } => violations,
            _ => &[],
        }
    }
}

impl From<herald_events::EventError> for SchemaError {
    fn from(err: herald_events::EventError) -> Self {
        SchemaError::Serialization(err.to_string())
    }
}
