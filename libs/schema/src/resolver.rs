//! Mapping from event type to the schema version events are built with.

use herald_events::{Event, EventBuilder};

use crate::bundled::BUNDLED_SCHEMAS;
use crate::error::SchemaError;

/// Resolves the schema version to use for an event type.
pub trait SchemaVersionResolver: Send + Sync {
    fn resolve(&self, event_type: &str) -> Option<String>;
}

/// Resolves to the version of the bundled schema for each type.
#[derive(Debug, Default, Clone, Copy)]
pub struct BundledVersions;

impl SchemaVersionResolver for BundledVersions {
    fn resolve(&self, event_type: &str) -> Option<String> {
        BUNDLED_SCHEMAS
            .iter()
            .find(|(t, _, _)| *t == event_type)
            .map(|(_, v, _)| v.to_string())
    }
}

/// Starts building an event of `event_type` at the version `resolver` picks.
pub fn event_builder(
    resolver: &dyn SchemaVersionResolver,
    event_type: &str,
) -> Result<EventBuilder, SchemaError> {
    let version = resolver
        .resolve(event_type)
        .ok_or_else(|| SchemaError::UnknownEventType(event_type.to_string()))?;
    Ok(Event::builder(event_type, version))
}
