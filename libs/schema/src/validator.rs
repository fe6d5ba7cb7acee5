//! Schema validator with a cache of compiled schemas.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use herald_events::Event;
use serde_json::Value;
use tracing::{debug, warn};

use crate::bundled::bundled_schema;
use crate::error::SchemaError;

type SchemaKey = (String, String);

/// Validates event documents against the schema for their type and version.
///
/// Compiled schemas are cached on first use and never invalidated. One
/// instance is shared across the process.
#[derive(Default)]
pub struct SchemaValidator {
    compiled: RwLock<HashMap<SchemaKey, Arc<jsonschema::Validator>>>,
}

impl SchemaValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a schema that is not bundled, replacing any compiled schema
    /// for the same type and version.
    pub fn register(
        &self,
        event_type: &str,
        version: &str,
        schema: &Value,
    ) -> Result<(), SchemaError> {
        let compiled = compile(event_type, version, schema)?;
        self.compiled
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                (event_type.to_string(), version.to_string()),
                Arc::new(compiled),
            );
        Ok(())
    }

    /// Validates `document` against the schema for `(event_type, version)`.
    pub fn validate(
        &self,
        event_type: &str,
        version: &str,
        document: &Value,
    ) -> Result<(), SchemaError> {
        let schema = self.schema_for(event_type, version)?;

        let violations: Vec<String> = schema
            .iter_errors(document)
            .map(|e| e.to_string())
            .collect();

        if violations.is_empty() {
            return Ok(());
        }

        warn!(
            event_type,
            version,
            violations = violations.len(),
            "Event failed schema validation"
        );

        Err(SchemaError::ValidationFailed {
            event_type: event_type.to_string(),
            version: version.to_string(),
            violations,
            document: document.clone(),
        })
    }

    /// Serializes `event` and validates it against its own type and version.
    pub fn validate_event(&self, event: &Event) -> Result<Value, SchemaError> {
        let document = event.to_json()?;
        self.validate(event.event_type(), event.version(), &document)?;
        Ok(document)
    }

    /// Number of compiled schemas held in the cache.
    pub fn cached(&self) -> usize {
        self.compiled.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn schema_for(
        &self,
        event_type: &str,
        version: &str,
    ) -> Result<Arc<jsonschema::Validator>, SchemaError> {
        let key = (event_type.to_string(), version.to_string());

        if let Some(schema) = self
            .compiled
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
        {
            return Ok(Arc::clone(schema));
        }

        let mut compiled = self.compiled.write().unwrap_or_else(|e| e.into_inner());

        // Another caller may have compiled it while we waited for the lock.
        if let Some(schema) = compiled.get(&key) {
            return Ok(Arc::clone(schema));
        }

        let source = bundled_schema(event_type, version).ok_or_else(|| SchemaError::Unavailable {
            event_type: event_type.to_string(),
            version: version.to_string(),
        })?;

        let document: Value =
            serde_json::from_str(source).map_err(|e| SchemaError::InvalidSchema {
                event_type: event_type.to_string(),
                version: version.to_string(),
                reason: e.to_string(),
            })?;

        let schema = Arc::new(compile(event_type, version, &document)?);
        compiled.insert(key, Arc::clone(&schema));

        debug!(event_type, version, "Compiled event schema");
        Ok(schema)
    }
}

fn compile(
    event_type: &str,
    version: &str,
    schema: &Value,
) -> Result<jsonschema::Validator, SchemaError> {
    jsonschema::validator_for(schema).map_err(|e| SchemaError::InvalidSchema {
        event_type: event_type.to_string(),
        version: version.to_string(),
        reason: e.to_string(),
    })
}
