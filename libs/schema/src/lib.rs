//! Schema validation for published events.
//!
//! Every event is checked against the JSON Schema registered for its
//! `(meta.type, meta.version)` pair before it is handed to the broker.
//!
//! ## Design Principles
//!
//! - Schemas are bundled with the binary; nothing is fetched at runtime
//! - Compiled schemas are cached for the lifetime of the validator
//! - A missing schema is reported separately from a failed validation
//! - Every violated constraint is reported, not only the first
//!
//! ## Usage
//!
//! ```ignore
//! let validator = SchemaValidator::new();
//! validator.validate_event(&event)?;
//! ```

mod bundled;
mod error;
mod resolver;
mod validator;

pub use bundled::{bundled_schema, BUNDLED_SCHEMAS};
pub use error::SchemaError;
pub use resolver::{event_builder, BundledVersions, SchemaVersionResolver};
pub use validator::SchemaValidator;
