//! # herald-events
//!
//! Event model and canonical serialization for the herald event publisher.
//!
//! ## Design Principles
//!
//! - Events are records of build lifecycle transitions (activity triggered,
//!   started, finished, artifact published)
//! - `meta.id` is assigned once at construction and never changes
//! - `meta.type` and `meta.version` are never empty
//! - Events are versioned; the version selects the JSON Schema used for
//!   validation
//!
//! ## Event Layout
//!
//! Every event serializes to a JSON object with three regions:
//! - `meta`: identity, timestamp, type, version, tags, source, security
//! - `links`: ordered references to other events (`{type, target, domainId}`)
//! - `data`: the type-specific payload
//!
//! ## Canonical Form
//!
//! [`canonicalize`] produces the JSON Canonicalization Scheme form of an
//! event, which is what signatures are computed over.

mod canonical;
mod error;
mod event;
mod types;

pub use canonical::{canonical_json, canonicalize};
pub use error::EventError;
pub use event::*;
pub use types::*;

/// Re-export uuid for consumers building links.
pub use uuid::Uuid;
