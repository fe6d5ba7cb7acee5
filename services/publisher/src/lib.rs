//! Event publishing sidecar.
//!
//! Turns build lifecycle events into signed, schema-checked AMQP messages.
//!
//! ## Architecture
//!
//! - **Publisher**: signs (optionally), validates and queues events
//! - **Delivery Engine**: bounded queue drained by a background worker that
//!   owns the broker connection
//! - **Routing**: computes the routing key for each event
//! - **Credentials**: PEM bundles on disk, resolved per job scope

pub mod amqp;
pub mod config;
pub mod credentials;
pub mod delivery;
pub mod error;
pub mod publisher;
pub mod routing;

pub use config::{Config, RoutingConfig};
pub use delivery::{DeliveryEngine, DeliveryPolicy, EngineState, OutboundMessage};
pub use error::{DeliveryError, ErrorKind, PublishError};
pub use publisher::{EventPublisher, PublisherSettings};
