//! Publish orchestrator.
//!
//! Ties signing, schema validation and delivery together:
//!
//! ```text
//! event -> [system signer] -> serialize + validate -> OutboundMessage -> DeliveryEngine
//! ```
//!
//! A successful return means "validated and queued", not "delivered".

use std::sync::Arc;

use arc_swap::ArcSwap;
use herald_events::Event;
use herald_schema::SchemaValidator;
use herald_signing::{EventSigner, SystemSigner};
use serde_json::Value;
use tracing::{debug, error};

use crate::delivery::{DeliveryEngine, OutboundMessage};
use crate::error::PublishError;
use crate::routing::RoutingKeyStrategy;

/// Settings read on every publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherSettings {
    pub enabled: bool,
    pub exchange: String,
    pub app_id: Option<String>,
    pub persistent: bool,
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            exchange: "eiffel".to_string(),
            app_id: None,
            persistent: true,
        }
    }
}

/// Entry point for publishing events.
pub struct EventPublisher {
    settings: ArcSwap<PublisherSettings>,
    engine: Arc<DeliveryEngine>,
    validator: Arc<SchemaValidator>,
    system_signer: Arc<SystemSigner>,
    routing: Box<dyn RoutingKeyStrategy>,
}

impl EventPublisher {
    pub fn new(
        settings: PublisherSettings,
        engine: Arc<DeliveryEngine>,
        validator: Arc<SchemaValidator>,
        system_signer: Arc<SystemSigner>,
        routing: Box<dyn RoutingKeyStrategy>,
    ) -> Self {
        Self {
            settings: ArcSwap::from_pointee(settings),
            engine,
            validator,
            system_signer,
            routing,
        }
    }

    pub fn update_settings(&self, settings: PublisherSettings) {
        self.settings.store(Arc::new(settings));
    }

    pub fn settings(&self) -> Arc<PublisherSettings> {
        self.settings.load_full()
    }

    pub fn engine(&self) -> &Arc<DeliveryEngine> {
        &self.engine
    }

    pub fn system_signer(&self) -> &Arc<SystemSigner> {
        &self.system_signer
    }

    /// Drops every cached signing key. Call whenever the credential store is
    /// saved.
    pub fn on_credentials_saved(&self) {
        self.system_signer.key_cache().clear();
    }

    /// Publishes `event`, signing it with the system credential when
    /// `allow_system_signing` is set and system signing is enabled.
    ///
    /// Returns `Ok(None)` when publishing is disabled.
    pub fn must_publish(
        &self,
        event: &mut Event,
        allow_system_signing: bool,
    ) -> Result<Option<Value>, PublishError> {
        let signer: Option<&dyn EventSigner> = if allow_system_signing {
            Some(&*self.system_signer)
        } else {
            None
        };
        self.send(event, signer)
    }

    /// Publishes `event` signed by `signer`, typically a job-scoped signer.
    pub fn must_publish_signed(
        &self,
        event: &mut Event,
        signer: &dyn EventSigner,
    ) -> Result<Option<Value>, PublishError> {
        self.send(event, Some(signer))
    }

    /// Like [`EventPublisher::must_publish`], but logs failures instead of
    /// returning them.
    pub fn publish(&self, event: &mut Event, allow_system_signing: bool) -> Option<Value> {
        let result = self.must_publish(event, allow_system_signing);
        Self::log_failure(event, result)
    }

    /// Like [`EventPublisher::must_publish_signed`], but logs failures instead
    /// of returning them.
    pub fn publish_signed(&self, event: &mut Event, signer: &dyn EventSigner) -> Option<Value> {
        let result = self.must_publish_signed(event, signer);
        Self::log_failure(event, result)
    }

    fn send(
        &self,
        event: &mut Event,
        signer: Option<&dyn EventSigner>,
    ) -> Result<Option<Value>, PublishError> {
        let settings = self.settings.load_full();
        if !settings.enabled {
            debug!(event_id = %event.id(), "Publishing is disabled, skipping event");
            return Ok(None);
        }

        let signed = match signer {
            Some(signer) => signer.sign(event)?,
            None => false,
        };

        let document = self.validator.validate_event(event)?;
        let body =
            serde_json::to_vec(&document).map_err(|e| PublishError::Serialization(e.to_string()))?;

        let routing_key = self.routing.routing_key(event);
        let message = OutboundMessage::json(
            settings.exchange.clone(),
            routing_key,
            body,
            settings.persistent,
            settings.app_id.clone(),
        );

        debug!(
            event_id = %event.id(),
            event_type = event.event_type(),
            exchange = %message.exchange,
            routing_key = %message.routing_key,
            signed,
            "Queueing event"
        );
        self.engine.enqueue(message);

        Ok(Some(document))
    }

    fn log_failure(event: &Event, result: Result<Option<Value>, PublishError>) -> Option<Value> {
        match result {
            Ok(document) => document,
            Err(e) => {
                error!(
                    error = %e,
                    kind = %e.kind(),
                    event_id = %event.id(),
                    event_type = event.event_type(),
                    "Failed to publish event"
                );
                None
            }
        }
    }
}
