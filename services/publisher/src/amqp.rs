//! AMQP 0-9-1 broker client backed by `lapin`.

use std::time::Duration;

use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ExchangeDeclareOptions};
use lapin::types::FieldTable;
use lapin::uri::AMQPUri;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};

use crate::delivery::{
    BrokerChannel, BrokerConnection, BrokerConnector, ConnectionSettings, OutboundMessage,
    ShutdownNotifier,
};
use crate::error::DeliveryError;

/// Connects to a real AMQP broker.
#[derive(Debug, Default, Clone, Copy)]
pub struct AmqpConnector;

impl AmqpConnector {
    pub fn new() -> Self {
        Self
    }
}

/// Builds the connection URI from settings.
///
/// Credentials and virtual host from the settings override whatever the URI
/// carries.
pub fn amqp_uri(
    settings: &ConnectionSettings,
    heartbeat: Duration,
) -> Result<AMQPUri, DeliveryError> {
    let mut uri: AMQPUri = settings.uri.parse().map_err(DeliveryError::InvalidUri)?;

    uri.vhost = settings.virtual_host.clone();
    if let Some(username) = &settings.username {
        uri.authority.userinfo.username = username.clone();
        uri.authority.userinfo.password = settings.password.clone().unwrap_or_default();
    }
    uri.query.heartbeat = Some(heartbeat.as_secs().min(u16::MAX as u64) as u16);

    Ok(uri)
}

#[async_trait]
impl BrokerConnector for AmqpConnector {
    async fn connect(
        &self,
        settings: &ConnectionSettings,
        heartbeat: Duration,
        notifier: ShutdownNotifier,
    ) -> Result<Box<dyn BrokerConnection>, DeliveryError> {
        let uri = amqp_uri(settings, heartbeat)?;
        let connection = Connection::connect_uri(uri, ConnectionProperties::default())
            .await
            .map_err(|e| DeliveryError::Connection(e.to_string()))?;

        connection.on_error(move |err| notifier.connection_closed(err.to_string()));

        Ok(Box::new(AmqpConnection { connection }))
    }
}

struct AmqpConnection {
    connection: Connection,
}

#[async_trait]
impl BrokerConnection for AmqpConnection {
    async fn create_channel(&self) -> Result<Box<dyn BrokerChannel>, DeliveryError> {
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| DeliveryError::Channel(e.to_string()))?;
        Ok(Box::new(AmqpChannel { channel }))
    }

    fn is_open(&self) -> bool {
        self.connection.status().connected()
    }

    async fn close(&self) -> Result<(), DeliveryError> {
        if !self.is_open() {
            return Ok(());
        }
        self.connection
            .close(200, "OK")
            .await
            .map_err(|e| DeliveryError::Connection(e.to_string()))
    }
}

struct AmqpChannel {
    channel: Channel,
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn exchange_exists(&self, exchange: &str) -> Result<(), DeliveryError> {
        // The kind is ignored for a passive declare.
        self.channel
            .exchange_declare(
                exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    passive: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| DeliveryError::ExchangeNotFound {
                exchange: exchange.to_string(),
                reason: e.to_string(),
            })
    }

    async fn publish(&self, message: &OutboundMessage) -> Result<(), DeliveryError> {
        let mut properties = BasicProperties::default()
            .with_content_type(message.properties.content_type.as_str().into())
            .with_delivery_mode(message.properties.delivery_mode)
            .with_timestamp(message.properties.timestamp);
        if let Some(app_id) = &message.properties.app_id {
            properties = properties.with_app_id(app_id.as_str().into());
        }

        self.channel
            .basic_publish(
                &message.exchange,
                &message.routing_key,
                BasicPublishOptions::default(),
                &message.body,
                properties,
            )
            .await
            .map_err(|e| DeliveryError::Publish(e.to_string()))?
            .await
            .map_err(|e| DeliveryError::Publish(e.to_string()))?;

        Ok(())
    }

    fn is_open(&self) -> bool {
        self.channel.status().connected()
    }
}
