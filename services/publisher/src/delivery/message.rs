//! Outbound messages.

use chrono::Utc;

/// `delivery-mode` for messages the broker may drop on restart.
pub const NON_PERSISTENT: u8 = 1;

/// `delivery-mode` for messages the broker writes to disk.
pub const PERSISTENT: u8 = 2;

pub const CONTENT_TYPE_JSON: &str = "application/json";

/// AMQP basic properties carried with each message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageProperties {
    pub content_type: String,
    pub delivery_mode: u8,
    pub app_id: Option<String>,

    /// Seconds since the Unix epoch.
    pub timestamp: u64,
}

/// A message waiting in the delivery queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub exchange: String,
    pub routing_key: String,
    pub properties: MessageProperties,
    pub body: Vec<u8>,
}

impl OutboundMessage {
    /// Creates a JSON message stamped with the current time.
    pub fn json(
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        body: Vec<u8>,
        persistent: bool,
        app_id: Option<String>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            properties: MessageProperties {
                content_type: CONTENT_TYPE_JSON.to_string(),
                delivery_mode: if persistent { PERSISTENT } else { NON_PERSISTENT },
                app_id: app_id.filter(|id| !id.is_empty()),
                timestamp: Utc::now().timestamp().max(0) as u64,
            },
            body,
        }
    }
}
