//! Broker client seam.
//!
//! The delivery worker talks to the broker only through these traits. The
//! AMQP implementation lives in [`crate::amqp`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::message::OutboundMessage;
use crate::error::DeliveryError;

/// Where and how to connect to the broker.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Broker URI, e.g. `amqp://broker.example.test:5672`.
    pub uri: String,

    pub virtual_host: String,

    pub username: Option<String>,

    pub password: Option<String>,
}

impl ConnectionSettings {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            virtual_host: "/".to_string(),
            username: None,
            password: None,
        }
    }

    pub fn with_virtual_host(mut self, virtual_host: impl Into<String>) -> Self {
        self.virtual_host = virtual_host.into();
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

impl std::fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("uri", &self.uri)
            .field("virtual_host", &self.virtual_host)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Why a connection or channel went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownCause {
    /// We closed it ourselves.
    Application,

    /// The connection failed hard.
    Connection(String),

    /// A single channel was closed; the connection is still usable.
    Channel(String),
}

/// Shutdown notification tagged with the connection it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ShutdownSignal {
    pub connection: u64,
    pub cause: ShutdownCause,
}

/// Handle a broker connection uses to report that it has shut down.
///
/// Reports made after the worker started closing the connection are
/// downgraded to [`ShutdownCause::Application`].
#[derive(Debug, Clone)]
pub struct ShutdownNotifier {
    connection: u64,
    closing: Arc<AtomicBool>,
    signals: mpsc::UnboundedSender<ShutdownSignal>,
}

impl ShutdownNotifier {
    pub(crate) fn new(
        connection: u64,
        closing: Arc<AtomicBool>,
        signals: mpsc::UnboundedSender<ShutdownSignal>,
    ) -> Self {
        Self {
            connection,
            closing,
            signals,
        }
    }

    /// Reports that the whole connection is gone.
    pub fn connection_closed(&self, reason: impl Into<String>) {
        let cause = if self.closing.load(Ordering::SeqCst) {
            ShutdownCause::Application
        } else {
            ShutdownCause::Connection(reason.into())
        };
        self.send(cause);
    }

    /// Reports that a channel was closed while the connection stays up.
    pub fn channel_closed(&self, reason: impl Into<String>) {
        let cause = if self.closing.load(Ordering::SeqCst) {
            ShutdownCause::Application
        } else {
            ShutdownCause::Channel(reason.into())
        };
        self.send(cause);
    }

    fn send(&self, cause: ShutdownCause) {
        // The worker may already be gone.
        let _ = self.signals.send(ShutdownSignal {
            connection: self.connection,
            cause,
        });
    }
}

/// Opens broker connections.
#[async_trait]
pub trait BrokerConnector: Send + Sync + 'static {
    async fn connect(
        &self,
        settings: &ConnectionSettings,
        heartbeat: Duration,
        notifier: ShutdownNotifier,
    ) -> Result<Box<dyn BrokerConnection>, DeliveryError>;
}

/// An open broker connection.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    async fn create_channel(&self) -> Result<Box<dyn BrokerChannel>, DeliveryError>;

    fn is_open(&self) -> bool;

    async fn close(&self) -> Result<(), DeliveryError>;
}

/// A channel on a broker connection.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Checks that the exchange exists without creating it.
    async fn exchange_exists(&self, exchange: &str) -> Result<(), DeliveryError>;

    async fn publish(&self, message: &OutboundMessage) -> Result<(), DeliveryError>;

    fn is_open(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notifier_downgrades_after_close_started() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let closing = Arc::new(AtomicBool::new(false));
        let notifier = ShutdownNotifier::new(3, closing.clone(), tx);

        notifier.connection_closed("connection reset by peer");
        let signal = rx.try_recv().unwrap();
        assert_eq!(signal.connection, 3);
        assert_eq!(
            signal.cause,
            ShutdownCause::Connection("connection reset by peer".to_string())
        );

        closing.store(true, Ordering::SeqCst);
        notifier.connection_closed("closed");
        assert_eq!(rx.try_recv().unwrap().cause, ShutdownCause::Application);
    }

    #[test]
    fn test_settings_debug_redacts_password() {
        let settings =
            ConnectionSettings::new("amqp://broker:5672").with_credentials("ci", "s3cret");
        let debug = format!("{:?}", settings);
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("s3cret"));
    }
}
