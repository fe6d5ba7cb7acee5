//! In-memory broker for delivery and publisher tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::broker::{
    BrokerChannel, BrokerConnection, BrokerConnector, ConnectionSettings, ShutdownNotifier,
};
use super::message::OutboundMessage;
use crate::error::DeliveryError;

#[derive(Default)]
struct State {
    unreachable: AtomicBool,
    attempts: AtomicUsize,
    connects: AtomicUsize,
    channels: AtomicUsize,
    published: Mutex<Vec<OutboundMessage>>,
    connections: Mutex<Vec<(Arc<AtomicBool>, ShutdownNotifier)>>,
    missing_exchanges: Mutex<HashSet<String>>,
    last_settings: Mutex<Option<ConnectionSettings>>,
}

/// A broker that records every published message.
#[derive(Clone, Default)]
pub(crate) struct FakeBroker {
    state: Arc<State>,
}

impl FakeBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state.unreachable.store(!reachable, Ordering::SeqCst);
    }

    /// Makes passive declares of `exchange` fail.
    pub fn remove_exchange(&self, exchange: &str) {
        self.state
            .missing_exchanges
            .lock()
            .unwrap()
            .insert(exchange.to_string());
    }

    /// Kills every open connection as if the network dropped.
    pub fn sever_connections(&self) {
        for (open, notifier) in self.state.connections.lock().unwrap().iter() {
            if open.swap(false, Ordering::SeqCst) {
                notifier.connection_closed("connection reset by peer");
            }
        }
    }

    pub fn published(&self) -> Vec<OutboundMessage> {
        self.state.published.lock().unwrap().clone()
    }

    /// Connection attempts, successful or not.
    pub fn attempts(&self) -> usize {
        self.state.attempts.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn channels(&self) -> usize {
        self.state.channels.load(Ordering::SeqCst)
    }

    pub fn open_connections(&self) -> usize {
        self.state
            .connections
            .lock()
            .unwrap()
            .iter()
            .filter(|(open, _)| open.load(Ordering::SeqCst))
            .count()
    }

    pub fn last_virtual_host(&self) -> Option<String> {
        self.state
            .last_settings
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| s.virtual_host.clone())
    }
}

#[async_trait]
impl BrokerConnector for FakeBroker {
    async fn connect(
        &self,
        settings: &ConnectionSettings,
        _heartbeat: Duration,
        notifier: ShutdownNotifier,
    ) -> Result<Box<dyn BrokerConnection>, DeliveryError> {
        self.state.attempts.fetch_add(1, Ordering::SeqCst);
        if self.state.unreachable.load(Ordering::SeqCst) {
            return Err(DeliveryError::Connection("connection refused".to_string()));
        }

        self.state.connects.fetch_add(1, Ordering::SeqCst);
        *self.state.last_settings.lock().unwrap() = Some(settings.clone());

        let open = Arc::new(AtomicBool::new(true));
        self.state
            .connections
            .lock()
            .unwrap()
            .push((Arc::clone(&open), notifier.clone()));

        Ok(Box::new(FakeConnection {
            state: Arc::clone(&self.state),
            open,
            notifier,
        }))
    }
}

struct FakeConnection {
    state: Arc<State>,
    open: Arc<AtomicBool>,
    notifier: ShutdownNotifier,
}

#[async_trait]
impl BrokerConnection for FakeConnection {
    async fn create_channel(&self) -> Result<Box<dyn BrokerChannel>, DeliveryError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(DeliveryError::Channel("connection is closed".to_string()));
        }
        self.state.channels.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeChannel {
            state: Arc::clone(&self.state),
            connection_open: Arc::clone(&self.open),
            open: AtomicBool::new(true),
            notifier: self.notifier.clone(),
        }))
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), DeliveryError> {
        if self.open.swap(false, Ordering::SeqCst) {
            self.notifier.connection_closed("closed by application");
        }
        Ok(())
    }
}

struct FakeChannel {
    state: Arc<State>,
    connection_open: Arc<AtomicBool>,
    open: AtomicBool,
    notifier: ShutdownNotifier,
}

#[async_trait]
impl BrokerChannel for FakeChannel {
    async fn exchange_exists(&self, exchange: &str) -> Result<(), DeliveryError> {
        if !self.is_open() {
            return Err(DeliveryError::Channel("channel is closed".to_string()));
        }
        if self.state.missing_exchanges.lock().unwrap().contains(exchange) {
            // A failed passive declare closes the channel.
            self.open.store(false, Ordering::SeqCst);
            self.notifier.channel_closed("NOT_FOUND");
            return Err(DeliveryError::ExchangeNotFound {
                exchange: exchange.to_string(),
                reason: "NOT_FOUND".to_string(),
            });
        }
        Ok(())
    }

    async fn publish(&self, message: &OutboundMessage) -> Result<(), DeliveryError> {
        if !self.is_open() {
            return Err(DeliveryError::Publish("channel is closed".to_string()));
        }
        self.state.published.lock().unwrap().push(message.clone());
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && self.connection_open.load(Ordering::SeqCst)
    }
}
