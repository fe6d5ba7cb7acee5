//! Delivery engine.
//!
//! Owns the broker connection, a bounded outbound queue and a background
//! worker that drains the queue into the broker.
//!
//! ## Design Principles
//!
//! - Callers never block: `enqueue` is non-blocking and drops on a full queue
//! - The connection and channel belong to the worker thread alone
//! - Settings are swapped atomically and picked up on the next iteration
//! - Queued messages survive connection loss; in-flight ones may not
//!
//! ## Connection States
//!
//! ```text
//! DISCONNECTED -> CONNECTING -> CONNECTED -> DISCONNECTED (on error)
//!                                         -> SHUTTING_DOWN
//! ```

mod broker;
mod message;

#[cfg(test)]
pub(crate) mod fake;

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

pub use broker::{
    BrokerChannel, BrokerConnection, BrokerConnector, ConnectionSettings, ShutdownCause,
    ShutdownNotifier,
};
pub use message::{
    MessageProperties, OutboundMessage, CONTENT_TYPE_JSON, NON_PERSISTENT, PERSISTENT,
};

use broker::ShutdownSignal;

use crate::error::DeliveryError;

// =============================================================================
// Policy
// =============================================================================

/// AMQP heartbeat interval.
pub const HEARTBEAT: Duration = Duration::from_secs(30);

/// Maximum number of messages waiting for delivery.
pub const QUEUE_CAPACITY: usize = 1000;

/// How long the worker waits for a message before checking for shutdown.
pub const POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Pause between failed connection attempts.
pub const RECONNECT_PAUSE: Duration = Duration::from_secs(5);

/// Timing and sizing of the delivery engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryPolicy {
    pub heartbeat: Duration,
    pub queue_capacity: usize,
    pub poll_timeout: Duration,
    pub reconnect_pause: Duration,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            heartbeat: HEARTBEAT,
            queue_capacity: QUEUE_CAPACITY,
            poll_timeout: POLL_TIMEOUT,
            reconnect_pause: RECONNECT_PAUSE,
        }
    }
}

// =============================================================================
// State
// =============================================================================

/// Connection state of the delivery worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Disconnected,
    Connecting,
    Connected,
    ShuttingDown,
}

impl EngineState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => EngineState::Connecting,
            2 => EngineState::Connected,
            3 => EngineState::ShuttingDown,
            _ => EngineState::Disconnected,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            EngineState::Disconnected => 0,
            EngineState::Connecting => 1,
            EngineState::Connected => 2,
            EngineState::ShuttingDown => 3,
        }
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EngineState::Disconnected => "disconnected",
            EngineState::Connecting => "connecting",
            EngineState::Connected => "connected",
            EngineState::ShuttingDown => "shutting_down",
        };
        write!(f, "{}", s)
    }
}

/// State shared between the engine handle and its worker.
struct Shared {
    settings: ArcSwapOption<ConnectionSettings>,
    state: AtomicU8,
    dropped: AtomicU64,
    queue: Arc<tokio::sync::Mutex<mpsc::Receiver<OutboundMessage>>>,
}

impl Shared {
    fn set_state(&self, state: EngineState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::SeqCst))
    }
}

struct WorkerHandle {
    thread: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

// =============================================================================
// Engine
// =============================================================================

/// Queues outbound messages and delivers them from a background worker.
///
/// Construct one per process and share it. The worker thread is started by
/// [`DeliveryEngine::initialize`] and stopped by [`DeliveryEngine::shutdown`]
/// or when the engine is dropped.
pub struct DeliveryEngine {
    connector: Arc<dyn BrokerConnector>,
    policy: DeliveryPolicy,
    sender: mpsc::Sender<OutboundMessage>,
    shared: Arc<Shared>,
    worker: Mutex<Option<WorkerHandle>>,
}

impl DeliveryEngine {
    pub fn new(connector: Arc<dyn BrokerConnector>) -> Self {
        Self::with_policy(connector, DeliveryPolicy::default())
    }

    pub fn with_policy(connector: Arc<dyn BrokerConnector>, policy: DeliveryPolicy) -> Self {
        let (sender, receiver) = mpsc::channel(policy.queue_capacity.max(1));
        Self {
            connector,
            policy,
            sender,
            shared: Arc::new(Shared {
                settings: ArcSwapOption::empty(),
                state: AtomicU8::new(EngineState::Disconnected.as_u8()),
                dropped: AtomicU64::new(0),
                queue: Arc::new(tokio::sync::Mutex::new(receiver)),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Applies new connection settings and makes sure the worker is running.
    ///
    /// Any existing connection is discarded on the worker's next iteration.
    /// A live worker is left alone; a dead or absent one is started.
    pub fn initialize(&self, settings: ConnectionSettings) {
        info!(
            broker = %settings.uri,
            virtual_host = %settings.virtual_host,
            "Applying broker settings"
        );
        self.shared.settings.store(Some(Arc::new(settings)));

        let mut worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        if worker
            .as_ref()
            .is_some_and(|handle| !handle.thread.is_finished())
        {
            return;
        }

        match self.spawn_worker() {
            Ok(handle) => *worker = Some(handle),
            Err(e) => error!(error = %e, "Failed to start delivery worker"),
        }
    }

    /// Queues a message for delivery without blocking.
    ///
    /// Returns false if the queue was full and the message was dropped.
    pub fn enqueue(&self, message: OutboundMessage) -> bool {
        match self.sender.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(message)) => {
                let dropped = self.shared.dropped.fetch_add(1, Ordering::SeqCst) + 1;
                warn!(
                    exchange = %message.exchange,
                    routing_key = %message.routing_key,
                    capacity = self.policy.queue_capacity,
                    dropped,
                    "Delivery queue is full, dropping message"
                );
                false
            }
            Err(TrySendError::Closed(message)) => {
                self.shared.dropped.fetch_add(1, Ordering::SeqCst);
                error!(
                    exchange = %message.exchange,
                    routing_key = %message.routing_key,
                    "Delivery queue is closed, dropping message"
                );
                false
            }
        }
    }

    pub fn state(&self) -> EngineState {
        self.shared.state()
    }

    /// Number of messages waiting for delivery.
    pub fn queued(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// Number of messages dropped without being delivered.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::SeqCst)
    }

    /// Stops the worker, closing the connection, and waits for it to exit.
    ///
    /// Messages still queued stay queued and are delivered if the engine is
    /// initialized again.
    pub fn shutdown(&self) {
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(handle) = handle else {
            return;
        };

        self.shared.set_state(EngineState::ShuttingDown);
        let _ = handle.shutdown.send(true);
        if handle.thread.join().is_err() {
            error!("Delivery worker panicked");
        }
        self.shared.set_state(EngineState::Disconnected);
        info!(queued = self.queued(), "Delivery engine stopped");
    }

    fn spawn_worker(&self) -> std::io::Result<WorkerHandle> {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let worker = Worker {
            connector: Arc::clone(&self.connector),
            policy: self.policy,
            shared: Arc::clone(&self.shared),
        };

        let thread = std::thread::Builder::new()
            .name("event-delivery".to_string())
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build();
                match runtime {
                    Ok(runtime) => runtime.block_on(worker.run(shutdown_rx)),
                    Err(e) => error!(error = %e, "Failed to build delivery runtime"),
                }
            })?;

        Ok(WorkerHandle { thread, shutdown })
    }
}

impl Drop for DeliveryEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// =============================================================================
// Worker
// =============================================================================

/// A live connection and its channel, owned by the worker.
struct Link {
    id: u64,
    settings: Arc<ConnectionSettings>,
    connection: Box<dyn BrokerConnection>,
    channel: Option<Box<dyn BrokerChannel>>,
    closing: Arc<AtomicBool>,
}

impl Link {
    /// Closes the connection as an application-initiated close.
    async fn close(self) {
        self.closing.store(true, Ordering::SeqCst);
        drop(self.channel);
        if let Err(e) = self.connection.close().await {
            debug!(error = %e, "Error while closing broker connection");
        }
    }
}

struct Worker {
    connector: Arc<dyn BrokerConnector>,
    policy: DeliveryPolicy,
    shared: Arc<Shared>,
}

impl Worker {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let queue = Arc::clone(&self.shared.queue);
        let mut queue = queue.lock().await;
        let (signal_tx, mut signals) = mpsc::unbounded_channel();
        let mut link: Option<Link> = None;
        let mut next_id = 0u64;

        info!(
            capacity = self.policy.queue_capacity,
            heartbeat_secs = self.policy.heartbeat.as_secs(),
            "Delivery worker started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            while let Ok(signal) = signals.try_recv() {
                self.handle_shutdown_signal(signal, &mut link);
            }

            let connected = tokio::select! {
                result = self.ensure_channel(&mut link, &mut next_id, &signal_tx) => result,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };

            if let Err(e) = connected {
                self.shared.set_state(EngineState::Disconnected);
                warn!(
                    error = %e,
                    retry_in_secs = self.policy.reconnect_pause.as_secs_f64(),
                    queued = queue.len(),
                    "Broker unavailable, retrying"
                );
                if Self::pause(self.policy.reconnect_pause, &mut shutdown).await {
                    break;
                }
                continue;
            }

            let poll_timeout = self.policy.poll_timeout;
            let message = tokio::select! {
                polled = tokio::time::timeout(poll_timeout, queue.recv()) => polled,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };

            let message = match message {
                Ok(Some(message)) => message,
                // Every sender is gone, so the engine was dropped.
                Ok(None) => break,
                Err(_) => continue,
            };

            self.dispatch(link.as_ref(), &message).await;
        }

        if let Some(current) = link.take() {
            current.close().await;
        }
        self.shared.set_state(EngineState::Disconnected);
        info!("Delivery worker stopped");
    }

    /// Publishes one dequeued message on the link's channel. A message with
    /// no channel to go to is counted as dropped.
    async fn dispatch(&self, link: Option<&Link>, message: &OutboundMessage) {
        let Some(channel) = link.and_then(|l| l.channel.as_deref()) else {
            let dropped = self.shared.dropped.fetch_add(1, Ordering::SeqCst) + 1;
            error!(
                exchange = %message.exchange,
                routing_key = %message.routing_key,
                dropped,
                "No broker channel for dequeued message, dropping it"
            );
            return;
        };

        match Self::deliver(channel, message).await {
            Ok(()) => debug!(
                exchange = %message.exchange,
                routing_key = %message.routing_key,
                bytes = message.body.len(),
                "Message delivered"
            ),
            Err(e) => error!(
                error = %e,
                exchange = %message.exchange,
                routing_key = %message.routing_key,
                "Failed to publish message"
            ),
        }
    }

    /// Makes sure `link` holds an open connection and channel for the latest
    /// settings.
    async fn ensure_channel(
        &self,
        link: &mut Option<Link>,
        next_id: &mut u64,
        signals: &mpsc::UnboundedSender<ShutdownSignal>,
    ) -> Result<(), DeliveryError> {
        let settings = self
            .shared
            .settings
            .load_full()
            .ok_or(DeliveryError::NotConfigured)?;

        let stale = match link.as_ref() {
            Some(current) if !Arc::ptr_eq(&current.settings, &settings) => {
                info!(broker = %settings.uri, "Broker settings changed, reconnecting");
                true
            }
            Some(current) if !current.connection.is_open() => {
                warn!(connection = current.id, "Broker connection is closed, reconnecting");
                true
            }
            _ => false,
        };
        if stale {
            if let Some(old) = link.take() {
                old.close().await;
            }
        }

        if link.is_none() {
            self.shared.set_state(EngineState::Connecting);

            *next_id += 1;
            let closing = Arc::new(AtomicBool::new(false));
            let notifier = ShutdownNotifier::new(*next_id, Arc::clone(&closing), signals.clone());
            let connection = self
                .connector
                .connect(&settings, self.policy.heartbeat, notifier)
                .await?;

            info!(
                connection = *next_id,
                broker = %settings.uri,
                virtual_host = %settings.virtual_host,
                "Connected to broker"
            );
            *link = Some(Link {
                id: *next_id,
                settings,
                connection,
                channel: None,
                closing,
            });
        }

        let current = link.as_mut().ok_or(DeliveryError::NotConfigured)?;
        let channel_open = current.channel.as_ref().is_some_and(|c| c.is_open());
        if !channel_open {
            if current.channel.take().is_some() {
                warn!(connection = current.id, "Broker channel closed, reopening");
            }
            current.channel = Some(current.connection.create_channel().await?);
        }

        self.shared.set_state(EngineState::Connected);
        Ok(())
    }

    fn handle_shutdown_signal(&self, signal: ShutdownSignal, link: &mut Option<Link>) {
        let current = link.as_ref().is_some_and(|l| l.id == signal.connection);

        match signal.cause {
            ShutdownCause::Application => {
                debug!(connection = signal.connection, "Broker connection closed by application");
            }
            ShutdownCause::Connection(reason) => {
                error!(connection = signal.connection, reason = %reason, "Broker connection lost");
                if current {
                    *link = None;
                    self.shared.set_state(EngineState::Disconnected);
                }
            }
            ShutdownCause::Channel(reason) => {
                warn!(connection = signal.connection, reason = %reason, "Broker channel dropped");
            }
        }
    }

    async fn deliver(
        channel: &dyn BrokerChannel,
        message: &OutboundMessage,
    ) -> Result<(), DeliveryError> {
        channel.exchange_exists(&message.exchange).await?;
        channel.publish(message).await
    }

    /// Sleeps for `duration`. Returns true if shutdown was requested.
    async fn pause(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
        }
    }
}
