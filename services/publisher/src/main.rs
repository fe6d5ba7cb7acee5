//! herald event publisher
//!
//! Sidecar that reads newline-delimited event JSON on stdin and publishes
//! each event to the configured AMQP exchange.
//!
//! ## Signals
//!
//! - **SIGHUP**: drops cached signing keys so rotated credentials take effect
//! - **SIGINT**: stops reading input and shuts the delivery engine down

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use herald_events::Event;
use herald_publisher::amqp::AmqpConnector;
use herald_publisher::config::Config;
use herald_publisher::credentials::DirectoryCredentials;
use herald_publisher::{DeliveryEngine, EventPublisher};
use herald_schema::SchemaValidator;
use herald_signing::{KeyCache, SystemSigner};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// How long to wait for the queue to drain once input is exhausted.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(
        enabled = config.enabled,
        broker = %config.connection.uri,
        virtual_host = %config.connection.virtual_host,
        exchange = %config.exchange,
        signing_enabled = config.signing.enabled,
        credentials_dir = %config.credentials_dir.display(),
        "Starting herald event publisher"
    );

    let credentials = Arc::new(DirectoryCredentials::new(&config.credentials_dir));
    let key_cache = Arc::new(KeyCache::new(credentials));
    let system_signer = Arc::new(SystemSigner::new(key_cache, config.signing.clone()));

    let engine = Arc::new(DeliveryEngine::new(Arc::new(AmqpConnector::new())));
    if config.enabled {
        engine.initialize(config.connection.clone());
    }

    let publisher = EventPublisher::new(
        config.publisher_settings(),
        Arc::clone(&engine),
        Arc::new(SchemaValidator::new()),
        system_signer,
        config.routing.strategy(),
    );

    let mut hangup = signal(SignalKind::hangup()).context("failed to install SIGHUP handler")?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut queued = 0u64;
    let mut skipped = 0u64;

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Event>(&line) {
                        Ok(mut event) => {
                            if publisher.publish(&mut event, true).is_some() {
                                queued += 1;
                            } else {
                                skipped += 1;
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "Skipping malformed event");
                            skipped += 1;
                        }
                    }
                }
                Ok(None) => {
                    info!("Input closed");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Failed to read input");
                    break;
                }
            },
            _ = hangup.recv() => {
                info!("Received SIGHUP, clearing signing key cache");
                publisher.on_credentials_saved();
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    // Give the worker a chance to flush what is already queued
    let deadline = Instant::now() + DRAIN_TIMEOUT;
    while engine.queued() > 0 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    info!(
        queued,
        skipped,
        undelivered = engine.queued(),
        dropped = engine.dropped(),
        "Shutting down"
    );

    let stopping = Arc::clone(&engine);
    tokio::task::spawn_blocking(move || stopping.shutdown())
        .await
        .context("delivery engine shutdown panicked")?;

    info!("herald shutdown complete");
    Ok(())
}
