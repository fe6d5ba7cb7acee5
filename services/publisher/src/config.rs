//! Configuration for the event publisher.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use herald_signing::{HashAlgorithm, SigningSettings};

use crate::delivery::ConnectionSettings;
use crate::publisher::PublisherSettings;
use crate::routing::{FixedRoutingKey, RoutingKeyStrategy, SepiaRoutingKeys};

/// How routing keys are computed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingConfig {
    /// `eiffel.<family>.<type>.<tag>.<domainId>`.
    Sepia { tag: Option<String> },

    /// One key for every event.
    Fixed(String),
}

impl RoutingConfig {
    pub fn strategy(&self) -> Box<dyn RoutingKeyStrategy> {
        match self {
            RoutingConfig::Sepia { tag: Some(tag) } => Box::new(SepiaRoutingKeys::with_tag(tag)),
            RoutingConfig::Sepia { tag: None } => Box::new(SepiaRoutingKeys::new()),
            RoutingConfig::Fixed(key) => Box::new(FixedRoutingKey::new(key)),
        }
    }
}

/// Publisher configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether events are published at all.
    pub enabled: bool,

    /// Broker connection parameters.
    pub connection: ConnectionSettings,

    /// Exchange events are published to.
    pub exchange: String,

    /// `app-id` message property.
    pub app_id: Option<String>,

    /// Publish with delivery mode 2 instead of 1.
    pub persistent: bool,

    /// System-wide signing.
    pub signing: SigningSettings,

    pub routing: RoutingConfig,

    /// Directory holding `<credential-id>.pem` bundles.
    pub credentials_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let enabled = parse_bool(var("HERALD_ENABLED"), true).context("HERALD_ENABLED")?;

        let mut connection = ConnectionSettings::new(
            var("HERALD_BROKER_URI").unwrap_or_else(|| "amqp://127.0.0.1:5672".to_string()),
        )
        .with_virtual_host(var("HERALD_VIRTUAL_HOST").unwrap_or_else(|| "/".to_string()));
        if let Some(username) = var("HERALD_USERNAME") {
            connection = connection.with_credentials(
                username,
                var("HERALD_PASSWORD").unwrap_or_default(),
            );
        }

        let exchange = var("HERALD_EXCHANGE").unwrap_or_else(|| "eiffel".to_string());
        let app_id = Some(var("HERALD_APP_ID").unwrap_or_else(|| "herald".to_string()));
        let persistent = parse_bool(var("HERALD_PERSISTENT"), true).context("HERALD_PERSISTENT")?;

        let hash = match var("HERALD_SIGNING_HASH") {
            Some(value) => value
                .parse::<HashAlgorithm>()
                .map_err(anyhow::Error::msg)
                .context("HERALD_SIGNING_HASH")?,
            None => HashAlgorithm::default(),
        };
        let signing = SigningSettings {
            enabled: parse_bool(var("HERALD_SIGNING_ENABLED"), false)
                .context("HERALD_SIGNING_ENABLED")?,
            credential_id: var("HERALD_SIGNING_CREDENTIAL_ID"),
            hash,
        };

        let routing = parse_routing(
            var("HERALD_ROUTING_KEY").as_deref(),
            var("HERALD_ROUTING_TAG"),
        )
        .context("HERALD_ROUTING_KEY")?;

        let credentials_dir = var("HERALD_CREDENTIALS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/etc/herald/credentials"));

        let log_level = var("HERALD_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            enabled,
            connection,
            exchange,
            app_id,
            persistent,
            signing,
            routing,
            credentials_dir,
            log_level,
        })
    }

    /// Settings the orchestrator reads on every publish.
    pub fn publisher_settings(&self) -> PublisherSettings {
        PublisherSettings {
            enabled: self.enabled,
            exchange: self.exchange.clone(),
            app_id: self.app_id.clone(),
            persistent: self.persistent,
        }
    }
}

fn parse_bool(value: Option<String>, default: bool) -> Result<bool> {
    let Some(value) = value else {
        return Ok(default);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("expected a boolean, got {:?}", other),
    }
}

fn parse_routing(strategy: Option<&str>, tag: Option<String>) -> Result<RoutingConfig> {
    match strategy.map(str::trim) {
        None | Some("sepia") => Ok(RoutingConfig::Sepia { tag }),
        Some(other) => match other.strip_prefix("fixed:") {
            Some(key) if !key.is_empty() => Ok(RoutingConfig::Fixed(key.to_string())),
            _ => bail!("expected `sepia` or `fixed:<key>`, got {:?}", other),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert!(config.enabled);
        assert_eq!(config.connection.uri, "amqp://127.0.0.1:5672");
        assert_eq!(config.connection.virtual_host, "/");
        assert!(config.connection.username.is_none());
        assert_eq!(config.exchange, "eiffel");
        assert_eq!(config.app_id.as_deref(), Some("herald"));
        assert!(config.persistent);
        assert!(!config.signing.enabled);
        assert_eq!(config.signing.hash, HashAlgorithm::Sha256);
        assert_eq!(config.routing, RoutingConfig::Sepia { tag: None });
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("HERALD_ENABLED", "false"),
            ("HERALD_BROKER_URI", "amqp://mq.example.test:5672"),
            ("HERALD_VIRTUAL_HOST", "builds"),
            ("HERALD_USERNAME", "ci"),
            ("HERALD_PASSWORD", "s3cret"),
            ("HERALD_PERSISTENT", "0"),
            ("HERALD_SIGNING_ENABLED", "yes"),
            ("HERALD_SIGNING_CREDENTIAL_ID", "build-signer"),
            ("HERALD_SIGNING_HASH", "SHA-384"),
            ("HERALD_ROUTING_KEY", "fixed:builds"),
        ])
        .unwrap();

        assert!(!config.enabled);
        assert_eq!(config.connection.virtual_host, "builds");
        assert_eq!(config.connection.password.as_deref(), Some("s3cret"));
        assert!(!config.persistent);
        assert!(config.signing.enabled);
        assert_eq!(config.signing.credential_id.as_deref(), Some("build-signer"));
        assert_eq!(config.signing.hash, HashAlgorithm::Sha384);
        assert_eq!(config.routing, RoutingConfig::Fixed("builds".to_string()));

        let settings = config.publisher_settings();
        assert!(!settings.enabled);
        assert!(!settings.persistent);
    }

    #[test]
    fn test_sepia_tag() {
        let config = config(&[("HERALD_ROUTING_KEY", "sepia"), ("HERALD_ROUTING_TAG", "nightly")])
            .unwrap();
        assert_eq!(
            config.routing,
            RoutingConfig::Sepia {
                tag: Some("nightly".to_string())
            }
        );
    }

    #[test]
    fn test_invalid_values() {
        assert!(config(&[("HERALD_ENABLED", "maybe")]).is_err());
        assert!(config(&[("HERALD_SIGNING_HASH", "md5")]).is_err());
        assert!(config(&[("HERALD_ROUTING_KEY", "fixed:")]).is_err());
        assert!(config(&[("HERALD_ROUTING_KEY", "random")]).is_err());
    }
}
