//! Error types for publishing and delivery.

use herald_schema::SchemaError;
use herald_signing::SigningError;
use thiserror::Error;

/// Broad classification of a publish failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A user must fix credentials or settings. Never retried automatically.
    Configuration,

    /// The credential store could not be read. The same publish may
    /// succeed later.
    Unavailable,

    /// Unsupported algorithm, bad key or signature failure.
    Crypto,

    /// Schema missing or violated. The event was not sent.
    Validation,

    /// The event could not be encoded.
    Serialization,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Crypto => "crypto",
            ErrorKind::Validation => "validation",
            ErrorKind::Serialization => "serialization",
        };
        write!(f, "{}", s)
    }
}

/// Errors surfaced synchronously by the publish entry points.
///
/// Transport failures never appear here: by the time a message reaches the
/// broker the caller has already returned.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("signing failed: {0}")]
    Signing(#[from] SigningError),

    #[error("{0}")]
    Schema(#[from] SchemaError),

    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl PublishError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PublishError::Signing(e) => match e {
                SigningError::CredentialNotFound(_)
                | SigningError::InvalidCredentialConfiguration { .. } => ErrorKind::Configuration,
                SigningError::CredentialStore(_) => ErrorKind::Unavailable,
                SigningError::Canonicalization(_) => ErrorKind::Serialization,
                SigningError::KeyDecoding(_)
                | SigningError::UnsupportedAlgorithm { .. }
                | SigningError::Crypto(_)
                | SigningError::VerificationFailed(_) => ErrorKind::Crypto,
            },
            PublishError::Schema(SchemaError::Serialization(_)) => ErrorKind::Serialization,
            PublishError::Schema(_) => ErrorKind::Validation,
            PublishError::Serialization(_) => ErrorKind::Serialization,
        }
    }

    /// Returns true if the same publish may succeed later without any
    /// configuration change.
    pub fn is_retryable(&self) -> bool {
        match self {
            PublishError::Signing(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Errors raised by broker connections and channels.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("delivery engine is not configured")]
    NotConfigured,

    #[error("invalid broker uri: {0}")]
    InvalidUri(String),

    #[error("broker connection failed: {0}")]
    Connection(String),

    #[error("channel failure: {0}")]
    Channel(String),

    #[error("exchange {exchange} is not available: {reason}")]
    ExchangeNotFound { exchange: String, reason: String },

    #[error("publish failed: {0}")]
    Publish(String),
}
