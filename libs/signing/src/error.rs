//! Error types for signing and verification.

use herald_events::EventError;
use thiserror::Error;

/// Errors that can occur while signing or verifying events.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SigningError {
    /// No credential exists with this id in the requested scope.
    #[error("credential not found: {0}")]
    CredentialNotFound(String),

    /// The credential exists but cannot be used for signing: it is empty,
    /// holds no private key, or holds no certificate.
    #[error("invalid credential configuration for {credential_id}: {reason}")]
    InvalidCredentialConfiguration {
        credential_id: String,
        reason: String,
    },

    /// The key or certificate material could not be decoded.
    #[error("failed to decode key material: {0}")]
    KeyDecoding(String),

    /// The key type and hash strength do not map to a signature algorithm.
    #[error("unsupported algorithm combination: {key} key with {hash}")]
    UnsupportedAlgorithm { key: String, hash: String },

    /// The credential store could not be read.
    #[error("credential store error: {0}")]
    CredentialStore(String),

    /// The event could not be canonicalized.
    #[error("canonicalization failed: {0}")]
    Canonicalization(String),

    /// Signature computation failed.
    #[error("cryptographic failure: {0}")]
    Crypto(String),

    /// The signature does not match the payload.
    #[error("signature verification failed: {0}")]
    VerificationFailed(String),
}

impl SigningError {
    /// Returns true if a user must fix configuration before signing can
    /// succeed. These errors are never retried automatically.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            SigningError::CredentialNotFound(_)
                | SigningError::InvalidCredentialConfiguration { .. }
        )
    }

    /// Returns true if the failure came from the environment and the same
    /// request may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SigningError::CredentialStore(_))
    }

    pub(crate) fn invalid_credential(credential_id: &str, reason: impl Into<String>) -> Self {
        SigningError::InvalidCredentialConfiguration {
            credential_id: credential_id.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<EventError> for SigningError {
    fn from(err: EventError) -> Self {
        SigningError::Canonicalization(err.to_string())
    }
}

impl From<signature::Error> for SigningError {
    fn from(err: signature::Error) -> Self {
        SigningError::Crypto(err.to_string())
    }
}
