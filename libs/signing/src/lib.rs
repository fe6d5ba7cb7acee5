//! # herald-signing
//!
//! Attaches verifiable signatures to events.
//!
//! ## Flow
//!
//! 1. A credential id (system-wide, or supplied by a job) is resolved through
//!    a [`CredentialProvider`]
//! 2. The [`KeyCache`] turns the credential's PEM bundle into a decoded
//!    private key plus the certificate subject used as author identity
//! 3. The event is canonicalized with its signature field emptied and signed
//!    with the algorithm implied by the key type and configured hash
//! 4. `meta.security` is populated with the identity, algorithm and base64
//!    signature
//!
//! Signing failures are split into configuration errors (fix the
//! credential) and retryable errors (the credential store could not be
//! read); see [`SigningError::is_configuration_error`].

mod cache;
mod credentials;
mod error;
mod keys;
mod signer;

pub use cache::{KeyCache, SigningIdentity, FRESHNESS_WINDOW};
pub use credentials::{Credential, CredentialProvider, ExecutionScope, StaticCredentials};
pub use error::SigningError;
pub use keys::{signature_algorithm, HashAlgorithm, KeyAlgorithm, PrivateKey, PublicKey};
pub use signer::{
    sign_event, verify_event, EventSigner, ScopedSigner, SigningSettings, SystemSigner,
};
