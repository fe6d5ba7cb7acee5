//! Event signers.
//!
//! Two variants share the [`EventSigner`] contract:
//! - [`SystemSigner`] signs with the administrator-managed credential and can
//!   be switched off in settings
//! - [`ScopedSigner`] signs with a credential supplied by a job, looked up
//!   inside that job's scope

use std::sync::Arc;

use arc_swap::ArcSwap;
use base64::Engine;
use herald_events::{canonicalize, Event, Security};
use tracing::debug;

use crate::cache::KeyCache;
use crate::credentials::ExecutionScope;
use crate::error::SigningError;
use crate::keys::{signature_algorithm, HashAlgorithm, PrivateKey, PublicKey};

/// Signs events in place.
pub trait EventSigner: Send + Sync {
    /// Populates `meta.security` and returns true, or leaves the event
    /// untouched and returns false when signing is disabled.
    fn sign(&self, event: &mut Event) -> Result<bool, SigningError>;
}

/// Signs `event` with `key`, recording `identity` as the author.
///
/// The event is only modified when signing succeeds. Existing sequence
/// protection entries are kept.
pub fn sign_event(
    event: &mut Event,
    key: &PrivateKey,
    identity: &str,
    hash: HashAlgorithm,
) -> Result<(), SigningError> {
    let alg = signature_algorithm(key.algorithm(), hash)?;

    let mut security = Security::unsigned(identity, alg);
    if let Some(existing) = event.security() {
        security.sequence_protection = existing.sequence_protection.clone();
    }

    let mut signed = event.clone();
    signed.set_security(security);

    let canonical = canonicalize(&signed)?;
    let signature = key.sign(alg, &canonical)?;
    signed.set_signature(base64::engine::general_purpose::STANDARD.encode(signature));

    debug!(
        event_id = %signed.id(),
        event_type = signed.event_type(),
        alg = %alg,
        author = identity,
        "Event signed"
    );

    *event = signed;
    Ok(())
}

/// Checks the signature carried in `meta.security` against `key`.
pub fn verify_event(event: &Event, key: &PublicKey) -> Result<(), SigningError> {
    let protection = event
        .security()
        .and_then(|s| s.integrity_protection.as_ref())
        .ok_or_else(|| SigningError::VerificationFailed("event is not signed".to_string()))?;

    let signature = base64::engine::general_purpose::STANDARD
        .decode(protection.signature.trim())
        .map_err(|e| SigningError::VerificationFailed(format!("signature is not base64: {}", e)))?;

    let canonical = canonicalize(event)?;
    key.verify(protection.alg, &canonical, &signature)
}

// =============================================================================
// System Signer
// =============================================================================

/// Administrator-controlled signing settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SigningSettings {
    pub enabled: bool,

    /// Id of the system-wide signing credential.
    pub credential_id: Option<String>,

    pub hash: HashAlgorithm,
}

/// Signs with the system-wide credential.
pub struct SystemSigner {
    cache: Arc<KeyCache>,
    settings: ArcSwap<SigningSettings>,
}

impl SystemSigner {
    pub fn new(cache: Arc<KeyCache>, settings: SigningSettings) -> Self {
        Self {
            cache,
            settings: ArcSwap::from_pointee(settings),
        }
    }

    /// Replaces the signing settings.
    pub fn update_settings(&self, settings: SigningSettings) {
        self.settings.store(Arc::new(settings));
    }

    pub fn settings(&self) -> Arc<SigningSettings> {
        self.settings.load_full()
    }

    pub fn key_cache(&self) -> &Arc<KeyCache> {
        &self.cache
    }
}

impl EventSigner for SystemSigner {
    fn sign(&self, event: &mut Event) -> Result<bool, SigningError> {
        let settings = self.settings.load_full();
        if !settings.enabled {
            return Ok(false);
        }

        let credential_id = settings
            .credential_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| {
                SigningError::invalid_credential(
                    "<system>",
                    "system signing is enabled but no credential is configured",
                )
            })?;

        let entry = self.cache.get(credential_id, None)?;
        sign_event(event, &entry.key, &entry.identity, settings.hash)?;
        Ok(true)
    }
}

// =============================================================================
// Scoped Signer
// =============================================================================

/// Signs with a credential chosen by a job, resolved inside its scope.
pub struct ScopedSigner {
    cache: Arc<KeyCache>,
    credential_id: String,
    scope: ExecutionScope,
    hash: HashAlgorithm,
}

impl ScopedSigner {
    pub fn new(
        cache: Arc<KeyCache>,
        credential_id: impl Into<String>,
        scope: ExecutionScope,
        hash: HashAlgorithm,
    ) -> Self {
        Self {
            cache,
            credential_id: credential_id.into(),
            scope,
            hash,
        }
    }
}

impl EventSigner for ScopedSigner {
    fn sign(&self, event: &mut Event) -> Result<bool, SigningError> {
        let entry = self.cache.get(&self.credential_id, Some(&self.scope))?;
        sign_event(event, &entry.key, &entry.identity, self.hash)?;
        Ok(true)
    }
}
