//! Pull-through cache of decoded signing keys.
//!
//! Decoding a PEM bundle and parsing its certificate is too slow to repeat
//! for every event, so decoded keys are kept per credential for
//! [`FRESHNESS_WINDOW`]. Entries are never evicted otherwise: the cache grows
//! with the number of distinct credentials used by the process, and
//! [`KeyCache::clear`] must be called whenever the credential store is saved
//! so rotated or revoked keys stop being used.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::credentials::{CredentialProvider, ExecutionScope};
use crate::error::SigningError;
use crate::keys::{decode_bundle, PrivateKey};

/// How long a decoded key is served before the credential is re-read.
pub const FRESHNESS_WINDOW: Duration = Duration::from_secs(60);

/// A decoded signing key and the identity it signs as.
#[derive(Debug)]
pub struct SigningIdentity {
    /// Subject of the credential's certificate.
    pub identity: String,

    pub key: PrivateKey,

    /// When the key was extracted from the credential.
    pub extracted_at: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    credential_id: String,
    scope: Option<ExecutionScope>,
}

/// Process-wide cache of decoded signing keys.
///
/// Construct one per process and share it between signers.
pub struct KeyCache {
    credentials: Arc<dyn CredentialProvider>,
    freshness: Duration,
    entries: Mutex<HashMap<CacheKey, Arc<SigningIdentity>>>,
}

impl KeyCache {
    pub fn new(credentials: Arc<dyn CredentialProvider>) -> Self {
        Self::with_freshness(credentials, FRESHNESS_WINDOW)
    }

    /// Creates a cache with a custom freshness window.
    pub fn with_freshness(credentials: Arc<dyn CredentialProvider>, freshness: Duration) -> Self {
        Self {
            credentials,
            freshness,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the decoded key for a credential, extracting it again when the
    /// cached entry is missing or older than the freshness window.
    pub fn get(
        &self,
        credential_id: &str,
        scope: Option<&ExecutionScope>,
    ) -> Result<Arc<SigningIdentity>, SigningError> {
        let key = CacheKey {
            credential_id: credential_id.to_string(),
            scope: scope.cloned(),
        };

        // Held across extraction so concurrent misses decode only once.
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(entry) = entries.get(&key) {
            if entry.extracted_at.elapsed() < self.freshness {
                return Ok(Arc::clone(entry));
            }
            debug!(credential_id, "Cached signing key is stale, re-extracting");
        }

        let credential = self
            .credentials
            .find(credential_id, scope)?
            .ok_or_else(|| SigningError::CredentialNotFound(credential_id.to_string()))?;

        let decoded = decode_bundle(credential_id, &credential.bundle)?;
        let entry = Arc::new(SigningIdentity {
            identity: decoded.identity,
            key: decoded.key,
            extracted_at: Instant::now(),
        });

        debug!(
            credential_id,
            identity = %entry.identity,
            key_algorithm = %entry.key.algorithm(),
            "Extracted signing key"
        );

        entries.insert(key, Arc::clone(&entry));
        Ok(entry)
    }

    /// Drops every cached key regardless of age.
    pub fn clear(&self) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let dropped = entries.len();
        entries.clear();
        info!(dropped, "Signing key cache cleared");
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{ec_bundle, CountingCredentials};
    use super::*;
    use crate::credentials::StaticCredentials;
    use crate::keys::KeyAlgorithm;

    fn cache_with(freshness: Duration) -> (Arc<CountingCredentials>, KeyCache) {
        let mut creds = StaticCredentials::new();
        creds.insert("signer", ec_bundle("Build Signer"));
        creds.insert("empty", Vec::new());
        let creds = Arc::new(CountingCredentials::new(creds));
        let cache = KeyCache::with_freshness(creds.clone(), freshness);
        (creds, cache)
    }

    #[test]
    fn test_extracts_identity_and_key() {
        let (_, cache) = cache_with(FRESHNESS_WINDOW);
        let entry = cache.get("signer", None).unwrap();
        assert_eq!(entry.identity, "CN=Build Signer");
        assert_eq!(entry.key.algorithm(), KeyAlgorithm::EcP256);
    }

    #[test]
    fn test_fresh_entry_is_reused() {
        let (creds, cache) = cache_with(FRESHNESS_WINDOW);
        let first = cache.get("signer", None).unwrap();
        let second = cache.get("signer", None).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.extracted_at, second.extracted_at);
        assert_eq!(creds.lookups(), 1);
    }

    #[test]
    fn test_stale_entry_is_re_extracted() {
        let (creds, cache) = cache_with(Duration::from_millis(20));
        let first = cache.get("signer", None).unwrap();
        std::thread::sleep(Duration::from_millis(40));
        let second = cache.get("signer", None).unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert!(second.extracted_at > first.extracted_at);
        assert_eq!(creds.lookups(), 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_clear_forces_re_extraction() {
        let (creds, cache) = cache_with(FRESHNESS_WINDOW);
        let first = cache.get("signer", None).unwrap();
        cache.clear();
        assert!(cache.is_empty());

        let second = cache.get("signer", None).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(creds.lookups(), 2);
    }

    #[test]
    fn test_missing_and_empty_credentials() {
        let (_, cache) = cache_with(FRESHNESS_WINDOW);

        let err = cache.get("nope", None).unwrap_err();
        assert_eq!(err, SigningError::CredentialNotFound("nope".to_string()));

        let err = cache.get("empty", None).unwrap_err();
        assert!(matches!(err, SigningError::InvalidCredentialConfiguration { .. }));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_scopes_are_cached_separately() {
        let mut creds = StaticCredentials::new();
        creds.insert_scoped(ExecutionScope::job("a"), "deploy", ec_bundle("Job A"));
        creds.insert_scoped(ExecutionScope::job("b"), "deploy", ec_bundle("Job B"));
        let cache = KeyCache::new(Arc::new(creds));

        let a = cache.get("deploy", Some(&ExecutionScope::job("a"))).unwrap();
        let b = cache.get("deploy", Some(&ExecutionScope::job("b"))).unwrap();
        assert_eq!(a.identity, "CN=Job A");
        assert_eq!(b.identity, "CN=Job B");
        assert!(cache.get("deploy", None).is_err());
    }
}
