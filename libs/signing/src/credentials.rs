//! Credential lookup seam.
//!
//! Credential storage lives outside this crate. Callers provide a
//! [`CredentialProvider`] that resolves an opaque id to a PEM bundle holding a
//! private key and its certificate.

use std::collections::HashMap;

use crate::error::SigningError;

/// The execution context a job-scoped credential lookup is restricted to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExecutionScope {
    /// Job (pipeline) name.
    pub job: String,

    /// Run identifier within the job, when the lookup is tied to one run.
    pub run: Option<String>,
}

impl ExecutionScope {
    pub fn job(job: impl Into<String>) -> Self {
        Self {
            job: job.into(),
            run: None,
        }
    }

    pub fn run(job: impl Into<String>, run: impl Into<String>) -> Self {
        Self {
            job: job.into(),
            run: Some(run.into()),
        }
    }
}

impl std::fmt::Display for ExecutionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.run {
            Some(run) => write!(f, "{}#{}", self.job, run),
            None => write!(f, "{}", self.job),
        }
    }
}

/// A key-bearing credential.
#[derive(Clone)]
pub struct Credential {
    pub id: String,

    /// PEM bundle with at least one private key and one certificate.
    pub bundle: Vec<u8>,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("bundle", &format_args!("<{} bytes>", self.bundle.len()))
            .finish()
    }
}

/// Resolves credentials by id.
///
/// `Ok(None)` means the credential does not exist in the given scope; `Err`
/// means the store itself could not be consulted.
pub trait CredentialProvider: Send + Sync {
    fn find(
        &self,
        credential_id: &str,
        scope: Option<&ExecutionScope>,
    ) -> Result<Option<Credential>, SigningError>;
}

/// In-memory provider, keyed by id and optional scope.
///
/// Unscoped entries belong to the system signer and are invisible to scoped
/// lookups.
#[derive(Debug, Default, Clone)]
pub struct StaticCredentials {
    entries: HashMap<(Option<ExecutionScope>, String), Credential>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a system-wide credential.
    pub fn insert(&mut self, id: impl Into<String>, bundle: impl Into<Vec<u8>>) {
        let id = id.into();
        self.entries.insert(
            (None, id.clone()),
            Credential {
                id,
                bundle: bundle.into(),
            },
        );
    }

    /// Registers a credential visible only inside `scope`.
    pub fn insert_scoped(
        &mut self,
        scope: ExecutionScope,
        id: impl Into<String>,
        bundle: impl Into<Vec<u8>>,
    ) {
        let id = id.into();
        self.entries.insert(
            (Some(scope), id.clone()),
            Credential {
                id,
                bundle: bundle.into(),
            },
        );
    }
}

impl CredentialProvider for StaticCredentials {
    fn find(
        &self,
        credential_id: &str,
        scope: Option<&ExecutionScope>,
    ) -> Result<Option<Credential>, SigningError> {
        let Some(scope) = scope else {
            return Ok(self
                .entries
                .get(&(None, credential_id.to_string()))
                .cloned());
        };

        // Scoped lookups never reach system credentials. A run-level lookup
        // also sees credentials of its job.
        let found = self
            .entries
            .get(&(Some(scope.clone()), credential_id.to_string()))
            .or_else(|| {
                scope.run.as_ref().and_then(|_| {
                    self.entries.get(&(
                        Some(ExecutionScope::job(scope.job.clone())),
                        credential_id.to_string(),
                    ))
                })
            });
        Ok(found.cloned())
    }
}
