//! Credential provider backed by PEM files on disk.
//!
//! Layout:
//!
//! ```text
//! <root>/<credential-id>.pem              system signer only
//! <root>/<job>/<credential-id>.pem        visible to every run of <job>
//! <root>/<job>/<run>/<credential-id>.pem  visible to one run
//! ```
//!
//! A scoped lookup only searches its job directory, so a job can never sign
//! with a system credential.

use std::path::PathBuf;

use herald_signing::{Credential, CredentialProvider, ExecutionScope, SigningError};
use tracing::debug;

/// Reads credentials from a directory tree.
#[derive(Debug, Clone)]
pub struct DirectoryCredentials {
    root: PathBuf,
}

impl DirectoryCredentials {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Candidate paths for `credential_id`, most specific first.
    fn candidates(
        &self,
        credential_id: &str,
        scope: Option<&ExecutionScope>,
    ) -> Result<Vec<PathBuf>, SigningError> {
        let file = format!("{}.pem", credential_id);
        check_segment(credential_id, credential_id)?;

        let Some(scope) = scope else {
            return Ok(vec![self.root.join(&file)]);
        };

        check_segment(credential_id, &scope.job)?;
        let job_dir = self.root.join(&scope.job);
        let mut paths = Vec::with_capacity(2);
        if let Some(run) = &scope.run {
            check_segment(credential_id, run)?;
            paths.push(job_dir.join(run).join(&file));
        }
        paths.push(job_dir.join(&file));
        Ok(paths)
    }
}

/// Rejects path segments that would escape the credential directory.
fn check_segment(credential_id: &str, segment: &str) -> Result<(), SigningError> {
    let valid = !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.contains(['/', '\\', '\0']);
    if valid {
        Ok(())
    } else {
        Err(SigningError::InvalidCredentialConfiguration {
            credential_id: credential_id.to_string(),
            reason: format!("{:?} is not a valid path segment", segment),
        })
    }
}

impl CredentialProvider for DirectoryCredentials {
    fn find(
        &self,
        credential_id: &str,
        scope: Option<&ExecutionScope>,
    ) -> Result<Option<Credential>, SigningError> {
        for path in self.candidates(credential_id, scope)? {
            match std::fs::read(&path) {
                Ok(bundle) => {
                    debug!(credential_id, path = %path.display(), "Loaded credential");
                    return Ok(Some(Credential {
                        id: credential_id.to_string(),
                        bundle,
                    }));
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(SigningError::CredentialStore(format!(
                        "failed to read {}: {}",
                        path.display(),
                        e
                    )))
                }
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    fn write(path: &Path, contents: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_lookup_order() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("signer.pem"), "global");
        write(&dir.path().join("release/signer.pem"), "job");
        write(&dir.path().join("release/7/signer.pem"), "run");
        let creds = DirectoryCredentials::new(dir.path());

        let found = creds.find("signer", None).unwrap().unwrap();
        assert_eq!(found.bundle, b"global");

        let found = creds
            .find("signer", Some(&ExecutionScope::job("release")))
            .unwrap()
            .unwrap();
        assert_eq!(found.bundle, b"job");

        let found = creds
            .find("signer", Some(&ExecutionScope::run("release", "7")))
            .unwrap()
            .unwrap();
        assert_eq!(found.bundle, b"run");

        let found = creds
            .find("signer", Some(&ExecutionScope::run("release", "8")))
            .unwrap()
            .unwrap();
        assert_eq!(found.bundle, b"job");

        assert!(creds.find("missing", None).unwrap().is_none());
    }

    #[test]
    fn test_scoped_lookup_never_reaches_system_credentials() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("system.pem"), "system");
        let creds = DirectoryCredentials::new(dir.path());

        assert!(creds.find("system", None).unwrap().is_some());
        assert!(creds
            .find("system", Some(&ExecutionScope::job("untrusted-job")))
            .unwrap()
            .is_none());
        assert!(creds
            .find("system", Some(&ExecutionScope::run("untrusted-job", "1")))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let creds = DirectoryCredentials::new(dir.path());

        let err = creds.find("../etc/passwd", None).unwrap_err();
        assert!(err.is_configuration_error());

        let err = creds
            .find("signer", Some(&ExecutionScope::job("..")))
            .unwrap_err();
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_unreadable_entry_is_store_error() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where a file is expected cannot be read as one.
        std::fs::create_dir_all(dir.path().join("signer.pem")).unwrap();
        let creds = DirectoryCredentials::new(dir.path());

        let err = creds.find("signer", None).unwrap_err();
        assert!(err.is_retryable());
    }
}
