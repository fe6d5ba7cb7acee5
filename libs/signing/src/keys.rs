//! Key material: PEM bundle decoding, the signature algorithm table and the
//! raw sign/verify primitives.

use std::str::FromStr;

use herald_events::SignatureAlgorithm;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Sha256, Sha384, Sha512};
use signature::{SignatureEncoding, Signer, Verifier};

use crate::error::SigningError;

// =============================================================================
// Hash and Key Algorithms
// =============================================================================

/// Configured hash strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum HashAlgorithm {
    #[default]
    #[serde(rename = "SHA-256")]
    Sha256,
    #[serde(rename = "SHA-384")]
    Sha384,
    #[serde(rename = "SHA-512")]
    Sha512,
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HashAlgorithm::Sha256 => "SHA-256",
            HashAlgorithm::Sha384 => "SHA-384",
            HashAlgorithm::Sha512 => "SHA-512",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for HashAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().replace('_', "-").as_str() {
            "SHA-256" | "SHA256" => Ok(HashAlgorithm::Sha256),
            "SHA-384" | "SHA384" => Ok(HashAlgorithm::Sha384),
            "SHA-512" | "SHA512" => Ok(HashAlgorithm::Sha512),
            _ => Err(format!("unknown hash algorithm: {}", s)),
        }
    }
}

/// The algorithm family of a decoded private key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyAlgorithm {
    Rsa,
    EcP256,
    EcP384,
    EcP521,
}

impl std::fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            KeyAlgorithm::Rsa => "RSA",
            KeyAlgorithm::EcP256 => "EC P-256",
            KeyAlgorithm::EcP384 => "EC P-384",
            KeyAlgorithm::EcP521 => "EC P-521",
        };
        write!(f, "{}", s)
    }
}

/// Maps a key type and hash strength to the signature algorithm identifier.
///
/// RSA keys sign with PKCS#1 v1.5 at any strength. EC keys only sign with the
/// hash that matches their curve.
pub fn signature_algorithm(
    key: KeyAlgorithm,
    hash: HashAlgorithm,
) -> Result<SignatureAlgorithm, SigningError> {
    match (key, hash) {
        (KeyAlgorithm::Rsa, HashAlgorithm::Sha256) => Ok(SignatureAlgorithm::RS256),
        (KeyAlgorithm::Rsa, HashAlgorithm::Sha384) => Ok(SignatureAlgorithm::RS384),
        (KeyAlgorithm::Rsa, HashAlgorithm::Sha512) => Ok(SignatureAlgorithm::RS512),
        (KeyAlgorithm::EcP256, HashAlgorithm::Sha256) => Ok(SignatureAlgorithm::ES256),
        (KeyAlgorithm::EcP384, HashAlgorithm::Sha384) => Ok(SignatureAlgorithm::ES384),
        (KeyAlgorithm::EcP521, HashAlgorithm::Sha512) => Ok(SignatureAlgorithm::ES512),
        (key, hash) => Err(SigningError::UnsupportedAlgorithm {
            key: key.to_string(),
            hash: hash.to_string(),
        }),
    }
}

// =============================================================================
// Private Keys
// =============================================================================

/// A decoded private key.
#[derive(Clone)]
pub enum PrivateKey {
    Rsa(Box<RsaPrivateKey>),
    EcP256(p256::SecretKey),
    EcP384(p384::SecretKey),
    EcP521(p521::SecretKey),
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PrivateKey({})", self.algorithm())
    }
}

impl PrivateKey {
    pub fn algorithm(&self) -> KeyAlgorithm {
        match self {
            PrivateKey::Rsa(_) => KeyAlgorithm::Rsa,
            PrivateKey::EcP256(_) => KeyAlgorithm::EcP256,
            PrivateKey::EcP384(_) => KeyAlgorithm::EcP384,
            PrivateKey::EcP521(_) => KeyAlgorithm::EcP521,
        }
    }

    /// Decodes a PKCS#8 `PRIVATE KEY` document.
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self, SigningError> {
        if let Ok(key) = <RsaPrivateKey as rsa::pkcs8::DecodePrivateKey>::from_pkcs8_der(der) {
            return Ok(PrivateKey::Rsa(Box::new(key)));
        }
        if let Ok(key) = <p256::SecretKey as p256::pkcs8::DecodePrivateKey>::from_pkcs8_der(der) {
            return Ok(PrivateKey::EcP256(key));
        }
        if let Ok(key) = <p384::SecretKey as p384::pkcs8::DecodePrivateKey>::from_pkcs8_der(der) {
            return Ok(PrivateKey::EcP384(key));
        }
        if let Ok(key) = <p521::SecretKey as p521::pkcs8::DecodePrivateKey>::from_pkcs8_der(der) {
            return Ok(PrivateKey::EcP521(key));
        }
        Err(SigningError::KeyDecoding(
            "PKCS#8 key is not an RSA, P-256, P-384 or P-521 key".to_string(),
        ))
    }

    /// Decodes a PKCS#1 `RSA PRIVATE KEY` document.
    pub fn from_pkcs1_der(der: &[u8]) -> Result<Self, SigningError> {
        RsaPrivateKey::from_pkcs1_der(der)
            .map(|key| PrivateKey::Rsa(Box::new(key)))
            .map_err(|e| SigningError::KeyDecoding(format!("invalid PKCS#1 RSA key: {}", e)))
    }

    /// Decodes a SEC1 `EC PRIVATE KEY` document.
    pub fn from_sec1_der(der: &[u8]) -> Result<Self, SigningError> {
        if let Ok(key) = p256::SecretKey::from_sec1_der(der) {
            return Ok(PrivateKey::EcP256(key));
        }
        if let Ok(key) = p384::SecretKey::from_sec1_der(der) {
            return Ok(PrivateKey::EcP384(key));
        }
        if let Ok(key) = p521::SecretKey::from_sec1_der(der) {
            return Ok(PrivateKey::EcP521(key));
        }
        Err(SigningError::KeyDecoding(
            "SEC1 key is not on a supported curve".to_string(),
        ))
    }

    /// Returns the matching verification key.
    pub fn public_key(&self) -> Result<PublicKey, SigningError> {
        Ok(match self {
            PrivateKey::Rsa(key) => PublicKey::Rsa(key.to_public_key()),
            PrivateKey::EcP256(key) => {
                PublicKey::EcP256(p256::ecdsa::VerifyingKey::from(&key.public_key()))
            }
            PrivateKey::EcP384(key) => {
                PublicKey::EcP384(p384::ecdsa::VerifyingKey::from(&key.public_key()))
            }
            PrivateKey::EcP521(key) => {
                let signing_key = p521_signing_key(key)?;
                PublicKey::EcP521(p521::ecdsa::VerifyingKey::from(&signing_key))
            }
        })
    }

    /// Signs `message` with `alg`. EC signatures use the fixed-width `r || s`
    /// encoding.
    pub fn sign(&self, alg: SignatureAlgorithm, message: &[u8]) -> Result<Vec<u8>, SigningError> {
        match (self, alg) {
            (PrivateKey::Rsa(key), SignatureAlgorithm::RS256) => {
                let signer = rsa::pkcs1v15::SigningKey::<Sha256>::new((**key).clone());
                Ok(signer.try_sign(message)?.to_vec())
            }
            (PrivateKey::Rsa(key), SignatureAlgorithm::RS384) => {
                let signer = rsa::pkcs1v15::SigningKey::<Sha384>::new((**key).clone());
                Ok(signer.try_sign(message)?.to_vec())
            }
            (PrivateKey::Rsa(key), SignatureAlgorithm::RS512) => {
                let signer = rsa::pkcs1v15::SigningKey::<Sha512>::new((**key).clone());
                Ok(signer.try_sign(message)?.to_vec())
            }
            (PrivateKey::EcP256(key), SignatureAlgorithm::ES256) => {
                let signer = p256::ecdsa::SigningKey::from(key);
                let sig: p256::ecdsa::Signature = signer.try_sign(message)?;
                Ok(sig.to_bytes().to_vec())
            }
            (PrivateKey::EcP384(key), SignatureAlgorithm::ES384) => {
                let signer = p384::ecdsa::SigningKey::from(key);
                let sig: p384::ecdsa::Signature = signer.try_sign(message)?;
                Ok(sig.to_bytes().to_vec())
            }
            (PrivateKey::EcP521(key), SignatureAlgorithm::ES512) => {
                let signer = p521_signing_key(key)?;
                let sig: p521::ecdsa::Signature = signer.try_sign(message)?;
                Ok(sig.to_bytes().to_vec())
            }
            (key, alg) => Err(SigningError::Crypto(format!(
                "{} cannot be produced with a {} key",
                alg,
                key.algorithm()
            ))),
        }
    }
}

fn p521_signing_key(key: &p521::SecretKey) -> Result<p521::ecdsa::SigningKey, SigningError> {
    p521::ecdsa::SigningKey::from_bytes(&key.to_bytes())
        .map_err(|e| SigningError::Crypto(format!("invalid P-521 key: {}", e)))
}

// =============================================================================
// Public Keys
// =============================================================================

/// Verifies an RSA signature with the given padding scheme module and digest.
macro_rules! rsa_verify {
    ($scheme:ident, $digest:ty, $key:expr, $message:expr, $signature:expr) => {{
        let verifier = rsa::$scheme::VerifyingKey::<$digest>::new($key.clone());
        let sig = rsa::$scheme::Signature::try_from($signature)
            .map_err(|e| SigningError::VerificationFailed(e.to_string()))?;
        verifier
            .verify($message, &sig)
            .map_err(|e| SigningError::VerificationFailed(e.to_string()))
    }};
}

/// A verification key.
#[derive(Clone)]
pub enum PublicKey {
    Rsa(RsaPublicKey),
    EcP256(p256::ecdsa::VerifyingKey),
    EcP384(p384::ecdsa::VerifyingKey),
    EcP521(p521::ecdsa::VerifyingKey),
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PublicKey::Rsa(_) => "RSA",
            PublicKey::EcP256(_) => "EC P-256",
            PublicKey::EcP384(_) => "EC P-384",
            PublicKey::EcP521(_) => "EC P-521",
        };
        write!(f, "PublicKey({})", name)
    }
}

impl PublicKey {
    /// Verifies `signature` over `message`. Accepts RS*, PS* and ES*.
    pub fn verify(
        &self,
        alg: SignatureAlgorithm,
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), SigningError> {
        use SignatureAlgorithm::*;

        let mismatch = |e: signature::Error| SigningError::VerificationFailed(e.to_string());

        match (self, alg) {
            (PublicKey::Rsa(key), RS256) => rsa_verify!(pkcs1v15, Sha256, key, message, signature),
            (PublicKey::Rsa(key), RS384) => rsa_verify!(pkcs1v15, Sha384, key, message, signature),
            (PublicKey::Rsa(key), RS512) => rsa_verify!(pkcs1v15, Sha512, key, message, signature),
            (PublicKey::Rsa(key), PS256) => rsa_verify!(pss, Sha256, key, message, signature),
            (PublicKey::Rsa(key), PS384) => rsa_verify!(pss, Sha384, key, message, signature),
            (PublicKey::Rsa(key), PS512) => rsa_verify!(pss, Sha512, key, message, signature),
            (PublicKey::EcP256(key), ES256) => {
                let sig = p256::ecdsa::Signature::from_slice(signature).map_err(mismatch)?;
                key.verify(message, &sig).map_err(mismatch)
            }
            (PublicKey::EcP384(key), ES384) => {
                let sig = p384::ecdsa::Signature::from_slice(signature).map_err(mismatch)?;
                key.verify(message, &sig).map_err(mismatch)
            }
            (PublicKey::EcP521(key), ES512) => {
                let sig = p521::ecdsa::Signature::from_slice(signature).map_err(mismatch)?;
                key.verify(message, &sig).map_err(mismatch)
            }
            (key, alg) => Err(SigningError::VerificationFailed(format!(
                "{} cannot be verified with {:?}",
                alg, key
            ))),
        }
    }
}

// =============================================================================
// PEM Bundles
// =============================================================================

/// The key and identity extracted from a credential bundle.
#[derive(Debug, Clone)]
pub(crate) struct DecodedBundle {
    pub key: PrivateKey,
    pub identity: String,
}

/// Extracts the first private key and the subject of the first certificate
/// from a PEM bundle.
pub(crate) fn decode_bundle(
    credential_id: &str,
    bundle: &[u8],
) -> Result<DecodedBundle, SigningError> {
    use rustls_pemfile::Item;

    let mut reader = bundle;
    let mut key = None;
    let mut identity = None;
    let mut entries = 0usize;

    for item in rustls_pemfile::read_all(&mut reader) {
        let item = item.map_err(|e| SigningError::KeyDecoding(format!("malformed PEM: {}", e)))?;
        entries += 1;
        match item {
            Item::Pkcs8Key(der) if key.is_none() => {
                key = Some(PrivateKey::from_pkcs8_der(der.secret_pkcs8_der())?);
            }
            Item::Pkcs1Key(der) if key.is_none() => {
                key = Some(PrivateKey::from_pkcs1_der(der.secret_pkcs1_der())?);
            }
            Item::Sec1Key(der) if key.is_none() => {
                key = Some(PrivateKey::from_sec1_der(der.secret_sec1_der())?);
            }
            Item::X509Certificate(der) if identity.is_none() => {
                identity = Some(certificate_subject(der.as_ref())?);
            }
            _ => {}
        }
    }

    if entries == 0 {
        return Err(SigningError::invalid_credential(
            credential_id,
            "credential bundle is empty",
        ));
    }
    let key = key.ok_or_else(|| {
        SigningError::invalid_credential(credential_id, "credential bundle holds no private key")
    })?;
    let identity = identity.ok_or_else(|| {
        SigningError::invalid_credential(credential_id, "credential bundle holds no certificate")
    })?;

    Ok(DecodedBundle { key, identity })
}

fn certificate_subject(der: &[u8]) -> Result<String, SigningError> {
    let (_, cert) = x509_parser::parse_x509_certificate(der)
        .map_err(|e| SigningError::KeyDecoding(format!("invalid certificate: {}", e)))?;
    Ok(cert.subject().to_string())
}
