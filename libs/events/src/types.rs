//! Building blocks shared by all event types.
//!
//! The `meta.security`, `meta.source` and `links` shapes are the same for
//! every event type; only `data` differs.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Event Type Constants
// =============================================================================

/// Event type names published by the build lifecycle.
pub mod event_types {
    // Activity
    pub const ACTIVITY_TRIGGERED: &str = "EiffelActivityTriggeredEvent";
    pub const ACTIVITY_STARTED: &str = "EiffelActivityStartedEvent";
    pub const ACTIVITY_FINISHED: &str = "EiffelActivityFinishedEvent";
    pub const ACTIVITY_CANCELED: &str = "EiffelActivityCanceledEvent";

    // Artifact
    pub const ARTIFACT_CREATED: &str = "EiffelArtifactCreatedEvent";
    pub const ARTIFACT_PUBLISHED: &str = "EiffelArtifactPublishedEvent";
}

/// Link type names.
pub mod link_types {
    pub const ACTIVITY_EXECUTION: &str = "ACTIVITY_EXECUTION";
    pub const ARTIFACT: &str = "ARTIFACT";
    pub const CAUSE: &str = "CAUSE";
    pub const CONTEXT: &str = "CONTEXT";
    pub const FLOW_CONTEXT: &str = "FLOW_CONTEXT";
    pub const PREVIOUS_ACTIVITY_EXECUTION: &str = "PREVIOUS_ACTIVITY_EXECUTION";
}

// =============================================================================
// Links
// =============================================================================

/// A reference from one event to another.
///
/// Duplicates are permitted and insertion order is preserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    /// Link type, e.g. `CAUSE` or `CONTEXT`.
    #[serde(rename = "type")]
    pub link_type: String,

    /// Id of the referenced event.
    pub target: Uuid,

    /// Domain of the referenced event when it lives outside the local domain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_id: Option<String>,
}

impl Link {
    pub fn new(link_type: impl Into<String>, target: Uuid) -> Self {
        Self {
            link_type: link_type.into(),
            target,
            domain_id: None,
        }
    }

    pub fn with_domain_id(mut self, domain_id: impl Into<String>) -> Self {
        self.domain_id = Some(domain_id.into());
        self
    }
}

// =============================================================================
// Source
// =============================================================================

/// Description of the system that produced an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serializer: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

// =============================================================================
// Security
// =============================================================================

/// Signature algorithm identifiers carried in `integrityProtection.alg`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignatureAlgorithm {
    HS256,
    HS384,
    HS512,
    PS256,
    PS384,
    PS512,
    RS256,
    RS384,
    RS512,
    ES256,
    ES384,
    ES512,
}

impl std::fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::HS256 => "HS256",
            Self::HS384 => "HS384",
            Self::HS512 => "HS512",
            Self::PS256 => "PS256",
            Self::PS384 => "PS384",
            Self::PS512 => "PS512",
            Self::RS256 => "RS256",
            Self::RS384 => "RS384",
            Self::RS512 => "RS512",
            Self::ES256 => "ES256",
            Self::ES384 => "ES384",
            Self::ES512 => "ES512",
        };
        write!(f, "{}", s)
    }
}

/// Signature over the canonical form of the event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityProtection {
    /// Base64 signature. Empty while the canonical form is being computed.
    pub signature: String,

    pub alg: SignatureAlgorithm,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
}

/// Position of an event within a named sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceProtection {
    pub sequence_name: String,
    pub position: u64,
}

/// The `meta.security` block. Its presence means the event was signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Security {
    /// Identity of the signer, usually a certificate subject.
    pub author_identity: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity_protection: Option<IntegrityProtection>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sequence_protection: Vec<SequenceProtection>,
}

impl Security {
    /// Creates a security block for a signature that has not been computed
    /// yet. The signature field stays empty until the signer fills it in.
    pub fn unsigned(author_identity: impl Into<String>, alg: SignatureAlgorithm) -> Self {
        Self {
            author_identity: author_identity.into(),
            integrity_protection: Some(IntegrityProtection {
                signature: String::new(),
                alg,
                public_key: None,
            }),
            sequence_protection: Vec::new(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
