//! Routing-key strategies.

use herald_events::Event;

/// Placeholder for an absent routing key token.
const ABSENT: &str = "_";

/// Computes the routing key an event is published with.
pub trait RoutingKeyStrategy: Send + Sync {
    fn routing_key(&self, event: &Event) -> String;
}

/// Sepia-style keys: `eiffel.<family>.<type>.<tag>.<domainId>`.
///
/// The family is the first word of the type name after the `Eiffel` prefix,
/// lowercased (`EiffelActivityTriggeredEvent` is in family `activity`). Tokens
/// that are not known are written as `_`.
#[derive(Debug, Clone, Default)]
pub struct SepiaRoutingKeys {
    tag: Option<String>,
}

impl SepiaRoutingKeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `tag` for the tag token of every key.
    pub fn with_tag(tag: impl Into<String>) -> Self {
        let tag = tag.into();
        Self {
            tag: (!tag.trim().is_empty()).then_some(tag),
        }
    }
}

impl RoutingKeyStrategy for SepiaRoutingKeys {
    fn routing_key(&self, event: &Event) -> String {
        let event_type = event.event_type();
        let family = family_of(event_type);
        let domain_id = event
            .meta()
            .source()
            .and_then(|s| s.domain_id.as_deref())
            .filter(|d| !d.is_empty());

        format!(
            "eiffel.{}.{}.{}.{}",
            family.as_deref().unwrap_or(ABSENT),
            event_type,
            self.tag.as_deref().unwrap_or(ABSENT),
            domain_id.unwrap_or(ABSENT),
        )
    }
}

fn family_of(event_type: &str) -> Option<String> {
    let name = event_type.strip_prefix("Eiffel")?;
    let mut chars = name.char_indices();
    let (_, first) = chars.next()?;
    if !first.is_ascii_uppercase() {
        return None;
    }
    let end = chars
        .find(|(_, c)| c.is_ascii_uppercase())
        .map(|(i, _)| i)
        .unwrap_or(name.len());
    Some(name[..end].to_ascii_lowercase())
}

/// The same key for every event.
#[derive(Debug, Clone)]
pub struct FixedRoutingKey {
    key: String,
}

impl FixedRoutingKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl RoutingKeyStrategy for FixedRoutingKey {
    fn routing_key(&self, _event: &Event) -> String {
        self.key.clone()
    }
}
