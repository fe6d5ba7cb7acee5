//! The event record: `meta`, `links` and `data`.

use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::EventError;
use crate::types::{Link, Security, Source};

/// Event metadata.
///
/// `id`, `type` and `version` are fixed once the event is built; only the
/// security block can be attached afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    id: Uuid,

    #[serde(rename = "type", deserialize_with = "non_empty")]
    event_type: String,

    #[serde(deserialize_with = "non_empty")]
    version: String,

    /// Milliseconds since the Unix epoch.
    time: i64,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    source: Option<Source>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    security: Option<Security>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    schema_uri: Option<String>,
}

impl Meta {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn time(&self) -> i64 {
        self.time
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn source(&self) -> Option<&Source> {
        self.source.as_ref()
    }

    pub fn security(&self) -> Option<&Security> {
        self.security.as_ref()
    }

    pub fn schema_uri(&self) -> Option<&str> {
        self.schema_uri.as_deref()
    }
}

fn non_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    if value.trim().is_empty() {
        return Err(de::Error::custom("must not be empty"));
    }
    Ok(value)
}

/// A structured, versioned record of one lifecycle occurrence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    meta: Meta,

    #[serde(default)]
    links: Vec<Link>,

    data: serde_json::Value,
}

impl Event {
    /// Creates a new event builder for the given type and schema version.
    pub fn builder(event_type: impl Into<String>, version: impl Into<String>) -> EventBuilder {
        EventBuilder::new(event_type, version)
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    pub fn id(&self) -> Uuid {
        self.meta.id
    }

    pub fn event_type(&self) -> &str {
        &self.meta.event_type
    }

    pub fn version(&self) -> &str {
        &self.meta.version
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn data(&self) -> &serde_json::Value {
        &self.data
    }

    pub fn security(&self) -> Option<&Security> {
        self.meta.security.as_ref()
    }

    /// Attaches (or replaces) the security block.
    pub fn set_security(&mut self, security: Security) {
        self.meta.security = Some(security);
    }

    /// Fills in the signature of an already attached integrity protection
    /// block. Returns false when there is no block to fill.
    pub fn set_signature(&mut self, signature: impl Into<String>) -> bool {
        match self
            .meta
            .security
            .as_mut()
            .and_then(|s| s.integrity_protection.as_mut())
        {
            Some(protection) => {
                protection.signature = signature.into();
                true
            }
            None => false,
        }
    }

    /// Serializes the event to a JSON value.
    pub fn to_json(&self) -> Result<serde_json::Value, EventError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Parses an event from a JSON value, enforcing the meta invariants.
    pub fn from_json(value: serde_json::Value) -> Result<Self, EventError> {
        Ok(serde_json::from_value(value)?)
    }
}

/// Link order matters for display but not for equality.
impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.meta == other.meta
            && self.data == other.data
            && self.links.len() == other.links.len()
            && self.links.iter().all(|link| {
                let ours = self.links.iter().filter(|l| *l == link).count();
                let theirs = other.links.iter().filter(|l| *l == link).count();
                ours == theirs
            })
    }
}

impl Eq for Event {}

/// Builder for constructing events.
#[derive(Debug)]
pub struct EventBuilder {
    id: Option<Uuid>,
    time: Option<DateTime<Utc>>,
    event_type: String,
    version: String,
    tags: Vec<String>,
    source: Option<Source>,
    schema_uri: Option<String>,
    links: Vec<Link>,
    data: Option<serde_json::Value>,
}

impl EventBuilder {
    pub fn new(event_type: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: None,
            time: None,
            event_type: event_type.into(),
            version: version.into(),
            tags: Vec::new(),
            source: None,
            schema_uri: None,
            links: Vec::new(),
            data: None,
        }
    }

    pub fn id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    pub fn time(mut self, time: DateTime<Utc>) -> Self {
        self.time = Some(time);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn source(mut self, source: Source) -> Self {
        self.source = Some(source);
        self
    }

    pub fn schema_uri(mut self, uri: impl Into<String>) -> Self {
        self.schema_uri = Some(uri.into());
        self
    }

    pub fn link(mut self, link: Link) -> Self {
        self.links.push(link);
        self
    }

    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Builds the event, assigning a random id and the current time when
    /// none were given.
    pub fn build(self) -> Result<Event, EventError> {
        if self.event_type.trim().is_empty() {
            return Err(EventError::MissingField("meta.type"));
        }
        if self.version.trim().is_empty() {
            return Err(EventError::MissingField("meta.version"));
        }

        Ok(Event {
            meta: Meta {
                id: self.id.unwrap_or_else(Uuid::new_v4),
                event_type: self.event_type,
                version: self.version,
                time: self.time.unwrap_or_else(Utc::now).timestamp_millis(),
                tags: self.tags,
                source: self.source,
                security: None,
                schema_uri: self.schema_uri,
            },
            links: self.links,
            data: self
                .data
                .unwrap_or_else(|| serde_json::Value::Object(Default::default())),
        })
    }
}
