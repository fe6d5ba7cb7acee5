//! Schema documents compiled into the binary.

/// `(event type, version, schema document)` for every bundled schema.
pub const BUNDLED_SCHEMAS: &[(&str, &str, &str)] = &[
    (
        "EiffelActivityTriggeredEvent",
        "4.0.0",
        include_str!("../schemas/EiffelActivityTriggeredEvent/4.0.0.json"),
    ),
    (
        "EiffelActivityStartedEvent",
        "4.0.0",
        include_str!("../schemas/EiffelActivityStartedEvent/4.0.0.json"),
    ),
    (
        "EiffelActivityFinishedEvent",
        "3.0.0",
        include_str!("../schemas/EiffelActivityFinishedEvent/3.0.0.json"),
    ),
    (
        "EiffelActivityCanceledEvent",
        "3.0.0",
        include_str!("../schemas/EiffelActivityCanceledEvent/3.0.0.json"),
    ),
    (
        "EiffelArtifactCreatedEvent",
        "3.0.0",
        include_str!("../schemas/EiffelArtifactCreatedEvent/3.0.0.json"),
    ),
    (
        "EiffelArtifactPublishedEvent",
        "3.1.0",
        include_str!("../schemas/EiffelArtifactPublishedEvent/3.1.0.json"),
    ),
];

/// Returns the bundled schema document for a type and version.
pub fn bundled_schema(event_type: &str, version: &str) -> Option<&'static str> {
    BUNDLED_SCHEMAS
        .iter()
        .find(|(t, v, _)| *t == event_type && *v == version)
        .map(|(_, _, doc)| *doc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_schemas_are_valid_json() {
        for (event_type, version, doc) in BUNDLED_SCHEMAS {
            let value: serde_json::Value = serde_json::from_str(doc)
                .unwrap_or_else(|e| panic!("{event_type} {version}: {e}"));
            assert_eq!(value["title"], *event_type);
            assert_eq!(value["properties"]["meta"]["properties"]["version"]["enum"][0], *version);
        }
    }

    #[test]
    fn test_lookup() {
        assert!(bundled_schema("EiffelActivityTriggeredEvent", "4.0.0").is_some());
        assert!(bundled_schema("EiffelActivityTriggeredEvent", "1.0.0").is_none());
        assert!(bundled_schema("EiffelCompositionDefinedEvent", "3.0.0").is_none());
    }
}
