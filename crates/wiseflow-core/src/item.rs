//! The normalized record every connector produces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A value in [`DataItem::metadata`]. Kept intentionally loose — each
/// source family documents the stable keys it writes (see the connector
/// crates), but the engine itself never interprets metadata values.
pub type MetadataValue = serde_json::Value;

/// The canonical ingested record, as specified in spec.md §3.
///
/// `source_id` and `content` are required at construction; `timestamp`
/// is filled in with the current time if the connector does not supply
/// a source-native one, so it is never null after construction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataItem {
    pub source_id: String,
    pub content: String,
    pub content_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, MetadataValue>,
    /// Opaque provider payload, kept only for debugging. Omitted from the
    /// wire form by default (spec.md §4.5) and erased by the round-trip
    /// law in spec.md §8.
    #[serde(skip)]
    pub raw: Option<serde_json::Value>,
}

impl DataItem {
    /// Builds a new item, defaulting `timestamp` to now when the caller
    /// has no source-native time.
    pub fn new(
        source_id: impl Into<String>,
        content: impl Into<String>,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            content: content.into(),
            content_type: content_type.into(),
            url: None,
            timestamp: Utc::now(),
            language: None,
            metadata: HashMap::new(),
            raw: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_raw(mut self, raw: serde_json::Value) -> Self {
        self.raw = Some(raw);
        self
    }

    /// Canonical wire form: RFC 3339 timestamp, `raw` omitted.
    ///
    /// `DataItem::from_wire(item.to_wire())` round-trips every field
    /// except `raw`, which the wire form never carries (spec.md §8).
    pub fn to_wire(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("DataItem always serializes")
    }

    pub fn from_wire(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_modulo_raw() {
        let item = DataItem::new("abc", "hello world", "text/plain")
            .with_url("https://example.com")
            .with_language("en")
            .with_metadata("domain", "example.com")
            .with_raw(serde_json::json!({"debug": true}));

        let wire = item.to_wire();
        let restored = DataItem::from_wire(wire).unwrap();

        assert_eq!(restored.source_id, item.source_id);
        assert_eq!(restored.content, item.content);
        assert_eq!(restored.url, item.url);
        assert_eq!(restored.metadata, item.metadata);
        assert_eq!(restored.timestamp, item.timestamp);
        assert!(restored.raw.is_none());
    }

    #[test]
    fn timestamp_defaults_to_now() {
        let before = Utc::now();
        let item = DataItem::new("id", "content", "text/plain");
        assert!(item.timestamp >= before);
    }
}
