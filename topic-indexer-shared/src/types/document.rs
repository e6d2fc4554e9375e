//! Document types for the indexing backend.
//!
//! A [`Document`] is an open JSON object built from one bus message. It always
//! carries three reserved metadata fields; any top-level fields found by
//! decoding the message payload as a JSON object are merged on top.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field holding the original message bytes as a string.
pub const RAW_MESSAGE_KEY: &str = "raw_message";

/// Field holding the topic the message was received on.
pub const SOURCE_KEY: &str = "source";

/// Field holding the RFC 3339 creation time of the document.
pub const TIMESTAMP_KEY: &str = "timestamp";

/// A structured document ready to be submitted to the indexing backend.
///
/// Serializes transparently as the underlying JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Map<String, Value>);

impl Document {
    /// Get a field by name.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Get a string field by name.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// The `raw_message` field, if it is still a string.
    pub fn raw_message(&self) -> Option<&str> {
        self.get_str(RAW_MESSAGE_KEY)
    }

    /// The `source` field, if it is still a string.
    pub fn source(&self) -> Option<&str> {
        self.get_str(SOURCE_KEY)
    }

    /// The `timestamp` field, if it is still a string.
    pub fn timestamp(&self) -> Option<&str> {
        self.get_str(TIMESTAMP_KEY)
    }

    /// Convert into a JSON value (always an object).
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

/// Which side wins when a decoded payload defines a reserved field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldPrecedence {
    /// Decoded payload fields overwrite `raw_message`, `source` and `timestamp`.
    #[default]
    PayloadWins,
    /// Reserved fields keep their metadata values; same-named payload fields are dropped.
    MetadataWins,
}

/// Builds documents from raw message bytes.
///
/// Building never fails. Decoding the payload as JSON is opportunistic: bytes
/// that are not a JSON object simply produce a document with only the
/// reserved fields.
///
/// # Example
///
/// ```
/// use topic_indexer_shared::DocumentBuilder;
///
/// let doc = DocumentBuilder::default().build(br#"{"level":"warn"}"#, "app.logs");
/// assert_eq!(doc.source(), Some("app.logs"));
/// assert_eq!(doc.get_str("level"), Some("warn"));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentBuilder {
    precedence: FieldPrecedence,
}

impl DocumentBuilder {
    pub fn new(precedence: FieldPrecedence) -> Self {
        Self { precedence }
    }

    /// Build a document stamped with the current time.
    pub fn build(&self, raw: &[u8], source: &str) -> Document {
        self.build_at(raw, source, Utc::now())
    }

    /// Build a document stamped with the given time.
    pub fn build_at(&self, raw: &[u8], source: &str, now: DateTime<Utc>) -> Document {
        let mut fields = Map::new();
        fields.insert(
            RAW_MESSAGE_KEY.to_string(),
            Value::String(String::from_utf8_lossy(raw).into_owned()),
        );
        fields.insert(SOURCE_KEY.to_string(), Value::String(source.to_string()));
        fields.insert(
            TIMESTAMP_KEY.to_string(),
            Value::String(now.to_rfc3339_opts(SecondsFormat::Secs, true)),
        );

        // Anything other than a JSON object is left as the raw string only.
        if let Ok(decoded) = serde_json::from_slice::<Map<String, Value>>(raw) {
            for (key, value) in decoded {
                if self.precedence == FieldPrecedence::MetadataWins && is_reserved(&key) {
                    continue;
                }
                fields.insert(key, value);
            }
        }

        Document(fields)
    }
}

fn is_reserved(key: &str) -> bool {
    matches!(key, RAW_MESSAGE_KEY | SOURCE_KEY | TIMESTAMP_KEY)
}
