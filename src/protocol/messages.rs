//! Record format exchanged between pipeline stages
//!
//! A [`Record`] is an opaque JSON object. Stages read the fields they care
//! about through the typed views below ([`Tweet`], [`UrlInfo`], ...) and emit
//! new records built from those views. Reads are lenient: a missing field
//! falls back to [`UNKNOWN`] or an empty string instead of failing, so a
//! parseable but incomplete record is routed or dropped, never rejected.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Version written into every emitted record
pub const SCHEMA_VERSION: u64 = 1;

/// Placeholder for missing identifiers and URLs
pub const UNKNOWN: &str = "unknown";

/// Field names shared across record kinds
pub mod fields {
    pub const SCHEMA_VERSION: &str = "schema_version";
    pub const ID: &str = "id";
    pub const TEXT: &str = "text";
    pub const SOURCE_TWEET_ID: &str = "source_tweet_id";
    pub const TOKEN_SYMBOL: &str = "token_symbol";
    pub const STATUS: &str = "status";
    pub const DETAILS: &str = "details";
    pub const URL: &str = "url";
    pub const ORIGINAL_URL: &str = "original_url";
    pub const FETCHED_CONTENT: &str = "fetched_content";
    pub const ERROR: &str = "error";
    pub const CONTENT_SNIPPET: &str = "content_snippet";
    pub const REJECTED_FROM: &str = "rejected_from";
    pub const REJECT_REASON: &str = "reject_reason";
    pub const ORIGINAL_BODY: &str = "original_body";
}

/// Record decoding and encoding errors
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("Message body is not valid UTF-8")]
    InvalidUtf8(#[source] std::str::Utf8Error),
    #[error("Message body is not valid JSON")]
    InvalidJson(#[source] serde_json::Error),
    #[error("Message body is a JSON {0}, expected an object")]
    NotAnObject(&'static str),
    #[error("Failed to serialize record")]
    Serialize(#[source] serde_json::Error),
}

/// Opaque mapping of named fields carried by one message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a message body: UTF-8 text holding a JSON object
    pub fn from_slice(body: &[u8]) -> Result<Self, RecordError> {
        let text = std::str::from_utf8(body).map_err(RecordError::InvalidUtf8)?;
        match serde_json::from_str::<Value>(text).map_err(RecordError::InvalidJson)? {
            Value::Object(map) => Ok(Self(map)),
            other => Err(RecordError::NotAnObject(json_type_name(&other))),
        }
    }

    /// Encode as UTF-8 JSON; non-ASCII text is written verbatim
    pub fn to_vec(&self) -> Result<Vec<u8>, RecordError> {
        serde_json::to_vec(&self.0).map_err(RecordError::Serialize)
    }

    /// Builder-style insert
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.to_string(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// String field, `None` when missing or not a string
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// String field with a fallback
    pub fn str_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get_str(key).unwrap_or(default)
    }

    /// Identifier field as text. Numbers and booleans are rendered, so an
    /// integer id such as `42` reads as `"42"`; null, arrays and objects
    /// count as missing.
    pub fn get_id(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Identifier field with [`UNKNOWN`] as fallback
    pub fn id_or_unknown(&self, key: &str) -> String {
        self.get_id(key).unwrap_or_else(|| UNKNOWN.to_string())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Identifier linking this record to the tweet it originated from.
    ///
    /// Derived records carry `source_tweet_id`; a raw tweet is its own origin.
    pub fn correlation_id(&self) -> Option<String> {
        self.get_id(fields::SOURCE_TWEET_ID)
            .or_else(|| self.get_id(fields::ID))
    }

    pub fn schema_version(&self) -> Option<u64> {
        self.0.get(fields::SCHEMA_VERSION).and_then(Value::as_u64)
    }

    /// Prepare a derived record for publishing.
    ///
    /// Writes the schema version and, if the record does not already carry
    /// one, the correlation id of the record it was derived from.
    pub fn stamp(&mut self, origin_correlation_id: Option<&str>) {
        self.insert(fields::SCHEMA_VERSION, SCHEMA_VERSION);
        if !self.contains_key(fields::SOURCE_TWEET_ID) {
            if let Some(id) = origin_correlation_id {
                self.insert(fields::SOURCE_TWEET_ID, id);
            }
        }
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Truncate text for log lines, appending "..." only when something was cut
pub fn preview(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

/// First `max_chars` characters of fetched content followed by "..."
pub fn content_snippet(content: &str, max_chars: usize) -> String {
    let head: String = content.chars().take(max_chars).collect();
    format!("{head}...")
}

/// Social media post produced by the crawler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tweet {
    pub id: String,
    pub text: String,
}

impl Tweet {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }

    pub fn from_record(record: &Record) -> Self {
        Self {
            id: record.id_or_unknown(fields::ID),
            text: record.str_or(fields::TEXT, "").to_string(),
        }
    }
}

impl From<Tweet> for Record {
    fn from(tweet: Tweet) -> Self {
        Record::new()
            .with(fields::ID, tweet.id)
            .with(fields::TEXT, tweet.text)
    }
}

/// Token symbol found in a tweet or in fetched web content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub source_tweet_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_url: Option<String>,
    pub token_symbol: String,
    pub status: String,
    pub details: String,
}

impl From<TokenInfo> for Record {
    fn from(info: TokenInfo) -> Self {
        let mut record = Record::new().with(fields::SOURCE_TWEET_ID, info.source_tweet_id);
        if let Some(url) = info.original_url {
            record.insert(fields::ORIGINAL_URL, url);
        }
        record
            .with(fields::TOKEN_SYMBOL, info.token_symbol)
            .with(fields::STATUS, info.status)
            .with(fields::DETAILS, info.details)
    }
}

/// URL found in a tweet that carried no token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrlInfo {
    pub source_tweet_id: String,
    pub url: String,
}

impl UrlInfo {
    pub fn from_record(record: &Record) -> Self {
        Self {
            source_tweet_id: record.id_or_unknown(fields::SOURCE_TWEET_ID),
            url: record.str_or(fields::URL, "").to_string(),
        }
    }
}

impl From<UrlInfo> for Record {
    fn from(info: UrlInfo) -> Self {
        Record::new()
            .with(fields::SOURCE_TWEET_ID, info.source_tweet_id)
            .with(fields::URL, info.url)
    }
}

/// Simulated content of a fetched web page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebContent {
    pub source_tweet_id: String,
    pub original_url: String,
    pub fetched_content: String,
    pub status: String,
}

impl WebContent {
    pub fn from_record(record: &Record) -> Self {
        Self {
            source_tweet_id: record.id_or_unknown(fields::SOURCE_TWEET_ID),
            original_url: record.str_or(fields::ORIGINAL_URL, UNKNOWN).to_string(),
            fetched_content: record.str_or(fields::FETCHED_CONTENT, "").to_string(),
            status: record.str_or(fields::STATUS, "").to_string(),
        }
    }
}

impl From<WebContent> for Record {
    fn from(content: WebContent) -> Self {
        Record::new()
            .with(fields::SOURCE_TWEET_ID, content.source_tweet_id)
            .with(fields::ORIGINAL_URL, content.original_url)
            .with(fields::FETCHED_CONTENT, content.fetched_content)
            .with(fields::STATUS, content.status)
    }
}

/// Web content in which no token could be extracted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionFailure {
    pub source_tweet_id: String,
    pub original_url: String,
    pub error: String,
    pub content_snippet: String,
}

impl From<ExtractionFailure> for Record {
    fn from(failure: ExtractionFailure) -> Self {
        Record::new()
            .with(fields::SOURCE_TWEET_ID, failure.source_tweet_id)
            .with(fields::ORIGINAL_URL, failure.original_url)
            .with(fields::ERROR, failure.error)
            .with(fields::CONTENT_SNIPPET, failure.content_snippet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_object_body() {
        let record = Record::from_slice(br#"{"id":"t1","text":"hello"}"#).unwrap();
        assert_eq!(record.get_str("id"), Some("t1"));
        assert_eq!(record.get_str("text"), Some("hello"));
        assert_eq!(record.len(), 2);
    }

    #[test]
    fn test_parse_rejects_invalid_json() {
        let err = Record::from_slice(b"{not json").unwrap_err();
        assert!(matches!(err, RecordError::InvalidJson(_)));
    }

    #[test]
    fn test_parse_rejects_invalid_utf8() {
        let err = Record::from_slice(&[0xff, 0xfe, 0x7b]).unwrap_err();
        assert!(matches!(err, RecordError::InvalidUtf8(_)));
    }

    #[test]
    fn test_parse_rejects_non_object_json() {
        for (body, kind) in [
            (&b"[1,2,3]"[..], "array"),
            (&b"\"text\""[..], "string"),
            (&b"42"[..], "number"),
            (&b"null"[..], "null"),
        ] {
            match Record::from_slice(body) {
                Err(RecordError::NotAnObject(found)) => assert_eq!(found, kind),
                other => panic!("expected NotAnObject for {kind}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_non_ascii_text_survives_encoding() {
        let record = Record::new().with("text", "看看新的 $XYZ 代币");
        let bytes = record.to_vec().unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.contains("看看新的"), "non-ASCII should not be escaped: {text}");
        assert_eq!(Record::from_slice(&bytes).unwrap(), record);
    }

    #[test]
    fn test_correlation_id_prefers_source_tweet_id() {
        let derived = Record::new()
            .with("id", "ignored")
            .with("source_tweet_id", "t1");
        assert_eq!(derived.correlation_id().as_deref(), Some("t1"));

        let tweet = Record::new().with("id", "t2");
        assert_eq!(tweet.correlation_id().as_deref(), Some("t2"));

        let numeric = Record::new().with("id", 42);
        assert_eq!(numeric.correlation_id().as_deref(), Some("42"));

        assert_eq!(Record::new().correlation_id(), None);
    }

    #[test]
    fn test_stamp_adds_version_and_missing_correlation_id() {
        let mut record = Record::new().with("url", "https://a.b");
        record.stamp(Some("t9"));
        assert_eq!(record.schema_version(), Some(SCHEMA_VERSION));
        assert_eq!(record.get_str("source_tweet_id"), Some("t9"));
    }

    #[test]
    fn test_stamp_keeps_existing_correlation_id() {
        let mut record = Record::new().with("source_tweet_id", "original");
        record.stamp(Some("other"));
        assert_eq!(record.get_str("source_tweet_id"), Some("original"));
    }

    #[test]
    fn test_tweet_from_record_defaults() {
        let tweet = Tweet::from_record(&Record::new());
        assert_eq!(tweet.id, UNKNOWN);
        assert_eq!(tweet.text, "");

        let tweet = Tweet::from_record(&Record::new().with("id", 5).with("text", "x"));
        assert_eq!(tweet.id, "5");
        assert_eq!(tweet.text, "x");

        let tweet = Tweet::from_record(&Record::new().with("id", Value::Null));
        assert_eq!(tweet.id, UNKNOWN);
    }

    #[test]
    fn test_token_info_record_omits_missing_url() {
        let record: Record = TokenInfo {
            source_tweet_id: "t1".to_string(),
            original_url: None,
            token_symbol: "$XYZ".to_string(),
            status: "extracted from tweet".to_string(),
            details: "Found $XYZ".to_string(),
        }
        .into();
        assert!(!record.contains_key("original_url"));
        assert_eq!(record.get_str("token_symbol"), Some("$XYZ"));
    }

    #[test]
    fn test_web_content_from_record_ignores_extra_fields() {
        let record = Record::from(
            json!({
                "source_tweet_id": "t5",
                "original_url": "https://cryptoanalysis.io/def",
                "fetched_content": "<html>$DEF</html>",
                "fetched_at": "2024-05-01T10:00:00Z"
            })
            .as_object()
            .cloned()
            .unwrap(),
        );
        let content = WebContent::from_record(&record);
        assert_eq!(content.source_tweet_id, "t5");
        assert_eq!(content.status, "");
        assert_eq!(Record::from(content).len(), 4);
    }

    #[test]
    fn test_preview_only_marks_truncation() {
        assert_eq!(preview("short", 10), "short");
        assert_eq!(preview("abcdefghij", 4), "abcd...");
        assert_eq!(preview("代币代币", 2), "代币...");
    }

    #[test]
    fn test_content_snippet_is_char_bounded() {
        let content = "é".repeat(150);
        let snippet = content_snippet(&content, 100);
        assert_eq!(snippet.chars().count(), 103);
        assert!(snippet.ends_with("..."));
        assert_eq!(content_snippet("tiny", 100), "tiny...");
    }
}
