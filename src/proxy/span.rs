//! Value types for the Zipkin v1 span shape.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A tag value lifted from a binary annotation. JSON binary annotations are
/// untyped key/value pairs; the Thrift codec narrows its typed values down
/// to this before insertion so the rest of the system is wire-format
/// agnostic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    String(String),
    Int(i64),
    Bool(bool),
}

impl std::fmt::Display for TagValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TagValue::String(s) => write!(f, "{}", s),
            TagValue::Int(i) => write!(f, "{}", i),
            TagValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// A source of an annotation or binary annotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    #[serde(rename = "serviceName")]
    pub service_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv6: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
}

/// A single timestamped event within a span. Passed through verbatim; the
/// core never inspects these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub timestamp: i64,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<Endpoint>,
}

/// A raw key/value pair as carried on the wire, before being lifted into
/// the in-memory tag mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryAnnotation {
    pub key: String,
    pub value: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<Endpoint>,
}

/// One timed operation within a trace.
///
/// `timestamp` and `duration` are never mutated by the core; only the codec
/// knows about the wire-level microsecond encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct Span {
    pub trace_id: String,
    pub trace_id_high: Option<String>,
    pub name: String,
    pub id: String,
    pub parent_id: Option<String>,
    pub annotations: Vec<Annotation>,
    pub binary_annotations: Vec<BinaryAnnotation>,
    pub debug: bool,
    pub timestamp: DateTime<Utc>,
    pub duration: chrono::Duration,
    pub tags: HashMap<String, TagValue>,
}

impl Span {
    /// `true` when this span has no parent and is therefore the trace root.
    pub fn is_root(&self) -> bool {
        self.parent_id.as_deref().map_or(true, |p| p.is_empty())
    }

    /// Wall-clock instant at which the span's work was finished.
    pub fn end_time(&self) -> DateTime<Utc> {
        self.timestamp + self.duration
    }

    /// Insert or overwrite a tag, used by the scheduler to record the
    /// sampling decision on the root span.
    pub fn set_tag(&mut self, key: impl Into<String>, value: impl Into<TagValue>) {
        self.tags.insert(key.into(), value.into());
    }
}

impl From<String> for TagValue {
    fn from(s: String) -> Self {
        TagValue::String(s)
    }
}

impl From<&str> for TagValue {
    fn from(s: &str) -> Self {
        TagValue::String(s.to_string())
    }
}

impl From<i64> for TagValue {
    fn from(i: i64) -> Self {
        TagValue::Int(i)
    }
}

impl From<bool> for TagValue {
    fn from(b: bool) -> Self {
        TagValue::Bool(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_span(id: &str, parent: Option<&str>) -> Span {
        Span {
            trace_id: "t1".into(),
            trace_id_high: None,
            name: "op".into(),
            id: id.into(),
            parent_id: parent.map(|s| s.to_string()),
            annotations: Vec::new(),
            binary_annotations: Vec::new(),
            debug: false,
            timestamp: Utc::now(),
            duration: chrono::Duration::zero(),
            tags: HashMap::new(),
        }
    }

    #[test]
    fn root_detection() {
        let root = make_span("a", None);
        let child = make_span("b", Some("a"));
        assert!(root.is_root());
        assert!(!child.is_root());
    }

    #[test]
    fn empty_parent_id_is_root() {
        let span = make_span("a", Some(""));
        assert!(span.is_root());
    }

    #[test]
    fn set_tag_overwrites() {
        let mut span = make_span("a", None);
        span.set_tag("k", "v1");
        span.set_tag("k", "v2");
        assert_eq!(span.tags.get("k"), Some(&TagValue::String("v2".into())));
    }
}
