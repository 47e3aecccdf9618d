//! Zipkin v1 JSON span codec. The only place in the system that knows
//! about the wire's microsecond timestamp/duration encoding or the
//! `binaryAnnotations` <-> tag-mapping projection.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::proxy::errors::CodecError;
use crate::proxy::span::{Annotation, BinaryAnnotation, Endpoint, Span, TagValue};

#[derive(Debug, Serialize, Deserialize)]
struct WireSpan {
    #[serde(rename = "traceId")]
    trace_id: String,
    #[serde(rename = "traceIdHigh", skip_serializing_if = "Option::is_none")]
    trace_id_high: Option<String>,
    name: String,
    id: String,
    #[serde(rename = "parentId", skip_serializing_if = "Option::is_none")]
    parent_id: Option<String>,
    #[serde(default)]
    annotations: Vec<Annotation>,
    #[serde(rename = "binaryAnnotations", default)]
    binary_annotations: Vec<BinaryAnnotation>,
    #[serde(default, skip_serializing_if = "is_false")]
    debug: bool,
    timestamp: i64,
    duration: i64,
}

fn is_false(b: &bool) -> bool {
    !b
}

fn micros_to_datetime(micros: i64) -> DateTime<Utc> {
    Utc.timestamp_micros(micros)
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap())
}

fn datetime_to_micros(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_micros()
}

fn duration_to_micros(d: chrono::Duration) -> i64 {
    d.num_microseconds().unwrap_or(0)
}

fn micros_to_duration(micros: i64) -> chrono::Duration {
    chrono::Duration::microseconds(micros)
}

fn lift_tags(annotations: &[BinaryAnnotation]) -> std::collections::HashMap<String, TagValue> {
    let mut tags = std::collections::HashMap::with_capacity(annotations.len());
    for ann in annotations {
        let value = match &ann.value {
            serde_json::Value::String(s) => TagValue::String(s.clone()),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    TagValue::Int(i)
                } else {
                    TagValue::String(n.to_string())
                }
            }
            serde_json::Value::Bool(b) => TagValue::Bool(*b),
            other => TagValue::String(other.to_string()),
        };
        tags.insert(ann.key.clone(), value);
    }
    tags
}

fn flatten_tags(tags: &std::collections::HashMap<String, TagValue>) -> Vec<BinaryAnnotation> {
    tags.iter()
        .map(|(key, value)| BinaryAnnotation {
            key: key.clone(),
            value: match value {
                TagValue::String(s) => serde_json::Value::String(s.clone()),
                TagValue::Int(i) => serde_json::Value::Number((*i).into()),
                TagValue::Bool(b) => serde_json::Value::Bool(*b),
            },
            endpoint: None,
        })
        .collect()
}

impl From<WireSpan> for Span {
    fn from(w: WireSpan) -> Self {
        let tags = lift_tags(&w.binary_annotations);
        Span {
            trace_id: w.trace_id,
            trace_id_high: w.trace_id_high,
            name: w.name,
            id: w.id,
            parent_id: w.parent_id.filter(|p| !p.is_empty()),
            annotations: w.annotations,
            binary_annotations: w.binary_annotations,
            debug: w.debug,
            timestamp: micros_to_datetime(w.timestamp),
            duration: micros_to_duration(w.duration),
            tags,
        }
    }
}

impl From<&Span> for WireSpan {
    fn from(s: &Span) -> Self {
        // binaryAnnotations on the wire is the flattened tag mapping joined
        // with whatever typed annotations the codec didn't need to lift
        // (entries whose key already appears in `tags` are not duplicated).
        let mut binary_annotations: Vec<BinaryAnnotation> = s
            .binary_annotations
            .iter()
            .filter(|ba| !s.tags.contains_key(&ba.key))
            .cloned()
            .collect();
        binary_annotations.extend(flatten_tags(&s.tags));

        WireSpan {
            trace_id: s.trace_id.clone(),
            trace_id_high: s.trace_id_high.clone(),
            name: s.name.clone(),
            id: s.id.clone(),
            parent_id: s.parent_id.clone(),
            annotations: s.annotations.clone(),
            binary_annotations,
            debug: s.debug,
            timestamp: datetime_to_micros(s.timestamp),
            duration: duration_to_micros(s.duration),
        }
    }
}

/// Decode a JSON array of Zipkin v1 spans.
pub fn decode_spans(body: &[u8]) -> Result<Vec<Span>, CodecError> {
    let wire: Vec<WireSpan> = serde_json::from_slice(body)?;
    Ok(wire.into_iter().map(Span::from).collect())
}

/// Encode a trace's spans as a JSON array, for the egress POST body.
pub fn encode_spans(spans: &[Span]) -> Result<Vec<u8>, CodecError> {
    let wire: Vec<WireSpan> = spans.iter().map(WireSpan::from).collect();
    Ok(serde_json::to_vec(&wire)?)
}
