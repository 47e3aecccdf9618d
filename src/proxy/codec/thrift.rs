//! Zipkin v1 Thrift span codec. Hand-decodes a `TBinaryProtocol`-framed
//! list of spans against the same field layout the JSON codec's wire shape
//! mirrors, converting each into the same in-memory `Span` so the rest of
//! the system is wire-format agnostic.
//!
//! Field ids below match the upstream Zipkin v1 Thrift IDL:
//! trace_id=1, name=3, id=4, parent_id=5, annotations=6,
//! binary_annotations=8, debug=9, timestamp=10, duration=11,
//! trace_id_high=12.

use std::collections::HashMap;
use std::io::Cursor;

use chrono::TimeZone;
use thrift::protocol::{TBinaryInputProtocol, TInputProtocol, TType};
use tracing::debug;

use crate::proxy::errors::{CodecError, ThriftDecodeError};
use crate::proxy::span::{Annotation, BinaryAnnotation, Endpoint, Span, TagValue};

const FIELD_TRACE_ID: i16 = 1;
const FIELD_NAME: i16 = 3;
const FIELD_ID: i16 = 4;
const FIELD_PARENT_ID: i16 = 5;
const FIELD_ANNOTATIONS: i16 = 6;
const FIELD_BINARY_ANNOTATIONS: i16 = 8;
const FIELD_DEBUG: i16 = 9;
const FIELD_TIMESTAMP: i16 = 10;
const FIELD_DURATION: i16 = 11;
const FIELD_TRACE_ID_HIGH: i16 = 12;

// Thrift AnnotationType values for binary annotations.
const ANNOTATION_TYPE_BOOL: i32 = 0;
const ANNOTATION_TYPE_I16: i32 = 1;
const ANNOTATION_TYPE_I32: i32 = 2;
const ANNOTATION_TYPE_I64: i32 = 3;
const ANNOTATION_TYPE_STRING: i32 = 6;

fn decode_err(msg: impl Into<String>) -> CodecError {
    CodecError::Thrift(ThriftDecodeError { message: msg.into() })
}

fn hex_id(n: i64) -> String {
    format!("{:016x}", n as u64)
}

/// Decode a Thrift-encoded list of Zipkin v1 spans.
pub fn decode_spans(body: &[u8]) -> Result<Vec<Span>, CodecError> {
    let mut proto = TBinaryInputProtocol::new(Cursor::new(body), true);
    let list_ident = proto
        .read_list_begin()
        .map_err(|e| decode_err(format!("reading span list header: {}", e)))?;

    let mut spans = Vec::with_capacity(list_ident.size.max(0) as usize);
    for _ in 0..list_ident.size {
        spans.push(decode_span(&mut proto)?);
    }
    proto
        .read_list_end()
        .map_err(|e| decode_err(format!("reading span list trailer: {}", e)))?;

    Ok(spans)
}

fn decode_span(proto: &mut TBinaryInputProtocol<Cursor<&[u8]>>) -> Result<Span, CodecError> {
    proto
        .read_struct_begin()
        .map_err(|e| decode_err(format!("span struct header: {}", e)))?;

    let mut trace_id: Option<i64> = None;
    let mut trace_id_high: Option<i64> = None;
    let mut name = String::new();
    let mut id: Option<i64> = None;
    let mut parent_id: Option<i64> = None;
    let mut annotations = Vec::new();
    let mut binary_annotations = Vec::new();
    let mut debug = false;
    let mut timestamp: i64 = 0;
    let mut duration: i64 = 0;

    loop {
        let field = proto
            .read_field_begin()
            .map_err(|e| decode_err(format!("span field header: {}", e)))?;
        if field.field_type == TType::Stop {
            break;
        }
        let field_id = field.id.unwrap_or(-1);

        match field_id {
            FIELD_TRACE_ID => trace_id = Some(proto.read_i64().map_err(|e| decode_err(e.to_string()))?),
            FIELD_TRACE_ID_HIGH => {
                trace_id_high = Some(proto.read_i64().map_err(|e| decode_err(e.to_string()))?)
            }
            FIELD_NAME => name = proto.read_string().map_err(|e| decode_err(e.to_string()))?,
            FIELD_ID => id = Some(proto.read_i64().map_err(|e| decode_err(e.to_string()))?),
            FIELD_PARENT_ID => {
                parent_id = Some(proto.read_i64().map_err(|e| decode_err(e.to_string()))?)
            }
            FIELD_ANNOTATIONS => annotations = decode_annotations(proto)?,
            FIELD_BINARY_ANNOTATIONS => binary_annotations = decode_binary_annotations(proto)?,
            FIELD_DEBUG => debug = proto.read_bool().map_err(|e| decode_err(e.to_string()))?,
            FIELD_TIMESTAMP => timestamp = proto.read_i64().map_err(|e| decode_err(e.to_string()))?,
            FIELD_DURATION => duration = proto.read_i64().map_err(|e| decode_err(e.to_string()))?,
            _ => proto
                .skip(field.field_type)
                .map_err(|e| decode_err(format!("skipping unknown field {}: {}", field_id, e)))?,
        }
        proto
            .read_field_end()
            .map_err(|e| decode_err(format!("span field trailer: {}", e)))?;
    }
    proto
        .read_struct_end()
        .map_err(|e| decode_err(format!("span struct trailer: {}", e)))?;

    let trace_id = trace_id.ok_or_else(|| decode_err("span missing trace_id"))?;
    let id = id.ok_or_else(|| decode_err("span missing id"))?;

    let wire_binary_annotations: Vec<BinaryAnnotation> = binary_annotations
        .iter()
        .map(|(key, value, endpoint)| BinaryAnnotation {
            key: key.clone(),
            value: match value {
                TagValue::String(s) => serde_json::Value::String(s.clone()),
                TagValue::Int(i) => serde_json::Value::Number((*i).into()),
                TagValue::Bool(b) => serde_json::Value::Bool(*b),
            },
            endpoint: endpoint.clone(),
        })
        .collect();

    let mut tags = HashMap::with_capacity(binary_annotations.len());
    for (key, value, _) in binary_annotations {
        tags.insert(key, value);
    }

    Ok(Span {
        trace_id: hex_id(trace_id),
        trace_id_high: trace_id_high.map(hex_id),
        name,
        id: hex_id(id),
        parent_id: parent_id.map(hex_id),
        annotations,
        binary_annotations: wire_binary_annotations,
        debug,
        timestamp: chrono::Utc
            .timestamp_micros(timestamp)
            .single()
            .unwrap_or_else(|| chrono::Utc.timestamp_opt(0, 0).unwrap()),
        duration: chrono::Duration::microseconds(duration),
        tags,
    })
}

fn decode_annotations(
    proto: &mut TBinaryInputProtocol<Cursor<&[u8]>>,
) -> Result<Vec<Annotation>, CodecError> {
    let list = proto
        .read_list_begin()
        .map_err(|e| decode_err(format!("annotation list header: {}", e)))?;
    let mut out = Vec::with_capacity(list.size.max(0) as usize);
    for _ in 0..list.size {
        proto
            .read_struct_begin()
            .map_err(|e| decode_err(format!("annotation struct header: {}", e)))?;
        let mut timestamp = 0i64;
        let mut value = String::new();
        let mut endpoint = None;
        loop {
            let field = proto
                .read_field_begin()
                .map_err(|e| decode_err(format!("annotation field header: {}", e)))?;
            if field.field_type == TType::Stop {
                break;
            }
            match field.id.unwrap_or(-1) {
                1 => timestamp = proto.read_i64().map_err(|e| decode_err(e.to_string()))?,
                2 => value = proto.read_string().map_err(|e| decode_err(e.to_string()))?,
                3 => endpoint = Some(decode_endpoint(proto)?),
                _ => proto
                    .skip(field.field_type)
                    .map_err(|e| decode_err(e.to_string()))?,
            }
            proto
                .read_field_end()
                .map_err(|e| decode_err(e.to_string()))?;
        }
        proto
            .read_struct_end()
            .map_err(|e| decode_err(e.to_string()))?;
        out.push(Annotation {
            timestamp,
            value,
            endpoint,
        });
    }
    proto
        .read_list_end()
        .map_err(|e| decode_err(format!("annotation list trailer: {}", e)))?;
    Ok(out)
}

/// Returns `(key, tag value, source endpoint)` triples. Binary annotation
/// values are typed per the Thrift schema; only `STRING` and the
/// numeric/bool kinds are lifted into the tag mapping, others are dropped
/// with a debug log: a narrowing the JSON path does not need since JSON
/// binary annotations are already untyped key/value pairs.
fn decode_binary_annotations(
    proto: &mut TBinaryInputProtocol<Cursor<&[u8]>>,
) -> Result<Vec<(String, TagValue, Option<Endpoint>)>, CodecError> {
    let list = proto
        .read_list_begin()
        .map_err(|e| decode_err(format!("binary annotation list header: {}", e)))?;
    let mut out = Vec::with_capacity(list.size.max(0) as usize);
    for _ in 0..list.size {
        proto
            .read_struct_begin()
            .map_err(|e| decode_err(e.to_string()))?;
        let mut key = String::new();
        let mut raw_value: Vec<u8> = Vec::new();
        let mut annotation_type = ANNOTATION_TYPE_STRING;
        let mut endpoint = None;
        loop {
            let field = proto
                .read_field_begin()
                .map_err(|e| decode_err(e.to_string()))?;
            if field.field_type == TType::Stop {
                break;
            }
            match field.id.unwrap_or(-1) {
                1 => key = proto.read_string().map_err(|e| decode_err(e.to_string()))?,
                2 => raw_value = proto.read_bytes().map_err(|e| decode_err(e.to_string()))?,
                3 => annotation_type = proto.read_i32().map_err(|e| decode_err(e.to_string()))?,
                4 => endpoint = Some(decode_endpoint(proto)?),
                _ => proto
                    .skip(field.field_type)
                    .map_err(|e| decode_err(e.to_string()))?,
            }
            proto
                .read_field_end()
                .map_err(|e| decode_err(e.to_string()))?;
        }
        proto
            .read_struct_end()
            .map_err(|e| decode_err(e.to_string()))?;

        let value = match annotation_type {
            ANNOTATION_TYPE_STRING => Some(TagValue::String(
                String::from_utf8_lossy(&raw_value).to_string(),
            )),
            ANNOTATION_TYPE_BOOL => Some(TagValue::Bool(raw_value.first().copied().unwrap_or(0) != 0)),
            ANNOTATION_TYPE_I16 | ANNOTATION_TYPE_I32 | ANNOTATION_TYPE_I64 => {
                Some(TagValue::Int(bytes_to_i64(&raw_value)))
            }
            other => {
                debug!(key = %key, annotation_type = other, "dropping binary annotation of unsupported type");
                None
            }
        };

        if let Some(value) = value {
            out.push((key, value, endpoint));
        }
    }
    proto
        .read_list_end()
        .map_err(|e| decode_err(format!("binary annotation list trailer: {}", e)))?;
    Ok(out)
}

fn decode_endpoint(
    proto: &mut TBinaryInputProtocol<Cursor<&[u8]>>,
) -> Result<Endpoint, CodecError> {
    proto
        .read_struct_begin()
        .map_err(|e| decode_err(e.to_string()))?;
    let mut ipv4 = None;
    let mut port = None;
    let mut service_name = String::new();
    loop {
        let field = proto
            .read_field_begin()
            .map_err(|e| decode_err(e.to_string()))?;
        if field.field_type == TType::Stop {
            break;
        }
        match field.id.unwrap_or(-1) {
            1 => {
                let raw = proto.read_i32().map_err(|e| decode_err(e.to_string()))?;
                ipv4 = Some(std::net::Ipv4Addr::from(raw as u32).to_string());
            }
            2 => port = Some(proto.read_i16().map_err(|e| decode_err(e.to_string()))? as i32),
            3 => service_name = proto.read_string().map_err(|e| decode_err(e.to_string()))?,
            _ => proto
                .skip(field.field_type)
                .map_err(|e| decode_err(e.to_string()))?,
        }
        proto
            .read_field_end()
            .map_err(|e| decode_err(e.to_string()))?;
    }
    proto
        .read_struct_end()
        .map_err(|e| decode_err(e.to_string()))?;
    Ok(Endpoint {
        service_name,
        ipv4,
        ipv6: None,
        port,
    })
}

fn bytes_to_i64(bytes: &[u8]) -> i64 {
    let mut buf = [0u8; 8];
    let start = buf.len().saturating_sub(bytes.len());
    buf[start..].copy_from_slice(&bytes[bytes.len().saturating_sub(8)..]);
    i64::from_be_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_list_decodes_to_empty_vec() {
        // TBinaryProtocol list header: element type (1 byte) + size (i32 BE).
        let mut body = Vec::new();
        body.push(TType::Struct as u8);
        body.extend_from_slice(&0i32.to_be_bytes());
        let spans = decode_spans(&body).unwrap();
        assert!(spans.is_empty());
    }

    #[test]
    fn hex_id_is_lowercase_fixed_width() {
        assert_eq!(hex_id(1), "0000000000000001");
    }
}
