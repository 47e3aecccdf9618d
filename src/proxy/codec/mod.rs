//! Wire codecs for the two Zipkin v1 span encodings the intake adapter
//! accepts, plus content-type based dispatch.

pub mod json;
pub mod thrift;

use crate::proxy::errors::CodecError;
use crate::proxy::span::Span;

/// Decode a span list for the given `Content-Type`, dispatching to the
/// JSON or Thrift codec. Returns `UnsupportedContentType` for anything
/// else.
pub fn decode(content_type: &str, body: &[u8]) -> Result<Vec<Span>, CodecError> {
    let base = content_type.split(';').next().unwrap_or("").trim();
    match base {
        "application/json" => json::decode_spans(body),
        "application/x-thrift" => thrift::decode_spans(body),
        other => Err(CodecError::UnsupportedContentType(
            crate::proxy::errors::UnsupportedContentType {
                content_type: other.to_string(),
            },
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_content_type_is_rejected() {
        let err = decode("application/x-unknown", b"anything");
        assert!(matches!(err, Err(CodecError::UnsupportedContentType(_))));
    }

    #[test]
    fn json_content_type_dispatches_to_json_codec() {
        let spans = decode("application/json", b"[]").unwrap();
        assert!(spans.is_empty());
    }

    #[test]
    fn content_type_with_charset_suffix_still_dispatches() {
        let spans = decode("application/json; charset=utf-8", b"[]").unwrap();
        assert!(spans.is_empty());
    }
}
