//! Error types for the trace-sampling proxy.

use derive_more::{Display, Error, From};

/// Errors surfaced by the trace buffer.
#[derive(Debug, Display, From, Error)]
pub enum TraceError {
    /// `AddTag` was called on a trace with no root span.
    NoRootSpan,
}

/// Errors surfaced by span decoding (JSON or Thrift).
#[derive(Debug, Display, From, Error)]
pub enum CodecError {
    Json(serde_json::Error),
    Thrift(ThriftDecodeError),
    UnsupportedContentType(UnsupportedContentType),
    Io(std::io::Error),
}

#[derive(Debug, Display, Error, Clone)]
#[display(fmt = "thrift decode error: {}", message)]
pub struct ThriftDecodeError {
    pub message: String,
}

#[derive(Debug, Display, Error, Clone)]
#[display(fmt = "unsupported content type: {}", content_type)]
pub struct UnsupportedContentType {
    pub content_type: String,
}

/// Errors surfaced by the forwarder's `Send`.
#[derive(Debug, Display, Error, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    SinkFull,
    SinkStopped,
}

/// Errors that can abort startup.
#[derive(Debug, Display, From, Error)]
pub enum StartupError {
    InvalidCollectorUrl(InvalidCollectorUrl),
    Policy(PolicyFileError),
    Io(std::io::Error),
}

#[derive(Debug, Display, Error, Clone)]
#[display(fmt = "invalid collector url {}: {}", url, reason)]
pub struct InvalidCollectorUrl {
    pub url: String,
    pub reason: String,
}

#[derive(Debug, Display, Error, Clone)]
#[display(fmt = "policy file error: {}", reason)]
pub struct PolicyFileError {
    pub reason: String,
}
