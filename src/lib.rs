//! tracesieve
//!
//! A trace-sampling proxy for Zipkin v1 spans. Buffers spans by trace id until
//! a trace is judged complete (or old enough to give up on), evaluates a
//! sampling policy against the whole trace, and forwards accepted traces to a
//! downstream collector.
//!
//! # Architecture
//!
//! * `proxy::span` / `proxy::trace` - value types and trace-level predicates
//! * `proxy::buffer` - the concurrent trace buffer
//! * `proxy::policy` - the sampling rule engine
//! * `proxy::forwarder` - bounded-queue worker pool that POSTs to the collector
//! * `proxy::scheduler` - the periodic flush loop tying the above together
//! * `proxy::ingress` - HTTP intake (JSON/Thrift, gzip)
//! * `proxy::codec` - Zipkin v1 JSON and Thrift span codecs
//! * `config` - CLI flags
//! * `metrics` - Prometheus counters/gauges and `/metrics` exposition

pub mod config;
pub mod metrics;
pub mod proxy;
