//! CLI flags, parsed with `clap`'s derive API.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "tracesieved",
    author,
    version,
    about = "Trace-sampling proxy for Zipkin v1 spans"
)]
pub struct Cli {
    /// Ingress port.
    #[arg(long, env = "TRACESIEVE_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Prometheus `/metrics` port.
    #[arg(long, env = "TRACESIEVE_METRICS_PORT", default_value_t = 10010)]
    pub metrics_port: u16,

    /// Minimum trace age (ms) before a complete trace is sampled and forwarded.
    #[arg(long, env = "TRACESIEVE_FLUSH_AGE", default_value_t = 30_000)]
    pub flush_age: i64,

    /// Age (ms) after which an incomplete trace is force-forwarded with an abandon reason.
    #[arg(long, env = "TRACESIEVE_ABANDON_AGE", default_value_t = 300_000)]
    pub abandon_age: i64,

    /// Age (ms) after which no further forward attempts are made and the trace is dropped.
    #[arg(long, env = "TRACESIEVE_FLUSH_TIMEOUT", default_value_t = 600_000)]
    pub flush_timeout: i64,

    /// Downstream collector base URL. Empty means dry-run: decisions are made and logged, nothing is sent.
    #[arg(long, env = "TRACESIEVE_COLLECTOR_URL")]
    pub collector_url: Option<String>,

    /// Path to the policy file consumed by the rule engine. Mandatory.
    #[arg(long, env = "TRACESIEVE_POLICY_FILE")]
    pub policy_file: PathBuf,

    /// Minimum log level.
    #[arg(long, env = "TRACESIEVE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Forwarder payload channel capacity.
    #[arg(long, env = "TRACESIEVE_FORWARDER_BUFFER_SIZE", default_value_t = 4096)]
    pub forwarder_buffer_size: usize,

    /// Forwarder worker pool size.
    #[arg(long, env = "TRACESIEVE_FORWARDER_WORKERS", default_value_t = 100)]
    pub forwarder_workers: usize,
}

impl Cli {
    pub fn flush_age(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.flush_age)
    }

    pub fn abandon_age(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.abandon_age)
    }

    pub fn flush_timeout(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.flush_timeout)
    }
}
