//! The periodic flush loop: classifies every buffered trace and drives
//! sampling and forwarding decisions with retry-until-timeout semantics.
//!
//! The scheduler never re-enters the buffer with any lock held; scheduled
//! deletions are collected during the sweep and applied only after
//! iteration ends.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::buffer::TraceBuffer;
use super::forwarder::{Forwarder, Payload};
use super::policy::PolicyEngine;
use super::trace::TraceDecision;

use crate::metrics::ProxyMetrics;

const ABANDON_REASON_PREFIX: &str = "trace is older than abandonAge";

/// Tunables driving the decision table in one place, mirroring the CLI
/// flags that set them.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub flush_age: chrono::Duration,
    pub abandon_age: chrono::Duration,
    pub flush_timeout: chrono::Duration,
}

/// Runs one sweep of the buffer, evaluating the per-trace decision table
/// and forwarding or scheduling deletion as appropriate.
pub struct Scheduler {
    buffer: std::sync::Arc<TraceBuffer>,
    policy: std::sync::Arc<PolicyEngine>,
    forwarder: Option<std::sync::Arc<Forwarder>>,
    config: SchedulerConfig,
    metrics: std::sync::Arc<ProxyMetrics>,
}

impl Scheduler {
    pub fn new(
        buffer: std::sync::Arc<TraceBuffer>,
        policy: std::sync::Arc<PolicyEngine>,
        forwarder: Option<std::sync::Arc<Forwarder>>,
        config: SchedulerConfig,
        metrics: std::sync::Arc<ProxyMetrics>,
    ) -> Self {
        Scheduler {
            buffer,
            policy,
            forwarder,
            config,
            metrics,
        }
    }

    /// Runs the tick loop forever (until `shutdown` resolves), waking every
    /// `flush_age`.
    pub async fn run(&self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(
            self.config
                .flush_age
                .to_std()
                .unwrap_or(StdDuration::from_secs(30)),
        );
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick(Utc::now()).await;
                }
                _ = shutdown.recv() => {
                    info!("scheduler received shutdown signal, finishing in-flight tick and exiting");
                    break;
                }
            }
        }
    }

    /// One sweep over the live trace set, evaluated at a pinned instant so
    /// the whole tick is internally consistent.
    pub async fn tick(&self, now: DateTime<Utc>) {
        let traces = self.buffer.snapshot();
        let mut to_delete = Vec::new();

        for trace in traces {
            let decision = trace.decision();
            let complete = trace.is_complete();
            let mature = trace.older_than(self.config.flush_age, now);
            let abandoned = !complete && trace.older_than(self.config.abandon_age, now);

            let action = if complete && mature {
                match decision {
                    Some(TraceDecision { sample_decision: true, .. }) => {
                        Some((trace.spans_snapshot(), false))
                    }
                    Some(TraceDecision { sample_decision: false, .. }) => {
                        // A rejected trace is deleted on the tick that rejects it;
                        // observing one here again would mean a bug elsewhere.
                        None
                    }
                    None => {
                        let spans = trace.spans_snapshot();
                        let (accept, result) = self.policy.accept_spans(&spans);
                        trace.set_decision(TraceDecision {
                            sample_decision: accept,
                            sample_result: result.clone(),
                        });
                        if accept {
                            if let Err(e) = trace.add_tag("SampleReason", result.reason.clone()) {
                                warn!(trace_id = %trace.trace_id, error = %e, "could not tag root span with sample reason");
                            }
                            if let Err(e) =
                                trace.add_tag("SampleRate", result.sample_rate.to_string())
                            {
                                warn!(trace_id = %trace.trace_id, error = %e, "could not tag root span with sample rate");
                            }
                            Some((trace.spans_snapshot(), false))
                        } else {
                            self.metrics.rejected.inc();
                            to_delete.push(trace.trace_id.clone());
                            None
                        }
                    }
                }
            } else if abandoned {
                let reason = format!(
                    "{} {}ms",
                    ABANDON_REASON_PREFIX,
                    self.config.abandon_age.num_milliseconds()
                );
                trace.set_decision(TraceDecision {
                    sample_decision: true,
                    sample_result: super::policy::SampleResult {
                        sample_rate: 100,
                        reason: reason.clone(),
                    },
                });
                if let Err(e) = trace.add_tag("SampleReason", reason) {
                    warn!(trace_id = %trace.trace_id, error = %e, "could not tag abandoned trace");
                }
                Some((trace.spans_snapshot(), true))
            } else {
                None
            };

            if let Some((spans, is_abandon_forward)) = action {
                self.attempt_forward(&trace.trace_id, spans, now, &trace, is_abandon_forward, &mut to_delete)
                    .await;
            }
        }

        for trace_id in to_delete {
            let delta = self.buffer.delete_trace(&trace_id);
            self.metrics.apply_delta(delta);
        }
    }

    async fn attempt_forward(
        &self,
        trace_id: &str,
        spans: Vec<super::span::Span>,
        now: DateTime<Utc>,
        trace: &super::trace::Trace,
        is_abandon_forward: bool,
        to_delete: &mut Vec<String>,
    ) {
        let body = match super::codec::json::encode_spans(&spans) {
            Ok(b) => b,
            Err(e) => {
                warn!(trace_id, error = %e, "failed to marshal trace, dropping");
                self.classify_failed_send(trace, is_abandon_forward, to_delete);
                return;
            }
        };

        let sent = match &self.forwarder {
            None => {
                info!(trace_id, "dry-run: no collector configured, treating send as successful");
                true
            }
            Some(forwarder) => match forwarder.send(Payload {
                content_type: "application/json",
                body,
            }) {
                Ok(()) => true,
                Err(e) => {
                    warn!(trace_id, error = %e, "forwarder did not accept payload");
                    false
                }
            },
        };

        if sent {
            if trace.older_than(self.config.flush_timeout, now) {
                self.metrics.timed_out.inc();
                to_delete.push(trace_id.to_string());
            }
            // otherwise leave it in the buffer; a later tick retries.
        } else {
            self.classify_failed_send(trace, is_abandon_forward, to_delete);
        }
    }

    fn classify_failed_send(
        &self,
        trace: &super::trace::Trace,
        is_abandon_forward: bool,
        to_delete: &mut Vec<String>,
    ) {
        if is_abandon_forward {
            self.metrics.incomplete.inc();
        } else {
            self.metrics.accepted.inc();
        }
        to_delete.push(trace.trace_id.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::span::Span;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn span(id: &str, parent: Option<&str>, ts: DateTime<Utc>) -> Span {
        Span {
            trace_id: "t1".into(),
            trace_id_high: None,
            name: "op".into(),
            id: id.into(),
            parent_id: parent.map(|s| s.to_string()),
            annotations: Vec::new(),
            binary_annotations: Vec::new(),
            debug: false,
            timestamp: ts,
            duration: chrono::Duration::zero(),
            tags: HashMap::new(),
        }
    }

    fn policy(rate: u8, reason: &str) -> Arc<PolicyEngine> {
        let toml = format!(
            "[default]\nsample_rate = {}\nreason = \"{}\"\n",
            rate, reason
        );
        Arc::new(PolicyEngine::from_str(&toml).unwrap())
    }

    #[tokio::test]
    async fn complete_trace_is_accepted_and_tagged() {
        let now = Utc::now();
        let buffer = Arc::new(TraceBuffer::new());
        buffer.add_span(span("root", None, now));
        buffer.add_span(span("child", Some("root"), now));

        let metrics = Arc::new(ProxyMetrics::new());
        let scheduler = Scheduler::new(
            buffer.clone(),
            policy(100, "accept"),
            None,
            SchedulerConfig {
                flush_age: chrono::Duration::zero(),
                abandon_age: chrono::Duration::seconds(300),
                flush_timeout: chrono::Duration::seconds(600),
            },
            metrics,
        );

        scheduler.tick(now).await;
        // First tick: sent (dry-run), not yet past flush_timeout, stays buffered.
        assert_eq!(buffer.trace_count(), 1);

        scheduler.tick(now + chrono::Duration::seconds(601)).await;
        assert_eq!(buffer.trace_count(), 0);
    }

    #[tokio::test]
    async fn policy_rejection_deletes_trace_without_forward() {
        let now = Utc::now();
        let buffer = Arc::new(TraceBuffer::new());
        buffer.add_span(span("root", None, now));

        let metrics = Arc::new(ProxyMetrics::new());
        let scheduler = Scheduler::new(
            buffer.clone(),
            policy(0, "ping"),
            None,
            SchedulerConfig {
                flush_age: chrono::Duration::zero(),
                abandon_age: chrono::Duration::seconds(300),
                flush_timeout: chrono::Duration::seconds(600),
            },
            metrics,
        );

        scheduler.tick(now).await;
        assert_eq!(buffer.trace_count(), 0);
    }

    #[tokio::test]
    async fn incomplete_old_trace_is_force_forwarded() {
        let now = Utc::now();
        let buffer = Arc::new(TraceBuffer::new());
        buffer.add_span(span("gc1", Some("child"), now));

        let metrics = Arc::new(ProxyMetrics::new());
        let scheduler = Scheduler::new(
            buffer.clone(),
            policy(100, "accept"),
            None,
            SchedulerConfig {
                flush_age: chrono::Duration::seconds(30),
                abandon_age: chrono::Duration::milliseconds(1),
                flush_timeout: chrono::Duration::seconds(600),
            },
            metrics,
        );

        scheduler.tick(now + chrono::Duration::seconds(1)).await;
        // Forwarded (dry-run) but not yet past flush_timeout: stays buffered.
        assert_eq!(buffer.trace_count(), 1);
    }
}
