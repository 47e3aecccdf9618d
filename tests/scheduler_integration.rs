//! End-to-end scenarios over the buffer + policy + scheduler stack,
//! exercising the decision table without a real collector (dry-run mode).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tracesieve::metrics::ProxyMetrics;
use tracesieve::proxy::buffer::TraceBuffer;
use tracesieve::proxy::policy::PolicyEngine;
use tracesieve::proxy::scheduler::{Scheduler, SchedulerConfig};
use tracesieve::proxy::span::Span;

fn span(id: &str, parent: Option<&str>, ts: chrono::DateTime<Utc>) -> Span {
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
        duration: Duration::zero(),
        tags: HashMap::new(),
    }
}

fn policy_always(rate: u8, reason: &str) -> Arc<PolicyEngine> {
    let toml = format!("[default]\nsample_rate = {}\nreason = \"{}\"\n", rate, reason);
    Arc::new(PolicyEngine::from_str(&toml).unwrap())
}

fn scheduler(
    buffer: Arc<TraceBuffer>,
    policy: Arc<PolicyEngine>,
    config: SchedulerConfig,
) -> Scheduler {
    Scheduler::new(buffer, policy, None, config, Arc::new(ProxyMetrics::new()))
}

// Scenario 1: complete trace acceptance.
#[tokio::test]
async fn complete_trace_is_accepted_and_tagged_then_eventually_dropped() {
    let now = Utc::now();
    let buffer = Arc::new(TraceBuffer::new());
    for (id, parent) in [("root", None), ("child", Some("root")), ("gc1", Some("child")), ("gc2", Some("child"))] {
        buffer.add_span(span(id, parent, now));
    }

    let scheduler = scheduler(
        buffer.clone(),
        policy_always(100, "accept"),
        SchedulerConfig {
            flush_age: Duration::zero(),
            abandon_age: Duration::seconds(300),
            flush_timeout: Duration::seconds(600),
        },
    );

    scheduler.tick(now).await;
    assert_eq!(buffer.trace_count(), 1, "dry-run success keeps the trace buffered until flush_timeout");

    scheduler.tick(now + Duration::seconds(601)).await;
    assert_eq!(buffer.trace_count(), 0, "trace is dropped once it ages past flush_timeout");
}

// Scenario 3: policy-driven drop.
#[tokio::test]
async fn policy_drop_removes_trace_without_ever_forwarding() {
    let now = Utc::now();
    let buffer = Arc::new(TraceBuffer::new());
    buffer.add_span(span("root", None, now));

    let scheduler = scheduler(
        buffer.clone(),
        policy_always(0, "ping"),
        SchedulerConfig {
            flush_age: Duration::zero(),
            abandon_age: Duration::seconds(300),
            flush_timeout: Duration::seconds(600),
        },
    );

    scheduler.tick(now).await;
    assert_eq!(buffer.trace_count(), 0);
}

// Scenario 4: duplicate span idempotence, exercised directly against the buffer.
#[test]
fn duplicate_span_idempotence() {
    let buffer = TraceBuffer::new();
    let now = Utc::now();
    buffer.add_span(span("root", None, now));
    buffer.add_span(span("root", None, now));
    assert_eq!(buffer.trace_count(), 1);
    assert_eq!(buffer.span_count(), 1);
}

// Scenario 2: incomplete trace past abandon-age is force-forwarded.
#[tokio::test]
async fn incomplete_trace_past_abandon_age_is_force_forwarded() {
    let now = Utc::now();
    let buffer = Arc::new(TraceBuffer::new());
    buffer.add_span(span("gc1", Some("child"), now));
    buffer.add_span(span("gc2", Some("child"), now));

    let scheduler = scheduler(
        buffer.clone(),
        policy_always(100, "accept"),
        SchedulerConfig {
            flush_age: Duration::seconds(30),
            abandon_age: Duration::milliseconds(1),
            flush_timeout: Duration::seconds(600),
        },
    );

    scheduler.tick(now + Duration::seconds(1)).await;
    assert_eq!(buffer.trace_count(), 1, "still within flush_timeout, stays buffered for retry");
}
