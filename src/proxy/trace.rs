//! Trace-level state and the predicates the scheduler drives off of.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

use super::errors::TraceError;
use super::policy::SampleResult;
use super::span::{Span, TagValue};

/// The sampling decision recorded on a trace, set at most once.
#[derive(Debug, Clone)]
pub struct TraceDecision {
    pub sample_decision: bool,
    pub sample_result: SampleResult,
}

/// The set of spans sharing a trace id, plus the single decision cell the
/// scheduler fills in once a trace matures.
pub struct Trace {
    pub trace_id: String,
    spans: RwLock<HashMap<String, Span>>,
    decision: RwLock<Option<TraceDecision>>,
}

impl Trace {
    /// A trace never exists empty: construction always takes its first span.
    pub fn new(first_span: Span) -> Self {
        let trace_id = first_span.trace_id.clone();
        let mut spans = HashMap::new();
        spans.insert(first_span.id.clone(), first_span);
        Trace {
            trace_id,
            spans: RwLock::new(spans),
            decision: RwLock::new(None),
        }
    }

    /// Insert a span, returning `true` if this was a new span id (so the
    /// caller can account for `span_delta`).
    pub fn insert_span(&self, span: Span) -> bool {
        let mut spans = self.spans.write();
        let is_new = !spans.contains_key(&span.id);
        spans.insert(span.id.clone(), span);
        is_new
    }

    pub fn span_count(&self) -> usize {
        self.spans.read().len()
    }

    /// Every span whose `parent_id` is non-empty must have its parent
    /// present in this trace. Leaf absence is undetectable and ignored.
    pub fn is_complete(&self) -> bool {
        self.missing_spans().is_empty()
    }

    pub fn missing_spans(&self) -> HashSet<String> {
        let spans = self.spans.read();
        spans
            .values()
            .filter_map(|s| s.parent_id.as_ref())
            .filter(|p| !p.is_empty())
            .filter(|p| !spans.contains_key(p.as_str()))
            .cloned()
            .collect()
    }

    /// The first encountered span with no parent.
    pub fn root_span_id(&self) -> Result<String, TraceError> {
        let spans = self.spans.read();
        spans
            .values()
            .find(|s| s.is_root())
            .map(|s| s.id.clone())
            .ok_or(TraceError::NoRootSpan)
    }

    /// Trace end-time is the max over spans of `timestamp + duration`.
    pub fn end_time(&self) -> DateTime<Utc> {
        let spans = self.spans.read();
        spans
            .values()
            .map(Span::end_time)
            .max()
            .expect("a trace is never empty")
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.end_time()
    }

    pub fn older_than(&self, d: chrono::Duration, now: DateTime<Utc>) -> bool {
        self.age(now) > d
    }

    /// Locate the root span and write into its tag mapping.
    pub fn add_tag(&self, key: impl Into<String>, value: impl Into<TagValue>) -> Result<(), TraceError> {
        let mut spans = self.spans.write();
        let root_id = spans
            .values()
            .find(|s| s.is_root())
            .map(|s| s.id.clone())
            .ok_or(TraceError::NoRootSpan)?;
        spans.get_mut(&root_id).unwrap().set_tag(key, value);
        Ok(())
    }

    pub fn decision(&self) -> Option<TraceDecision> {
        self.decision.read().clone()
    }

    /// Set the decision cell. Callers are responsible for only calling this
    /// once per trace; the cell itself doesn't enforce it beyond this
    /// single write.
    pub fn set_decision(&self, decision: TraceDecision) {
        *self.decision.write() = Some(decision);
    }

    /// Spans as a JSON array, used when marshaling the trace for forwarding.
    pub fn spans_snapshot(&self) -> Vec<Span> {
        self.spans.read().values().cloned().collect()
    }
}
