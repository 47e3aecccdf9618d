//! The concurrent trace buffer: a two-level map keyed by trace id, with
//! per-trace locking so `AddSpan` never blocks on network or policy work.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::span::Span;
use super::trace::Trace;

/// Deltas returned from a mutation, the only metric signal the buffer
/// produces; it has no dependency on any counter subsystem itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraceBufferMetrics {
    pub span_delta: i64,
    pub trace_delta: i64,
}

/// Mapping `trace_id -> Trace`, guarded by an outer reader/writer lock.
///
/// Lock order is always outer-then-inner; the outer lock is never held
/// across network I/O or policy evaluation.
#[derive(Default)]
pub struct TraceBuffer {
    traces: RwLock<HashMap<String, Arc<Trace>>>,
}

impl TraceBuffer {
    pub fn new() -> Self {
        TraceBuffer {
            traces: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a span, creating its trace on first sight. Idempotent on
    /// duplicate span ids: the second `AddSpan` for the same id has
    /// `span_delta == 0`.
    pub fn add_span(&self, span: Span) -> TraceBufferMetrics {
        let trace_id = span.trace_id.clone();

        // Hit path: shared lock only.
        {
            let traces = self.traces.read();
            if let Some(trace) = traces.get(&trace_id) {
                let is_new = trace.insert_span(span);
                return TraceBufferMetrics {
                    span_delta: if is_new { 1 } else { 0 },
                    trace_delta: 0,
                };
            }
        }

        // Miss path: upgrade to exclusive, double-check.
        let mut traces = self.traces.write();
        if let Some(trace) = traces.get(&trace_id) {
            let is_new = trace.insert_span(span);
            return TraceBufferMetrics {
                span_delta: if is_new { 1 } else { 0 },
                trace_delta: 0,
            };
        }
        traces.insert(trace_id, Arc::new(Trace::new(span)));
        TraceBufferMetrics {
            span_delta: 1,
            trace_delta: 1,
        }
    }

    pub fn delete_trace(&self, trace_id: &str) -> TraceBufferMetrics {
        let span_count = {
            let traces = self.traces.read();
            match traces.get(trace_id) {
                Some(trace) => trace.span_count(),
                None => return TraceBufferMetrics::default(),
            }
        };

        let mut traces = self.traces.write();
        if traces.remove(trace_id).is_some() {
            TraceBufferMetrics {
                span_delta: -(span_count as i64),
                trace_delta: -1,
            }
        } else {
            TraceBufferMetrics::default()
        }
    }

    /// Copy the current set of trace references under the shared lock and
    /// release it; concurrent `AddSpan` on existing traces is never blocked
    /// longer than this single map read.
    pub fn snapshot(&self) -> Vec<Arc<Trace>> {
        self.traces.read().values().cloned().collect()
    }

    pub fn trace_count(&self) -> usize {
        self.traces.read().len()
    }

    pub fn span_count(&self) -> usize {
        self.traces.read().values().map(|t| t.span_count()).sum()
    }
}
