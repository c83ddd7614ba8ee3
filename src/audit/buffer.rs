//! In-mutation span buffer (§4.8 "Buffer semantics").
//!
//! The source keeps this as a process-wide module-level singleton; DESIGN
//! NOTES directs re-modelling it as context carried by the execution
//! context. This struct is that context's backing store: owned by one
//! [`crate::audit::RealTracer`], never a `static`.

use std::collections::HashMap;

use crate::audit::model::{Span, Trace};
use crate::ids::TraceId;

#[derive(Default)]
struct TraceBuffer {
    trace: Option<Trace>,
    spans: Vec<Span>,
}

/// `traceId -> {trace, spanId -> span, sequenceCounter}`. `clear` removes
/// trace/spans but preserves the sequence counter so spans produced after a
/// flush keep counting up monotonically (§4.8, invariant 5 / testable
/// property 5).
#[derive(Default)]
pub struct SpanBuffer {
    buffers: HashMap<TraceId, TraceBuffer>,
    sequence_counters: HashMap<TraceId, u64>,
}

impl SpanBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns the next sequence number for `trace_id`, a monotone counter
    /// that survives `clear`.
    pub fn next_sequence(&mut self, trace_id: TraceId) -> u64 {
        let counter = self.sequence_counters.entry(trace_id).or_insert(0);
        *counter += 1;
        *counter
    }

    pub fn set_trace(&mut self, trace: Trace) {
        let id = trace.id;
        self.buffers.entry(id).or_default().trace = Some(trace);
    }

    pub fn trace(&self, trace_id: TraceId) -> Option<&Trace> {
        self.buffers.get(&trace_id).and_then(|b| b.trace.as_ref())
    }

    pub fn push_span(&mut self, span: Span) {
        self.buffers.entry(span.trace_id).or_default().spans.push(span);
    }

    pub fn find_span_mut(&mut self, trace_id: TraceId, span_id: crate::ids::SpanId) -> Option<&mut Span> {
        self.buffers.get_mut(&trace_id).and_then(|b| b.spans.iter_mut().find(|s| s.id == span_id))
    }

    /// Drains everything buffered for `trace_id` for a flush, preserving
    /// the sequence counter.
    pub fn drain(&mut self, trace_id: TraceId) -> (Option<Trace>, Vec<Span>) {
        match self.buffers.remove(&trace_id) {
            Some(b) => (b.trace, b.spans),
            None => (None, Vec::new()),
        }
    }

    /// `clear(traceId)`: removes trace/spans, keeps the sequence counter.
    pub fn clear(&mut self, trace_id: TraceId) {
        self.buffers.remove(&trace_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_numbers_increase_monotonically_per_trace() {
        let mut buffer = SpanBuffer::new();
        let trace_id = TraceId::new();
        let other_trace_id = TraceId::new();
        assert_eq!(buffer.next_sequence(trace_id), 1);
        assert_eq!(buffer.next_sequence(trace_id), 2);
        assert_eq!(buffer.next_sequence(other_trace_id), 1, "counters are per-trace");
        assert_eq!(buffer.next_sequence(trace_id), 3);
    }

    #[test]
    fn clear_drops_buffered_spans_but_preserves_the_sequence_counter() {
        let mut buffer = SpanBuffer::new();
        let trace_id = TraceId::new();
        buffer.next_sequence(trace_id);
        buffer.next_sequence(trace_id);
        buffer.clear(trace_id);
        assert_eq!(buffer.next_sequence(trace_id), 3, "clear must not reset the counter (testable property 5)");
    }

    #[test]
    fn drain_removes_the_trace_buffer_entirely() {
        let mut buffer = SpanBuffer::new();
        let trace_id = TraceId::new();
        buffer.set_trace(Trace {
            id: trace_id,
            name: "sequential-review".to_string(),
            state: crate::audit::TraceState::Running,
            started_at: chrono::Utc::now(),
            ended_at: None,
            correlation_id: None,
            initiator: None,
        });
        let (trace, spans) = buffer.drain(trace_id);
        assert!(trace.is_some());
        assert!(spans.is_empty());
        assert!(buffer.trace(trace_id).is_none(), "drain must leave nothing behind for the trace");
    }
}
