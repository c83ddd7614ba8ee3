//! The embedded structured-audit tracer (§4.8): OpenTelemetry-shaped
//! trace/span model, in-mutation buffer, flush, and snapshot replay.

mod buffer;
mod model;
mod snapshot;
mod tracer;

pub use model::{
    AuditContext, AuditContextRecord, ResourceRef, Span, SpanAttributes, SpanEvent, SpanState,
    Trace, TraceState, WorkflowSnapshot,
};
pub use snapshot::{SnapshotComputer, SNAPSHOT_MAX_ATTEMPTS, SNAPSHOT_RETRY_DELAY};
pub use tracer::{with_cancel_span, with_span, NoopTracer, RealTracer, Tracer};
