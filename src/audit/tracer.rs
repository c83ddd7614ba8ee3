//! The tracer: span lifecycle, flush scheduling, no-op mode (§4.8).

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex as AsyncMutex;

use crate::audit::buffer::SpanBuffer;
use crate::audit::model::{AuditContext, ResourceRef, Span, SpanAttributes, SpanEvent, SpanState, Trace, TraceState};
use crate::error::EngineResult;
use crate::ids::{SpanId, TraceId};
use crate::scheduler::{ScheduleOwner, ScheduledInvocation, Scheduler};
use crate::storage::Storage;

/// Scoped-acquisition primitive (§4.8 `withSpan`): on `f` returning
/// normally, completes the span; on error, fails it with the error
/// message. Guarantees release on every exit path including early `?`. Use
/// [`with_cancel_span`] for the third exit path, where `f` succeeding means
/// the entity being spanned was canceled rather than completed.
pub async fn with_span<F, Fut, T>(
    tracer: &dyn Tracer,
    parent: &AuditContext,
    operation: &str,
    operation_type: &'static str,
    resource: ResourceRef,
    attributes: SpanAttributes,
    f: F,
) -> EngineResult<T>
where
    F: FnOnce(AuditContext) -> Fut,
    Fut: Future<Output = EngineResult<T>>,
{
    let (span_id, child_ctx) = tracer.start_span(parent, operation, operation_type, resource, attributes).await?;
    match f(child_ctx.clone()).await {
        Ok(value) => {
            tracer.complete_span(child_ctx.trace_id, span_id).await?;
            Ok(value)
        }
        Err(err) => {
            tracer.fail_span(child_ctx.trace_id, span_id, err.to_string()).await?;
            Err(err)
        }
    }
}

/// Scoped-acquisition primitive for an operation that is itself a
/// cancellation (§4.8 `withSpan`'s third exit path): on `f` returning
/// normally, cancels the span rather than completing it; on error, fails it
/// as usual — the cancel attempt itself did not go through.
pub async fn with_cancel_span<F, Fut, T>(
    tracer: &dyn Tracer,
    parent: &AuditContext,
    operation: &str,
    operation_type: &'static str,
    resource: ResourceRef,
    attributes: SpanAttributes,
    f: F,
) -> EngineResult<T>
where
    F: FnOnce(AuditContext) -> Fut,
    Fut: Future<Output = EngineResult<T>>,
{
    let (span_id, child_ctx) = tracer.start_span(parent, operation, operation_type, resource, attributes).await?;
    match f(child_ctx.clone()).await {
        Ok(value) => {
            tracer.cancel_span(child_ctx.trace_id, span_id).await?;
            Ok(value)
        }
        Err(err) => {
            tracer.fail_span(child_ctx.trace_id, span_id, err.to_string()).await?;
            Err(err)
        }
    }
}

#[async_trait]
pub trait Tracer: Send + Sync {
    /// Starts (or joins, if `parent.trace_id` already has a running trace)
    /// a trace, then starts a span under `parent`. Returns the new span's id
    /// and the child [`AuditContext`] for nested calls.
    async fn start_span(
        &self,
        parent: &AuditContext,
        operation: &str,
        operation_type: &'static str,
        resource: ResourceRef,
        attributes: SpanAttributes,
    ) -> EngineResult<(SpanId, AuditContext)>;

    async fn complete_span(&self, trace_id: TraceId, span_id: SpanId) -> EngineResult<()>;
    async fn fail_span(&self, trace_id: TraceId, span_id: SpanId, error: String) -> EngineResult<()>;
    async fn cancel_span(&self, trace_id: TraceId, span_id: SpanId) -> EngineResult<()>;
    async fn record_event(&self, trace_id: TraceId, span_id: SpanId, event: SpanEvent) -> EngineResult<()>;

    /// Starts a fresh root trace (no parent), used when a workflow is
    /// initialized without a business trace context (§4.8).
    fn start_root_context(&self, trace_id: TraceId, correlation_id: Option<String>) -> AuditContext {
        AuditContext::root(trace_id, correlation_id)
    }

    /// §4.8 flush: enqueues a deferred mutation that persists the buffered
    /// trace/spans, then clears the buffer (preserving the sequence
    /// counter) and re-inserts trace metadata so later spans in the same
    /// step still carry context.
    async fn schedule_flush(&self, trace_id: TraceId) -> EngineResult<()>;

    /// Persists `{traceId, context, traceMetadata}` so a later
    /// transactional step can rehydrate tracer state (§4.8 cross-boundary).
    async fn save_context(&self, workflow_id: crate::ids::WorkflowId, ctx: &AuditContext) -> EngineResult<()>;

    /// Loads a persisted context and resets `depth` to 0 for the new step,
    /// preserving trace id and correlation id (§4.8 cross-boundary).
    async fn load_context(&self, workflow_id: crate::ids::WorkflowId) -> EngineResult<Option<AuditContext>>;
}

/// The real tracer: buffers spans in memory, flushes them through the
/// scheduler, and supports cross-step context rehydration.
pub struct RealTracer {
    storage: Arc<dyn Storage>,
    scheduler: Arc<dyn Scheduler>,
    buffer: AsyncMutex<SpanBuffer>,
}

impl RealTracer {
    pub fn new(storage: Arc<dyn Storage>, scheduler: Arc<dyn Scheduler>) -> Self {
        Self { storage, scheduler, buffer: AsyncMutex::new(SpanBuffer::new()) }
    }
}

#[async_trait]
impl Tracer for RealTracer {
    async fn start_span(
        &self,
        parent: &AuditContext,
        operation: &str,
        operation_type: &'static str,
        resource: ResourceRef,
        attributes: SpanAttributes,
    ) -> EngineResult<(SpanId, AuditContext)> {
        let span_id = SpanId::new();
        let mut buf = self.buffer.lock().await;
        if buf.trace(parent.trace_id).is_none() {
            buf.set_trace(Trace {
                id: parent.trace_id,
                name: operation.to_string(),
                state: TraceState::Running,
                started_at: Utc::now(),
                ended_at: None,
                correlation_id: parent.correlation_id.clone(),
                initiator: None,
            });
        }
        let sequence_number = buf.next_sequence(parent.trace_id);
        let child_ctx = parent.child(operation, span_id);
        let span = Span {
            id: span_id,
            parent_span_id: parent.parent_span_id,
            trace_id: parent.trace_id,
            depth: parent.depth,
            path: parent.path.clone(),
            operation: operation.to_string(),
            operation_type: operation_type.to_string(),
            resource,
            state: SpanState::Started,
            started_at: Utc::now(),
            ended_at: None,
            duration_ms: None,
            sequence_number,
            attributes,
            events: Vec::new(),
            error: None,
            causation_id: None,
        };
        buf.push_span(span);
        Ok((span_id, child_ctx))
    }

    async fn complete_span(&self, trace_id: TraceId, span_id: SpanId) -> EngineResult<()> {
        let mut buf = self.buffer.lock().await;
        if let Some(span) = buf.find_span_mut(trace_id, span_id) {
            let now = Utc::now();
            span.ended_at = Some(now);
            span.duration_ms = Some((now - span.started_at).num_milliseconds());
            span.state = SpanState::Completed;
        }
        Ok(())
    }

    async fn fail_span(&self, trace_id: TraceId, span_id: SpanId, error: String) -> EngineResult<()> {
        let mut buf = self.buffer.lock().await;
        if let Some(span) = buf.find_span_mut(trace_id, span_id) {
            let now = Utc::now();
            span.ended_at = Some(now);
            span.duration_ms = Some((now - span.started_at).num_milliseconds());
            span.state = SpanState::Failed;
            span.error = Some(error);
        }
        Ok(())
    }

    async fn cancel_span(&self, trace_id: TraceId, span_id: SpanId) -> EngineResult<()> {
        let mut buf = self.buffer.lock().await;
        if let Some(span) = buf.find_span_mut(trace_id, span_id) {
            let now = Utc::now();
            span.ended_at = Some(now);
            span.duration_ms = Some((now - span.started_at).num_milliseconds());
            span.state = SpanState::Canceled;
        }
        Ok(())
    }

    async fn record_event(&self, trace_id: TraceId, span_id: SpanId, event: SpanEvent) -> EngineResult<()> {
        let mut buf = self.buffer.lock().await;
        if let Some(span) = buf.find_span_mut(trace_id, span_id) {
            span.events.push(event);
        }
        Ok(())
    }

    async fn schedule_flush(&self, trace_id: TraceId) -> EngineResult<()> {
        self.scheduler
            .schedule_after(
                ScheduleOwner::Trace { trace_id },
                std::time::Duration::from_millis(0),
                ScheduledInvocation::FlushTrace { trace_id },
            )
            .await?;
        Ok(())
    }

    async fn save_context(&self, workflow_id: crate::ids::WorkflowId, ctx: &AuditContext) -> EngineResult<()> {
        self.storage
            .save_audit_context(crate::audit::model::AuditContextRecord {
                workflow_id,
                trace_id: ctx.trace_id,
                context: ctx.clone(),
                trace_metadata: serde_json::json!({}),
            })
            .await
    }

    async fn load_context(&self, workflow_id: crate::ids::WorkflowId) -> EngineResult<Option<AuditContext>> {
        Ok(self
            .storage
            .load_audit_context(workflow_id)
            .await?
            .map(|record| record.context.reset_for_new_step()))
    }
}

impl RealTracer {
    /// Invoked by the scheduler when a `FlushTrace` invocation fires:
    /// drains the buffer and persists what was there.
    pub async fn flush_now(&self, trace_id: TraceId) -> EngineResult<()> {
        let (trace, spans) = {
            let mut buf = self.buffer.lock().await;
            let drained = buf.drain(trace_id);
            buf.clear(trace_id);
            drained
        };
        if let Some(trace) = trace {
            self.storage.insert_trace(trace).await?;
        }
        if !spans.is_empty() {
            self.storage.insert_spans(spans).await?;
        }
        Ok(())
    }
}

/// Compile-time switchable no-op tracer: every method is side-effect-free
/// (§4.8 "No-op mode").
#[derive(Default)]
pub struct NoopTracer;

#[async_trait]
impl Tracer for NoopTracer {
    async fn start_span(
        &self,
        parent: &AuditContext,
        operation: &str,
        _operation_type: &'static str,
        _resource: ResourceRef,
        _attributes: SpanAttributes,
    ) -> EngineResult<(SpanId, AuditContext)> {
        let span_id = SpanId::new();
        Ok((span_id, parent.child(operation, span_id)))
    }

    async fn complete_span(&self, _trace_id: TraceId, _span_id: SpanId) -> EngineResult<()> {
        Ok(())
    }

    async fn fail_span(&self, _trace_id: TraceId, _span_id: SpanId, _error: String) -> EngineResult<()> {
        Ok(())
    }

    async fn cancel_span(&self, _trace_id: TraceId, _span_id: SpanId) -> EngineResult<()> {
        Ok(())
    }

    async fn record_event(&self, _trace_id: TraceId, _span_id: SpanId, _event: SpanEvent) -> EngineResult<()> {
        Ok(())
    }

    async fn schedule_flush(&self, _trace_id: TraceId) -> EngineResult<()> {
        Ok(())
    }

    async fn save_context(&self, _workflow_id: crate::ids::WorkflowId, _ctx: &AuditContext) -> EngineResult<()> {
        Ok(())
    }

    async fn load_context(&self, _workflow_id: crate::ids::WorkflowId) -> EngineResult<Option<AuditContext>> {
        Ok(None)
    }
}
