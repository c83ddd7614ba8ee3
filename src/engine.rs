//! The engine: owns storage/scheduler/tracer/registry, wires itself in as
//! the scheduler's [`Dispatcher`], and exposes every public operation named
//! in spec.md §6. Each public method is one transactional step: build a
//! root [`RuntimeCtx`], run the operation, drain auto-triggers exactly
//! once, schedule a trace flush.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::audit::{AuditContext, NoopTracer, RealTracer, SnapshotComputer, Span, Tracer, Trace, WorkflowSnapshot};
use crate::config::{EngineConfig, TracerMode};
use crate::error::EngineResult;
use crate::ids::{SpanId, TaskInstanceKey, TraceId, WorkItemId, WorkflowId};
use crate::model::DefinitionRegistry;
use crate::runtime::{workflow, workitem, RuntimeCtx};
use crate::scheduler::{Dispatcher, InMemoryScheduler, ScheduleOwner, ScheduledInvocation, Scheduler};
use crate::states::{CancellationReason, TaskState};
use crate::storage::{ConditionRow, ParentPointer, Storage, TaskRow, WorkItemRow, WorkflowRow};

/// Top-level handle consumed by a host (CLI, RPC layer, embedding
/// application). Cheap to clone — every field is an `Arc`.
#[derive(Clone)]
pub struct Engine {
    storage: Arc<dyn Storage>,
    scheduler: Arc<dyn Scheduler>,
    tracer: Arc<dyn Tracer>,
    registry: Arc<DefinitionRegistry>,
    snapshots: Arc<SnapshotComputer>,
}

/// Receives invocations from the scheduler once their delay elapses and
/// routes them to the tracer's flush path or the snapshot computer,
/// matching spec.md §4.7/§4.8's two engine-scheduled invocation kinds.
/// Holds the concrete [`RealTracer`] (rather than `Arc<dyn Tracer>`) since
/// flushing is an implementation detail the no-op tracer has nothing to do
/// for — widening the object-safe `Tracer` trait with a `flush_now` every
/// implementation must stub out would be the wrong tradeoff.
struct EngineDispatcher {
    real_tracer: Option<Arc<RealTracer>>,
    snapshots: Arc<SnapshotComputer>,
    storage: Arc<dyn Storage>,
}

#[async_trait]
impl Dispatcher for EngineDispatcher {
    async fn dispatch(&self, invocation: ScheduledInvocation) {
        match invocation {
            ScheduledInvocation::FlushTrace { trace_id } => {
                if let Some(real) = &self.real_tracer {
                    if let Err(err) = real.flush_now(trace_id).await {
                        tracing::error!(error = %err, %trace_id, "trace flush failed");
                    }
                }
            }
            ScheduledInvocation::ComputeSnapshot { workflow_id, trace_id, at } => {
                match self.snapshots.compute(workflow_id, trace_id, at).await {
                    Ok(snapshot) => {
                        if let Err(err) = self.storage.insert_snapshot(snapshot).await {
                            tracing::error!(error = %err, %workflow_id, "snapshot persist failed");
                        }
                    }
                    Err(err) => tracing::error!(error = %err, %workflow_id, "snapshot computation failed"),
                }
            }
            ScheduledInvocation::Custom { function_ref, args } => {
                tracing::debug!(function_ref, %args, "custom scheduled invocation has no engine-side handler");
            }
        }
    }
}

impl Engine {
    /// Builds an engine around an in-memory scheduler and the tracer chosen
    /// by `config.tracer_mode`. The `Dispatcher` cycle — scheduler needs
    /// the dispatcher, the dispatcher needs the tracer/storage the engine
    /// owns — is resolved with the scheduler's two-phase `set_dispatcher`.
    pub fn new(storage: Arc<dyn Storage>, registry: DefinitionRegistry, config: EngineConfig) -> Self {
        let scheduler = InMemoryScheduler::new();
        let real_tracer = match config.tracer_mode {
            TracerMode::Real => Some(Arc::new(RealTracer::new(storage.clone(), scheduler.clone()))),
            TracerMode::Noop => None,
        };
        let tracer: Arc<dyn Tracer> = match &real_tracer {
            Some(real) => real.clone(),
            None => Arc::new(NoopTracer),
        };
        let snapshots = Arc::new(SnapshotComputer::with_retry_policy(
            storage.clone(),
            config.snapshot_max_attempts,
            config.snapshot_retry_delay,
        ));
        scheduler.set_dispatcher(Arc::new(EngineDispatcher {
            real_tracer,
            snapshots: snapshots.clone(),
            storage: storage.clone(),
        }));
        Self { storage, scheduler, tracer, registry: Arc::new(registry), snapshots }
    }

    /// Builds the execution context for one transactional step against an
    /// existing workflow: loads the persisted audit context so the whole
    /// workflow's calls share one trace (§4.8 cross-boundary), falling back
    /// to a fresh root context whose trace id defaults to the workflow id
    /// when none has been persisted yet.
    async fn ctx_for(&self, workflow_id: WorkflowId) -> EngineResult<RuntimeCtx> {
        let audit = match self.tracer.load_context(workflow_id).await? {
            Some(ctx) => ctx,
            None => AuditContext::root(TraceId(workflow_id.0), None),
        };
        Ok(RuntimeCtx::root(self.storage.clone(), self.scheduler.clone(), self.tracer.clone(), self.registry.clone(), audit))
    }

    async fn workflow_id_of(&self, work_item_id: WorkItemId) -> EngineResult<WorkflowId> {
        self.storage
            .get_work_item(work_item_id)
            .await?
            .map(|row| row.parent.workflow_id)
            .ok_or_else(|| crate::error::EngineError::NotFound { entity: "work_item", id: work_item_id.to_string() })
    }

    async fn finish(&self, rt: &RuntimeCtx, workflow_id: WorkflowId) -> EngineResult<()> {
        workitem::drain_auto_triggers(rt).await?;
        self.tracer.save_context(workflow_id, &rt.audit).await?;
        self.tracer.schedule_flush(rt.audit.trace_id).await
    }

    // -- workflow lifecycle --

    pub async fn initialize_root_workflow(
        &self,
        workflow_name: &str,
        workflow_version_name: &str,
        payload: Option<Value>,
    ) -> EngineResult<WorkflowId> {
        let workflow_id = WorkflowId::new();
        let audit = AuditContext::root(TraceId(workflow_id.0), None);
        let rt = RuntimeCtx::root(self.storage.clone(), self.scheduler.clone(), self.tracer.clone(), self.registry.clone(), audit);
        let definition = self.registry.get(workflow_name, workflow_version_name)?;
        let id = workflow::initialize(&rt, definition, None, Some(workflow_id), payload.unwrap_or(Value::Null)).await?;
        self.finish(&rt, id).await?;
        Ok(id)
    }

    pub async fn cancel_workflow(
        &self,
        workflow_id: WorkflowId,
        cancellation_reason: Option<CancellationReason>,
    ) -> EngineResult<()> {
        let rt = self.ctx_for(workflow_id).await?;
        workflow::cancel(&rt, workflow_id, Value::Null, cancellation_reason.unwrap_or(CancellationReason::Explicit), true).await?;
        self.finish(&rt, workflow_id).await
    }

    // -- work item lifecycle --

    pub async fn start_work_item(&self, work_item_id: WorkItemId, payload: Option<Value>) -> EngineResult<()> {
        let workflow_id = self.workflow_id_of(work_item_id).await?;
        let rt = self.ctx_for(workflow_id).await?;
        workitem::start(&rt, work_item_id, payload.unwrap_or(Value::Null)).await?;
        self.finish(&rt, workflow_id).await
    }

    pub async fn complete_work_item(&self, work_item_id: WorkItemId, payload: Option<Value>) -> EngineResult<()> {
        let workflow_id = self.workflow_id_of(work_item_id).await?;
        let rt = self.ctx_for(workflow_id).await?;
        workitem::complete(&rt, work_item_id, payload.unwrap_or(Value::Null)).await?;
        self.finish(&rt, workflow_id).await
    }

    pub async fn fail_work_item(&self, work_item_id: WorkItemId, payload: Option<Value>) -> EngineResult<()> {
        let workflow_id = self.workflow_id_of(work_item_id).await?;
        let rt = self.ctx_for(workflow_id).await?;
        workitem::fail(&rt, work_item_id, payload.unwrap_or(Value::Null)).await?;
        self.finish(&rt, workflow_id).await
    }

    pub async fn cancel_work_item(&self, work_item_id: WorkItemId, payload: Option<Value>) -> EngineResult<()> {
        let workflow_id = self.workflow_id_of(work_item_id).await?;
        let rt = self.ctx_for(workflow_id).await?;
        workitem::cancel(&rt, work_item_id, payload.unwrap_or(Value::Null)).await?;
        self.finish(&rt, workflow_id).await
    }

    pub async fn reset_work_item(&self, work_item_id: WorkItemId, payload: Option<Value>) -> EngineResult<()> {
        let workflow_id = self.workflow_id_of(work_item_id).await?;
        let rt = self.ctx_for(workflow_id).await?;
        workitem::reset(&rt, work_item_id, payload.unwrap_or(Value::Null)).await?;
        self.finish(&rt, workflow_id).await
    }

    // -- queries --

    pub async fn get_workflow_by_id(&self, id: WorkflowId) -> EngineResult<Option<WorkflowRow>> {
        self.storage.get_workflow(id).await
    }

    pub async fn get_workflow_tasks(&self, id: WorkflowId) -> EngineResult<Vec<TaskRow>> {
        self.storage.list_tasks_by_workflow(id).await
    }

    pub async fn get_workflow_tasks_by_state(&self, id: WorkflowId, state: TaskState) -> EngineResult<Vec<TaskRow>> {
        self.storage.list_tasks_by_workflow_and_state(id, state).await
    }

    pub async fn get_workflow_conditions(&self, id: WorkflowId) -> EngineResult<Vec<ConditionRow>> {
        self.storage.list_conditions_by_workflow(id).await
    }

    pub async fn get_workflow_task_work_items(&self, key: &TaskInstanceKey) -> EngineResult<Vec<WorkItemRow>> {
        self.storage.list_work_items_by_task_generation(key).await
    }

    pub async fn get_workflow_composite_task_workflows(&self, parent: &ParentPointer) -> EngineResult<Vec<WorkflowRow>> {
        self.storage.list_workflows_by_parent(parent).await
    }

    // -- audit queries --

    pub async fn get_trace(&self, id: TraceId) -> EngineResult<Option<Trace>> {
        self.storage.get_trace(id).await
    }

    pub async fn get_trace_spans(&self, id: TraceId) -> EngineResult<Vec<Span>> {
        self.storage.get_trace_spans(id).await
    }

    pub async fn get_root_spans(&self, id: TraceId) -> EngineResult<Vec<Span>> {
        self.storage.get_root_spans(id).await
    }

    pub async fn get_child_spans(&self, id: TraceId, parent_span_id: SpanId) -> EngineResult<Vec<Span>> {
        self.storage.get_child_spans(id, parent_span_id).await
    }

    pub async fn get_spans_by_resource(&self, id: TraceId, resource_id: &str) -> EngineResult<Vec<Span>> {
        self.storage.get_spans_by_resource(id, resource_id).await
    }

    pub async fn get_spans_by_time_range(&self, id: TraceId, from: DateTime<Utc>, to: DateTime<Utc>) -> EngineResult<Vec<Span>> {
        self.storage.get_spans_by_time_range(id, from, to).await
    }

    /// `getKeyEvents`: the subset of a trace's spans carrying at least one
    /// recorded [`crate::audit::SpanEvent`] (§6).
    pub async fn get_key_events(&self, id: TraceId) -> EngineResult<Vec<Span>> {
        let spans = self.storage.get_trace_spans(id).await?;
        Ok(spans.into_iter().filter(|s| !s.events.is_empty()).collect())
    }

    /// `getChildWorkflowInstances`: every workflow instance owned by one
    /// composite-task generation, regardless of state.
    pub async fn get_child_workflow_instances(&self, parent: &ParentPointer) -> EngineResult<Vec<WorkflowRow>> {
        self.storage.list_workflows_by_parent(parent).await
    }

    /// `getWorkflowStateAtTime`: computes (without persisting) a snapshot
    /// at an arbitrary timestamp, for ad hoc "what did this look like at
    /// time T" queries distinct from the scheduled, persisted snapshots in
    /// `getWorkflowSnapshots`.
    pub async fn get_workflow_state_at_time(&self, workflow_id: WorkflowId, trace_id: TraceId, at: DateTime<Utc>) -> EngineResult<WorkflowSnapshot> {
        self.snapshots.compute(workflow_id, trace_id, at).await
    }

    pub async fn get_workflow_snapshots(&self, workflow_id: WorkflowId) -> EngineResult<Vec<WorkflowSnapshot>> {
        self.storage.get_snapshots(workflow_id).await
    }

    pub async fn list_recent_traces(&self, limit: usize) -> EngineResult<Vec<Trace>> {
        self.storage.list_recent_traces(limit).await
    }

    /// Schedules a `ComputeSnapshot` invocation for `at` (defaults to now),
    /// matching §4.8's "snapshot scheduling" rather than computing inline.
    pub async fn schedule_snapshot(&self, workflow_id: WorkflowId, trace_id: TraceId, at: DateTime<Utc>) -> EngineResult<()> {
        self.scheduler
            .schedule_after(
                ScheduleOwner::Trace { trace_id },
                std::time::Duration::ZERO,
                ScheduledInvocation::ComputeSnapshot { workflow_id, trace_id, at },
            )
            .await
            .map(|_| ())
    }
}
