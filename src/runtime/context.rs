//! The execution context threaded through one engine call (§5.A).
//!
//! `RuntimeCtx` bundles the storage/scheduler/tracer handles plus the
//! current `AuditContext` and the auto-trigger FIFO queue for the whole
//! call. It is `Clone` (cheap: everything inside is an `Arc` or a small
//! value) so nested calls can carry a child `AuditContext` without `&mut`
//! threading (DESIGN NOTES: "re-model as a context carried by the
//! execution context", realized here as an owned value rather than a
//! thread-local).

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::audit::{AuditContext, ResourceRef, SpanAttributes, Tracer};
use crate::error::{EngineError, EngineResult};
use crate::ids::{TaskInstanceKey, TaskName, WorkItemId, WorkflowId};
use crate::model::{DefinitionRegistry, ExecutionMode, WorkflowDefinition};
use crate::scheduler::{ScheduleHandle, ScheduleOwner, ScheduledInvocation, Scheduler};
use crate::states::WorkItemState;
use crate::storage::{ParentPointer, Storage, WorkItemRow};

/// A chained work-item transition enqueued by an activity (§4.5).
#[derive(Debug, Clone)]
pub enum AutoTriggerEntry {
    Start(Value),
    Complete(Value),
    Fail(Value),
    Cancel(Value),
    Reset(Value),
}

/// The FIFO queue auto-triggers are drained from, shared by every
/// `WorkItemHandle` created during one engine call (§5, "drains strictly
/// FIFO").
pub type AutoTriggerQueue = Arc<Mutex<VecDeque<(WorkItemId, AutoTriggerEntry)>>>;

#[derive(Clone)]
pub struct RuntimeCtx {
    pub storage: Arc<dyn Storage>,
    pub scheduler: Arc<dyn Scheduler>,
    pub tracer: Arc<dyn Tracer>,
    pub registry: Arc<DefinitionRegistry>,
    pub audit: AuditContext,
    pub auto_triggers: AutoTriggerQueue,
    pub execution_mode: ExecutionMode,
}

impl RuntimeCtx {
    pub fn root(
        storage: Arc<dyn Storage>,
        scheduler: Arc<dyn Scheduler>,
        tracer: Arc<dyn Tracer>,
        registry: Arc<DefinitionRegistry>,
        audit: AuditContext,
    ) -> Self {
        Self {
            storage,
            scheduler,
            tracer,
            registry,
            audit,
            auto_triggers: Arc::new(Mutex::new(VecDeque::new())),
            execution_mode: ExecutionMode::Normal,
        }
    }

    pub fn with_audit(&self, audit: AuditContext) -> Self {
        Self { audit, ..self.clone() }
    }

    pub fn with_execution_mode(&self, execution_mode: ExecutionMode) -> Self {
        Self { execution_mode, ..self.clone() }
    }

    pub async fn schedule(
        &self,
        owner: ScheduleOwner,
        delay: Duration,
        invocation: ScheduledInvocation,
    ) -> EngineResult<ScheduleHandle> {
        self.scheduler.schedule_after(owner, delay, invocation).await
    }
}

/// Handed to [`crate::model::TaskActivities`] hooks: a `RuntimeCtx` scoped
/// to one task instance, with convenience constructors for work items and
/// child workflows (§4.2 "afterEnable", §4.4 "onEnabled").
pub struct ActivityContext {
    pub rt: RuntimeCtx,
    pub definition: Arc<WorkflowDefinition>,
    pub workflow_id: WorkflowId,
    pub task_name: TaskName,
    pub generation: u64,
}

impl ActivityContext {
    pub fn key(&self) -> TaskInstanceKey {
        TaskInstanceKey {
            workflow_id: self.workflow_id,
            task_name: self.task_name.clone(),
            generation: self.generation,
        }
    }

    /// Synchronously initialises one work item under this task instance,
    /// running its `onInitialized` activity and any resulting auto-trigger
    /// chain (§4.3, §4.5).
    pub async fn initialize_work_item(&self, name: &str, payload: Value) -> EngineResult<WorkItemId> {
        let task_def = self.definition.task(&self.task_name)?;
        task_def.work_item_action.check(&payload)?;
        let id = WorkItemId::new();
        let key = self.key();
        self.rt.storage.ensure_stats_shard(&key).await?;
        self.rt
            .storage
            .insert_work_item(WorkItemRow {
                id,
                name: name.to_string(),
                state: WorkItemState::Initialized,
                parent: key.clone(),
                created_at: chrono::Utc::now(),
            })
            .await?;
        self.rt.storage.apply_work_item_stats_transition(&key, id, WorkItemState::Initialized).await?;

        let resource = ResourceRef::work_item(id, name);
        let activities = task_def.work_item_activities.clone();
        crate::audit::with_span(
            self.rt.tracer.as_ref(),
            &self.rt.audit,
            "workItem.initialize",
            "workItem",
            resource,
            SpanAttributes::WorkItem { name: name.to_string() },
            |child_audit| {
                let rt = self.rt.with_audit(child_audit);
                async move {
                    crate::runtime::workitem::invoke_activity(&rt, id, |h: &mut WorkItemHandle| -> Pin<Box<dyn Future<Output = EngineResult<()>> + Send + '_>> {
                        activities.on_initialized(h)
                    })
                    .await
                }
            },
        )
        .await?;
        Ok(id)
    }

    /// `workflow.initialize()` for a [`crate::model::TaskKind::Composite`].
    pub async fn initialize_child_workflow(&self, payload: Value) -> EngineResult<WorkflowId> {
        let task_def = self.definition.task(&self.task_name)?;
        let child_name = match &task_def.kind {
            crate::model::TaskKind::Composite { child_workflow, .. } => child_workflow.clone(),
            _ => {
                return Err(EngineError::StructuralIntegrity(format!(
                    "task {} is not a composite task",
                    self.task_name
                )))
            }
        };
        self.initialize_named_child_workflow_inner(&child_name, payload).await
    }

    /// `workflow.initialize.Name()` for a
    /// [`crate::model::TaskKind::DynamicComposite`].
    pub async fn initialize_named_child_workflow(&self, child_key: &str, payload: Value) -> EngineResult<WorkflowId> {
        let task_def = self.definition.task(&self.task_name)?;
        let child_name = match &task_def.kind {
            crate::model::TaskKind::DynamicComposite { children, .. } => children
                .get(child_key)
                .cloned()
                .ok_or_else(|| EngineError::StructuralIntegrity(format!(
                    "task {} has no dynamic child named {child_key}",
                    self.task_name
                )))?,
            _ => {
                return Err(EngineError::StructuralIntegrity(format!(
                    "task {} is not a dynamic composite task",
                    self.task_name
                )))
            }
        };
        self.initialize_named_child_workflow_inner(&child_name, payload).await
    }

    async fn initialize_named_child_workflow_inner(&self, definition_name: &str, payload: Value) -> EngineResult<WorkflowId> {
        let parent_workflow = self
            .rt
            .storage
            .get_workflow(self.workflow_id)
            .await?
            .ok_or_else(|| EngineError::NotFound { entity: "workflow", id: self.workflow_id.to_string() })?;
        let def = self.rt.registry.get(definition_name, &parent_workflow.version_name)?;
        let parent = ParentPointer {
            workflow_id: self.workflow_id,
            task_name: self.task_name.clone(),
            task_generation: self.generation,
        };
        crate::runtime::workflow::initialize(&self.rt, def, Some(parent), None, payload).await
    }

    pub async fn schedule(
        &self,
        delay: Duration,
        invocation: ScheduledInvocation,
    ) -> EngineResult<ScheduleHandle> {
        self.rt.schedule(ScheduleOwner::Task(self.key()), delay, invocation).await
    }
}

/// Handed to [`crate::model::WorkflowActivities`] hooks (§4.6) — no task
/// instance is in scope here, only the workflow itself.
pub struct WorkflowActivityContext {
    pub rt: RuntimeCtx,
    pub definition: Arc<WorkflowDefinition>,
    pub workflow_id: WorkflowId,
}

/// Handed to [`crate::model::WorkItemActivities`] hooks (§4.5).
pub struct WorkItemHandle {
    pub rt: RuntimeCtx,
    pub work_item_id: WorkItemId,
    already_set: bool,
    pending: Option<AutoTriggerEntry>,
}

impl WorkItemHandle {
    pub fn new(rt: RuntimeCtx, work_item_id: WorkItemId) -> Self {
        Self { rt, work_item_id, already_set: false, pending: None }
    }

    /// Taken by the driving loop once the activity invocation returns, and
    /// pushed onto the shared FIFO queue (§4.5: "enqueue a single
    /// AutoTriggerEntry onto the caller-provided FIFO queue").
    pub fn take_pending(&mut self) -> Option<AutoTriggerEntry> {
        self.pending.take()
    }

    fn enqueue(&mut self, entry: AutoTriggerEntry) -> EngineResult<()> {
        if self.already_set {
            return Err(EngineError::WorkItemAutoTriggerAlreadySet { work_item: self.work_item_id.to_string() });
        }
        self.already_set = true;
        self.pending = Some(entry);
        Ok(())
    }

    pub fn start(&mut self, payload: Value) -> EngineResult<()> {
        self.enqueue(AutoTriggerEntry::Start(payload))
    }

    pub fn complete(&mut self, payload: Value) -> EngineResult<()> {
        self.enqueue(AutoTriggerEntry::Complete(payload))
    }

    pub fn fail(&mut self, payload: Value) -> EngineResult<()> {
        self.enqueue(AutoTriggerEntry::Fail(payload))
    }

    pub fn cancel(&mut self, payload: Value) -> EngineResult<()> {
        self.enqueue(AutoTriggerEntry::Cancel(payload))
    }

    pub fn reset(&mut self, payload: Value) -> EngineResult<()> {
        self.enqueue(AutoTriggerEntry::Reset(payload))
    }
}
