//! The storage façade (§6): typed read/write primitives and indexed
//! queries the engine demands of the persistence layer. The persistence
//! layer itself — a transactional document store with typed table
//! validators — is out of scope (§1); this module only defines the
//! contract plus two reference implementations.

mod memory;
#[cfg(feature = "sled-store")]
mod sled_store;

pub use memory::MemoryStore;
#[cfg(feature = "sled-store")]
pub use sled_store::SledStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audit::{AuditContextRecord, Span, Trace, WorkflowSnapshot};
use crate::error::EngineResult;
use crate::ids::{TaskInstanceKey, TraceId, WorkItemId, WorkflowId};
use crate::runtime::stats::StatsShard;
use crate::states::{TaskState, WorkItemState, WorkflowState};

/// `workflows(...).parent` — identifies the composite-task generation that
/// owns a child workflow instance (§3 ownership).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentPointer {
    pub workflow_id: WorkflowId,
    pub task_name: String,
    pub task_generation: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRow {
    pub id: WorkflowId,
    pub name: String,
    pub version_name: String,
    /// Ancestry of composite-task names.
    pub path: Vec<String>,
    /// Ancestry of workflow-instance ids.
    pub realized_path: Vec<WorkflowId>,
    pub parent: Option<ParentPointer>,
    pub state: WorkflowState,
    pub root_workflow_id: Option<WorkflowId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionRow {
    pub workflow_id: WorkflowId,
    pub name: String,
    pub marking: u64,
    pub is_implicit: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRow {
    pub workflow_id: WorkflowId,
    pub name: String,
    pub state: TaskState,
    pub generation: u64,
    pub execution_mode: crate::model::ExecutionMode,
    pub last_transition_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskLogEntry {
    pub workflow_id: WorkflowId,
    pub task_name: String,
    pub generation: u64,
    pub state: TaskState,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItemRow {
    pub id: WorkItemId,
    pub name: String,
    pub state: WorkItemState,
    pub parent: TaskInstanceKey,
    pub created_at: DateTime<Utc>,
}

/// The storage façade contract. Every method is `&self`; an implementation
/// is responsible for whatever interior mutability / transactionality it
/// needs (§6.A). The engine never calls these concurrently within one
/// transactional step (§5), so a single mutex per backing store suffices.
#[async_trait]
pub trait Storage: Send + Sync {
    // -- workflows --
    async fn insert_workflow(&self, row: WorkflowRow) -> EngineResult<()>;
    async fn get_workflow(&self, id: WorkflowId) -> EngineResult<Option<WorkflowRow>>;
    async fn update_workflow_state(&self, id: WorkflowId, state: WorkflowState) -> EngineResult<()>;
    async fn list_workflows_by_parent(&self, parent: &ParentPointer) -> EngineResult<Vec<WorkflowRow>>;
    async fn list_workflows_by_name_and_state(
        &self,
        name: &str,
        state: WorkflowState,
    ) -> EngineResult<Vec<WorkflowRow>>;

    // -- conditions --
    async fn insert_condition(&self, row: ConditionRow) -> EngineResult<()>;
    async fn get_condition(&self, workflow_id: WorkflowId, name: &str) -> EngineResult<Option<ConditionRow>>;
    async fn set_condition_marking(&self, workflow_id: WorkflowId, name: &str, marking: u64) -> EngineResult<()>;
    async fn list_conditions_by_workflow(&self, workflow_id: WorkflowId) -> EngineResult<Vec<ConditionRow>>;

    // -- tasks --
    async fn insert_task(&self, row: TaskRow) -> EngineResult<()>;
    async fn get_task(&self, workflow_id: WorkflowId, name: &str) -> EngineResult<Option<TaskRow>>;
    async fn update_task(&self, row: TaskRow) -> EngineResult<()>;
    async fn list_tasks_by_workflow(&self, workflow_id: WorkflowId) -> EngineResult<Vec<TaskRow>>;
    async fn list_tasks_by_workflow_and_state(
        &self,
        workflow_id: WorkflowId,
        state: TaskState,
    ) -> EngineResult<Vec<TaskRow>>;

    // -- task state log --
    async fn append_task_log(&self, entry: TaskLogEntry) -> EngineResult<()>;
    async fn latest_task_log_entry(
        &self,
        workflow_id: WorkflowId,
        task_name: &str,
    ) -> EngineResult<Option<TaskLogEntry>>;

    // -- work items --
    async fn insert_work_item(&self, row: WorkItemRow) -> EngineResult<()>;
    async fn get_work_item(&self, id: WorkItemId) -> EngineResult<Option<WorkItemRow>>;
    async fn update_work_item_state(&self, id: WorkItemId, state: WorkItemState) -> EngineResult<()>;
    async fn list_work_items_by_task_generation(&self, key: &TaskInstanceKey) -> EngineResult<Vec<WorkItemRow>>;

    // -- stats shards --
    async fn ensure_stats_shard(&self, key: &TaskInstanceKey) -> EngineResult<()>;
    async fn apply_work_item_stats_transition(
        &self,
        key: &TaskInstanceKey,
        work_item_id: WorkItemId,
        next: WorkItemState,
    ) -> EngineResult<()>;
    async fn apply_child_workflow_stats_transition(
        &self,
        key: &TaskInstanceKey,
        child_workflow_id: WorkflowId,
        next: WorkflowState,
    ) -> EngineResult<()>;
    async fn get_stats(&self, key: &TaskInstanceKey) -> EngineResult<Option<StatsShard>>;

    // -- audit --
    async fn insert_trace(&self, trace: Trace) -> EngineResult<()>;
    async fn update_trace_state(&self, id: TraceId, state: crate::audit::TraceState) -> EngineResult<()>;
    async fn insert_spans(&self, spans: Vec<Span>) -> EngineResult<()>;
    async fn get_trace(&self, id: TraceId) -> EngineResult<Option<Trace>>;
    async fn get_trace_spans(&self, id: TraceId) -> EngineResult<Vec<Span>>;
    async fn get_root_spans(&self, id: TraceId) -> EngineResult<Vec<Span>>;
    async fn get_child_spans(&self, id: TraceId, parent_span_id: crate::ids::SpanId) -> EngineResult<Vec<Span>>;
    async fn get_spans_by_resource(&self, id: TraceId, resource_id: &str) -> EngineResult<Vec<Span>>;
    async fn get_spans_by_time_range(
        &self,
        id: TraceId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> EngineResult<Vec<Span>>;
    async fn save_audit_context(&self, record: AuditContextRecord) -> EngineResult<()>;
    async fn load_audit_context(&self, workflow_id: WorkflowId) -> EngineResult<Option<AuditContextRecord>>;
    async fn insert_snapshot(&self, snapshot: WorkflowSnapshot) -> EngineResult<()>;
    async fn get_snapshots(&self, workflow_id: WorkflowId) -> EngineResult<Vec<WorkflowSnapshot>>;
    async fn list_recent_traces(&self, limit: usize) -> EngineResult<Vec<Trace>>;
}
