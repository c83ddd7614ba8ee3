//! In-memory reference [`Storage`] implementation.
//!
//! Grounded on the teacher's `state.rs::StateStore` (a `sled`-backed
//! key-value façade with one `save_*`/`load_*` pair per entity): this
//! implementation keeps the same method shape but backs it with a single
//! `tokio::sync::Mutex`-guarded set of `HashMap`s, since the engine never
//! calls storage concurrently within one transactional step (§5).

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::audit::{AuditContextRecord, Span, Trace, TraceState, WorkflowSnapshot};
use crate::error::{EngineError, EngineResult};
use crate::ids::{SpanId, TaskInstanceKey, TraceId, WorkItemId, WorkflowId};
use crate::runtime::stats::StatsShard;
use crate::states::{TaskState, WorkItemState, WorkflowState};

use super::{ConditionRow, ParentPointer, Storage, TaskLogEntry, TaskRow, WorkItemRow, WorkflowRow};

#[derive(Default)]
struct Inner {
    workflows: HashMap<WorkflowId, WorkflowRow>,
    conditions: HashMap<(WorkflowId, String), ConditionRow>,
    tasks: HashMap<(WorkflowId, String), TaskRow>,
    task_log: Vec<TaskLogEntry>,
    work_items: HashMap<WorkItemId, WorkItemRow>,
    stats: HashMap<TaskInstanceKey, StatsShard>,
    traces: HashMap<TraceId, Trace>,
    spans: HashMap<TraceId, Vec<Span>>,
    audit_contexts: HashMap<WorkflowId, AuditContextRecord>,
    snapshots: HashMap<WorkflowId, Vec<WorkflowSnapshot>>,
}

/// A process-local `Storage` backed by plain maps. Suitable for tests and
/// for the CLI's `--store memory` mode; not durable across process restarts.
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner::default()) }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn insert_workflow(&self, row: WorkflowRow) -> EngineResult<()> {
        self.inner.lock().await.workflows.insert(row.id, row);
        Ok(())
    }

    async fn get_workflow(&self, id: WorkflowId) -> EngineResult<Option<WorkflowRow>> {
        Ok(self.inner.lock().await.workflows.get(&id).cloned())
    }

    async fn update_workflow_state(&self, id: WorkflowId, state: WorkflowState) -> EngineResult<()> {
        let mut g = self.inner.lock().await;
        let row = g
            .workflows
            .get_mut(&id)
            .ok_or_else(|| EngineError::NotFound { entity: "workflow", id: id.to_string() })?;
        row.state = state;
        Ok(())
    }

    async fn list_workflows_by_parent(&self, parent: &ParentPointer) -> EngineResult<Vec<WorkflowRow>> {
        Ok(self
            .inner
            .lock()
            .await
            .workflows
            .values()
            .filter(|w| w.parent.as_ref() == Some(parent))
            .cloned()
            .collect())
    }

    async fn list_workflows_by_name_and_state(
        &self,
        name: &str,
        state: WorkflowState,
    ) -> EngineResult<Vec<WorkflowRow>> {
        Ok(self
            .inner
            .lock()
            .await
            .workflows
            .values()
            .filter(|w| w.name == name && w.state == state)
            .cloned()
            .collect())
    }

    async fn insert_condition(&self, row: ConditionRow) -> EngineResult<()> {
        let mut g = self.inner.lock().await;
        g.conditions.insert((row.workflow_id, row.name.clone()), row);
        Ok(())
    }

    async fn get_condition(&self, workflow_id: WorkflowId, name: &str) -> EngineResult<Option<ConditionRow>> {
        Ok(self.inner.lock().await.conditions.get(&(workflow_id, name.to_string())).cloned())
    }

    async fn set_condition_marking(&self, workflow_id: WorkflowId, name: &str, marking: u64) -> EngineResult<()> {
        let mut g = self.inner.lock().await;
        let row = g
            .conditions
            .get_mut(&(workflow_id, name.to_string()))
            .ok_or_else(|| EngineError::NotFound { entity: "condition", id: name.to_string() })?;
        row.marking = marking;
        Ok(())
    }

    async fn list_conditions_by_workflow(&self, workflow_id: WorkflowId) -> EngineResult<Vec<ConditionRow>> {
        Ok(self
            .inner
            .lock()
            .await
            .conditions
            .values()
            .filter(|c| c.workflow_id == workflow_id)
            .cloned()
            .collect())
    }

    async fn insert_task(&self, row: TaskRow) -> EngineResult<()> {
        let mut g = self.inner.lock().await;
        g.tasks.insert((row.workflow_id, row.name.clone()), row);
        Ok(())
    }

    async fn get_task(&self, workflow_id: WorkflowId, name: &str) -> EngineResult<Option<TaskRow>> {
        Ok(self.inner.lock().await.tasks.get(&(workflow_id, name.to_string())).cloned())
    }

    async fn update_task(&self, row: TaskRow) -> EngineResult<()> {
        let mut g = self.inner.lock().await;
        g.tasks.insert((row.workflow_id, row.name.clone()), row);
        Ok(())
    }

    async fn list_tasks_by_workflow(&self, workflow_id: WorkflowId) -> EngineResult<Vec<TaskRow>> {
        Ok(self
            .inner
            .lock()
            .await
            .tasks
            .values()
            .filter(|t| t.workflow_id == workflow_id)
            .cloned()
            .collect())
    }

    async fn list_tasks_by_workflow_and_state(
        &self,
        workflow_id: WorkflowId,
        state: TaskState,
    ) -> EngineResult<Vec<TaskRow>> {
        Ok(self
            .inner
            .lock()
            .await
            .tasks
            .values()
            .filter(|t| t.workflow_id == workflow_id && t.state == state)
            .cloned()
            .collect())
    }

    async fn append_task_log(&self, entry: TaskLogEntry) -> EngineResult<()> {
        self.inner.lock().await.task_log.push(entry);
        Ok(())
    }

    async fn latest_task_log_entry(
        &self,
        workflow_id: WorkflowId,
        task_name: &str,
    ) -> EngineResult<Option<TaskLogEntry>> {
        let g = self.inner.lock().await;
        Ok(g.task_log
            .iter()
            .rev()
            .find(|e| e.workflow_id == workflow_id && e.task_name == task_name)
            .cloned())
    }

    async fn insert_work_item(&self, row: WorkItemRow) -> EngineResult<()> {
        self.inner.lock().await.work_items.insert(row.id, row);
        Ok(())
    }

    async fn get_work_item(&self, id: WorkItemId) -> EngineResult<Option<WorkItemRow>> {
        Ok(self.inner.lock().await.work_items.get(&id).cloned())
    }

    async fn update_work_item_state(&self, id: WorkItemId, state: WorkItemState) -> EngineResult<()> {
        let mut g = self.inner.lock().await;
        let row = g
            .work_items
            .get_mut(&id)
            .ok_or_else(|| EngineError::NotFound { entity: "work_item", id: id.to_string() })?;
        row.state = state;
        Ok(())
    }

    async fn list_work_items_by_task_generation(&self, key: &TaskInstanceKey) -> EngineResult<Vec<WorkItemRow>> {
        Ok(self
            .inner
            .lock()
            .await
            .work_items
            .values()
            .filter(|w| &w.parent == key)
            .cloned()
            .collect())
    }

    async fn ensure_stats_shard(&self, key: &TaskInstanceKey) -> EngineResult<()> {
        let mut g = self.inner.lock().await;
        g.stats.entry(key.clone()).or_insert_with(|| StatsShard::new(key.clone()));
        Ok(())
    }

    async fn apply_work_item_stats_transition(
        &self,
        key: &TaskInstanceKey,
        work_item_id: WorkItemId,
        next: WorkItemState,
    ) -> EngineResult<()> {
        let mut g = self.inner.lock().await;
        let shard = g.stats.entry(key.clone()).or_insert_with(|| StatsShard::new(key.clone()));
        shard.apply_work_item_transition(work_item_id, next);
        Ok(())
    }

    async fn apply_child_workflow_stats_transition(
        &self,
        key: &TaskInstanceKey,
        child_workflow_id: WorkflowId,
        next: WorkflowState,
    ) -> EngineResult<()> {
        let mut g = self.inner.lock().await;
        let shard = g.stats.entry(key.clone()).or_insert_with(|| StatsShard::new(key.clone()));
        shard.apply_child_workflow_transition(child_workflow_id, next);
        Ok(())
    }

    async fn get_stats(&self, key: &TaskInstanceKey) -> EngineResult<Option<StatsShard>> {
        Ok(self.inner.lock().await.stats.get(key).cloned())
    }

    async fn insert_trace(&self, trace: Trace) -> EngineResult<()> {
        self.inner.lock().await.traces.insert(trace.id, trace);
        Ok(())
    }

    async fn update_trace_state(&self, id: TraceId, state: TraceState) -> EngineResult<()> {
        let mut g = self.inner.lock().await;
        if let Some(t) = g.traces.get_mut(&id) {
            t.state = state;
            if state != TraceState::Running {
                t.ended_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn insert_spans(&self, spans: Vec<Span>) -> EngineResult<()> {
        let mut g = self.inner.lock().await;
        for span in spans {
            g.spans.entry(span.trace_id).or_default().push(span);
        }
        Ok(())
    }

    async fn get_trace(&self, id: TraceId) -> EngineResult<Option<Trace>> {
        Ok(self.inner.lock().await.traces.get(&id).cloned())
    }

    async fn get_trace_spans(&self, id: TraceId) -> EngineResult<Vec<Span>> {
        Ok(self.inner.lock().await.spans.get(&id).cloned().unwrap_or_default())
    }

    async fn get_root_spans(&self, id: TraceId) -> EngineResult<Vec<Span>> {
        Ok(self
            .inner
            .lock()
            .await
            .spans
            .get(&id)
            .map(|v| v.iter().filter(|s| s.parent_span_id.is_none()).cloned().collect())
            .unwrap_or_default())
    }

    async fn get_child_spans(&self, id: TraceId, parent_span_id: SpanId) -> EngineResult<Vec<Span>> {
        Ok(self
            .inner
            .lock()
            .await
            .spans
            .get(&id)
            .map(|v| v.iter().filter(|s| s.parent_span_id == Some(parent_span_id)).cloned().collect())
            .unwrap_or_default())
    }

    async fn get_spans_by_resource(&self, id: TraceId, resource_id: &str) -> EngineResult<Vec<Span>> {
        Ok(self
            .inner
            .lock()
            .await
            .spans
            .get(&id)
            .map(|v| v.iter().filter(|s| s.resource.id == resource_id).cloned().collect())
            .unwrap_or_default())
    }

    async fn get_spans_by_time_range(
        &self,
        id: TraceId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> EngineResult<Vec<Span>> {
        Ok(self
            .inner
            .lock()
            .await
            .spans
            .get(&id)
            .map(|v| v.iter().filter(|s| s.started_at >= from && s.started_at <= to).cloned().collect())
            .unwrap_or_default())
    }

    async fn save_audit_context(&self, record: AuditContextRecord) -> EngineResult<()> {
        self.inner.lock().await.audit_contexts.insert(record.workflow_id, record);
        Ok(())
    }

    async fn load_audit_context(&self, workflow_id: WorkflowId) -> EngineResult<Option<AuditContextRecord>> {
        Ok(self.inner.lock().await.audit_contexts.get(&workflow_id).cloned())
    }

    async fn insert_snapshot(&self, snapshot: WorkflowSnapshot) -> EngineResult<()> {
        let mut g = self.inner.lock().await;
        g.snapshots.entry(snapshot.workflow_id).or_default().push(snapshot);
        Ok(())
    }

    async fn get_snapshots(&self, workflow_id: WorkflowId) -> EngineResult<Vec<WorkflowSnapshot>> {
        Ok(self.inner.lock().await.snapshots.get(&workflow_id).cloned().unwrap_or_default())
    }

    async fn list_recent_traces(&self, limit: usize) -> EngineResult<Vec<Trace>> {
        let g = self.inner.lock().await;
        let mut traces: Vec<Trace> = g.traces.values().cloned().collect();
        traces.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        traces.truncate(limit);
        Ok(traces)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ExecutionMode;

    fn workflow_row(id: WorkflowId) -> WorkflowRow {
        WorkflowRow {
            id,
            name: "sequential-review".to_string(),
            version_name: "v1".to_string(),
            path: Vec::new(),
            realized_path: vec![id],
            parent: None,
            state: WorkflowState::Initialized,
            root_workflow_id: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn workflow_state_updates_are_visible_to_a_later_get() {
        let store = MemoryStore::new();
        let id = WorkflowId::new();
        store.insert_workflow(workflow_row(id)).await.unwrap();
        store.update_workflow_state(id, WorkflowState::Completed).await.unwrap();
        let row = store.get_workflow(id).await.unwrap().unwrap();
        assert_eq!(row.state, WorkflowState::Completed);
    }

    #[tokio::test]
    async fn update_workflow_state_on_unknown_id_errors() {
        let store = MemoryStore::new();
        let err = store.update_workflow_state(WorkflowId::new(), WorkflowState::Completed).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn condition_marking_round_trips_through_get() {
        let store = MemoryStore::new();
        let workflow_id = WorkflowId::new();
        store
            .insert_condition(ConditionRow { workflow_id, name: "start".to_string(), marking: 0, is_implicit: false })
            .await
            .unwrap();
        store.set_condition_marking(workflow_id, "start", 3).await.unwrap();
        let row = store.get_condition(workflow_id, "start").await.unwrap().unwrap();
        assert_eq!(row.marking, 3);
    }

    #[tokio::test]
    async fn list_tasks_by_workflow_and_state_filters_by_both_keys() {
        let store = MemoryStore::new();
        let workflow_id = WorkflowId::new();
        let other_workflow_id = WorkflowId::new();
        for (wf, name, state) in [
            (workflow_id, "draft", TaskState::Enabled),
            (workflow_id, "approve", TaskState::Disabled),
            (other_workflow_id, "draft", TaskState::Enabled),
        ] {
            store
                .insert_task(TaskRow {
                    workflow_id: wf,
                    name: name.to_string(),
                    state,
                    generation: 0,
                    execution_mode: ExecutionMode::Normal,
                    last_transition_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        let enabled = store.list_tasks_by_workflow_and_state(workflow_id, TaskState::Enabled).await.unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].name, "draft");
    }
}
