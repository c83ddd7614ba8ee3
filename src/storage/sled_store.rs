//! `sled`-backed [`Storage`] implementation.
//!
//! Grounded directly on the teacher's `state.rs::StateStore`: one `sled`
//! tree per entity table, JSON-encoded values, composite keys built by
//! joining identifiers with a NUL separator for prefix-scan range queries.
//! `sled`'s API is synchronous; every method here does its I/O inline
//! rather than through `spawn_blocking` since the engine never calls
//! storage concurrently within one transactional step (§5) and the typical
//! working set fits in `sled`'s own page cache.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::audit::{AuditContextRecord, Span, Trace, TraceState, WorkflowSnapshot};
use crate::error::{EngineError, EngineResult};
use crate::ids::{SpanId, TaskInstanceKey, TraceId, WorkItemId, WorkflowId};
use crate::runtime::stats::StatsShard;
use crate::states::{TaskState, WorkItemState, WorkflowState};

use super::{ConditionRow, ParentPointer, Storage, TaskLogEntry, TaskRow, WorkItemRow, WorkflowRow};

fn get_json<T: DeserializeOwned>(tree: &sled::Tree, key: &str) -> EngineResult<Option<T>> {
    match tree.get(key.as_bytes())? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

fn put_json<T: Serialize>(tree: &sled::Tree, key: &str, value: &T) -> EngineResult<()> {
    let bytes = serde_json::to_vec(value)?;
    tree.insert(key.as_bytes(), bytes)?;
    Ok(())
}

fn scan_values<T: DeserializeOwned>(tree: &sled::Tree, prefix: &str) -> EngineResult<Vec<T>> {
    let mut out = Vec::new();
    for entry in tree.scan_prefix(prefix.as_bytes()) {
        let (_, bytes) = entry?;
        out.push(serde_json::from_slice(&bytes)?);
    }
    Ok(out)
}

fn all_values<T: DeserializeOwned>(tree: &sled::Tree) -> EngineResult<Vec<T>> {
    let mut out = Vec::new();
    for entry in tree.iter() {
        let (_, bytes) = entry?;
        out.push(serde_json::from_slice(&bytes)?);
    }
    Ok(out)
}

fn condition_key(workflow_id: WorkflowId, name: &str) -> String {
    format!("{workflow_id}\0{name}")
}

fn task_key(workflow_id: WorkflowId, name: &str) -> String {
    format!("{workflow_id}\0{name}")
}

fn task_instance_prefix(key: &TaskInstanceKey) -> String {
    format!("{}\0{}\0{}\0", key.workflow_id, key.task_name, key.generation)
}

fn parent_prefix(parent: &ParentPointer) -> String {
    format!("{}\0{}\0{}\0", parent.workflow_id, parent.task_name, parent.task_generation)
}

/// `sled`-backed reference [`Storage`] implementation. Opens one database
/// at construction and a fixed set of named trees beneath it.
pub struct SledStore {
    workflows: sled::Tree,
    workflows_by_parent: sled::Tree,
    conditions: sled::Tree,
    tasks: sled::Tree,
    task_log: sled::Tree,
    work_items: sled::Tree,
    work_items_by_parent: sled::Tree,
    stats: sled::Tree,
    traces: sled::Tree,
    spans: sled::Tree,
    audit_contexts: sled::Tree,
    snapshots: sled::Tree,
    log_seq: AtomicU64,
    span_seq: AtomicU64,
    snapshot_seq: AtomicU64,
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>) -> EngineResult<Self> {
        let db = sled::open(path)?;
        Ok(Self {
            workflows: db.open_tree("workflows")?,
            workflows_by_parent: db.open_tree("workflows_by_parent")?,
            conditions: db.open_tree("conditions")?,
            tasks: db.open_tree("tasks")?,
            task_log: db.open_tree("task_log")?,
            work_items: db.open_tree("work_items")?,
            work_items_by_parent: db.open_tree("work_items_by_parent")?,
            stats: db.open_tree("stats")?,
            traces: db.open_tree("traces")?,
            spans: db.open_tree("spans")?,
            audit_contexts: db.open_tree("audit_contexts")?,
            snapshots: db.open_tree("snapshots")?,
            log_seq: AtomicU64::new(0),
            span_seq: AtomicU64::new(0),
            snapshot_seq: AtomicU64::new(0),
        })
    }
}

#[async_trait]
impl Storage for SledStore {
    async fn insert_workflow(&self, row: WorkflowRow) -> EngineResult<()> {
        put_json(&self.workflows, &row.id.to_string(), &row)?;
        if let Some(parent) = &row.parent {
            let key = format!("{}{}", parent_prefix(parent), row.id);
            self.workflows_by_parent.insert(key.as_bytes(), row.id.to_string().as_bytes())?;
        }
        Ok(())
    }

    async fn get_workflow(&self, id: WorkflowId) -> EngineResult<Option<WorkflowRow>> {
        get_json(&self.workflows, &id.to_string())
    }

    async fn update_workflow_state(&self, id: WorkflowId, state: WorkflowState) -> EngineResult<()> {
        let mut row: WorkflowRow = get_json(&self.workflows, &id.to_string())?
            .ok_or_else(|| EngineError::NotFound { entity: "workflow", id: id.to_string() })?;
        row.state = state;
        put_json(&self.workflows, &id.to_string(), &row)
    }

    async fn list_workflows_by_parent(&self, parent: &ParentPointer) -> EngineResult<Vec<WorkflowRow>> {
        let mut out = Vec::new();
        for entry in self.workflows_by_parent.scan_prefix(parent_prefix(parent).as_bytes()) {
            let (_, id_bytes) = entry?;
            let id_str = String::from_utf8_lossy(&id_bytes).to_string();
            let id = WorkflowId::parse_str(&id_str)?;
            if let Some(row) = get_json(&self.workflows, &id.to_string())? {
                out.push(row);
            }
        }
        Ok(out)
    }

    async fn list_workflows_by_name_and_state(&self, name: &str, state: WorkflowState) -> EngineResult<Vec<WorkflowRow>> {
        let all: Vec<WorkflowRow> = all_values(&self.workflows)?;
        Ok(all.into_iter().filter(|w| w.name == name && w.state == state).collect())
    }

    async fn insert_condition(&self, row: ConditionRow) -> EngineResult<()> {
        put_json(&self.conditions, &condition_key(row.workflow_id, &row.name), &row)
    }

    async fn get_condition(&self, workflow_id: WorkflowId, name: &str) -> EngineResult<Option<ConditionRow>> {
        get_json(&self.conditions, &condition_key(workflow_id, name))
    }

    async fn set_condition_marking(&self, workflow_id: WorkflowId, name: &str, marking: u64) -> EngineResult<()> {
        let key = condition_key(workflow_id, name);
        let mut row: ConditionRow = get_json(&self.conditions, &key)?
            .ok_or_else(|| EngineError::NotFound { entity: "condition", id: name.to_string() })?;
        row.marking = marking;
        put_json(&self.conditions, &key, &row)
    }

    async fn list_conditions_by_workflow(&self, workflow_id: WorkflowId) -> EngineResult<Vec<ConditionRow>> {
        scan_values(&self.conditions, &format!("{workflow_id}\0"))
    }

    async fn insert_task(&self, row: TaskRow) -> EngineResult<()> {
        put_json(&self.tasks, &task_key(row.workflow_id, &row.name), &row)
    }

    async fn get_task(&self, workflow_id: WorkflowId, name: &str) -> EngineResult<Option<TaskRow>> {
        get_json(&self.tasks, &task_key(workflow_id, name))
    }

    async fn update_task(&self, row: TaskRow) -> EngineResult<()> {
        put_json(&self.tasks, &task_key(row.workflow_id, &row.name), &row)
    }

    async fn list_tasks_by_workflow(&self, workflow_id: WorkflowId) -> EngineResult<Vec<TaskRow>> {
        scan_values(&self.tasks, &format!("{workflow_id}\0"))
    }

    async fn list_tasks_by_workflow_and_state(&self, workflow_id: WorkflowId, state: TaskState) -> EngineResult<Vec<TaskRow>> {
        let all: Vec<TaskRow> = scan_values(&self.tasks, &format!("{workflow_id}\0"))?;
        Ok(all.into_iter().filter(|t| t.state == state).collect())
    }

    async fn append_task_log(&self, entry: TaskLogEntry) -> EngineResult<()> {
        let seq = self.log_seq.fetch_add(1, Ordering::SeqCst);
        let key = format!("{}\0{}\0{seq:020}", entry.workflow_id, entry.task_name);
        put_json(&self.task_log, &key, &entry)
    }

    async fn latest_task_log_entry(&self, workflow_id: WorkflowId, task_name: &str) -> EngineResult<Option<TaskLogEntry>> {
        let prefix = format!("{workflow_id}\0{task_name}\0");
        let mut latest: Option<TaskLogEntry> = None;
        for entry in self.task_log.scan_prefix(prefix.as_bytes()) {
            let (_, bytes) = entry?;
            latest = Some(serde_json::from_slice(&bytes)?);
        }
        Ok(latest)
    }

    async fn insert_work_item(&self, row: WorkItemRow) -> EngineResult<()> {
        put_json(&self.work_items, &row.id.to_string(), &row)?;
        let idx_key = format!("{}{}", task_instance_prefix(&row.parent), row.id);
        self.work_items_by_parent.insert(idx_key.as_bytes(), row.id.to_string().as_bytes())?;
        Ok(())
    }

    async fn get_work_item(&self, id: WorkItemId) -> EngineResult<Option<WorkItemRow>> {
        get_json(&self.work_items, &id.to_string())
    }

    async fn update_work_item_state(&self, id: WorkItemId, state: WorkItemState) -> EngineResult<()> {
        let mut row: WorkItemRow = get_json(&self.work_items, &id.to_string())?
            .ok_or_else(|| EngineError::NotFound { entity: "work_item", id: id.to_string() })?;
        row.state = state;
        put_json(&self.work_items, &id.to_string(), &row)
    }

    async fn list_work_items_by_task_generation(&self, key: &TaskInstanceKey) -> EngineResult<Vec<WorkItemRow>> {
        let mut out = Vec::new();
        for entry in self.work_items_by_parent.scan_prefix(task_instance_prefix(key).as_bytes()) {
            let (_, id_bytes) = entry?;
            let id_str = String::from_utf8_lossy(&id_bytes).to_string();
            let id = WorkItemId::parse_str(&id_str)?;
            if let Some(row) = get_json(&self.work_items, &id.to_string())? {
                out.push(row);
            }
        }
        Ok(out)
    }

    async fn ensure_stats_shard(&self, key: &TaskInstanceKey) -> EngineResult<()> {
        let k = key.to_string();
        if get_json::<StatsShard>(&self.stats, &k)?.is_none() {
            put_json(&self.stats, &k, &StatsShard::new(key.clone()))?;
        }
        Ok(())
    }

    async fn apply_work_item_stats_transition(&self, key: &TaskInstanceKey, work_item_id: WorkItemId, next: WorkItemState) -> EngineResult<()> {
        let k = key.to_string();
        let mut shard = get_json::<StatsShard>(&self.stats, &k)?.unwrap_or_else(|| StatsShard::new(key.clone()));
        shard.apply_work_item_transition(work_item_id, next);
        put_json(&self.stats, &k, &shard)
    }

    async fn apply_child_workflow_stats_transition(&self, key: &TaskInstanceKey, child_workflow_id: WorkflowId, next: WorkflowState) -> EngineResult<()> {
        let k = key.to_string();
        let mut shard = get_json::<StatsShard>(&self.stats, &k)?.unwrap_or_else(|| StatsShard::new(key.clone()));
        shard.apply_child_workflow_transition(child_workflow_id, next);
        put_json(&self.stats, &k, &shard)
    }

    async fn get_stats(&self, key: &TaskInstanceKey) -> EngineResult<Option<StatsShard>> {
        get_json(&self.stats, &key.to_string())
    }

    async fn insert_trace(&self, trace: Trace) -> EngineResult<()> {
        put_json(&self.traces, &trace.id.to_string(), &trace)
    }

    async fn update_trace_state(&self, id: TraceId, state: TraceState) -> EngineResult<()> {
        let key = id.to_string();
        if let Some(mut trace) = get_json::<Trace>(&self.traces, &key)? {
            trace.state = state;
            if state != TraceState::Running {
                trace.ended_at = Some(Utc::now());
            }
            put_json(&self.traces, &key, &trace)?;
        }
        Ok(())
    }

    async fn insert_spans(&self, spans: Vec<Span>) -> EngineResult<()> {
        for span in spans {
            let seq = self.span_seq.fetch_add(1, Ordering::SeqCst);
            let key = format!("{}\0{seq:020}", span.trace_id);
            put_json(&self.spans, &key, &span)?;
        }
        Ok(())
    }

    async fn get_trace(&self, id: TraceId) -> EngineResult<Option<Trace>> {
        get_json(&self.traces, &id.to_string())
    }

    async fn get_trace_spans(&self, id: TraceId) -> EngineResult<Vec<Span>> {
        scan_values(&self.spans, &format!("{id}\0"))
    }

    async fn get_root_spans(&self, id: TraceId) -> EngineResult<Vec<Span>> {
        let all: Vec<Span> = scan_values(&self.spans, &format!("{id}\0"))?;
        Ok(all.into_iter().filter(|s| s.parent_span_id.is_none()).collect())
    }

    async fn get_child_spans(&self, id: TraceId, parent_span_id: SpanId) -> EngineResult<Vec<Span>> {
        let all: Vec<Span> = scan_values(&self.spans, &format!("{id}\0"))?;
        Ok(all.into_iter().filter(|s| s.parent_span_id == Some(parent_span_id)).collect())
    }

    async fn get_spans_by_resource(&self, id: TraceId, resource_id: &str) -> EngineResult<Vec<Span>> {
        let all: Vec<Span> = scan_values(&self.spans, &format!("{id}\0"))?;
        Ok(all.into_iter().filter(|s| s.resource.id == resource_id).collect())
    }

    async fn get_spans_by_time_range(&self, id: TraceId, from: DateTime<Utc>, to: DateTime<Utc>) -> EngineResult<Vec<Span>> {
        let all: Vec<Span> = scan_values(&self.spans, &format!("{id}\0"))?;
        Ok(all.into_iter().filter(|s| s.started_at >= from && s.started_at <= to).collect())
    }

    async fn save_audit_context(&self, record: AuditContextRecord) -> EngineResult<()> {
        put_json(&self.audit_contexts, &record.workflow_id.to_string(), &record)
    }

    async fn load_audit_context(&self, workflow_id: WorkflowId) -> EngineResult<Option<AuditContextRecord>> {
        get_json(&self.audit_contexts, &workflow_id.to_string())
    }

    async fn insert_snapshot(&self, snapshot: WorkflowSnapshot) -> EngineResult<()> {
        let seq = self.snapshot_seq.fetch_add(1, Ordering::SeqCst);
        let key = format!("{}\0{seq:020}", snapshot.workflow_id);
        put_json(&self.snapshots, &key, &snapshot)
    }

    async fn get_snapshots(&self, workflow_id: WorkflowId) -> EngineResult<Vec<WorkflowSnapshot>> {
        scan_values(&self.snapshots, &format!("{workflow_id}\0"))
    }

    async fn list_recent_traces(&self, limit: usize) -> EngineResult<Vec<Trace>> {
        let mut traces: Vec<Trace> = all_values(&self.traces)?;
        traces.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        traces.truncate(limit);
        Ok(traces)
    }
}
