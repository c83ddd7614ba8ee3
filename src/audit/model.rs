//! OpenTelemetry-shaped trace/span/snapshot types (§3, §4.8).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{SnapshotId, SpanId, TraceId, WorkItemId, WorkflowId};
use crate::states::{TaskState, WorkItemState, WorkflowState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceState {
    Running,
    Completed,
    Failed,
    Canceled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanState {
    Started,
    Completed,
    Failed,
    Canceled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    pub id: TraceId,
    pub name: String,
    pub state: TraceState,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub correlation_id: Option<String>,
    pub initiator: Option<String>,
}

/// `{type, id, name}` — the resource a span is about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRef {
    pub kind: String,
    pub id: String,
    pub name: String,
}

impl ResourceRef {
    pub fn workflow(id: WorkflowId, name: &str) -> Self {
        Self { kind: "workflow".to_string(), id: id.to_string(), name: name.to_string() }
    }

    pub fn task(workflow_id: WorkflowId, name: &str) -> Self {
        Self { kind: "task".to_string(), id: format!("{workflow_id}/{name}"), name: name.to_string() }
    }

    pub fn condition(workflow_id: WorkflowId, name: &str) -> Self {
        Self { kind: "condition".to_string(), id: format!("{workflow_id}/{name}"), name: name.to_string() }
    }

    pub fn work_item(id: WorkItemId, name: &str) -> Self {
        Self { kind: "workItem".to_string(), id: id.to_string(), name: name.to_string() }
    }
}

/// The discriminated union named in spec.md §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum SpanAttributes {
    Workflow { name: String, version_name: String },
    Task { name: String, generation: u64, join: String, split: String },
    Condition { old_marking: u64, new_marking: u64, delta: i64 },
    WorkItem { name: String },
    Activity { name: String },
    Custom(serde_json::Value),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanEvent {
    pub name: String,
    pub at: DateTime<Utc>,
    pub attributes: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    pub id: SpanId,
    pub parent_span_id: Option<SpanId>,
    pub trace_id: TraceId,
    pub depth: u32,
    pub path: Vec<String>,
    pub operation: String,
    pub operation_type: String,
    pub resource: ResourceRef,
    pub state: SpanState,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub sequence_number: u64,
    pub attributes: SpanAttributes,
    pub events: Vec<SpanEvent>,
    pub error: Option<String>,
    pub causation_id: Option<SpanId>,
}

/// Carried by the execution context, never a global/thread-local (DESIGN
/// NOTES: "re-model as a context carried by the execution context"). Each
/// span creation returns a child of this value (§4.8 "Context propagation").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditContext {
    pub trace_id: TraceId,
    pub parent_span_id: Option<SpanId>,
    pub depth: u32,
    pub path: Vec<String>,
    pub correlation_id: Option<String>,
}

impl AuditContext {
    pub fn root(trace_id: TraceId, correlation_id: Option<String>) -> Self {
        Self { trace_id, parent_span_id: None, depth: 0, path: Vec::new(), correlation_id }
    }

    /// Returns the context a freshly started child span hands to its own
    /// children: `depth := parent.depth + 1`, `path := parent.path ++
    /// [operation]`, `parentSpanId := spanId` (§4.8).
    pub fn child(&self, operation: &str, span_id: SpanId) -> Self {
        let mut path = self.path.clone();
        path.push(operation.to_string());
        Self {
            trace_id: self.trace_id,
            parent_span_id: Some(span_id),
            depth: self.depth + 1,
            path,
            correlation_id: self.correlation_id.clone(),
        }
    }

    /// Step boundary: "a new step loads and resets depth to 0 ... the trace
    /// id and correlation id are preserved" (§4.8, cross-boundary).
    pub fn reset_for_new_step(&self) -> Self {
        Self {
            trace_id: self.trace_id,
            parent_span_id: None,
            depth: 0,
            path: Vec::new(),
            correlation_id: self.correlation_id.clone(),
        }
    }
}

/// `{workflowId, traceId, context, traceMetadata}` persisted across
/// transactional boundaries (§3, §4.8 cross-boundary).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditContextRecord {
    pub workflow_id: WorkflowId,
    pub trace_id: TraceId,
    pub context: AuditContext,
    pub trace_metadata: serde_json::Value,
}

/// A materialised state at a timestamp, computed by replaying spans (§4.8
/// snapshot scheduling).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSnapshot {
    pub id: SnapshotId,
    pub workflow_id: WorkflowId,
    pub at: DateTime<Utc>,
    pub workflow_state: WorkflowState,
    pub conditions: HashMap<String, u64>,
    pub tasks: HashMap<String, (TaskState, u64)>,
    pub work_items: HashMap<WorkItemId, WorkItemState>,
}

impl WorkflowSnapshot {
    pub fn empty(workflow_id: WorkflowId, at: DateTime<Utc>) -> Self {
        Self {
            id: SnapshotId::new(),
            workflow_id,
            at,
            workflow_state: WorkflowState::Initialized,
            conditions: HashMap::new(),
            tasks: HashMap::new(),
            work_items: HashMap::new(),
        }
    }
}
