//! Snapshot reconstruction by span replay (§4.8 "Snapshot scheduling").

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::audit::model::{Span, SpanAttributes, WorkflowSnapshot};
use crate::error::{EngineError, EngineResult};
use crate::ids::{TraceId, WorkflowId};
use crate::states::{TaskState, WorkItemState, WorkflowState};
use crate::storage::Storage;

/// Engineering choices per DESIGN NOTES open question: widenable without
/// affecting correctness.
pub const SNAPSHOT_MAX_ATTEMPTS: u32 = 3;
pub const SNAPSHOT_RETRY_DELAY: Duration = Duration::from_millis(1);

pub struct SnapshotComputer {
    storage: Arc<dyn Storage>,
    max_attempts: u32,
    retry_delay: Duration,
}

impl SnapshotComputer {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage, max_attempts: SNAPSHOT_MAX_ATTEMPTS, retry_delay: SNAPSHOT_RETRY_DELAY }
    }

    pub fn with_retry_policy(storage: Arc<dyn Storage>, max_attempts: u32, retry_delay: Duration) -> Self {
        Self { storage, max_attempts, retry_delay }
    }

    /// Replays spans (or applies to a prior snapshot) to reconstruct state
    /// at `at`. Retries if the workflow's `workflow.initialize` span is not
    /// yet visible — the classic "read your own not-yet-committed write"
    /// race across a flush boundary.
    pub async fn compute(
        &self,
        workflow_id: WorkflowId,
        trace_id: TraceId,
        at: DateTime<Utc>,
    ) -> EngineResult<WorkflowSnapshot> {
        let epoch = DateTime::<Utc>::from_timestamp(0, 0).unwrap();
        let mut last_err = None;
        for attempt in 0..self.max_attempts {
            let spans = self.storage.get_spans_by_time_range(trace_id, epoch, at).await?;
            if spans.iter().any(|s| s.operation == "workflow.initialize") {
                return Ok(self.replay(workflow_id, at, spans));
            }
            last_err = Some(EngineError::NotFound {
                entity: "workflow.initialize span",
                id: trace_id.to_string(),
            });
            if attempt + 1 < self.max_attempts {
                tokio::time::sleep(self.retry_delay).await;
            }
        }
        Err(last_err.unwrap_or(EngineError::Storage("snapshot computation failed".into())))
    }

    fn replay(&self, workflow_id: WorkflowId, at: DateTime<Utc>, mut spans: Vec<Span>) -> WorkflowSnapshot {
        spans.sort_by_key(|s| s.sequence_number);
        let mut snapshot = WorkflowSnapshot::empty(workflow_id, at);

        for span in &spans {
            let Some((kind, suffix)) = span.operation.split_once('.') else { continue };
            match kind {
                "workflow" => {
                    if let Some(state) = operation_to_workflow_state(suffix) {
                        snapshot.workflow_state = state;
                    }
                }
                "condition" => {
                    if let SpanAttributes::Condition { new_marking, .. } = &span.attributes {
                        snapshot.conditions.insert(span.resource.name.clone(), *new_marking);
                    }
                }
                "task" => {
                    if let Some(state) = operation_to_task_state(suffix) {
                        let entry = snapshot.tasks.entry(span.resource.name.clone()).or_insert((state, 0));
                        if suffix == "enable" {
                            entry.1 += 1;
                        }
                        entry.0 = state;
                    }
                }
                "workItem" => {
                    let id = span
                        .resource
                        .id
                        .parse()
                        .ok()
                        .and_then(|u| Some(crate::ids::WorkItemId(u)));
                    if let Some(id) = id {
                        if suffix == "initialize" {
                            snapshot.work_items.insert(id, WorkItemState::Initialized);
                        } else if let Some(state) = operation_to_work_item_state(suffix) {
                            snapshot.work_items.insert(id, state);
                        }
                    }
                }
                _ => {}
            }
        }
        snapshot
    }
}

fn operation_to_workflow_state(suffix: &str) -> Option<WorkflowState> {
    Some(match suffix {
        "initialize" => WorkflowState::Initialized,
        "start" => WorkflowState::Started,
        "complete" => WorkflowState::Completed,
        "fail" => WorkflowState::Failed,
        "cancel" => WorkflowState::Canceled,
        _ => return None,
    })
}

fn operation_to_task_state(suffix: &str) -> Option<TaskState> {
    Some(match suffix {
        "enable" => TaskState::Enabled,
        "start" => TaskState::Started,
        "complete" => TaskState::Completed,
        "fail" => TaskState::Failed,
        "cancel" => TaskState::Canceled,
        "disable" => TaskState::Disabled,
        _ => return None,
    })
}

fn operation_to_work_item_state(suffix: &str) -> Option<WorkItemState> {
    Some(match suffix {
        "start" => WorkItemState::Started,
        "complete" => WorkItemState::Completed,
        "fail" => WorkItemState::Failed,
        "cancel" => WorkItemState::Canceled,
        "reset" => WorkItemState::Initialized,
        _ => return None,
    })
}
