//! Sharded counters per `(workflow, task, generation)` (§3, §5).
//!
//! "Sharded to reduce contention inside the storage engine" in the source
//! system; this engine keeps one shard per generation (the natural
//! partition key already named in the spec) and relies on the storage
//! façade to fan that out further if it wants real sharding.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ids::{TaskInstanceKey, WorkItemId, WorkflowId};
use crate::states::{WorkItemState as WorkItemStateTag, WorkflowState as WorkflowStateTag};

/// A read-only view handed to [`crate::model::Policy`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkItemStatsView {
    pub total: u64,
    pub initialized: u64,
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
    pub canceled: u64,
}

/// A read-only view handed to [`crate::model::CompositePolicy`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ChildWorkflowStatsView {
    pub total: u64,
    pub initialized: u64,
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
    pub canceled: u64,
}

/// The persisted shard row for one `(workflowId, taskName, generation)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsShard {
    pub key: TaskInstanceKey,
    last_work_item_state: HashMap<WorkItemId, WorkItemStateTag>,
    last_child_workflow_state: HashMap<WorkflowId, WorkflowStateTag>,
}

impl StatsShard {
    pub fn new(key: TaskInstanceKey) -> Self {
        Self {
            key,
            last_work_item_state: HashMap::new(),
            last_child_workflow_state: HashMap::new(),
        }
    }

    /// Invariant 7 / testable property 9: idempotent w.r.t. a repeated
    /// `(prev, next, id)` triple — recorded here as "no-op if the work item
    /// already carries `next` as its last recorded state".
    pub fn apply_work_item_transition(&mut self, id: WorkItemId, next: WorkItemStateTag) {
        if self.last_work_item_state.get(&id) == Some(&next) {
            return;
        }
        self.last_work_item_state.insert(id, next);
    }

    pub fn apply_child_workflow_transition(&mut self, id: WorkflowId, next: WorkflowStateTag) {
        if self.last_child_workflow_state.get(&id) == Some(&next) {
            return;
        }
        self.last_child_workflow_state.insert(id, next);
    }

    pub fn work_item_view(&self) -> WorkItemStatsView {
        let mut v = WorkItemStatsView::default();
        for state in self.last_work_item_state.values() {
            v.total += 1;
            match state {
                WorkItemStateTag::Initialized => v.initialized += 1,
                WorkItemStateTag::Started => v.started += 1,
                WorkItemStateTag::Completed => v.completed += 1,
                WorkItemStateTag::Failed => v.failed += 1,
                WorkItemStateTag::Canceled => v.canceled += 1,
            }
        }
        v
    }

    pub fn child_workflow_view(&self) -> ChildWorkflowStatsView {
        let mut v = ChildWorkflowStatsView::default();
        for state in self.last_child_workflow_state.values() {
            v.total += 1;
            match state {
                WorkflowStateTag::Initialized => v.initialized += 1,
                WorkflowStateTag::Started => v.started += 1,
                WorkflowStateTag::Completed => v.completed += 1,
                WorkflowStateTag::Failed => v.failed += 1,
                WorkflowStateTag::Canceled => v.canceled += 1,
            }
        }
        v
    }
}

pub fn shard_key(workflow_id: WorkflowId, task_name: &str, generation: u64) -> TaskInstanceKey {
    TaskInstanceKey { workflow_id, task_name: task_name.to_string(), generation }
}
