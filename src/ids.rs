//! Typed identities for every persistent entity.
//!
//! Mirrors the teacher's `CaseId(Uuid)` newtype: a thin wrapper with
//! `Display`/`parse_str`, never a raw `Uuid` threaded through the engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};

macro_rules! uuid_id {
    ($name:ident, $entity:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(#[serde(with = "uuid::serde::compact")] pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn parse_str(s: &str) -> EngineResult<Self> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|e| EngineError::Validation(format!("invalid {}: {e}", $entity)))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(WorkflowId, "workflow id");
uuid_id!(WorkItemId, "work item id");
uuid_id!(TraceId, "trace id");
uuid_id!(SpanId, "span id");
uuid_id!(SnapshotId, "snapshot id");

/// A task is named within its workflow definition, not given a surrogate id —
/// the static graph addresses tasks/conditions by name (§6 storage contract:
/// `tasks(workflowId, name, ...)`).
pub type TaskName = String;
pub type ConditionName = String;

/// Identifies one generation of one task within one workflow instance —
/// the unit that owns work items, stats shards, and scheduled invocations.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskInstanceKey {
    pub workflow_id: WorkflowId,
    pub task_name: TaskName,
    pub generation: u64,
}

impl fmt::Display for TaskInstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.workflow_id, self.task_name, self.generation)
    }
}

/// A work item's parent pointer, per §3 (`parent{workflowId,taskName,taskGeneration}`).
pub type WorkItemParent = TaskInstanceKey;
