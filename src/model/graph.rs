//! Static topology types: tasks, conditions, flows, cancellation regions.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EngineResult;
use crate::ids::{ConditionName, TaskName};
use crate::model::activities::{CompositeActivities, TaskActivities, WorkItemActivities, WorkflowActivities};
use crate::model::policy::{CompositePolicy, Policy};
use crate::model::router::Router;

/// Incoming-flow combinator for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinType {
    And,
    Xor,
    Or,
}

/// Outgoing-flow combinator for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitType {
    And,
    Xor,
    Or,
}

/// Normal execution invokes user activities; fast-forward replays silently
/// during version migration (§4.2.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExecutionMode {
    Normal,
    FastForward,
}

/// One endpoint of a flow: either a task or a condition, addressed by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowNode {
    Task(TaskName),
    Condition(ConditionName),
}

/// A member of a task's declared cancellation region (§4.2, firing step 3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CancellationRegionMember {
    Task(TaskName),
    Condition(ConditionName),
}

/// `(SchemaId, fn(Context, Parsed) -> ())` per DESIGN NOTES: a boundary
/// action validates a raw JSON payload before the engine commits a patch.
/// There is no external schema crate in the corpus this engine is grounded
/// on, so validation is a plain closure over the parsed value.
#[derive(Clone)]
pub struct ActionSchema {
    pub name: &'static str,
    pub validate: Arc<dyn Fn(&Value) -> EngineResult<()> + Send + Sync>,
}

impl ActionSchema {
    pub fn accept_any(name: &'static str) -> Self {
        Self {
            name,
            validate: Arc::new(|_| Ok(())),
        }
    }

    pub fn check(&self, payload: &Value) -> EngineResult<()> {
        (self.validate)(payload)
    }
}

impl std::fmt::Debug for ActionSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionSchema").field("name", &self.name).finish()
    }
}

/// A place in the Petri-net sense.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionDef {
    pub name: ConditionName,
    pub is_implicit: bool,
}

impl ConditionDef {
    pub fn explicit(name: impl Into<String>) -> Self {
        Self { name: name.into(), is_implicit: false }
    }

    pub fn implicit(name: impl Into<String>) -> Self {
        Self { name: name.into(), is_implicit: true }
    }
}

/// Tagged union replacing the source's `BaseTask -> {Task, CompositeTask,
/// DynamicCompositeTask}` class hierarchy (DESIGN NOTES).
#[derive(Clone)]
pub enum TaskKind {
    /// A work-item-bearing leaf task (§4.3).
    Leaf { policy: Arc<dyn Policy> },
    /// Owns exactly one child workflow definition, referenced by name
    /// through the engine's definition registry — never a raw pointer
    /// (§4.4, DESIGN NOTES on cyclic references).
    Composite { child_workflow: String, policy: Arc<dyn CompositePolicy> },
    /// Owns a named set of child workflow definitions, instantiated
    /// dynamically by `onEnabled` (§4.4).
    DynamicComposite {
        children: HashMap<String, String>,
        policy: Arc<dyn CompositePolicy>,
    },
}

impl std::fmt::Debug for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::Leaf { .. } => f.write_str("Leaf"),
            TaskKind::Composite { child_workflow, .. } => {
                f.debug_struct("Composite").field("child_workflow", child_workflow).finish()
            }
            TaskKind::DynamicComposite { children, .. } => f
                .debug_struct("DynamicComposite")
                .field("children", children)
                .finish(),
        }
    }
}

/// Static definition of one task (transition) in the net.
pub struct TaskDef {
    pub name: TaskName,
    pub join: JoinType,
    pub split: SplitType,
    pub kind: TaskKind,
    /// Populated for XOR/OR splits; `None` is legal only for AND splits.
    pub router: Option<Arc<dyn Router>>,
    pub cancellation_region: Vec<CancellationRegionMember>,
    pub activities: Arc<dyn TaskActivities>,
    pub work_item_activities: Arc<dyn WorkItemActivities>,
    pub composite_activities: Arc<dyn CompositeActivities>,
    pub work_item_action: ActionSchema,
}

impl TaskDef {
    pub fn incoming_flows<'a>(&self, flows: &'a [(FlowNode, FlowNode)]) -> Vec<&'a ConditionName> {
        flows
            .iter()
            .filter_map(|(from, to)| match (from, to) {
                (FlowNode::Condition(c), FlowNode::Task(t)) if *t == self.name => Some(c),
                _ => None,
            })
            .collect()
    }

    pub fn outgoing_flows<'a>(&self, flows: &'a [(FlowNode, FlowNode)]) -> Vec<&'a ConditionName> {
        flows
            .iter()
            .filter_map(|(from, to)| match (from, to) {
                (FlowNode::Task(t), FlowNode::Condition(c)) if *t == self.name => Some(c),
                _ => None,
            })
            .collect()
    }
}

/// The immutable, shared definition of one workflow: its topology plus the
/// user-supplied routers/policies/activities attached to each task.
pub struct WorkflowDefinition {
    pub name: String,
    pub version_name: String,
    pub start_condition: ConditionName,
    pub end_condition: ConditionName,
    pub conditions: Vec<ConditionDef>,
    pub tasks: Vec<TaskDef>,
    /// Directed flows: `Condition -> Task` (incoming) or `Task -> Condition`
    /// (outgoing). Self-loop support (firing step 6) is expressed as an
    /// implicit condition flowing back into the same task.
    pub flows: Vec<(FlowNode, FlowNode)>,
    pub initialize_action: ActionSchema,
    pub activities: Arc<dyn WorkflowActivities>,
}

impl WorkflowDefinition {
    pub fn task(&self, name: &str) -> EngineResult<&TaskDef> {
        self.tasks
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| crate::error::EngineError::StructuralIntegrity(format!(
                "workflow {} has no task named {name}",
                self.name
            )))
    }

    pub fn condition(&self, name: &str) -> EngineResult<&ConditionDef> {
        self.conditions
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| crate::error::EngineError::StructuralIntegrity(format!(
                "workflow {} has no condition named {name}",
                self.name
            )))
    }

    /// Downstream tasks reachable from a condition, in flow declaration
    /// order (§5, "token cascades ... processed in insertion order").
    pub fn tasks_downstream_of(&self, condition: &str) -> Vec<&TaskName> {
        self.flows
            .iter()
            .filter_map(|(from, to)| match (from, to) {
                (FlowNode::Condition(c), FlowNode::Task(t)) if c == condition => Some(t),
                _ => None,
            })
            .collect()
    }

    /// Downstream conditions reachable from a task's outgoing flows, unique
    /// and in declaration order.
    pub fn conditions_downstream_of(&self, task: &str) -> Vec<&ConditionName> {
        let mut seen = std::collections::HashSet::new();
        self.flows
            .iter()
            .filter_map(|(from, to)| match (from, to) {
                (FlowNode::Task(t), FlowNode::Condition(c)) if t == task => {
                    if seen.insert(c.as_str()) {
                        Some(c)
                    } else {
                        None
                    }
                }
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::demo::fork_join_review_definition;

    #[test]
    fn incoming_and_outgoing_flows_follow_task_identity_not_position() {
        let definition = fork_join_review_definition();
        let merge = definition.task("merge").unwrap();
        let mut incoming: Vec<&str> = merge.incoming_flows(&definition.flows).into_iter().map(|c| c.as_str()).collect();
        incoming.sort();
        assert_eq!(incoming, vec!["legal_ready", "security_ready"]);
        assert!(merge.outgoing_flows(&definition.flows).into_iter().eq(["end"]));
    }

    #[test]
    fn tasks_downstream_of_preserves_flow_declaration_order() {
        let definition = fork_join_review_definition();
        let downstream = definition.tasks_downstream_of("start");
        assert_eq!(downstream, vec!["dispatch"]);
        let dispatch_targets = definition.tasks_downstream_of("security_done");
        assert_eq!(dispatch_targets, vec!["security_review"]);
    }

    #[test]
    fn conditions_downstream_of_deduplicates_shared_targets() {
        let definition = fork_join_review_definition();
        let dispatch_outputs = definition.conditions_downstream_of("dispatch");
        assert_eq!(dispatch_outputs, vec!["security_done", "legal_done"]);
    }

    #[test]
    fn task_and_condition_lookup_rejects_unknown_names() {
        let definition = fork_join_review_definition();
        assert!(definition.task("merge").is_ok());
        assert!(definition.task("no_such_task").is_err());
        assert!(definition.condition("start").is_ok());
        assert!(definition.condition("no_such_condition").is_err());
    }
}
