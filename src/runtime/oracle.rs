//! The OR-join satisfaction oracle (§4.6, E2WFOJNET).
//!
//! Satisfaction requires "no more tokens can arrive at the join other than
//! through a path that must already cross it". This is computed as a
//! fixpoint over the static topology restricted to non-canceled regions:
//! first find every node still reachable from a live (marked) condition,
//! then check that every other live task's only way to influence the net
//! further is itself through the joining task.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use crate::error::EngineResult;
use crate::ids::WorkflowId;
use crate::model::{FlowNode, WorkflowDefinition};
use crate::runtime::context::RuntimeCtx;
use crate::states::TaskState;

fn is_dead(state: TaskState) -> bool {
    matches!(state, TaskState::Completed | TaskState::Failed | TaskState::Canceled)
}

/// BFS reachability restricted to tasks not in `dead`.
fn reaches(definition: &WorkflowDefinition, dead: &HashSet<String>, from: &FlowNode, target: &str) -> bool {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back(from.clone());
    seen.insert(from.clone());
    while let Some(node) = queue.pop_front() {
        if let FlowNode::Task(t) = &node {
            if t == target {
                return true;
            }
        }
        for (f, to) in &definition.flows {
            if f != &node {
                continue;
            }
            if let FlowNode::Task(t) = to {
                if dead.contains(t) {
                    continue;
                }
            }
            if seen.insert(to.clone()) {
                queue.push_back(to.clone());
            }
        }
    }
    false
}

pub async fn is_or_join_satisfied(rt: &RuntimeCtx, definition: &Arc<WorkflowDefinition>, workflow_id: WorkflowId, task_name: &str) -> EngineResult<bool> {
    let tasks = rt.storage.list_tasks_by_workflow(workflow_id).await?;
    let conditions = rt.storage.list_conditions_by_workflow(workflow_id).await?;

    let dead: HashSet<String> = tasks.iter().filter(|t| is_dead(t.state)).map(|t| t.name.clone()).collect();

    // Fixpoint: every node reachable from a currently-marked condition,
    // stepping only through non-dead tasks.
    let mut reachable: HashSet<FlowNode> = HashSet::new();
    let mut frontier: VecDeque<FlowNode> = VecDeque::new();
    for c in conditions.iter().filter(|c| c.marking > 0) {
        let node = FlowNode::Condition(c.name.clone());
        if reachable.insert(node.clone()) {
            frontier.push_back(node);
        }
    }
    while let Some(node) = frontier.pop_front() {
        for (from, to) in &definition.flows {
            if from != &node {
                continue;
            }
            if let FlowNode::Task(t) = to {
                if dead.contains(t) {
                    continue;
                }
            }
            if reachable.insert(to.clone()) {
                frontier.push_back(to.clone());
            }
        }
    }

    if !reachable.contains(&FlowNode::Task(task_name.to_string())) {
        return Ok(false);
    }

    // Every other live (non-dead, reachable) task must itself only be able
    // to reach the rest of the net through `task_name` — i.e. it cannot
    // bypass the join.
    for task in &tasks {
        if task.name == task_name || is_dead(task.state) {
            continue;
        }
        if !reachable.contains(&FlowNode::Task(task.name.clone())) {
            continue;
        }
        if !reaches(definition, &dead, &FlowNode::Task(task.name.clone()), task_name) {
            return Ok(false);
        }
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditContext, NoopTracer};
    use crate::demo;
    use crate::ids::TraceId;
    use crate::model::DefinitionRegistry;
    use crate::scheduler::InMemoryScheduler;
    use crate::storage::MemoryStore;

    fn test_rt() -> RuntimeCtx {
        let storage = Arc::new(MemoryStore::new());
        let mut registry = DefinitionRegistry::new();
        demo::register_demo_workflows(&mut registry);
        RuntimeCtx::root(
            storage,
            InMemoryScheduler::new(),
            Arc::new(NoopTracer),
            Arc::new(registry),
            AuditContext::root(TraceId::new(), None),
        )
    }

    /// Drives `or-join-cancellation-region` up to the point where `a` has
    /// completed and `b` has been canceled by `a`'s cancellation region,
    /// then asks the oracle directly whether `join` is satisfied — the same
    /// question `task::enable_if_possible` asks internally, isolated from
    /// the rest of the firing algorithm.
    #[tokio::test]
    async fn satisfied_once_the_only_live_path_runs_through_the_joiner() {
        let rt = test_rt();
        let definition = Arc::new(demo::or_join_cancellation_region_definition());
        let workflow_id = crate::runtime::workflow::initialize(&rt, definition.clone(), None, None, serde_json::Value::Null).await.unwrap();

        let dispatch_item = rt.storage.list_work_items_by_task_generation(&crate::ids::TaskInstanceKey {
            workflow_id,
            task_name: "dispatch".to_string(),
            generation: 0,
        }).await.unwrap()[0].id;
        crate::runtime::workitem::start(&rt, dispatch_item, serde_json::Value::Null).await.unwrap();
        crate::runtime::workitem::complete(&rt, dispatch_item, serde_json::Value::Null).await.unwrap();

        let a_item = rt.storage.list_work_items_by_task_generation(&crate::ids::TaskInstanceKey {
            workflow_id,
            task_name: "a".to_string(),
            generation: 0,
        }).await.unwrap()[0].id;
        crate::runtime::workitem::start(&rt, a_item, serde_json::Value::Null).await.unwrap();
        crate::runtime::workitem::complete(&rt, a_item, serde_json::Value::Null).await.unwrap();

        assert!(is_or_join_satisfied(&rt, &definition, workflow_id, "join").await.unwrap());
    }

    #[tokio::test]
    async fn unsatisfied_before_any_branch_has_produced_a_token() {
        let rt = test_rt();
        let definition = Arc::new(demo::or_join_cancellation_region_definition());
        let workflow_id = crate::runtime::workflow::initialize(&rt, definition.clone(), None, None, serde_json::Value::Null).await.unwrap();

        // Neither branch has fired yet: the joiner is not reachable from
        // any currently-marked condition.
        assert!(!is_or_join_satisfied(&rt, &definition, workflow_id, "join").await.unwrap());
    }
}
