//! Two illustrative workflow definitions used by the CLI demo and by the
//! integration tests as a known-good fixture. Not part of the engine's
//! public contract — a real host builds its own definitions through
//! whatever external builder DSL it chooses (§1, out of scope here).

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::EngineResult;
use crate::model::{
    ActionSchema, CancellationRegionMember, ConditionDef, DefaultCompositePolicy, DefaultPolicy,
    FlowNode, JoinType, NoopActivities, SplitType, TaskActivities, TaskDef, TaskKind,
    WorkItemActivities, WorkflowDefinition,
};
use crate::runtime::context::{ActivityContext, WorkItemHandle};

fn leaf_task(name: &str, join: JoinType, split: SplitType) -> TaskDef {
    TaskDef {
        name: name.to_string(),
        join,
        split,
        kind: TaskKind::Leaf { policy: Arc::new(DefaultPolicy) },
        router: None,
        cancellation_region: Vec::new(),
        activities: Arc::new(NoopActivities),
        work_item_activities: Arc::new(NoopActivities),
        composite_activities: Arc::new(NoopActivities),
        work_item_action: ActionSchema::accept_any("default"),
    }
}

/// `sequential-review@v1`: `start -> draft -> reviewed -> approve -> end`,
/// two AND/AND leaf tasks each with a single work item's worth of
/// approval (§4.3 default policy: complete once every work item is
/// finalized and at least one completed).
pub fn sequential_review_definition() -> WorkflowDefinition {
    WorkflowDefinition {
        name: "sequential-review".to_string(),
        version_name: "v1".to_string(),
        start_condition: "start".to_string(),
        end_condition: "end".to_string(),
        conditions: vec![
            ConditionDef::explicit("start"),
            ConditionDef::explicit("reviewed"),
            ConditionDef::explicit("end"),
        ],
        tasks: vec![
            leaf_task("draft", JoinType::And, SplitType::And),
            leaf_task("approve", JoinType::And, SplitType::And),
        ],
        flows: vec![
            (FlowNode::Condition("start".into()), FlowNode::Task("draft".into())),
            (FlowNode::Task("draft".into()), FlowNode::Condition("reviewed".into())),
            (FlowNode::Condition("reviewed".into()), FlowNode::Task("approve".into())),
            (FlowNode::Task("approve".into()), FlowNode::Condition("end".into())),
        ],
        initialize_action: ActionSchema::accept_any("initialize"),
        activities: Arc::new(NoopActivities),
    }
}

/// `expense-approval@v1`: a single composite task `manager_review` owning
/// one `sequential-review@v1` child per instance, resolved through the
/// engine's [`crate::model::DefinitionRegistry`] by name (§4.4). The
/// composite task completes once its [`DefaultCompositePolicy`] observes
/// the child workflow finalize.
pub fn expense_approval_definition() -> WorkflowDefinition {
    WorkflowDefinition {
        name: "expense-approval".to_string(),
        version_name: "v1".to_string(),
        start_condition: "start".to_string(),
        end_condition: "end".to_string(),
        conditions: vec![ConditionDef::explicit("start"), ConditionDef::explicit("end")],
        tasks: vec![TaskDef {
            name: "manager_review".to_string(),
            join: JoinType::And,
            split: SplitType::And,
            kind: TaskKind::Composite {
                child_workflow: "sequential-review".to_string(),
                policy: Arc::new(DefaultCompositePolicy),
            },
            router: None,
            cancellation_region: Vec::new(),
            activities: Arc::new(NoopActivities),
            work_item_activities: Arc::new(NoopActivities),
            composite_activities: Arc::new(NoopActivities),
            work_item_action: ActionSchema::accept_any("default"),
        }],
        flows: vec![
            (FlowNode::Condition("start".into()), FlowNode::Task("manager_review".into())),
            (FlowNode::Task("manager_review".into()), FlowNode::Condition("end".into())),
        ],
        initialize_action: ActionSchema::accept_any("initialize"),
        activities: Arc::new(NoopActivities),
    }
}

/// `fork-join-review@v1`: `dispatch` AND-splits into two parallel leaf
/// tasks, each feeding its own gate condition into an AND-join `merge`
/// task that only fires once both gates are marked (§4.2 join evaluation).
pub fn fork_join_review_definition() -> WorkflowDefinition {
    WorkflowDefinition {
        name: "fork-join-review".to_string(),
        version_name: "v1".to_string(),
        start_condition: "start".to_string(),
        end_condition: "end".to_string(),
        conditions: vec![
            ConditionDef::explicit("start"),
            ConditionDef::explicit("security_done"),
            ConditionDef::explicit("legal_done"),
            ConditionDef::explicit("security_ready"),
            ConditionDef::explicit("legal_ready"),
            ConditionDef::explicit("end"),
        ],
        tasks: vec![
            leaf_task("dispatch", JoinType::And, SplitType::And),
            leaf_task("security_review", JoinType::And, SplitType::And),
            leaf_task("legal_review", JoinType::And, SplitType::And),
            leaf_task("merge", JoinType::And, SplitType::And),
        ],
        flows: vec![
            (FlowNode::Condition("start".into()), FlowNode::Task("dispatch".into())),
            (FlowNode::Task("dispatch".into()), FlowNode::Condition("security_done".into())),
            (FlowNode::Task("dispatch".into()), FlowNode::Condition("legal_done".into())),
            (FlowNode::Condition("security_done".into()), FlowNode::Task("security_review".into())),
            (FlowNode::Condition("legal_done".into()), FlowNode::Task("legal_review".into())),
            (FlowNode::Task("security_review".into()), FlowNode::Condition("security_ready".into())),
            (FlowNode::Task("legal_review".into()), FlowNode::Condition("legal_ready".into())),
            (FlowNode::Condition("security_ready".into()), FlowNode::Task("merge".into())),
            (FlowNode::Condition("legal_ready".into()), FlowNode::Task("merge".into())),
            (FlowNode::Task("merge".into()), FlowNode::Condition("end".into())),
        ],
        initialize_action: ActionSchema::accept_any("initialize"),
        activities: Arc::new(NoopActivities),
    }
}

/// `xor-deferred-choice@v1`: `dispatch` AND-splits into `t1_ready`/`t2_ready`
/// so `t1` and `t2` enable in parallel; `t1`'s cancellation region names
/// `t2`, so finishing `t1` first cancels the sibling branch before it can
/// produce a token — `t2_a` never enables since `t2_done` is never marked
/// (§4.2 cancellation regions, §8 scenario 2's deferred-choice intent).
pub fn xor_deferred_choice_definition() -> WorkflowDefinition {
    WorkflowDefinition {
        name: "xor-deferred-choice".to_string(),
        version_name: "v1".to_string(),
        start_condition: "start".to_string(),
        end_condition: "end".to_string(),
        conditions: vec![
            ConditionDef::explicit("start"),
            ConditionDef::explicit("t1_ready"),
            ConditionDef::explicit("t2_ready"),
            ConditionDef::explicit("t1_done"),
            ConditionDef::explicit("t2_done"),
            ConditionDef::explicit("end"),
        ],
        tasks: vec![
            leaf_task("dispatch", JoinType::And, SplitType::And),
            TaskDef {
                name: "t1".to_string(),
                join: JoinType::And,
                split: SplitType::And,
                kind: TaskKind::Leaf { policy: Arc::new(DefaultPolicy) },
                router: None,
                cancellation_region: vec![CancellationRegionMember::Task("t2".to_string())],
                activities: Arc::new(NoopActivities),
                work_item_activities: Arc::new(NoopActivities),
                composite_activities: Arc::new(NoopActivities),
                work_item_action: ActionSchema::accept_any("default"),
            },
            leaf_task("t2", JoinType::And, SplitType::And),
            leaf_task("t1_a", JoinType::And, SplitType::And),
            leaf_task("t2_a", JoinType::And, SplitType::And),
        ],
        flows: vec![
            (FlowNode::Condition("start".into()), FlowNode::Task("dispatch".into())),
            (FlowNode::Task("dispatch".into()), FlowNode::Condition("t1_ready".into())),
            (FlowNode::Task("dispatch".into()), FlowNode::Condition("t2_ready".into())),
            (FlowNode::Condition("t1_ready".into()), FlowNode::Task("t1".into())),
            (FlowNode::Condition("t2_ready".into()), FlowNode::Task("t2".into())),
            (FlowNode::Task("t1".into()), FlowNode::Condition("t1_done".into())),
            (FlowNode::Task("t2".into()), FlowNode::Condition("t2_done".into())),
            (FlowNode::Condition("t1_done".into()), FlowNode::Task("t1_a".into())),
            (FlowNode::Condition("t2_done".into()), FlowNode::Task("t2_a".into())),
            (FlowNode::Task("t1_a".into()), FlowNode::Condition("end".into())),
            (FlowNode::Task("t2_a".into()), FlowNode::Condition("end".into())),
        ],
        initialize_action: ActionSchema::accept_any("initialize"),
        activities: Arc::new(NoopActivities),
    }
}

/// `onEnabled` initialises a single work item whose own hooks chain
/// straight through to completion (§4.5 auto-trigger chain, §8 scenario 5).
struct AutoTriggerActivities;

#[async_trait]
impl TaskActivities for AutoTriggerActivities {
    async fn on_enabled(&self, ctx: &mut ActivityContext) -> EngineResult<()> {
        ctx.initialize_work_item("item", serde_json::Value::Null).await?;
        Ok(())
    }
}

#[async_trait]
impl WorkItemActivities for AutoTriggerActivities {
    async fn on_initialized(&self, handle: &mut WorkItemHandle) -> EngineResult<()> {
        handle.start(serde_json::Value::Null)
    }

    async fn on_started(&self, handle: &mut WorkItemHandle) -> EngineResult<()> {
        handle.complete(serde_json::Value::Null)
    }
}

/// `auto-trigger-chain@v1`: `start -> chain -> end`, one leaf task whose work
/// item runs `initialized -> started -> completed` without any caller
/// stepping in between (§4.5, §8 scenario 5).
pub fn auto_trigger_chain_definition() -> WorkflowDefinition {
    WorkflowDefinition {
        name: "auto-trigger-chain".to_string(),
        version_name: "v1".to_string(),
        start_condition: "start".to_string(),
        end_condition: "end".to_string(),
        conditions: vec![ConditionDef::explicit("start"), ConditionDef::explicit("end")],
        tasks: vec![TaskDef {
            name: "chain".to_string(),
            join: JoinType::And,
            split: SplitType::And,
            kind: TaskKind::Leaf { policy: Arc::new(DefaultPolicy) },
            router: None,
            cancellation_region: Vec::new(),
            activities: Arc::new(AutoTriggerActivities),
            work_item_activities: Arc::new(AutoTriggerActivities),
            composite_activities: Arc::new(NoopActivities),
            work_item_action: ActionSchema::accept_any("default"),
        }],
        flows: vec![
            (FlowNode::Condition("start".into()), FlowNode::Task("chain".into())),
            (FlowNode::Task("chain".into()), FlowNode::Condition("end".into())),
        ],
        initialize_action: ActionSchema::accept_any("initialize"),
        activities: Arc::new(NoopActivities),
    }
}

/// `or-join-cancellation-region@v1`: `dispatch` AND-splits into `a` and `b`
/// running in parallel; `a`'s cancellation region cancels `b` the moment `a`
/// finishes, and the downstream `join` task is an OR-join that must still
/// fire once `b` is dead rather than waiting on a branch that will never
/// complete (§4.2 cancellation regions, §4.6 OR-join oracle, §8 scenario 3).
pub fn or_join_cancellation_region_definition() -> WorkflowDefinition {
    WorkflowDefinition {
        name: "or-join-cancellation-region".to_string(),
        version_name: "v1".to_string(),
        start_condition: "start".to_string(),
        end_condition: "end".to_string(),
        conditions: vec![
            ConditionDef::explicit("start"),
            ConditionDef::explicit("a_ready"),
            ConditionDef::explicit("b_ready"),
            ConditionDef::explicit("a_done"),
            ConditionDef::explicit("b_done"),
            ConditionDef::explicit("end"),
        ],
        tasks: vec![
            leaf_task("dispatch", JoinType::And, SplitType::And),
            TaskDef {
                name: "a".to_string(),
                join: JoinType::And,
                split: SplitType::And,
                kind: TaskKind::Leaf { policy: Arc::new(DefaultPolicy) },
                router: None,
                cancellation_region: vec![CancellationRegionMember::Task("b".to_string())],
                activities: Arc::new(NoopActivities),
                work_item_activities: Arc::new(NoopActivities),
                composite_activities: Arc::new(NoopActivities),
                work_item_action: ActionSchema::accept_any("default"),
            },
            leaf_task("b", JoinType::And, SplitType::And),
            leaf_task("join", JoinType::Or, SplitType::And),
        ],
        flows: vec![
            (FlowNode::Condition("start".into()), FlowNode::Task("dispatch".into())),
            (FlowNode::Task("dispatch".into()), FlowNode::Condition("a_ready".into())),
            (FlowNode::Task("dispatch".into()), FlowNode::Condition("b_ready".into())),
            (FlowNode::Condition("a_ready".into()), FlowNode::Task("a".into())),
            (FlowNode::Condition("b_ready".into()), FlowNode::Task("b".into())),
            (FlowNode::Task("a".into()), FlowNode::Condition("a_done".into())),
            (FlowNode::Task("b".into()), FlowNode::Condition("b_done".into())),
            (FlowNode::Condition("a_done".into()), FlowNode::Task("join".into())),
            (FlowNode::Condition("b_done".into()), FlowNode::Task("join".into())),
            (FlowNode::Task("join".into()), FlowNode::Condition("end".into())),
        ],
        initialize_action: ActionSchema::accept_any("initialize"),
        activities: Arc::new(NoopActivities),
    }
}

pub fn register_demo_workflows(registry: &mut crate::model::DefinitionRegistry) {
    registry.register(sequential_review_definition());
    registry.register(expense_approval_definition());
    registry.register(fork_join_review_definition());
    registry.register(auto_trigger_chain_definition());
    registry.register(or_join_cancellation_region_definition());
    registry.register(xor_deferred_choice_definition());
}
