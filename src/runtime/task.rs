//! Task runtime: state machine, join/split evaluation, firing algorithm
//! (§4.2, §4.3).

use std::collections::HashSet;

use chrono::Utc;

use crate::audit::{with_cancel_span, with_span, ResourceRef, SpanAttributes};
use crate::error::{EngineError, EngineResult};
use crate::ids::{TaskInstanceKey, WorkflowId};
use crate::model::{CancellationRegionMember, ExecutionMode, JoinType, PolicyDecision, Routing, RoutingContext, SplitType, TaskKind, WorkflowDefinition};
use crate::runtime::context::{ActivityContext, RuntimeCtx};
use crate::states::{TaskState, WorkItemState};
use crate::storage::{TaskLogEntry, TaskRow};

fn join_type_name(join: JoinType) -> &'static str {
    match join {
        JoinType::And => "and",
        JoinType::Xor => "xor",
        JoinType::Or => "or",
    }
}

fn split_type_name(split: SplitType) -> &'static str {
    match split {
        SplitType::And => "and",
        SplitType::Xor => "xor",
        SplitType::Or => "or",
    }
}

async fn append_log(rt: &RuntimeCtx, row: &TaskRow) -> EngineResult<()> {
    rt.storage
        .append_task_log(TaskLogEntry {
            workflow_id: row.workflow_id,
            task_name: row.name.clone(),
            generation: row.generation,
            state: row.state,
            at: row.last_transition_at,
        })
        .await
}

/// `enableIfInStateThatCanTransitionToEnabled` (§4.2).
pub async fn enable_if_possible(rt: &RuntimeCtx, definition: &std::sync::Arc<WorkflowDefinition>, workflow_id: WorkflowId, task_name: &str) -> EngineResult<()> {
    let row = rt
        .storage
        .get_task(workflow_id, task_name)
        .await?
        .ok_or_else(|| EngineError::NotFound { entity: "task", id: task_name.to_string() })?;

    if !row.state.can_transition_to(TaskState::Enabled) {
        return Ok(());
    }

    let task_def = definition.task(task_name)?;
    let satisfied = match task_def.join {
        JoinType::And => {
            let mut all = true;
            for cond in task_def.incoming_flows(&definition.flows) {
                let c = rt
                    .storage
                    .get_condition(workflow_id, cond)
                    .await?
                    .ok_or_else(|| EngineError::NotFound { entity: "condition", id: cond.clone() })?;
                if c.marking == 0 {
                    all = false;
                    break;
                }
            }
            all
        }
        JoinType::Xor => {
            let mut any = false;
            for cond in task_def.incoming_flows(&definition.flows) {
                let c = rt
                    .storage
                    .get_condition(workflow_id, cond)
                    .await?
                    .ok_or_else(|| EngineError::NotFound { entity: "condition", id: cond.clone() })?;
                if c.marking > 0 {
                    any = true;
                    break;
                }
            }
            any
        }
        JoinType::Or => crate::runtime::oracle::is_or_join_satisfied(rt, definition, workflow_id, task_name).await?,
    };

    if !satisfied {
        return Ok(());
    }

    enable(rt, definition, workflow_id, row).await
}

async fn enable(rt: &RuntimeCtx, definition: &std::sync::Arc<WorkflowDefinition>, workflow_id: WorkflowId, mut row: TaskRow) -> EngineResult<()> {
    let generation = row.generation + 1;
    row.state = TaskState::Enabled;
    row.generation = generation;
    row.last_transition_at = Utc::now();
    rt.storage.update_task(row.clone()).await?;
    append_log(rt, &row).await?;

    let key = TaskInstanceKey { workflow_id, task_name: row.name.clone(), generation };
    rt.storage.ensure_stats_shard(&key).await?;

    let task_def = definition.task(&row.name)?;
    let resource = ResourceRef::task(workflow_id, &row.name);
    let task_name = row.name.clone();
    let def = definition.clone();

    with_span(
        rt.tracer.as_ref(),
        &rt.audit,
        "task.enable",
        "task",
        resource,
        SpanAttributes::Task { name: row.name.clone(), generation, join: join_type_name(task_def.join).to_string(), split: split_type_name(task_def.split).to_string() },
        |child_audit| {
            let rt2 = rt.with_audit(child_audit);
            async move {
                if row.execution_mode == ExecutionMode::FastForward {
                    let mut actx = ActivityContext { rt: rt2.clone(), definition: def.clone(), workflow_id, task_name: task_name.clone(), generation };
                    let fast_forward = def.task(&task_name)?.activities.on_fast_forward(&mut actx).await?;
                    if fast_forward {
                        return fast_forward_lifecycle(&rt2, workflow_id, &task_name, generation).await;
                    }
                }
                let mut actx = ActivityContext { rt: rt2.clone(), definition: def.clone(), workflow_id, task_name: task_name.clone(), generation };
                def.task(&task_name)?.activities.on_enabled(&mut actx).await
            }
        },
    )
    .await
}

/// Migration replay: `enabled -> started -> completed` without invoking any
/// user-visible activity, only structural bookkeeping (§4.2.5).
async fn fast_forward_lifecycle(rt: &RuntimeCtx, workflow_id: WorkflowId, task_name: &str, generation: u64) -> EngineResult<()> {
    for (state, operation) in [(TaskState::Started, "task.start"), (TaskState::Completed, "task.complete")] {
        let mut row = rt
            .storage
            .get_task(workflow_id, task_name)
            .await?
            .ok_or_else(|| EngineError::NotFound { entity: "task", id: task_name.to_string() })?;
        row.state = state;
        row.last_transition_at = Utc::now();
        rt.storage.update_task(row.clone()).await?;
        append_log(rt, &row).await?;
        let key = TaskInstanceKey { workflow_id, task_name: task_name.to_string(), generation };
        rt.storage.ensure_stats_shard(&key).await?;

        let resource = ResourceRef::task(workflow_id, task_name);
        with_span(
            rt.tracer.as_ref(),
            &rt.audit,
            operation,
            "task",
            resource,
            SpanAttributes::Custom(serde_json::json!({"fastForward": true})),
            |_| async { Ok(()) },
        )
        .await?;
    }
    Ok(())
}

/// Ensure-started idempotency: a task enters `started` lazily when its
/// first work item starts (§4.2).
pub async fn ensure_started(rt: &RuntimeCtx, definition: &std::sync::Arc<WorkflowDefinition>, workflow_id: WorkflowId, task_name: &str) -> EngineResult<()> {
    let mut row = rt
        .storage
        .get_task(workflow_id, task_name)
        .await?
        .ok_or_else(|| EngineError::NotFound { entity: "task", id: task_name.to_string() })?;

    if row.state == TaskState::Started || row.state.is_terminal() {
        return Ok(());
    }
    if row.state != TaskState::Enabled {
        return Err(EngineError::InvalidStateTransition {
            entity: "task",
            from: row.state.as_str().to_string(),
            to: TaskState::Started.as_str().to_string(),
        });
    }

    row.state = TaskState::Started;
    row.last_transition_at = Utc::now();
    rt.storage.update_task(row.clone()).await?;
    append_log(rt, &row).await?;

    let resource = ResourceRef::task(workflow_id, task_name);
    let task_def = definition.task(task_name)?;
    with_span(
        rt.tracer.as_ref(),
        &rt.audit,
        "task.start",
        "task",
        resource,
        SpanAttributes::Task { name: task_name.to_string(), generation: row.generation, join: join_type_name(task_def.join).to_string(), split: split_type_name(task_def.split).to_string() },
        |_| async { Ok(()) },
    )
    .await?;

    for cond in task_def.incoming_flows(&definition.flows) {
        crate::runtime::condition::decrement_marking(rt, definition, workflow_id, cond).await?;
    }
    Ok(())
}

/// `complete(task)` — the firing algorithm (§4.2 steps 1-7).
pub async fn complete(rt: &RuntimeCtx, definition: &std::sync::Arc<WorkflowDefinition>, workflow_id: WorkflowId, task_name: &str) -> EngineResult<()> {
    let mut row = rt
        .storage
        .get_task(workflow_id, task_name)
        .await?
        .ok_or_else(|| EngineError::NotFound { entity: "task", id: task_name.to_string() })?;

    if row.state == TaskState::Completed {
        return Ok(());
    }
    if !row.state.can_transition_to(TaskState::Completed) {
        return Err(EngineError::InvalidStateTransition {
            entity: "task",
            from: row.state.as_str().to_string(),
            to: TaskState::Completed.as_str().to_string(),
        });
    }

    row.state = TaskState::Completed;
    row.last_transition_at = Utc::now();
    rt.storage.update_task(row.clone()).await?;
    append_log(rt, &row).await?;

    let task_def = definition.task(task_name)?;
    let resource = ResourceRef::task(workflow_id, task_name);
    let def = definition.clone();
    let generation = row.generation;
    let tn = task_name.to_string();

    with_span(
        rt.tracer.as_ref(),
        &rt.audit,
        "task.complete",
        "task",
        resource,
        SpanAttributes::Task { name: tn.clone(), generation, join: join_type_name(task_def.join).to_string(), split: split_type_name(task_def.split).to_string() },
        |child_audit| {
            let rt2 = rt.with_audit(child_audit);
            async move {
                let mut actx = ActivityContext { rt: rt2.clone(), definition: def.clone(), workflow_id, task_name: tn.clone(), generation };
                def.task(&tn)?.activities.on_completed(&mut actx).await?;

                cancel_region(&rt2, &def, workflow_id, &tn).await?;
                produce_tokens(&rt2, &def, workflow_id, &tn).await?;

                // Re-attempt enablement of the same task (self-loop support).
                enable_if_possible(&rt2, &def, workflow_id, &tn).await
            }
        },
    )
    .await?;

    crate::runtime::workflow::maybe_complete(rt, definition, workflow_id).await
}

async fn produce_tokens(rt: &RuntimeCtx, definition: &std::sync::Arc<WorkflowDefinition>, workflow_id: WorkflowId, task_name: &str) -> EngineResult<()> {
    let task_def = definition.task(task_name)?;
    match task_def.split {
        SplitType::And => {
            for cond in definition.conditions_downstream_of(task_name) {
                crate::runtime::condition::increment_marking(rt, definition, workflow_id, cond).await?;
            }
        }
        SplitType::Xor => {
            let router = task_def
                .router
                .as_ref()
                .ok_or_else(|| EngineError::MissingRouter { task: task_name.to_string() })?;
            let tn = task_name.to_string();
            let case_data = serde_json::json!({});
            let ctx = RoutingContext { workflow_id, task_name: &tn, case_data: &case_data, storage: rt.storage.clone() };
            let routes = router.route(&ctx).await?;
            if routes.len() != 1 {
                return Err(EngineError::InvalidRoute { task: task_name.to_string(), target: format!("{} routes (expected 1)", routes.len()) });
            }
            apply_routing(rt, definition, workflow_id, task_name, &routes[0]).await?;
        }
        SplitType::Or => {
            let router = task_def
                .router
                .as_ref()
                .ok_or_else(|| EngineError::MissingRouter { task: task_name.to_string() })?;
            let tn = task_name.to_string();
            let case_data = serde_json::json!({});
            let ctx = RoutingContext { workflow_id, task_name: &tn, case_data: &case_data, storage: rt.storage.clone() };
            let routes = router.route(&ctx).await?;
            let mut seen = HashSet::new();
            for routing in &routes {
                let condition = routing_target_condition(definition, task_name, routing)?;
                if seen.insert(condition.clone()) {
                    crate::runtime::condition::increment_marking(rt, definition, workflow_id, &condition).await?;
                }
            }
        }
    }
    Ok(())
}

async fn apply_routing(rt: &RuntimeCtx, definition: &std::sync::Arc<WorkflowDefinition>, workflow_id: WorkflowId, task_name: &str, routing: &Routing) -> EngineResult<()> {
    let condition = routing_target_condition(definition, task_name, routing)?;
    crate::runtime::condition::increment_marking(rt, definition, workflow_id, &condition).await
}

/// Converts a `Routing` into the condition whose marking should actually be
/// incremented — a `ToTask` routing targets the implicit *input* condition
/// of that task, never the task itself (§8 boundary property).
fn routing_target_condition(definition: &WorkflowDefinition, from_task: &str, routing: &Routing) -> EngineResult<String> {
    match routing {
        Routing::ToCondition(c) => {
            definition.condition(c)?;
            Ok(c.clone())
        }
        Routing::ToTask(t) => {
            let target_def = definition.task(t)?;
            target_def
                .incoming_flows(&definition.flows)
                .into_iter()
                .find(|c| definition.condition(c).map(|cd| cd.is_implicit).unwrap_or(false))
                .cloned()
                .ok_or_else(|| EngineError::InvalidRoute { task: from_task.to_string(), target: t.clone() })
        }
    }
}

async fn cancel_region(rt: &RuntimeCtx, definition: &std::sync::Arc<WorkflowDefinition>, workflow_id: WorkflowId, task_name: &str) -> EngineResult<()> {
    let task_def = definition.task(task_name)?;
    for member in &task_def.cancellation_region {
        match member {
            CancellationRegionMember::Task(t) => {
                let row = rt.storage.get_task(workflow_id, t).await?;
                if let Some(row) = row {
                    if matches!(row.state, TaskState::Enabled | TaskState::Started) {
                        cancel(rt, definition, workflow_id, t).await?;
                    }
                }
            }
            CancellationRegionMember::Condition(c) => {
                crate::runtime::condition::cancel(rt, definition, workflow_id, c).await?;
            }
        }
    }
    Ok(())
}

/// `fail(task)` (§4.2, §4.4 cascade rule "failed").
pub async fn fail(rt: &RuntimeCtx, definition: &std::sync::Arc<WorkflowDefinition>, workflow_id: WorkflowId, task_name: &str) -> EngineResult<()> {
    let mut row = rt
        .storage
        .get_task(workflow_id, task_name)
        .await?
        .ok_or_else(|| EngineError::NotFound { entity: "task", id: task_name.to_string() })?;

    if row.state == TaskState::Failed {
        return Ok(());
    }
    if !row.state.can_transition_to(TaskState::Failed) {
        return Err(EngineError::InvalidStateTransition {
            entity: "task",
            from: row.state.as_str().to_string(),
            to: TaskState::Failed.as_str().to_string(),
        });
    }

    row.state = TaskState::Failed;
    row.last_transition_at = Utc::now();
    rt.storage.update_task(row.clone()).await?;
    append_log(rt, &row).await?;

    let task_def = definition.task(task_name)?;
    let resource = ResourceRef::task(workflow_id, task_name);
    let def = definition.clone();
    let generation = row.generation;
    let tn = task_name.to_string();
    let key = TaskInstanceKey { workflow_id, task_name: tn.clone(), generation };

    with_span(
        rt.tracer.as_ref(),
        &rt.audit,
        "task.fail",
        "task",
        resource,
        SpanAttributes::Task { name: tn.clone(), generation, join: join_type_name(task_def.join).to_string(), split: split_type_name(task_def.split).to_string() },
        {
            let key = key.clone();
            move |child_audit| {
                let rt2 = rt.with_audit(child_audit);
                async move {
                    let mut actx = ActivityContext { rt: rt2.clone(), definition: def.clone(), workflow_id, task_name: tn.clone(), generation };
                    def.task(&tn)?.activities.on_failed(&mut actx).await?;
                    cancel_non_finalized_children(&rt2, &def, workflow_id, &tn, &key).await
                }
            }
        },
    )
    .await?;

    rt.scheduler.cancel_owner(&crate::scheduler::ScheduleOwner::Task(key)).await;
    crate::runtime::workflow::fail(rt, definition, workflow_id).await
}

/// `cancel(task)` (§4.2, permitted from `enabled`/`started`).
pub async fn cancel(rt: &RuntimeCtx, definition: &std::sync::Arc<WorkflowDefinition>, workflow_id: WorkflowId, task_name: &str) -> EngineResult<()> {
    let mut row = rt
        .storage
        .get_task(workflow_id, task_name)
        .await?
        .ok_or_else(|| EngineError::NotFound { entity: "task", id: task_name.to_string() })?;

    if row.state == TaskState::Canceled {
        return Ok(());
    }
    if !row.state.can_transition_to(TaskState::Canceled) {
        return Err(EngineError::InvalidStateTransition {
            entity: "task",
            from: row.state.as_str().to_string(),
            to: TaskState::Canceled.as_str().to_string(),
        });
    }

    row.state = TaskState::Canceled;
    row.last_transition_at = Utc::now();
    rt.storage.update_task(row.clone()).await?;
    append_log(rt, &row).await?;

    let task_def = definition.task(task_name)?;
    let resource = ResourceRef::task(workflow_id, task_name);
    let def = definition.clone();
    let generation = row.generation;
    let tn = task_name.to_string();
    let key = TaskInstanceKey { workflow_id, task_name: tn.clone(), generation };

    with_cancel_span(
        rt.tracer.as_ref(),
        &rt.audit,
        "task.cancel",
        "task",
        resource,
        SpanAttributes::Task { name: tn.clone(), generation, join: join_type_name(task_def.join).to_string(), split: split_type_name(task_def.split).to_string() },
        {
            let key = key.clone();
            move |child_audit| {
                let rt2 = rt.with_audit(child_audit);
                async move {
                    let mut actx = ActivityContext { rt: rt2.clone(), definition: def.clone(), workflow_id, task_name: tn.clone(), generation };
                    def.task(&tn)?.activities.on_canceled(&mut actx).await?;
                    cancel_non_finalized_children(&rt2, &def, workflow_id, &tn, &key).await
                }
            }
        },
    )
    .await?;

    rt.scheduler.cancel_owner(&crate::scheduler::ScheduleOwner::Task(key)).await;
    Ok(())
}

/// `disable(task)` — permitted only from `enabled` (§4.2).
pub async fn disable_if_enabled(rt: &RuntimeCtx, _definition: &std::sync::Arc<WorkflowDefinition>, workflow_id: WorkflowId, task_name: &str) -> EngineResult<()> {
    let mut row = match rt.storage.get_task(workflow_id, task_name).await? {
        Some(row) => row,
        None => return Ok(()),
    };
    if row.state != TaskState::Enabled {
        return Ok(());
    }
    row.state = TaskState::Disabled;
    row.last_transition_at = Utc::now();
    rt.storage.update_task(row.clone()).await?;
    append_log(rt, &row).await?;

    let resource = ResourceRef::task(workflow_id, task_name);
    with_span(
        rt.tracer.as_ref(),
        &rt.audit,
        "task.disable",
        "task",
        resource,
        SpanAttributes::Custom(serde_json::json!({})),
        |_| async { Ok(()) },
    )
    .await
}

async fn cancel_non_finalized_children(rt: &RuntimeCtx, definition: &std::sync::Arc<WorkflowDefinition>, workflow_id: WorkflowId, task_name: &str, key: &TaskInstanceKey) -> EngineResult<()> {
    let task_def = definition.task(task_name)?;
    match &task_def.kind {
        TaskKind::Leaf { .. } => {
            let items = rt.storage.list_work_items_by_task_generation(key).await?;
            for item in items {
                if !item.state.is_terminal() {
                    crate::runtime::workitem::cancel(rt, item.id, serde_json::json!({})).await?;
                }
            }
        }
        TaskKind::Composite { .. } | TaskKind::DynamicComposite { .. } => {
            let parent = crate::storage::ParentPointer { workflow_id, task_name: task_name.to_string(), task_generation: key.generation };
            let children = rt.storage.list_workflows_by_parent(&parent).await?;
            for child in children {
                if !child.state.is_terminal() {
                    crate::runtime::workflow::cancel(rt, child.id, serde_json::json!({}), crate::states::CancellationReason::Teardown, false).await?;
                }
            }
        }
    }
    Ok(())
}

/// Consulted after every work-item transition that lands in this task's
/// generation (§4.3).
pub async fn on_work_item_transition(rt: &RuntimeCtx, definition: &std::sync::Arc<WorkflowDefinition>, key: &TaskInstanceKey, target: WorkItemState) -> EngineResult<()> {
    if target == WorkItemState::Started {
        ensure_started(rt, definition, key.workflow_id, &key.task_name).await?;
    }

    let stats = rt.storage.get_stats(key).await?.ok_or_else(|| EngineError::NotFound { entity: "stats_shard", id: key.to_string() })?;
    let view = stats.work_item_view();
    let task_def = definition.task(&key.task_name)?;
    let decision = match &task_def.kind {
        TaskKind::Leaf { policy } => policy.decide(&view).await,
        _ => PolicyDecision::Continue,
    };

    match decision {
        PolicyDecision::Continue => Ok(()),
        PolicyDecision::Complete => complete(rt, definition, key.workflow_id, &key.task_name).await,
        PolicyDecision::Fail => fail(rt, definition, key.workflow_id, &key.task_name).await,
    }
}
