//! Condition runtime: the token counter and enablement gate (§4.1).

use std::sync::Arc;

use crate::audit::{with_span, ResourceRef, SpanAttributes};
use crate::error::{EngineError, EngineResult};
use crate::ids::WorkflowId;
use crate::model::WorkflowDefinition;
use crate::runtime::context::RuntimeCtx;
use crate::storage::ConditionRow;

pub async fn initialize(rt: &RuntimeCtx, workflow_id: WorkflowId, name: &str, is_start_condition: bool, is_implicit: bool) -> EngineResult<()> {
    let marking = if is_start_condition { 1 } else { 0 };
    rt.storage
        .insert_condition(ConditionRow { workflow_id, name: name.to_string(), marking, is_implicit })
        .await?;
    if marking > 0 {
        let resource = ResourceRef::condition(workflow_id, name);
        with_span(
            rt.tracer.as_ref(),
            &rt.audit,
            "condition.initialize",
            "condition",
            resource,
            SpanAttributes::Condition { old_marking: 0, new_marking: marking, delta: marking as i64 },
            |_| async { Ok(()) },
        )
        .await?;
    }
    Ok(())
}

pub async fn increment_marking(rt: &RuntimeCtx, definition: &Arc<WorkflowDefinition>, workflow_id: WorkflowId, name: &str) -> EngineResult<()> {
    let row = rt
        .storage
        .get_condition(workflow_id, name)
        .await?
        .ok_or_else(|| EngineError::NotFound { entity: "condition", id: name.to_string() })?;
    let new_marking = row.marking + 1;
    rt.storage.set_condition_marking(workflow_id, name, new_marking).await?;

    let resource = ResourceRef::condition(workflow_id, name);
    with_span(
        rt.tracer.as_ref(),
        &rt.audit,
        "condition.increment",
        "condition",
        resource,
        SpanAttributes::Condition { old_marking: row.marking, new_marking, delta: 1 },
        |_| async { Ok(()) },
    )
    .await?;

    enable_tasks(rt, definition, workflow_id, name).await
}

/// Invariant 4 / §4.1: clamped to ≥0, never an error (DESIGN NOTES open
/// question — the source relies on clamp-at-zero and this engine adopts it
/// as intentional).
pub async fn decrement_marking(rt: &RuntimeCtx, definition: &Arc<WorkflowDefinition>, workflow_id: WorkflowId, name: &str) -> EngineResult<()> {
    let row = rt
        .storage
        .get_condition(workflow_id, name)
        .await?
        .ok_or_else(|| EngineError::NotFound { entity: "condition", id: name.to_string() })?;
    let new_marking = row.marking.saturating_sub(1);
    rt.storage.set_condition_marking(workflow_id, name, new_marking).await?;

    let resource = ResourceRef::condition(workflow_id, name);
    with_span(
        rt.tracer.as_ref(),
        &rt.audit,
        "condition.decrement",
        "condition",
        resource,
        SpanAttributes::Condition { old_marking: row.marking, new_marking, delta: -1 },
        |_| async { Ok(()) },
    )
    .await?;

    if new_marking == 0 {
        disable_tasks(rt, definition, workflow_id, name).await?;
    }
    Ok(())
}

/// Forcibly resets marking to 0 and disables downstream tasks (§4.1
/// `cancel`, used by cancellation-region firing).
pub async fn cancel(rt: &RuntimeCtx, definition: &Arc<WorkflowDefinition>, workflow_id: WorkflowId, name: &str) -> EngineResult<()> {
    let row = rt
        .storage
        .get_condition(workflow_id, name)
        .await?
        .ok_or_else(|| EngineError::NotFound { entity: "condition", id: name.to_string() })?;
    if row.marking == 0 {
        return disable_tasks(rt, definition, workflow_id, name).await;
    }
    rt.storage.set_condition_marking(workflow_id, name, 0).await?;

    let resource = ResourceRef::condition(workflow_id, name);
    with_span(
        rt.tracer.as_ref(),
        &rt.audit,
        "condition.cancel",
        "condition",
        resource,
        SpanAttributes::Condition { old_marking: row.marking, new_marking: 0, delta: -(row.marking as i64) },
        |_| async { Ok(()) },
    )
    .await?;

    disable_tasks(rt, definition, workflow_id, name).await
}

/// `enableTasks`: invokes enablement on every downstream task
/// **sequentially**, in flow declaration order (§4.1, §5 ordering
/// guarantees).
pub async fn enable_tasks(rt: &RuntimeCtx, definition: &Arc<WorkflowDefinition>, workflow_id: WorkflowId, condition_name: &str) -> EngineResult<()> {
    for task_name in definition.tasks_downstream_of(condition_name) {
        crate::runtime::task::enable_if_possible(rt, definition, workflow_id, task_name).await?;
    }
    Ok(())
}

async fn disable_tasks(rt: &RuntimeCtx, definition: &Arc<WorkflowDefinition>, workflow_id: WorkflowId, condition_name: &str) -> EngineResult<()> {
    for task_name in definition.tasks_downstream_of(condition_name) {
        crate::runtime::task::disable_if_enabled(rt, definition, workflow_id, task_name).await?;
    }
    Ok(())
}
