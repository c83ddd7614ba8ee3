//! Workflow instance lifecycle: initialization, completion, failure, and
//! cancellation (§4.4, §6).

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use crate::audit::{with_cancel_span, with_span, ResourceRef, SpanAttributes};
use crate::error::{EngineError, EngineResult};
use crate::ids::WorkflowId;
use crate::model::WorkflowDefinition;
use crate::runtime::context::{RuntimeCtx, WorkflowActivityContext};
use crate::states::{CancellationReason, TaskState, WorkflowState};
use crate::storage::{ParentPointer, TaskRow, WorkflowRow};

/// `workflow.initialize()`: validates the payload, creates every condition
/// and task row at generation zero, runs `onInitialized`, then fires the
/// start-condition cascade (§4.1, §4.4). `id`, when supplied, pins the
/// instance to a caller-chosen id — the engine uses this for root workflows
/// so the default trace id (`traceId == workflowId`, §4.8) can be decided
/// before the first span is opened; child workflows spawned by a composite
/// task always generate their own.
pub async fn initialize(
    rt: &RuntimeCtx,
    definition: Arc<WorkflowDefinition>,
    parent: Option<ParentPointer>,
    id: Option<WorkflowId>,
    payload: Value,
) -> EngineResult<WorkflowId> {
    definition.initialize_action.check(&payload)?;

    let id = id.unwrap_or_else(WorkflowId::new);
    let (path, realized_path, root_workflow_id) = match &parent {
        Some(p) => {
            let parent_row = rt
                .storage
                .get_workflow(p.workflow_id)
                .await?
                .ok_or_else(|| EngineError::NotFound { entity: "workflow", id: p.workflow_id.to_string() })?;
            let mut path = parent_row.path.clone();
            path.push(p.task_name.clone());
            let mut realized_path = parent_row.realized_path.clone();
            realized_path.push(id);
            let root = parent_row.root_workflow_id.unwrap_or(parent_row.id);
            (path, realized_path, Some(root))
        }
        None => (Vec::new(), vec![id], None),
    };

    rt.storage
        .insert_workflow(WorkflowRow {
            id,
            name: definition.name.clone(),
            version_name: definition.version_name.clone(),
            path,
            realized_path,
            parent: parent.clone(),
            state: WorkflowState::Initialized,
            root_workflow_id,
            created_at: Utc::now(),
        })
        .await?;

    let resource = ResourceRef::workflow(id, &definition.name);
    let def = definition.clone();
    with_span(
        rt.tracer.as_ref(),
        &rt.audit,
        "workflow.initialize",
        "workflow",
        resource,
        SpanAttributes::Workflow { name: definition.name.clone(), version_name: definition.version_name.clone() },
        |child_audit| {
            let rt2 = rt.with_audit(child_audit);
            async move {
                for cond in &def.conditions {
                    crate::runtime::condition::initialize(&rt2, id, &cond.name, cond.name == def.start_condition, cond.is_implicit).await?;
                }
                for task in &def.tasks {
                    rt2.storage
                        .insert_task(TaskRow {
                            workflow_id: id,
                            name: task.name.clone(),
                            state: TaskState::Disabled,
                            generation: 0,
                            execution_mode: rt2.execution_mode,
                            last_transition_at: Utc::now(),
                        })
                        .await?;
                }

                let mut actx = WorkflowActivityContext { rt: rt2.clone(), definition: def.clone(), workflow_id: id };
                def.activities.on_initialized(&mut actx).await
            }
        },
    )
    .await?;

    rt.storage.update_workflow_state(id, WorkflowState::Started).await?;
    crate::runtime::condition::enable_tasks(rt, &definition, id, &definition.start_condition).await?;
    maybe_complete(rt, &definition, id).await?;

    Ok(id)
}

/// Checked after every task firing: a workflow completes once its end
/// condition is marked (§4.1, §4.4).
pub async fn maybe_complete(rt: &RuntimeCtx, definition: &Arc<WorkflowDefinition>, workflow_id: WorkflowId) -> EngineResult<()> {
    let row = rt
        .storage
        .get_workflow(workflow_id)
        .await?
        .ok_or_else(|| EngineError::NotFound { entity: "workflow", id: workflow_id.to_string() })?;
    if row.state.is_terminal() {
        return Ok(());
    }
    let end = rt
        .storage
        .get_condition(workflow_id, &definition.end_condition)
        .await?
        .ok_or_else(|| EngineError::NotFound { entity: "condition", id: definition.end_condition.clone() })?;
    if end.marking == 0 {
        return Ok(());
    }
    let tasks = rt.storage.list_tasks_by_workflow(workflow_id).await?;
    if tasks.iter().any(|t| matches!(t.state, TaskState::Enabled | TaskState::Started)) {
        return Ok(());
    }

    rt.storage.update_workflow_state(workflow_id, WorkflowState::Completed).await?;

    let resource = ResourceRef::workflow(workflow_id, &definition.name);
    let def = definition.clone();
    with_span(
        rt.tracer.as_ref(),
        &rt.audit,
        "workflow.complete",
        "workflow",
        resource,
        SpanAttributes::Workflow { name: definition.name.clone(), version_name: definition.version_name.clone() },
        |child_audit| {
            let rt2 = rt.with_audit(child_audit);
            async move {
                let mut actx = WorkflowActivityContext { rt: rt2.clone(), definition: def.clone(), workflow_id };
                def.activities.on_completed(&mut actx).await
            }
        },
    )
    .await?;

    if let Some(parent) = row.parent.clone() {
        crate::runtime::hierarchy::on_child_workflow_state_changed(rt, workflow_id, &parent, row.state, WorkflowState::Completed, true).await?;
    }
    Ok(())
}

/// `workflow.fail()`: cancels every still-live task in the workflow before
/// propagating to the parent (§4.4 cascade rule "failed").
pub async fn fail(rt: &RuntimeCtx, definition: &Arc<WorkflowDefinition>, workflow_id: WorkflowId) -> EngineResult<()> {
    let row = rt
        .storage
        .get_workflow(workflow_id)
        .await?
        .ok_or_else(|| EngineError::NotFound { entity: "workflow", id: workflow_id.to_string() })?;
    if row.state.is_terminal() {
        return Ok(());
    }
    let prev_state = row.state;
    rt.storage.update_workflow_state(workflow_id, WorkflowState::Failed).await?;

    let resource = ResourceRef::workflow(workflow_id, &definition.name);
    let def = definition.clone();
    with_span(
        rt.tracer.as_ref(),
        &rt.audit,
        "workflow.fail",
        "workflow",
        resource,
        SpanAttributes::Workflow { name: definition.name.clone(), version_name: definition.version_name.clone() },
        |child_audit| {
            let rt2 = rt.with_audit(child_audit);
            async move {
                let mut actx = WorkflowActivityContext { rt: rt2.clone(), definition: def.clone(), workflow_id };
                def.activities.on_failed(&mut actx).await?;
                cancel_live_tasks(&rt2, &def, workflow_id).await
            }
        },
    )
    .await?;

    if let Some(parent) = row.parent.clone() {
        crate::runtime::hierarchy::on_child_workflow_state_changed(rt, workflow_id, &parent, prev_state, WorkflowState::Failed, true).await?;
    }
    Ok(())
}

/// `workflow.cancel()`. `reason` gates whether the user-visible
/// `onCanceled` activity runs — forced teardown/migration cancellation does
/// not (§4.6). `call_policy` gates whether the parent composite task's
/// policy is consulted — cascading teardown from an already-failing or
/// already-canceling parent must not recurse into that parent again.
pub async fn cancel(rt: &RuntimeCtx, workflow_id: WorkflowId, _payload: Value, reason: CancellationReason, call_policy: bool) -> EngineResult<()> {
    let row = rt
        .storage
        .get_workflow(workflow_id)
        .await?
        .ok_or_else(|| EngineError::NotFound { entity: "workflow", id: workflow_id.to_string() })?;
    if row.state.is_terminal() {
        return Ok(());
    }
    let prev_state = row.state;
    let definition = rt.registry.get(&row.name, &row.version_name)?;
    rt.storage.update_workflow_state(workflow_id, WorkflowState::Canceled).await?;

    let resource = ResourceRef::workflow(workflow_id, &definition.name);
    let def = definition.clone();
    with_cancel_span(
        rt.tracer.as_ref(),
        &rt.audit,
        "workflow.cancel",
        "workflow",
        resource,
        SpanAttributes::Workflow { name: definition.name.clone(), version_name: definition.version_name.clone() },
        |child_audit| {
            let rt2 = rt.with_audit(child_audit);
            async move {
                if reason == CancellationReason::Explicit {
                    let mut actx = WorkflowActivityContext { rt: rt2.clone(), definition: def.clone(), workflow_id };
                    def.activities.on_canceled(&mut actx).await?;
                }
                cancel_live_tasks(&rt2, &def, workflow_id).await
            }
        },
    )
    .await?;

    if let Some(parent) = row.parent.clone() {
        crate::runtime::hierarchy::on_child_workflow_state_changed(rt, workflow_id, &parent, prev_state, WorkflowState::Canceled, call_policy).await?;
    }
    Ok(())
}

async fn cancel_live_tasks(rt: &RuntimeCtx, definition: &Arc<WorkflowDefinition>, workflow_id: WorkflowId) -> EngineResult<()> {
    let tasks = rt.storage.list_tasks_by_workflow(workflow_id).await?;
    for t in tasks {
        if matches!(t.state, TaskState::Enabled | TaskState::Started) {
            crate::runtime::task::cancel(rt, definition, workflow_id, &t.name).await?;
        }
    }
    Ok(())
}
