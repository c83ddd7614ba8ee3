//! Parent/child workflow bookkeeping: stats propagation and composite-task
//! policy consultation on child state changes (§4.4).

use crate::error::{EngineError, EngineResult};
use crate::ids::{TaskInstanceKey, WorkflowId};
use crate::model::{PolicyDecision, TaskKind};
use crate::runtime::context::{ActivityContext, RuntimeCtx};
use crate::states::WorkflowState;
use crate::storage::ParentPointer;

/// Called whenever a child workflow reaches a new (possibly non-terminal)
/// state. Always updates the owning task's stats shard and runs its
/// `CompositeActivities` hook; consults the composite policy only when
/// `call_policy` is set — cascading teardown cancellations triggered by the
/// parent itself must not recurse back into that same parent's policy
/// (mirrors the leaf-task cancellation-region rule in `runtime::task`).
pub async fn on_child_workflow_state_changed(
    rt: &RuntimeCtx,
    child_id: WorkflowId,
    parent: &ParentPointer,
    prev: WorkflowState,
    next: WorkflowState,
    call_policy: bool,
) -> EngineResult<()> {
    let key = TaskInstanceKey {
        workflow_id: parent.workflow_id,
        task_name: parent.task_name.clone(),
        generation: parent.task_generation,
    };
    rt.storage.apply_child_workflow_stats_transition(&key, child_id, next).await?;

    if next.is_terminal() {
        rt.scheduler.cancel_owner(&crate::scheduler::ScheduleOwner::Task(key.clone())).await;
    }

    let parent_workflow = rt
        .storage
        .get_workflow(parent.workflow_id)
        .await?
        .ok_or_else(|| EngineError::NotFound { entity: "workflow", id: parent.workflow_id.to_string() })?;
    let definition = rt.registry.get(&parent_workflow.name, &parent_workflow.version_name)?;
    let task_def = definition.task(&parent.task_name)?;

    let mut actx = ActivityContext {
        rt: rt.clone(),
        definition: definition.clone(),
        workflow_id: parent.workflow_id,
        task_name: parent.task_name.clone(),
        generation: parent.task_generation,
    };
    task_def.composite_activities.on_workflow_state_changed(&mut actx, prev, next).await?;

    if !call_policy {
        return Ok(());
    }

    let policy = match &task_def.kind {
        TaskKind::Composite { policy, .. } => policy.clone(),
        TaskKind::DynamicComposite { policy, .. } => policy.clone(),
        TaskKind::Leaf { .. } => return Ok(()),
    };
    let stats = rt
        .storage
        .get_stats(&key)
        .await?
        .ok_or_else(|| EngineError::NotFound { entity: "stats_shard", id: key.to_string() })?;
    let view = stats.child_workflow_view();

    match policy.decide(&view).await {
        PolicyDecision::Continue => Ok(()),
        PolicyDecision::Complete => crate::runtime::task::complete(rt, &definition, parent.workflow_id, &parent.task_name).await,
        PolicyDecision::Fail => crate::runtime::task::fail(rt, &definition, parent.workflow_id, &parent.task_name).await,
    }
}
