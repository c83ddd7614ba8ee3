//! Work item state machine and the auto-trigger FIFO drain (§4.5).

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

use crate::audit::{with_cancel_span, with_span, ResourceRef, SpanAttributes};
use crate::error::{EngineError, EngineResult};
use crate::ids::WorkItemId;
use crate::runtime::context::{AutoTriggerEntry, RuntimeCtx, WorkItemHandle};
use crate::scheduler::ScheduleOwner;
use crate::states::WorkItemState;

/// Runs one activity hook against a fresh [`WorkItemHandle`] and, if it
/// enqueued a chained transition, pushes it onto the shared FIFO queue
/// (§4.5: "enqueue a single AutoTriggerEntry onto the caller-provided FIFO
/// queue").
pub async fn invoke_activity<F, Fut>(rt: &RuntimeCtx, work_item_id: WorkItemId, f: F) -> EngineResult<()>
where
    F: FnOnce(&mut WorkItemHandle) -> Fut,
    Fut: Future<Output = EngineResult<()>>,
{
    let mut handle = WorkItemHandle::new(rt.clone(), work_item_id);
    f(&mut handle).await?;
    if let Some(entry) = handle.take_pending() {
        rt.auto_triggers.lock().await.push_back((work_item_id, entry));
    }
    Ok(())
}

fn operation_name(target: WorkItemState) -> &'static str {
    match target {
        WorkItemState::Started => "workItem.start",
        WorkItemState::Completed => "workItem.complete",
        WorkItemState::Failed => "workItem.fail",
        WorkItemState::Canceled => "workItem.cancel",
        WorkItemState::Initialized => "workItem.reset",
    }
}

/// The shared transition machinery behind every public work-item op. Loads
/// the current row, applies the idempotent commit (§7 "Recovery": a
/// re-invocation that already landed is a no-op), checks table W, persists
/// the new state and stats, runs the matching activity, then consults the
/// owning task's policy.
pub async fn apply_transition(rt: &RuntimeCtx, work_item_id: WorkItemId, target: WorkItemState, payload: Value) -> EngineResult<()> {
    let row = rt
        .storage
        .get_work_item(work_item_id)
        .await?
        .ok_or_else(|| EngineError::NotFound { entity: "work_item", id: work_item_id.to_string() })?;

    if row.state == target {
        return Ok(());
    }
    if !row.state.can_transition_to(target) {
        return Err(EngineError::InvalidStateTransition {
            entity: "work_item",
            from: row.state.as_str().to_string(),
            to: target.as_str().to_string(),
        });
    }

    let workflow = rt
        .storage
        .get_workflow(row.parent.workflow_id)
        .await?
        .ok_or_else(|| EngineError::NotFound { entity: "workflow", id: row.parent.workflow_id.to_string() })?;
    let definition = rt.registry.get(&workflow.name, &workflow.version_name)?;
    let task_def = definition.task(&row.parent.task_name)?;
    task_def.work_item_action.check(&payload)?;

    rt.storage.update_work_item_state(work_item_id, target).await?;
    rt.storage.apply_work_item_stats_transition(&row.parent, work_item_id, target).await?;

    let resource = ResourceRef::work_item(work_item_id, &row.name);
    let activities = task_def.work_item_activities.clone();
    if target == WorkItemState::Canceled {
        with_cancel_span(
            rt.tracer.as_ref(),
            &rt.audit,
            operation_name(target),
            "workItem",
            resource,
            SpanAttributes::WorkItem { name: row.name.clone() },
            |child_audit| {
                let rt2 = rt.with_audit(child_audit);
                async move {
                    invoke_activity(&rt2, work_item_id, |h: &mut WorkItemHandle| -> Pin<Box<dyn Future<Output = EngineResult<()>> + Send + '_>> {
                        activities.on_canceled(h)
                    })
                    .await
                }
            },
        )
        .await?;
    } else {
        with_span(
            rt.tracer.as_ref(),
            &rt.audit,
            operation_name(target),
            "workItem",
            resource,
            SpanAttributes::WorkItem { name: row.name.clone() },
            |child_audit| {
                let rt2 = rt.with_audit(child_audit);
                async move {
                    invoke_activity(&rt2, work_item_id, |h: &mut WorkItemHandle| -> Pin<Box<dyn Future<Output = EngineResult<()>> + Send + '_>> {
                        match target {
                            WorkItemState::Started => activities.on_started(h),
                            WorkItemState::Completed => activities.on_completed(h),
                            WorkItemState::Failed => activities.on_failed(h),
                            WorkItemState::Canceled => unreachable!("canceled handled above"),
                            WorkItemState::Initialized => activities.on_reset(h),
                        }
                    })
                    .await
                }
            },
        )
        .await?;
    }

    if target.is_terminal() || target == WorkItemState::Initialized {
        rt.scheduler.cancel_owner(&ScheduleOwner::WorkItem(work_item_id)).await;
    }

    crate::runtime::task::on_work_item_transition(rt, &definition, &row.parent, target).await?;
    Ok(())
}

pub async fn start(rt: &RuntimeCtx, id: WorkItemId, payload: Value) -> EngineResult<()> {
    apply_transition(rt, id, WorkItemState::Started, payload).await
}

pub async fn complete(rt: &RuntimeCtx, id: WorkItemId, payload: Value) -> EngineResult<()> {
    apply_transition(rt, id, WorkItemState::Completed, payload).await
}

pub async fn fail(rt: &RuntimeCtx, id: WorkItemId, payload: Value) -> EngineResult<()> {
    apply_transition(rt, id, WorkItemState::Failed, payload).await
}

pub async fn cancel(rt: &RuntimeCtx, id: WorkItemId, payload: Value) -> EngineResult<()> {
    apply_transition(rt, id, WorkItemState::Canceled, payload).await
}

/// `reset(workItem)`: only legal from `started` — table W enforces this
/// directly, so no extra guard is needed here (§4.5, §8 boundary property).
pub async fn reset(rt: &RuntimeCtx, id: WorkItemId, payload: Value) -> EngineResult<()> {
    apply_transition(rt, id, WorkItemState::Initialized, payload).await
}

/// Drains the shared auto-trigger queue strictly FIFO, applying each
/// transition against freshly re-read storage (§4.5, §5 ordering
/// guarantees). Must be called exactly once, by the top-level engine
/// operation that started the call.
pub async fn drain_auto_triggers(rt: &RuntimeCtx) -> EngineResult<()> {
    loop {
        let next = rt.auto_triggers.lock().await.pop_front();
        let Some((work_item_id, entry)) = next else { break };
        match entry {
            AutoTriggerEntry::Start(payload) => start(rt, work_item_id, payload).await?,
            AutoTriggerEntry::Complete(payload) => complete(rt, work_item_id, payload).await?,
            AutoTriggerEntry::Fail(payload) => fail(rt, work_item_id, payload).await?,
            AutoTriggerEntry::Cancel(payload) => cancel(rt, work_item_id, payload).await?,
            AutoTriggerEntry::Reset(payload) => reset(rt, work_item_id, payload).await?,
        }
    }
    Ok(())
}
