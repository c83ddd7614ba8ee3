//! Callback-driven activities — the user-supplied DSL hooks invoked
//! synchronously within a step (DESIGN NOTES: "Abstract as a
//! trait/interface `Activities`").

use async_trait::async_trait;

use crate::error::EngineResult;
use crate::runtime::context::{ActivityContext, WorkItemHandle, WorkflowActivityContext};
use crate::states::WorkflowState;

/// Hooks invoked around a task's lifecycle (§4.2, §4.3). Every method
/// defaults to a no-op so a workflow definition only overrides what it
/// needs, matching how sparse the teacher's own activity usage is.
#[async_trait]
pub trait TaskActivities: Send + Sync {
    /// `onEnabled`: may synchronously initialise work items or child
    /// workflows (§4.2 enablement algorithm, step "Invoke afterEnable").
    async fn on_enabled(&self, _ctx: &mut ActivityContext) -> EngineResult<()> {
        Ok(())
    }

    /// `afterComplete`'s user-visible half.
    async fn on_completed(&self, _ctx: &mut ActivityContext) -> EngineResult<()> {
        Ok(())
    }

    /// `afterFail`'s user-visible half (children are already being
    /// cancelled by the engine by the time this runs).
    async fn on_failed(&self, _ctx: &mut ActivityContext) -> EngineResult<()> {
        Ok(())
    }

    /// `afterCancel`'s user-visible half.
    async fn on_canceled(&self, _ctx: &mut ActivityContext) -> EngineResult<()> {
        Ok(())
    }

    /// Runs during fast-forward migration instead of the four hooks above
    /// (§4.2.5). Returning `Ok(true)` ("fastForward") tells the engine to
    /// run the silent lifecycle; `Ok(false)` falls through to normal
    /// enablement.
    async fn on_fast_forward(&self, _ctx: &mut ActivityContext) -> EngineResult<bool> {
        Ok(false)
    }
}

/// Hooks invoked on every child-workflow state transition of a composite
/// task (§4.4).
#[async_trait]
pub trait CompositeActivities: Send + Sync {
    async fn on_workflow_state_changed(
        &self,
        _ctx: &mut ActivityContext,
        _prev: WorkflowState,
        _next: WorkflowState,
    ) -> EngineResult<()> {
        Ok(())
    }
}

/// Hooks invoked on a work item's lifecycle (§4.5). The handle exposes the
/// chain-transition helpers described there.
#[async_trait]
pub trait WorkItemActivities: Send + Sync {
    async fn on_initialized(&self, _handle: &mut WorkItemHandle) -> EngineResult<()> {
        Ok(())
    }

    async fn on_started(&self, _handle: &mut WorkItemHandle) -> EngineResult<()> {
        Ok(())
    }

    async fn on_completed(&self, _handle: &mut WorkItemHandle) -> EngineResult<()> {
        Ok(())
    }

    async fn on_failed(&self, _handle: &mut WorkItemHandle) -> EngineResult<()> {
        Ok(())
    }

    async fn on_canceled(&self, _handle: &mut WorkItemHandle) -> EngineResult<()> {
        Ok(())
    }

    async fn on_reset(&self, _handle: &mut WorkItemHandle) -> EngineResult<()> {
        Ok(())
    }
}

/// Hooks invoked on a workflow instance's own lifecycle (§4.6).
#[async_trait]
pub trait WorkflowActivities: Send + Sync {
    async fn on_initialized(&self, _ctx: &mut WorkflowActivityContext) -> EngineResult<()> {
        Ok(())
    }

    async fn on_completed(&self, _ctx: &mut WorkflowActivityContext) -> EngineResult<()> {
        Ok(())
    }

    async fn on_failed(&self, _ctx: &mut WorkflowActivityContext) -> EngineResult<()> {
        Ok(())
    }

    async fn on_canceled(&self, _ctx: &mut WorkflowActivityContext) -> EngineResult<()> {
        Ok(())
    }
}

/// Activities that do nothing — the default for a [`crate::model::TaskDef`]
/// that does not need any hook.
pub struct NoopActivities;

#[async_trait]
impl TaskActivities for NoopActivities {}
#[async_trait]
impl CompositeActivities for NoopActivities {}
#[async_trait]
impl WorkItemActivities for NoopActivities {}
#[async_trait]
impl WorkflowActivities for NoopActivities {}
