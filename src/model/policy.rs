//! User-supplied policies consulted on work-item / child-workflow transitions.

use async_trait::async_trait;

use crate::runtime::stats::{ChildWorkflowStatsView, WorkItemStatsView};

/// What a policy decides for its owning task after a transition it was
/// consulted about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    Continue,
    Complete,
    Fail,
}

/// Consulted at each work-item transition of a leaf task (§4.3).
#[async_trait]
pub trait Policy: Send + Sync {
    async fn decide(&self, stats: &WorkItemStatsView) -> PolicyDecision;
}

/// "Default policy: complete when all work items are finalised and at
/// least one completed successfully; fail when any work item fails." (§4.3)
pub struct DefaultPolicy;

#[async_trait]
impl Policy for DefaultPolicy {
    async fn decide(&self, stats: &WorkItemStatsView) -> PolicyDecision {
        if stats.failed > 0 {
            return PolicyDecision::Fail;
        }
        let finalized = stats.completed + stats.failed + stats.canceled;
        if finalized >= stats.total && stats.completed > 0 {
            PolicyDecision::Complete
        } else if finalized >= stats.total {
            // every work item finalized but none completed successfully —
            // the task itself has nothing to show for its firing.
            PolicyDecision::Fail
        } else {
            PolicyDecision::Continue
        }
    }
}

/// Consulted on every child-workflow transition of a composite task (§4.4).
#[async_trait]
pub trait CompositePolicy: Send + Sync {
    async fn decide(&self, stats: &ChildWorkflowStatsView) -> PolicyDecision;
}

/// Mirrors [`DefaultPolicy`] but over child-workflow terminal states.
pub struct DefaultCompositePolicy;

#[async_trait]
impl CompositePolicy for DefaultCompositePolicy {
    async fn decide(&self, stats: &ChildWorkflowStatsView) -> PolicyDecision {
        if stats.failed > 0 {
            return PolicyDecision::Fail;
        }
        let finalized = stats.completed + stats.failed + stats.canceled;
        if finalized >= stats.total && stats.completed > 0 {
            PolicyDecision::Complete
        } else if finalized >= stats.total {
            PolicyDecision::Fail
        } else {
            PolicyDecision::Continue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(total: u64, completed: u64, failed: u64, canceled: u64) -> WorkItemStatsView {
        WorkItemStatsView { total, initialized: 0, started: 0, completed, failed, canceled }
    }

    #[tokio::test]
    async fn continues_while_work_items_remain_unfinalized() {
        let decision = DefaultPolicy.decide(&stats(2, 1, 0, 0)).await;
        assert_eq!(decision, PolicyDecision::Continue);
    }

    #[tokio::test]
    async fn completes_once_all_finalized_with_at_least_one_success() {
        let decision = DefaultPolicy.decide(&stats(2, 1, 0, 1)).await;
        assert_eq!(decision, PolicyDecision::Complete);
    }

    #[tokio::test]
    async fn fails_immediately_on_any_failure_even_with_outstanding_items() {
        let decision = DefaultPolicy.decide(&stats(3, 1, 1, 0)).await;
        assert_eq!(decision, PolicyDecision::Fail);
    }

    #[tokio::test]
    async fn fails_when_all_finalized_but_none_completed() {
        let decision = DefaultPolicy.decide(&stats(2, 0, 0, 2)).await;
        assert_eq!(decision, PolicyDecision::Fail);
    }

    #[tokio::test]
    async fn composite_policy_mirrors_the_default_policy_table() {
        let stats = ChildWorkflowStatsView { total: 1, initialized: 0, started: 0, completed: 1, failed: 0, canceled: 0 };
        assert_eq!(DefaultCompositePolicy.decide(&stats).await, PolicyDecision::Complete);
    }
}
