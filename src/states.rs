//! Shared state enums (tables T and W from §4) used by storage rows, the
//! runtime, and the audit/snapshot reconstruction code alike.

use serde::{Deserialize, Serialize};

/// Table T: `disabled -> enabled -> started -> {completed, failed,
/// canceled}`, plus `enabled -> disabled` and `enabled -> canceled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Disabled,
    Enabled,
    Started,
    Completed,
    Failed,
    Canceled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed | TaskState::Canceled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Disabled => "disabled",
            TaskState::Enabled => "enabled",
            TaskState::Started => "started",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Canceled => "canceled",
        }
    }

    /// Table T membership test.
    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Disabled, Enabled)
                | (Enabled, Started)
                | (Enabled, Disabled)
                | (Enabled, Canceled)
                | (Started, Completed)
                | (Started, Failed)
                | (Started, Canceled)
        )
    }
}

/// Table W: `initialized -> {started, canceled}`, `started -> {completed,
/// failed, canceled, initialized}` (reset).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkItemState {
    Initialized,
    Started,
    Completed,
    Failed,
    Canceled,
}

impl WorkItemState {
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkItemState::Completed | WorkItemState::Failed | WorkItemState::Canceled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkItemState::Initialized => "initialized",
            WorkItemState::Started => "started",
            WorkItemState::Completed => "completed",
            WorkItemState::Failed => "failed",
            WorkItemState::Canceled => "canceled",
        }
    }

    /// Table W membership test.
    pub fn can_transition_to(self, next: WorkItemState) -> bool {
        use WorkItemState::*;
        matches!(
            (self, next),
            (Initialized, Started)
                | (Initialized, Canceled)
                | (Started, Completed)
                | (Started, Failed)
                | (Started, Canceled)
                | (Started, Initialized)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowState {
    Initialized,
    Started,
    Completed,
    Failed,
    Canceled,
}

impl WorkflowState {
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkflowState::Completed | WorkflowState::Failed | WorkflowState::Canceled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowState::Initialized => "initialized",
            WorkflowState::Started => "started",
            WorkflowState::Completed => "completed",
            WorkflowState::Failed => "failed",
            WorkflowState::Canceled => "canceled",
        }
    }
}

/// §4.6 `cancel(...)`: gates whether the user-defined cancel action runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CancellationReason {
    Explicit,
    Teardown,
    Migration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_state_rejects_non_table_transitions() {
        assert!(TaskState::Disabled.can_transition_to(TaskState::Enabled));
        assert!(!TaskState::Disabled.can_transition_to(TaskState::Started));
        assert!(!TaskState::Completed.can_transition_to(TaskState::Enabled), "terminal states have no outgoing transitions");
    }

    #[test]
    fn work_item_reset_only_legal_from_started() {
        assert!(WorkItemState::Started.can_transition_to(WorkItemState::Initialized));
        assert!(!WorkItemState::Initialized.can_transition_to(WorkItemState::Initialized));
        assert!(!WorkItemState::Completed.can_transition_to(WorkItemState::Initialized));
    }

    #[test]
    fn terminal_states_agree_across_all_three_enums() {
        for s in [TaskState::Completed, TaskState::Failed, TaskState::Canceled] {
            assert!(s.is_terminal());
        }
        assert!(!TaskState::Enabled.is_terminal());
        assert!(WorkflowState::Completed.is_terminal());
        assert!(!WorkflowState::Started.is_terminal());
    }
}
