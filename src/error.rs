//! Error taxonomy for the workflow engine.

use thiserror::Error;

/// Result type threaded through every engine operation.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by the engine to its caller.
///
/// Every variant aborts the current transactional step; the storage
/// implementation is expected to roll back whatever it already wrote.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A task or work item attempted a transition not present in its state table.
    #[error("invalid {entity} transition: {from} -> {to}")]
    InvalidStateTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    /// A referenced task/condition/workflow is missing from the static definition.
    #[error("structural integrity error: {0}")]
    StructuralIntegrity(String),

    /// A precondition of an operation was violated (e.g. fast-forward on an
    /// already-initialised child workflow, or a second auto-trigger set).
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// A task declared a join type it has no logic for.
    #[error("task {task} has invalid join type: {join}")]
    InvalidJoinType { task: String, join: String },

    /// A router returned a `Routing` pointing at an undeclared task/condition.
    #[error("task {task} router produced invalid route to {target}")]
    InvalidRoute { task: String, target: String },

    /// A task requires a router (XOR/OR split) but none was supplied.
    #[error("task {task} has no router but needs one for its split type")]
    MissingRouter { task: String },

    /// `enableIfInStateThatCanTransitionToEnabled` found no prior log entry.
    #[error("task {task} has no task-state log entry")]
    MissingLogItem { task: String },

    /// A work-item activity attempted to enqueue a second chained transition.
    #[error("work item {work_item} already has an auto-trigger queued")]
    WorkItemAutoTriggerAlreadySet { work_item: String },

    /// An entity lookup failed during normal operation.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A payload failed schema validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// A migration/fast-forward precondition was violated.
    #[error("migration error: {0}")]
    Migration(String),

    /// The storage façade failed.
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Validation(err.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Storage(err.to_string())
    }
}

#[cfg(feature = "sled-store")]
impl From<sled::Error> for EngineError {
    fn from(err: sled::Error) -> Self {
        EngineError::Storage(err.to_string())
    }
}
