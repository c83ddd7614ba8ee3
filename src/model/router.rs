//! User-supplied routers for XOR/OR splits (§4.2, firing step 4).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::EngineResult;
use crate::ids::{ConditionName, TaskName, WorkflowId};
use crate::storage::Storage;

/// A single outgoing target named by a router. `ToTask` is converted by the
/// firing algorithm into the implicit input condition of that task —
/// routers never increment a task directly (§8 boundary property).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routing {
    ToTask(TaskName),
    ToCondition(ConditionName),
}

/// What a router sees when asked to pick the outgoing route(s) for a task
/// that just completed.
pub struct RoutingContext<'a> {
    pub workflow_id: WorkflowId,
    pub task_name: &'a TaskName,
    pub case_data: &'a Value,
    pub storage: Arc<dyn Storage>,
}

/// Returns exactly one [`Routing`] for an XOR split, or an ordered,
/// deduplicated set for an OR split (§4.2).
#[async_trait]
pub trait Router: Send + Sync {
    async fn route(&self, ctx: &RoutingContext<'_>) -> EngineResult<Vec<Routing>>;
}

/// A router that always picks the same fixed route — useful for AND-split
/// tasks that still want an explicit self-documenting router, and in tests.
pub struct FixedRouter(pub Vec<Routing>);

#[async_trait]
impl Router for FixedRouter {
    async fn route(&self, _ctx: &RoutingContext<'_>) -> EngineResult<Vec<Routing>> {
        Ok(self.0.clone())
    }
}
