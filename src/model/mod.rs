//! The immutable workflow definition: topology, routers, and policies.
//!
//! Everything in this module is the static "flow graph" component from the
//! architecture table — built once (by the out-of-scope builder DSL) and
//! shared read-only across every instance the engine runs.

mod activities;
mod graph;
mod policy;
mod registry;
mod router;

pub use activities::{CompositeActivities, NoopActivities, TaskActivities, WorkItemActivities, WorkflowActivities};
pub use graph::{
    ActionSchema, CancellationRegionMember, ConditionDef, ExecutionMode, FlowNode, JoinType,
    SplitType, TaskDef, TaskKind, WorkflowDefinition,
};
pub use policy::{CompositePolicy, DefaultCompositePolicy, DefaultPolicy, Policy, PolicyDecision};
pub use registry::DefinitionRegistry;
pub use router::{FixedRouter, Routing, RoutingContext, Router};
