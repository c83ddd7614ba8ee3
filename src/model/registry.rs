//! Central definition registry resolving the `Task ↔ Workflow ↔
//! CompositeTask ↔ child Workflow` cycle by identity instead of raw
//! back-pointers (DESIGN NOTES).

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::EngineError;
use crate::error::EngineResult;
use crate::model::graph::WorkflowDefinition;

/// Looked up by `(name, versionName)` — matches how every workflow
/// instance names its own definition (§3).
pub struct DefinitionRegistry {
    defs: HashMap<(String, String), Arc<WorkflowDefinition>>,
}

impl DefinitionRegistry {
    pub fn new() -> Self {
        Self { defs: HashMap::new() }
    }

    pub fn register(&mut self, def: WorkflowDefinition) {
        let key = (def.name.clone(), def.version_name.clone());
        self.defs.insert(key, Arc::new(def));
    }

    pub fn get(&self, name: &str, version_name: &str) -> EngineResult<Arc<WorkflowDefinition>> {
        self.defs
            .get(&(name.to_string(), version_name.to_string()))
            .cloned()
            .ok_or_else(|| {
                EngineError::StructuralIntegrity(format!(
                    "no workflow definition registered for {name}@{version_name}"
                ))
            })
    }
}

impl Default for DefinitionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
