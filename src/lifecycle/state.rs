/*!
 * Module State Machine
 *
 * Inactive -> Activating -> Active -> Deactivating -> Inactive
 *
 * Activating -> Inactive is the failure exit. Nothing else is allowed, so a
 * module can never be re-entered without passing through Inactive.
 */

use crate::core::errors::{LifecycleError, LifecycleResult};
use crate::core::types::ModuleId;
use ahash::HashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::trace;

/// Lifecycle state of one module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleState {
    #[default]
    Inactive,
    Activating,
    Active,
    Deactivating,
}

impl ModuleState {
    #[inline]
    pub fn can_transition_to(self, next: ModuleState) -> bool {
        use ModuleState::*;
        matches!(
            (self, next),
            (Inactive, Activating)
                | (Activating, Active)
                | (Activating, Inactive)
                | (Active, Deactivating)
                | (Deactivating, Inactive)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::Activating => "activating",
            Self::Active => "active",
            Self::Deactivating => "deactivating",
        }
    }
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a Deactivating module got back to Inactive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeactivationOutcome {
    /// The module's own cleanup finished in time
    Completed,
    /// Resources were scavenged after a timeout or a cleanup error
    Forced,
}

/// State of every module the controller has touched
#[derive(Debug, Default)]
pub struct StateTable {
    states: HashMap<ModuleId, ModuleState>,
}

impl StateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state (`Inactive` for modules never seen)
    pub fn get(&self, module_id: &str) -> ModuleState {
        self.states.get(module_id).copied().unwrap_or_default()
    }

    /// Move a module to `next`, rejecting transitions outside the machine
    pub fn transition(&mut self, module_id: &str, next: ModuleState) -> LifecycleResult<ModuleState> {
        let current = self.get(module_id);
        if !current.can_transition_to(next) {
            return Err(LifecycleError::InvalidStateTransition {
                module_id: module_id.to_string(),
                from: current.to_string(),
                to: next.to_string(),
            });
        }

        trace!(module_id, from = %current, to = %next, "module state transition");
        self.states.insert(module_id.to_string(), next);
        Ok(current)
    }
}
