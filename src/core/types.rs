/*!
 * Core Types
 * Common types used across the supervisor
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Module identifier (the tab name the host switches to)
pub type ModuleId = String;

/// Cleanup attempt identifier, unique per verifier
pub type CleanupId = u64;

/// Wall-clock timestamp in milliseconds since the Unix epoch
pub type Timestamp = u64;

/// Current wall-clock time in milliseconds
#[inline]
pub fn now_ms() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as Timestamp
}

/// Kind of resource a module acquires and must release on cleanup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Event listener / subscription
    Listener,
    /// Interval or timeout timer
    Timer,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Listener => "listener",
            Self::Timer => "timer",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a cleanup was started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupReason {
    /// Active module replaced by another one
    Switch,
    /// Host application tearing down
    Shutdown,
    /// Requested directly by the host
    Manual,
}

/// Context passed to the verifier when a cleanup starts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupContext {
    pub reason: CleanupReason,
    /// Module that is about to take over the container, if any
    pub next_module: Option<ModuleId>,
}

impl CleanupContext {
    pub fn switch_to(next: impl Into<ModuleId>) -> Self {
        Self {
            reason: CleanupReason::Switch,
            next_module: Some(next.into()),
        }
    }

    pub fn shutdown() -> Self {
        Self {
            reason: CleanupReason::Shutdown,
            next_module: None,
        }
    }

    pub fn manual() -> Self {
        Self {
            reason: CleanupReason::Manual,
            next_module: None,
        }
    }
}

/// Resources released by a module's cleanup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupStats {
    pub listeners_released: usize,
    pub timers_released: usize,
    pub errors_encountered: usize,
}

impl CleanupStats {
    /// Total resources released
    #[inline]
    pub fn resources_released(&self) -> usize {
        self.listeners_released + self.timers_released
    }

    /// Merge another stats into this one
    pub fn merge(&mut self, other: CleanupStats) {
        self.listeners_released += other.listeners_released;
        self.timers_released += other.timers_released;
        self.errors_encountered += other.errors_encountered;
    }
}
