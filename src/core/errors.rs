/*!
 * Error Types
 * Centralized error handling with thiserror, miette, and serde support
 */

use super::types::{CleanupId, ModuleId};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by module implementations and resolvers
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum ModuleError {
    #[error("Module {0} not found")]
    #[diagnostic(
        code(module::not_found),
        help("No resolver entry exists for this id. Check the registered tab names.")
    )]
    NotFound(ModuleId),

    #[error("Failed to resolve module {module_id}: {reason}")]
    #[diagnostic(code(module::resolve_failed))]
    ResolveFailed { module_id: ModuleId, reason: String },

    #[error("Render failed: {0}")]
    #[diagnostic(code(module::render_failed))]
    Render(String),

    #[error("Event binding failed: {0}")]
    #[diagnostic(code(module::bind_failed))]
    Bind(String),

    #[error("Refresh failed: {0}")]
    #[diagnostic(code(module::refresh_failed))]
    Refresh(String),

    #[error("Cleanup failed: {0}")]
    #[diagnostic(
        code(module::cleanup_failed),
        help("Leftover listeners and timers are scavenged by the controller.")
    )]
    Cleanup(String),
}

/// Module lifecycle controller errors
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum LifecycleError {
    #[error("Failed to load module {module_id}: {reason}")]
    #[diagnostic(
        code(lifecycle::load_failed),
        help("The resolver could not produce the module. A fallback panel is shown instead.")
    )]
    LoadFailed { module_id: ModuleId, reason: String },

    #[error("Failed to render module {module_id}: {reason}")]
    #[diagnostic(code(lifecycle::render_failed))]
    RenderFailed { module_id: ModuleId, reason: String },

    #[error("Failed to bind events for module {module_id}: {reason}")]
    #[diagnostic(code(lifecycle::bind_failed))]
    BindFailed { module_id: ModuleId, reason: String },

    #[error("Refresh of module {module_id} failed: {reason}")]
    #[diagnostic(code(lifecycle::refresh_failed))]
    RefreshFailed { module_id: ModuleId, reason: String },

    #[error("Switch to module {module_id} aborted: {reason}")]
    #[diagnostic(code(lifecycle::switch_aborted))]
    SwitchAborted { module_id: ModuleId, reason: String },

    #[error("Container region '{region}' is owned by module {owner}")]
    #[diagnostic(
        code(lifecycle::container_busy),
        help("Only one module may own a container region. The owner must be deactivated first.")
    )]
    ContainerBusy { region: String, owner: ModuleId },

    #[error("Invalid lifecycle transition for {module_id}: {from} -> {to}")]
    #[diagnostic(code(lifecycle::invalid_transition))]
    InvalidStateTransition {
        module_id: ModuleId,
        from: String,
        to: String,
    },
}

impl LifecycleError {
    /// Module the error refers to
    pub fn module_id(&self) -> &str {
        match self {
            Self::LoadFailed { module_id, .. }
            | Self::RenderFailed { module_id, .. }
            | Self::BindFailed { module_id, .. }
            | Self::RefreshFailed { module_id, .. }
            | Self::SwitchAborted { module_id, .. }
            | Self::InvalidStateTransition { module_id, .. } => module_id,
            Self::ContainerBusy { owner, .. } => owner,
        }
    }
}

/// Cleanup verifier errors
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum VerifierError {
    #[error("Module {0} was never registered")]
    #[diagnostic(
        code(verifier::not_registered),
        help("Call register_module before starting a cleanup for it.")
    )]
    NotRegistered(ModuleId),

    #[error("Cleanup {0} not found")]
    #[diagnostic(code(verifier::unknown_cleanup))]
    UnknownCleanup(CleanupId),

    #[error("Cleanup {cleanup_id} already finalized as {status}")]
    #[diagnostic(
        code(verifier::already_finalized),
        help("A late completion lost the race against the timeout and is ignored.")
    )]
    AlreadyFinalized { cleanup_id: CleanupId, status: String },
}

/// Configuration errors
#[derive(Error, Debug, Diagnostic)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    #[diagnostic(code(config::io))]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    #[diagnostic(code(config::parse), help("The config file must be valid JSON."))]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(config::invalid))]
    Invalid { field: &'static str, reason: String },
}

pub type ModuleResult<T> = Result<T, ModuleError>;
pub type LifecycleResult<T> = Result<T, LifecycleError>;
pub type VerifierResult<T> = Result<T, VerifierError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
