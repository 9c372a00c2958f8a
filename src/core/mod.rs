/*!
 * Core Module
 * Fundamental supervisor types, configuration, and error handling
 */

pub mod config;
pub mod errors;
pub mod limits;
pub mod types;

// Re-export for convenience
pub use config::{ControllerConfig, SamplerConfig, SupervisorConfig, VerifierConfig};
pub use errors::*;
pub use types::*;
