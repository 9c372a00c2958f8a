/*!
 * Module Lifecycle
 * Activation, cleanup verification, and the module contract
 */

pub mod container;
pub mod controller;
pub mod module;
pub mod records;
pub mod resolver;
pub mod state;
pub mod verifier;

pub use container::Container;
pub use controller::{
    ActiveModule, ControllerStats, LeakAudit, ModuleController, ModuleControllerBuilder,
    SwitchOutcome,
};
pub use module::{Module, ModuleResources, ScavengeReport};
pub use records::{
    AuditFinding, CleanupIssue, CleanupRecord, CleanupStatus, DescriptorStatus, FinalReport,
    ModuleDescriptor, ModuleOptions, PerformanceMetrics,
};
pub use resolver::{ModuleResolver, RegistryResolver};
pub use state::{DeactivationOutcome, ModuleState, StateTable};
pub use verifier::{CleanupVerifier, VerifierStats};
