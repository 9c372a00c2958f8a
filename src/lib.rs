/*!
 * Modvisor Library
 * Module lifecycle supervision and resource-leak verification
 *
 * Three cooperating components:
 * - `ResourceSampler`: periodic memory snapshots and leak heuristics
 * - `CleanupVerifier`: cleanup obligations, timing, and the final audit
 * - `ModuleController`: activation and deactivation of modules in a container
 *
 * Components are cheap handles constructed once and injected; there are no
 * process-wide singletons.
 */

pub mod core;
pub mod lifecycle;
pub mod monitoring;

// Re-exports
pub use self::core::*;
pub use lifecycle::{
    CleanupVerifier, Container, ModuleController, Module, ModuleOptions, ModuleResolver,
    ModuleResources, RegistryResolver, SwitchOutcome,
};
pub use monitoring::{
    init_tracing, EventBus, EventKind, ManualProbe, MemoryProbe, ProcessProbe, ResourceSampler,
    SamplerTask, SupervisorEvent,
};
