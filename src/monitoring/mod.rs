/*!
 * Resource Monitoring
 * Memory sampling, leak heuristics, event delivery, and tracing
 */

pub mod bus;
pub mod events;
pub mod probe;
pub mod sampler;
pub mod task;
mod tracer;

pub use bus::{BusStats, EventBus, Subscription};
pub use events::{EventKind, IssueReport, LeakSignal, Severity, SupervisorEvent, ThresholdSignal};
pub use probe::{ManualProbe, MemoryProbe, MemoryUsage, ProcessProbe};
pub use sampler::{GrowthTrend, ResourceSample, ResourceSampler, SamplerStats};
pub use task::{SamplerCommand, SamplerTask};
pub use tracer::{generate_trace_id, init_tracing, span_operation, OperationSpan};
