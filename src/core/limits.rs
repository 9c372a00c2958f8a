/*!
 * Supervisor Limits and Constants
 *
 * Centralized location for the defaults, thresholds, and bounds used by the
 * sampler, the cleanup verifier, and the module controller.
 * Organized by domain for maintainability and discoverability.
 *
 * - Performance-critical constants are marked with [PERF]
 * - Constants that drive leak heuristics are marked with [HEURISTIC]
 */

use std::time::Duration;

/// One mebibyte, used to express byte thresholds
pub const MIB: u64 = 1024 * 1024;

// =============================================================================
// SAMPLING
// =============================================================================

/// Default sampling cadence (5s)
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

/// Default number of samples retained in the history ring buffer
/// At the default cadence this covers ~8 minutes of history
pub const DEFAULT_SAMPLE_RETENTION: usize = 100;

/// Memory growth between two consecutive samples counted as suspicious (10MB)
/// [HEURISTIC]
pub const DEFAULT_LEAK_THRESHOLD_BYTES: u64 = 10 * MIB;

/// Absolute usage that raises a warning signal (50MB)
pub const DEFAULT_WARNING_THRESHOLD_BYTES: u64 = 50 * MIB;

/// Absolute usage that raises a critical signal (100MB)
pub const DEFAULT_CRITICAL_THRESHOLD_BYTES: u64 = 100 * MIB;

/// Consecutive suspicious samples needed before a leak signal fires
/// [HEURISTIC] Sub-threshold samples decay the counter by one, they do not reset it
pub const LEAK_SUSPICION_LIMIT: u32 = 3;

// =============================================================================
// CLEANUP VERIFICATION
// =============================================================================

/// Cleanup timeout applied when a module does not declare its own (5s)
pub const DEFAULT_CLEANUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Memory retained after a cleanup that is reported as an issue (10MB)
/// [HEURISTIC]
pub const DEFAULT_CLEANUP_LEAK_THRESHOLD_BYTES: u64 = 10 * MIB;

/// Maximum finalized cleanup records kept in history
/// [PERF] Bounded so long sessions with frequent tab switches stay O(1) in memory
pub const CLEANUP_HISTORY_LIMIT: usize = 256;

// =============================================================================
// CONTROLLER
// =============================================================================

/// Container region used when the host does not name one
pub const DEFAULT_CONTAINER_REGION: &str = "main";

/// Switch duration above which the operation span logs a slow-operation warning
pub const SLOW_SWITCH_THRESHOLD: Duration = Duration::from_millis(100);
