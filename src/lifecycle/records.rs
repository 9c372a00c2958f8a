/*!
 * Cleanup Records
 * Descriptors, cleanup attempts, aggregate metrics, and audit findings
 */

use crate::core::types::{CleanupId, CleanupReason, CleanupStats, ModuleId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use std::fmt;
use std::time::Duration;

/// Cleanup obligations a module declares when registering
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleOptions {
    /// Never cleaning this module is an audit finding
    pub require_cleanup: bool,
    /// None = verifier default
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    pub cleanup_timeout: Option<Duration>,
    pub critical: bool,
}

impl Default for ModuleOptions {
    fn default() -> Self {
        Self {
            require_cleanup: true,
            cleanup_timeout: None,
            critical: false,
        }
    }
}

impl ModuleOptions {
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.cleanup_timeout = Some(timeout);
        self
    }

    #[inline]
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.require_cleanup = false;
        self
    }

    #[inline]
    #[must_use]
    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }
}

/// Registration status of a descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DescriptorStatus {
    Active,
    Unregistered,
}

/// Registration record for a module with a cleanup obligation
///
/// Never deleted; unregistering only flips the status so the final audit
/// still sees it.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub id: ModuleId,
    pub require_cleanup: bool,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub cleanup_timeout: Duration,
    pub critical: bool,
    pub registered_at: Timestamp,
    /// Finalized cleanup attempts (completed, failed, or timed out)
    pub cleanup_count: u32,
    pub last_cleanup_at: Option<Timestamp>,
    pub last_outcome: Option<CleanupStatus>,
    pub status: DescriptorStatus,
}

/// Cleanup attempt status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupStatus {
    Running,
    Completed,
    Failed,
    Timeout,
}

impl CleanupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for CleanupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One cleanup attempt
///
/// Immutable once `status` is final.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupRecord {
    pub id: CleanupId,
    pub module_id: ModuleId,
    pub reason: CleanupReason,
    pub start_time: Timestamp,
    pub end_time: Option<Timestamp>,
    pub duration_ms: Option<u64>,
    pub status: CleanupStatus,
    pub memory_before: u64,
    pub memory_after: Option<u64>,
    pub memory_delta_bytes: Option<i64>,
    pub stats: Option<CleanupStats>,
    pub error: Option<String>,
}

/// Running aggregate over finalized cleanups
///
/// Average and longest duration are taken over completed cleanups only; a
/// timed-out attempt has no meaningful duration of its own.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_cleanups: u64,
    pub successful_cleanups: u64,
    pub failed_cleanups: u64,
    pub timed_out_cleanups: u64,
    pub average_duration_ms: f64,
    pub longest_duration_ms: u64,
}

impl PerformanceMetrics {
    /// Update with a completed cleanup (incremental mean)
    pub fn record_success(&mut self, duration_ms: u64) {
        self.total_cleanups += 1;
        self.successful_cleanups += 1;
        let n = self.successful_cleanups as f64;
        self.average_duration_ms += (duration_ms as f64 - self.average_duration_ms) / n;
        self.longest_duration_ms = self.longest_duration_ms.max(duration_ms);
    }

    pub fn record_failure(&mut self) {
        self.total_cleanups += 1;
        self.failed_cleanups += 1;
    }

    pub fn record_timeout(&mut self) {
        self.total_cleanups += 1;
        self.timed_out_cleanups += 1;
    }

    /// Share of finalized cleanups that completed (1.0 when none ran)
    pub fn success_rate(&self) -> f64 {
        if self.total_cleanups == 0 {
            1.0
        } else {
            self.successful_cleanups as f64 / self.total_cleanups as f64
        }
    }
}

/// Problem found while validating a completed cleanup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CleanupIssue {
    /// Memory did not come back down after cleanup
    MemoryRetained {
        delta_bytes: i64,
        threshold_bytes: u64,
    },
    /// Cleanup completed but took longer than the module's timeout
    SlowCleanup { duration_ms: u64, timeout_ms: u64 },
}

/// Finding produced by the teardown audit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditFinding {
    /// Module declared a cleanup obligation but was never cleaned
    UncleanedModule { module_id: ModuleId, critical: bool },
    /// Cleanups still running at teardown
    ActiveCleanups { cleanups: Vec<CleanupRecord> },
}

/// Teardown audit report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalReport {
    pub generated_at: Timestamp,
    pub findings: Vec<AuditFinding>,
    pub metrics: PerformanceMetrics,
    pub registered_modules: usize,
}

impl FinalReport {
    /// Modules reported as never cleaned
    pub fn uncleaned_modules(&self) -> Vec<&str> {
        self.findings
            .iter()
            .filter_map(|finding| match finding {
                AuditFinding::UncleanedModule { module_id, .. } => Some(module_id.as_str()),
                AuditFinding::ActiveCleanups { .. } => None,
            })
            .collect()
    }

    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }
}
