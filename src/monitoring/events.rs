/*!
 * Event System
 * Strongly-typed supervisor events delivered to diagnostics listeners
 */

use super::sampler::ResourceSample;
use crate::core::types::Timestamp;
use crate::lifecycle::records::{CleanupIssue, CleanupRecord, FinalReport};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Event severity for filtering and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Severity {
    Info = 0,
    Warn = 1,
    Error = 2,
    Critical = 3,
}

/// Event kind, used for targeted subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Leak,
    Warning,
    Critical,
    Timeout,
    Issues,
    Final,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::Leak,
        EventKind::Warning,
        EventKind::Critical,
        EventKind::Timeout,
        EventKind::Issues,
        EventKind::Final,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Leak => "leak",
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Timeout => "timeout",
            Self::Issues => "issues",
            Self::Final => "final",
        }
    }

    #[inline]
    pub(crate) fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Heuristic leak alert: memory grew past the threshold on several consecutive samples
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeakSignal {
    pub timestamp: Timestamp,
    /// Growth between the last two samples
    pub growth_bytes: u64,
    /// Sample that completed the suspicious run
    pub sample: ResourceSample,
}

/// Absolute usage crossed a configured threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSignal {
    pub timestamp: Timestamp,
    pub used_bytes: u64,
    pub threshold_bytes: u64,
    pub sample: ResourceSample,
}

/// Cleanup finished but validation found problems
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueReport {
    pub record: CleanupRecord,
    pub issues: Vec<CleanupIssue>,
}

/// Unified supervisor event - every signal flows through this
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum SupervisorEvent {
    Leak(LeakSignal),
    Warning(ThresholdSignal),
    Critical(ThresholdSignal),
    Timeout(CleanupRecord),
    Issues(IssueReport),
    Final(FinalReport),
}

impl SupervisorEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Leak(_) => EventKind::Leak,
            Self::Warning(_) => EventKind::Warning,
            Self::Critical(_) => EventKind::Critical,
            Self::Timeout(_) => EventKind::Timeout,
            Self::Issues(_) => EventKind::Issues,
            Self::Final(_) => EventKind::Final,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::Leak(_) => Severity::Error,
            Self::Warning(_) => Severity::Warn,
            Self::Critical(_) => Severity::Critical,
            Self::Timeout(_) => Severity::Warn,
            Self::Issues(_) => Severity::Warn,
            Self::Final(report) if report.findings.is_empty() => Severity::Info,
            Self::Final(_) => Severity::Warn,
        }
    }
}
