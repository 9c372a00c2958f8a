/*!
 * Cleanup Verifier
 *
 * Tracks which modules owe a cleanup, times every cleanup attempt, and audits
 * the outcome.
 *
 * # Lifecycle of a cleanup record
 *
 * `start_cleanup` creates a `Running` record and arms a timeout timer. Exactly
 * one of `finish_cleanup`, `fail_cleanup`, or `timeout_cleanup` finalizes it;
 * the timer calls `timeout_cleanup` itself if nobody else got there first.
 * Whichever path runs first wins, later ones get `AlreadyFinalized` and the
 * record is never touched again.
 *
 * The timer is a spawned task racing `sleep` against a oneshot receiver.
 * Finalizing drops the sender, which ends the task on the winning path.
 */

use super::records::{
    AuditFinding, CleanupIssue, CleanupRecord, CleanupStatus, DescriptorStatus, FinalReport,
    ModuleDescriptor, ModuleOptions, PerformanceMetrics,
};
use crate::core::config::VerifierConfig;
use crate::core::errors::{VerifierError, VerifierResult};
use crate::core::types::{now_ms, CleanupContext, CleanupId, CleanupStats, ModuleId};
use crate::monitoring::bus::EventBus;
use crate::monitoring::events::{IssueReport, SupervisorEvent};
use crate::monitoring::sampler::ResourceSampler;
use ahash::HashMap;
use parking_lot::Mutex;
use ringbuf::{traits::*, HeapRb};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Verifier statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerifierStats {
    pub registered_modules: usize,
    pub unregistered_modules: usize,
    pub running_cleanups: usize,
    pub history_len: usize,
    pub metrics: PerformanceMetrics,
}

struct RunningCleanup {
    record: CleanupRecord,
    started: Instant,
    /// Dropping this cancels the timeout timer
    cancel: Option<oneshot::Sender<()>>,
}

struct VerifierState {
    /// Ordered so audits are deterministic
    modules: BTreeMap<ModuleId, ModuleDescriptor>,
    running: HashMap<CleanupId, RunningCleanup>,
    history: HeapRb<CleanupRecord>,
    metrics: PerformanceMetrics,
}

struct VerifierInner {
    config: VerifierConfig,
    sampler: ResourceSampler,
    bus: EventBus,
    next_id: AtomicU64,
    state: Mutex<VerifierState>,
}

/// Cleanup verifier handle
///
/// Cloning is cheap; all clones share the descriptor table and history.
#[derive(Clone)]
pub struct CleanupVerifier {
    inner: Arc<VerifierInner>,
}

impl CleanupVerifier {
    pub fn new(config: VerifierConfig, sampler: ResourceSampler, bus: EventBus) -> Self {
        let history_limit = config.history_limit.max(1);
        Self {
            inner: Arc::new(VerifierInner {
                config,
                sampler,
                bus,
                next_id: AtomicU64::new(1),
                state: Mutex::new(VerifierState {
                    modules: BTreeMap::new(),
                    running: HashMap::default(),
                    history: HeapRb::new(history_limit),
                    metrics: PerformanceMetrics::default(),
                }),
            }),
        }
    }

    /// Register a module's cleanup obligation
    ///
    /// Re-registering overwrites the options but keeps the cleanup count and
    /// registration time, and reactivates an unregistered descriptor.
    pub fn register_module(&self, module_id: &str, options: ModuleOptions) -> ModuleDescriptor {
        let timeout = options
            .cleanup_timeout
            .unwrap_or(self.inner.config.default_cleanup_timeout);
        let mut state = self.inner.state.lock();

        let descriptor = state
            .modules
            .entry(module_id.to_string())
            .and_modify(|d| {
                d.require_cleanup = options.require_cleanup;
                d.cleanup_timeout = timeout;
                d.critical = options.critical;
                d.status = DescriptorStatus::Active;
            })
            .or_insert_with(|| ModuleDescriptor {
                id: module_id.to_string(),
                require_cleanup: options.require_cleanup,
                cleanup_timeout: timeout,
                critical: options.critical,
                registered_at: now_ms(),
                cleanup_count: 0,
                last_cleanup_at: None,
                last_outcome: None,
                status: DescriptorStatus::Active,
            });

        debug!(
            module_id,
            require_cleanup = descriptor.require_cleanup,
            timeout_ms = timeout.as_millis() as u64,
            "module registered"
        );
        descriptor.clone()
    }

    /// Mark a descriptor unregistered; it is kept for the final audit
    pub fn unregister_module(&self, module_id: &str) -> VerifierResult<()> {
        let mut state = self.inner.state.lock();
        match state.modules.get_mut(module_id) {
            Some(descriptor) => {
                descriptor.status = DescriptorStatus::Unregistered;
                debug!(module_id, "module unregistered");
                Ok(())
            }
            None => Err(VerifierError::NotRegistered(module_id.to_string())),
        }
    }

    /// Open a cleanup record for a registered module and arm its timeout
    pub fn start_cleanup(
        &self,
        module_id: &str,
        context: CleanupContext,
    ) -> VerifierResult<CleanupId> {
        let memory_before = self.inner.sampler.memory_usage().used_bytes;
        let mut state = self.inner.state.lock();

        let timeout = match state.modules.get(module_id) {
            Some(descriptor) => descriptor.cleanup_timeout,
            None => {
                warn!(module_id, "cleanup requested for unregistered module");
                return Err(VerifierError::NotRegistered(module_id.to_string()));
            }
        };

        let cleanup_id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let record = CleanupRecord {
            id: cleanup_id,
            module_id: module_id.to_string(),
            reason: context.reason,
            start_time: now_ms(),
            end_time: None,
            duration_ms: None,
            status: CleanupStatus::Running,
            memory_before,
            memory_after: None,
            memory_delta_bytes: None,
            stats: None,
            error: None,
        };

        // The timer blocks on this lock, so it cannot observe a missing entry
        let cancel = self.arm_timeout(cleanup_id, timeout);
        state.running.insert(
            cleanup_id,
            RunningCleanup {
                record,
                started: Instant::now(),
                cancel,
            },
        );

        debug!(
            module_id,
            cleanup_id,
            reason = ?context.reason,
            next_module = ?context.next_module,
            "cleanup started"
        );
        Ok(cleanup_id)
    }

    fn arm_timeout(&self, cleanup_id: CleanupId, timeout: Duration) -> Option<oneshot::Sender<()>> {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(cleanup_id, "no async runtime, cleanup timeout not armed");
                return None;
            }
        };

        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        let verifier: Weak<VerifierInner> = Arc::downgrade(&self.inner);

        handle.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    if let Some(inner) = verifier.upgrade() {
                        let verifier = CleanupVerifier { inner };
                        if let Err(e) = verifier.timeout_cleanup(cleanup_id) {
                            debug!(cleanup_id, error = %e, "timeout timer lost the race");
                        }
                    }
                }
                // Sender dropped: the cleanup was finalized first
                _ = cancel_rx => {}
            }
        });

        Some(cancel_tx)
    }

    /// Finalize a record; the first caller wins
    fn finalize(
        &self,
        cleanup_id: CleanupId,
        status: CleanupStatus,
        stats: Option<CleanupStats>,
        error: Option<String>,
    ) -> VerifierResult<CleanupRecord> {
        let memory_after = self.inner.sampler.memory_usage().used_bytes;
        let mut state = self.inner.state.lock();

        let running = match state.running.remove(&cleanup_id) {
            Some(running) => running,
            None => {
                let previous = state
                    .history
                    .iter()
                    .find(|record| record.id == cleanup_id)
                    .map(|record| record.status);
                return Err(match previous {
                    Some(previous) => VerifierError::AlreadyFinalized {
                        cleanup_id,
                        status: previous.to_string(),
                    },
                    None => VerifierError::UnknownCleanup(cleanup_id),
                });
            }
        };

        let RunningCleanup {
            mut record,
            started,
            cancel,
        } = running;
        drop(cancel);

        let duration_ms = started.elapsed().as_millis() as u64;
        record.end_time = Some(now_ms());
        record.duration_ms = Some(duration_ms);
        record.status = status;
        record.memory_after = Some(memory_after);
        record.memory_delta_bytes = Some(memory_after as i64 - record.memory_before as i64);
        record.stats = stats;
        record.error = error;

        match status {
            CleanupStatus::Completed => state.metrics.record_success(duration_ms),
            CleanupStatus::Failed => state.metrics.record_failure(),
            CleanupStatus::Timeout => state.metrics.record_timeout(),
            CleanupStatus::Running => {}
        }

        if let Some(descriptor) = state.modules.get_mut(&record.module_id) {
            descriptor.cleanup_count += 1;
            descriptor.last_cleanup_at = record.end_time;
            descriptor.last_outcome = Some(status);
        }

        state.history.push_overwrite(record.clone());
        Ok(record)
    }

    /// Record a cleanup that completed in time, then validate it
    pub fn finish_cleanup(
        &self,
        cleanup_id: CleanupId,
        stats: CleanupStats,
    ) -> VerifierResult<CleanupRecord> {
        let record = self
            .finalize(cleanup_id, CleanupStatus::Completed, Some(stats), None)
            .map_err(|e| {
                warn!(cleanup_id, error = %e, "late cleanup completion ignored");
                e
            })?;

        info!(
            module_id = %record.module_id,
            cleanup_id,
            duration_ms = record.duration_ms.unwrap_or(0),
            memory_delta_bytes = record.memory_delta_bytes.unwrap_or(0),
            released = stats.resources_released(),
            "cleanup completed"
        );

        self.validate(&record);
        Ok(record)
    }

    /// Record a cleanup whose module operation returned an error
    pub fn fail_cleanup(
        &self,
        cleanup_id: CleanupId,
        error: impl Into<String>,
    ) -> VerifierResult<CleanupRecord> {
        let error = error.into();
        let record = self
            .finalize(cleanup_id, CleanupStatus::Failed, None, Some(error.clone()))
            .map_err(|e| {
                warn!(cleanup_id, error = %e, "late cleanup failure ignored");
                e
            })?;

        warn!(module_id = %record.module_id, cleanup_id, error = %error, "cleanup failed");
        Ok(record)
    }

    /// Record a cleanup that did not settle within its timeout
    pub fn timeout_cleanup(&self, cleanup_id: CleanupId) -> VerifierResult<CleanupRecord> {
        let record = self.finalize(
            cleanup_id,
            CleanupStatus::Timeout,
            None,
            Some("cleanup did not settle within its timeout".to_string()),
        )?;

        warn!(
            module_id = %record.module_id,
            cleanup_id,
            duration_ms = record.duration_ms.unwrap_or(0),
            "cleanup timed out"
        );
        self.inner.bus.emit(SupervisorEvent::Timeout(record.clone()));
        Ok(record)
    }

    /// Check a completed record against the leak threshold and the module's timeout
    ///
    /// Diagnostic only: emits an `issues` event when something is off and
    /// never changes the record.
    pub fn validate(&self, record: &CleanupRecord) -> Vec<CleanupIssue> {
        let timeout = self
            .cleanup_timeout(&record.module_id)
            .unwrap_or(self.inner.config.default_cleanup_timeout);
        let threshold = self.inner.config.leak_threshold_bytes;
        let mut issues = Vec::new();

        if let Some(delta) = record.memory_delta_bytes {
            if delta >= threshold as i64 {
                issues.push(CleanupIssue::MemoryRetained {
                    delta_bytes: delta,
                    threshold_bytes: threshold,
                });
            }
        }

        if let Some(duration_ms) = record.duration_ms {
            let timeout_ms = timeout.as_millis() as u64;
            if duration_ms > timeout_ms {
                issues.push(CleanupIssue::SlowCleanup {
                    duration_ms,
                    timeout_ms,
                });
            }
        }

        if !issues.is_empty() {
            warn!(
                module_id = %record.module_id,
                cleanup_id = record.id,
                issues = issues.len(),
                "cleanup validation found issues"
            );
            self.inner.bus.emit(SupervisorEvent::Issues(IssueReport {
                record: record.clone(),
                issues: issues.clone(),
            }));
        }
        issues
    }

    /// Audit at application teardown and emit the `final` event
    pub fn final_report(&self) -> FinalReport {
        let report = {
            let state = self.inner.state.lock();
            let mut findings: Vec<AuditFinding> = state
                .modules
                .values()
                .filter(|d| d.require_cleanup && d.cleanup_count == 0)
                .map(|d| AuditFinding::UncleanedModule {
                    module_id: d.id.clone(),
                    critical: d.critical,
                })
                .collect();

            let mut running: Vec<CleanupRecord> =
                state.running.values().map(|r| r.record.clone()).collect();
            if !running.is_empty() {
                running.sort_by_key(|r| r.id);
                findings.push(AuditFinding::ActiveCleanups { cleanups: running });
            }

            FinalReport {
                generated_at: now_ms(),
                findings,
                metrics: state.metrics.clone(),
                registered_modules: state.modules.len(),
            }
        };

        if report.is_clean() {
            info!(
                modules = report.registered_modules,
                cleanups = report.metrics.total_cleanups,
                "final cleanup audit clean"
            );
        } else {
            warn!(
                modules = report.registered_modules,
                findings = report.findings.len(),
                uncleaned = ?report.uncleaned_modules(),
                "final cleanup audit found problems"
            );
        }

        self.inner.bus.emit(SupervisorEvent::Final(report.clone()));
        report
    }

    /// Modules that owe a cleanup and never had one
    pub fn uncleaned_modules(&self) -> Vec<ModuleId> {
        self.inner
            .state
            .lock()
            .modules
            .values()
            .filter(|d| d.require_cleanup && d.cleanup_count == 0)
            .map(|d| d.id.clone())
            .collect()
    }

    pub fn descriptor(&self, module_id: &str) -> Option<ModuleDescriptor> {
        self.inner.state.lock().modules.get(module_id).cloned()
    }

    pub fn is_registered(&self, module_id: &str) -> bool {
        self.inner.state.lock().modules.contains_key(module_id)
    }

    /// Timeout registered for a module
    pub fn cleanup_timeout(&self, module_id: &str) -> Option<Duration> {
        self.inner
            .state
            .lock()
            .modules
            .get(module_id)
            .map(|d| d.cleanup_timeout)
    }

    /// Cleanups not finalized yet, oldest first
    pub fn running_cleanups(&self) -> Vec<CleanupRecord> {
        let state = self.inner.state.lock();
        let mut running: Vec<CleanupRecord> =
            state.running.values().map(|r| r.record.clone()).collect();
        running.sort_by_key(|r| r.id);
        running
    }

    /// Finalized records, oldest first
    pub fn history(&self) -> Vec<CleanupRecord> {
        self.inner.state.lock().history.iter().cloned().collect()
    }

    /// Finalized records for one module, oldest first
    pub fn history_for(&self, module_id: &str) -> Vec<CleanupRecord> {
        self.inner
            .state
            .lock()
            .history
            .iter()
            .filter(|r| r.module_id == module_id)
            .cloned()
            .collect()
    }

    /// Look up a finalized record
    pub fn record(&self, cleanup_id: CleanupId) -> Option<CleanupRecord> {
        let state = self.inner.state.lock();
        state
            .running
            .get(&cleanup_id)
            .map(|r| r.record.clone())
            .or_else(|| state.history.iter().find(|r| r.id == cleanup_id).cloned())
    }

    pub fn metrics(&self) -> PerformanceMetrics {
        self.inner.state.lock().metrics.clone()
    }

    /// Get verifier statistics
    pub fn stats(&self) -> VerifierStats {
        let state = self.inner.state.lock();
        let unregistered = state
            .modules
            .values()
            .filter(|d| d.status == DescriptorStatus::Unregistered)
            .count();

        VerifierStats {
            registered_modules: state.modules.len() - unregistered,
            unregistered_modules: unregistered,
            running_cleanups: state.running.len(),
            history_len: state.history.occupied_len(),
            metrics: state.metrics.clone(),
        }
    }

    pub fn sampler(&self) -> &ResourceSampler {
        &self.inner.sampler
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for CleanupVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("CleanupVerifier")
            .field("registered_modules", &stats.registered_modules)
            .field("running_cleanups", &stats.running_cleanups)
            .finish()
    }
}
