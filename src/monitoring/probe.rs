/*!
 * Memory Probes
 * Sources of process memory usage for the resource sampler
 *
 * A probe read must be cheap and non-blocking: it runs on every sampler tick
 * and at the start and end of every cleanup.
 */

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use sysinfo::{
    MemoryRefreshKind, Pid, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System,
};
use tracing::warn;

/// Point-in-time memory usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryUsage {
    pub used_bytes: u64,
    pub total_bytes: u64,
    pub limit_bytes: u64,
}

/// Source of memory usage readings
pub trait MemoryProbe: Send + Sync {
    fn read(&self) -> MemoryUsage;

    /// Probe name for logging
    fn name(&self) -> &'static str;
}

/// Reads the current process's memory through sysinfo
///
/// `used` is resident memory, `total` is virtual memory, `limit` is system
/// memory (read once at construction). Each read refreshes only this pid.
#[derive(Clone)]
pub struct ProcessProbe {
    pid: Option<Pid>,
    system: Arc<Mutex<System>>,
    limit_bytes: u64,
}

impl ProcessProbe {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!(error = e, "current pid unavailable, process readings will be zero");
                None
            }
        };
        let system = System::new_with_specifics(
            RefreshKind::nothing().with_memory(MemoryRefreshKind::nothing().with_ram()),
        );

        Self {
            pid,
            limit_bytes: system.total_memory(),
            system: Arc::new(Mutex::new(system)),
        }
    }
}

impl Default for ProcessProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for ProcessProbe {
    fn read(&self) -> MemoryUsage {
        let (used_bytes, total_bytes) = match self.pid {
            Some(pid) => {
                let mut system = self.system.lock();
                system.refresh_processes_specifics(
                    ProcessesToUpdate::Some(&[pid]),
                    false,
                    ProcessRefreshKind::nothing().with_memory(),
                );
                system
                    .process(pid)
                    .map(|process| (process.memory(), process.virtual_memory()))
                    .unwrap_or((0, 0))
            }
            None => (0, 0),
        };

        MemoryUsage {
            used_bytes,
            total_bytes,
            limit_bytes: self.limit_bytes,
        }
    }

    fn name(&self) -> &'static str {
        "process"
    }
}

impl std::fmt::Debug for ProcessProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessProbe")
            .field("pid", &self.pid)
            .field("limit_bytes", &self.limit_bytes)
            .finish()
    }
}

/// Probe whose readings are set by the host
///
/// Cloning yields another handle to the same readings, so a host can keep one
/// handle and give the other to the sampler. Total and limit always read as
/// zero.
#[derive(Debug, Clone, Default)]
pub struct ManualProbe {
    used: Arc<AtomicU64>,
}

impl ManualProbe {
    pub fn new(used_bytes: u64) -> Self {
        let probe = Self::default();
        probe.set_used(used_bytes);
        probe
    }

    pub fn set_used(&self, bytes: u64) {
        self.used.store(bytes, Ordering::SeqCst);
    }

    /// Add to the current used reading
    pub fn grow(&self, bytes: u64) {
        self.used.fetch_add(bytes, Ordering::SeqCst);
    }
}

impl MemoryProbe for ManualProbe {
    fn read(&self) -> MemoryUsage {
        MemoryUsage {
            used_bytes: self.used.load(Ordering::SeqCst),
            ..MemoryUsage::default()
        }
    }

    fn name(&self) -> &'static str {
        "manual"
    }
}
