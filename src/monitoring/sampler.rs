/*!
 * Resource Sampler
 * Periodic memory snapshots, explicit resource accounting, and leak heuristics
 *
 * Strategy: every tick captures process memory plus the number of listeners
 * and timers modules have declared, appends it to a bounded ring buffer, then
 * runs two independent checks:
 *
 * - **Leak growth**: consecutive samples growing by at least the leak threshold
 *   raise a suspicion counter; at `LEAK_SUSPICION_LIMIT` a leak signal fires and
 *   the counter resets. A sub-threshold sample decays the counter by one.
 * - **Absolute thresholds**: critical takes precedence over warning, at most one
 *   of them per sample.
 *
 * Every operation is O(1) in the size of the application. The sampler only
 * emits events; it never touches controller or verifier state.
 */

use super::bus::EventBus;
use super::events::{LeakSignal, SupervisorEvent, ThresholdSignal};
use super::probe::{MemoryProbe, MemoryUsage};
use crate::core::config::SamplerConfig;
use crate::core::limits::LEAK_SUSPICION_LIMIT;
use crate::core::types::{now_ms, ResourceKind, Timestamp};
use ahash::HashSet;
use parking_lot::Mutex;
use ringbuf::{traits::*, HeapRb};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

/// One snapshot of memory usage and tracked resources
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSample {
    pub timestamp: Timestamp,
    pub used_bytes: u64,
    pub total_bytes: u64,
    pub limit_bytes: u64,
    pub tracked_listener_count: usize,
    pub tracked_timer_count: usize,
}

/// Memory growth across the retained history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrowthTrend {
    pub samples: usize,
    pub first_used_bytes: u64,
    pub last_used_bytes: u64,
    pub growth_bytes: i64,
    /// Growth over the window reached the leak threshold
    pub suspected: bool,
}

/// Sampler statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SamplerStats {
    pub samples_taken: u64,
    pub retained: usize,
    pub retention: usize,
    pub suspicion: u32,
    pub tracked_listeners: usize,
    pub tracked_timers: usize,
    pub leak_signals: u64,
    pub warning_signals: u64,
    pub critical_signals: u64,
    pub latest: Option<ResourceSample>,
}

struct SamplerState {
    history: HeapRb<ResourceSample>,
    latest: Option<ResourceSample>,
    suspicion: u32,
    samples_taken: u64,
    leak_signals: u64,
    warning_signals: u64,
    critical_signals: u64,
}

impl SamplerState {
    fn new(retention: usize) -> Self {
        Self {
            history: HeapRb::new(retention.max(1)),
            latest: None,
            suspicion: 0,
            samples_taken: 0,
            leak_signals: 0,
            warning_signals: 0,
            critical_signals: 0,
        }
    }

    /// Compare the two most recent samples and update the suspicion counter
    fn detect_leak(
        &mut self,
        previous: Option<&ResourceSample>,
        latest: &ResourceSample,
        threshold_bytes: u64,
    ) -> Option<LeakSignal> {
        let previous = previous?;
        let growth = latest.used_bytes.saturating_sub(previous.used_bytes);

        // Only a strict increase counts; a flat sample decays even at threshold 0
        if latest.used_bytes > previous.used_bytes && growth >= threshold_bytes {
            self.suspicion += 1;
            trace!(growth_bytes = growth, suspicion = self.suspicion, "suspicious growth");

            if self.suspicion >= LEAK_SUSPICION_LIMIT {
                self.suspicion = 0;
                self.leak_signals += 1;
                return Some(LeakSignal {
                    timestamp: latest.timestamp,
                    growth_bytes: growth,
                    sample: latest.clone(),
                });
            }
        } else {
            // Decay, not reset
            self.suspicion = self.suspicion.saturating_sub(1);
        }
        None
    }

    /// Critical and warning are mutually exclusive, critical wins
    fn check_thresholds(
        &mut self,
        sample: &ResourceSample,
        config: &SamplerConfig,
    ) -> Option<SupervisorEvent> {
        if sample.used_bytes >= config.critical_threshold_bytes {
            self.critical_signals += 1;
            Some(SupervisorEvent::Critical(ThresholdSignal {
                timestamp: sample.timestamp,
                used_bytes: sample.used_bytes,
                threshold_bytes: config.critical_threshold_bytes,
                sample: sample.clone(),
            }))
        } else if sample.used_bytes >= config.warning_threshold_bytes {
            self.warning_signals += 1;
            Some(SupervisorEvent::Warning(ThresholdSignal {
                timestamp: sample.timestamp,
                used_bytes: sample.used_bytes,
                threshold_bytes: config.warning_threshold_bytes,
                sample: sample.clone(),
            }))
        } else {
            None
        }
    }
}

#[derive(Default)]
struct Tracked {
    listeners: HashSet<String>,
    timers: HashSet<String>,
}

impl Tracked {
    fn set_mut(&mut self, kind: ResourceKind) -> &mut HashSet<String> {
        match kind {
            ResourceKind::Listener => &mut self.listeners,
            ResourceKind::Timer => &mut self.timers,
        }
    }

    fn set(&self, kind: ResourceKind) -> &HashSet<String> {
        match kind {
            ResourceKind::Listener => &self.listeners,
            ResourceKind::Timer => &self.timers,
        }
    }
}

struct SamplerInner {
    config: SamplerConfig,
    probe: Box<dyn MemoryProbe>,
    state: Mutex<SamplerState>,
    tracked: Mutex<Tracked>,
    bus: EventBus,
}

/// Resource sampler handle
///
/// Cloning is cheap and every clone observes the same history and counters.
/// Construct one per application and inject it where resources are created.
#[derive(Clone)]
pub struct ResourceSampler {
    inner: Arc<SamplerInner>,
}

impl ResourceSampler {
    /// Create a sampler reading from `probe` and emitting on `bus`
    pub fn new<P: MemoryProbe + 'static>(config: SamplerConfig, probe: P, bus: EventBus) -> Self {
        if config.retention == 0 {
            warn!("Sampler retention of 0 requested, keeping 1 sample");
        }
        debug!(
            probe = probe.name(),
            retention = config.retention,
            interval_ms = config.interval.as_millis() as u64,
            "resource sampler created"
        );

        Self {
            inner: Arc::new(SamplerInner {
                state: Mutex::new(SamplerState::new(config.retention)),
                config,
                probe: Box::new(probe),
                tracked: Mutex::new(Tracked::default()),
                bus,
            }),
        }
    }

    /// Register a listener or timer created by any component
    ///
    /// Returns false if the id was already tracked.
    pub fn track_resource(&self, kind: ResourceKind, id: impl Into<String>) -> bool {
        let id = id.into();
        let inserted = self.inner.tracked.lock().set_mut(kind).insert(id.clone());
        if !inserted {
            debug!(kind = %kind, id = %id, "resource already tracked");
        }
        inserted
    }

    /// Remove a listener or timer from accounting
    ///
    /// Returns false if the id was not tracked.
    pub fn untrack_resource(&self, kind: ResourceKind, id: &str) -> bool {
        let removed = self.inner.tracked.lock().set_mut(kind).remove(id);
        if !removed {
            debug!(kind = %kind, id = %id, "untrack of unknown resource");
        }
        removed
    }

    /// Whether a resource id is currently tracked
    pub fn is_tracked(&self, kind: ResourceKind, id: &str) -> bool {
        self.inner.tracked.lock().set(kind).contains(id)
    }

    /// Number of tracked resources of one kind
    pub fn tracked_count(&self, kind: ResourceKind) -> usize {
        self.inner.tracked.lock().set(kind).len()
    }

    /// Read memory usage without recording a sample
    #[inline]
    pub fn memory_usage(&self) -> MemoryUsage {
        self.inner.probe.read()
    }

    /// Capture a sample, store it, and run the leak and threshold checks
    pub fn sample_now(&self) -> ResourceSample {
        let usage = self.inner.probe.read();
        let (listeners, timers) = {
            let tracked = self.inner.tracked.lock();
            (tracked.listeners.len(), tracked.timers.len())
        };

        let sample = ResourceSample {
            timestamp: now_ms(),
            used_bytes: usage.used_bytes,
            total_bytes: usage.total_bytes,
            limit_bytes: usage.limit_bytes,
            tracked_listener_count: listeners,
            tracked_timer_count: timers,
        };

        let config = &self.inner.config;
        let (leak, threshold) = {
            let mut state = self.inner.state.lock();
            state.samples_taken += 1;
            state.history.push_overwrite(sample.clone());
            let previous = state.latest.replace(sample.clone());

            let leak = state.detect_leak(previous.as_ref(), &sample, config.leak_threshold_bytes);
            let threshold = state.check_thresholds(&sample, config);
            (leak, threshold)
        };

        trace!(
            used_bytes = sample.used_bytes,
            listeners = listeners,
            timers = timers,
            "resource sample"
        );

        // Emit outside the lock so listeners may query the sampler
        if let Some(signal) = leak {
            warn!(
                growth_bytes = signal.growth_bytes,
                used_bytes = signal.sample.used_bytes,
                "possible memory leak detected"
            );
            self.inner.bus.emit(SupervisorEvent::Leak(signal));
        }
        if let Some(event) = threshold {
            match &event {
                SupervisorEvent::Critical(signal) => error!(
                    used_bytes = signal.used_bytes,
                    threshold_bytes = signal.threshold_bytes,
                    "memory usage critical"
                ),
                SupervisorEvent::Warning(signal) => warn!(
                    used_bytes = signal.used_bytes,
                    threshold_bytes = signal.threshold_bytes,
                    "memory usage high"
                ),
                _ => {}
            }
            self.inner.bus.emit(event);
        }

        sample
    }

    /// Retained samples, oldest first
    pub fn history(&self) -> Vec<ResourceSample> {
        self.inner.state.lock().history.iter().cloned().collect()
    }

    /// Most recent sample
    pub fn latest(&self) -> Option<ResourceSample> {
        self.inner.state.lock().latest.clone()
    }

    /// Current leak suspicion counter
    pub fn suspicion(&self) -> u32 {
        self.inner.state.lock().suspicion
    }

    /// Growth from the oldest to the newest retained sample
    pub fn growth_trend(&self) -> Option<GrowthTrend> {
        let state = self.inner.state.lock();
        let first = state.history.iter().next()?;
        let last = state.latest.as_ref()?;
        let growth = last.used_bytes as i64 - first.used_bytes as i64;

        Some(GrowthTrend {
            samples: state.history.occupied_len(),
            first_used_bytes: first.used_bytes,
            last_used_bytes: last.used_bytes,
            growth_bytes: growth,
            suspected: growth >= self.inner.config.leak_threshold_bytes as i64,
        })
    }

    /// Get sampler statistics
    pub fn stats(&self) -> SamplerStats {
        let (listeners, timers) = {
            let tracked = self.inner.tracked.lock();
            (tracked.listeners.len(), tracked.timers.len())
        };
        let state = self.inner.state.lock();

        SamplerStats {
            samples_taken: state.samples_taken,
            retained: state.history.occupied_len(),
            retention: self.inner.config.retention.max(1),
            suspicion: state.suspicion,
            tracked_listeners: listeners,
            tracked_timers: timers,
            leak_signals: state.leak_signals,
            warning_signals: state.warning_signals,
            critical_signals: state.critical_signals,
            latest: state.latest.clone(),
        }
    }

    /// Clear history and the suspicion counter, tracked resources are kept
    pub fn reset(&self) {
        let mut state = self.inner.state.lock();
        state.history.clear();
        state.latest = None;
        state.suspicion = 0;
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.inner.config
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }
}

impl std::fmt::Debug for ResourceSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceSampler")
            .field("probe", &self.inner.probe.name())
            .field("retention", &self.inner.config.retention)
            .finish()
    }
}
