/*!
 * Resource Sampler Tests
 * Leak arithmetic, threshold precedence, ring buffer bounds, and cadence
 */

use modvisor::core::limits::MIB;
use modvisor::core::SamplerConfig;
use modvisor::monitoring::{
    EventBus, EventKind, ManualProbe, ResourceSampler, SamplerTask, SupervisorEvent,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

fn quiet_thresholds() -> SamplerConfig {
    SamplerConfig::default()
        .with_leak_threshold(10 * MIB)
        .with_thresholds(1024 * MIB, 2048 * MIB)
}

fn collect(bus: &EventBus) -> (modvisor::monitoring::Subscription, Arc<Mutex<Vec<SupervisorEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let subscription = bus.subscribe(move |event| sink.lock().push(event.clone()));
    (subscription, events)
}

#[test]
fn test_leak_signal_after_three_growth_steps() {
    let probe = ManualProbe::new(0);
    let bus = EventBus::new();
    let (_sub, events) = collect(&bus);
    let sampler = ResourceSampler::new(quiet_thresholds(), probe.clone(), bus.clone());

    for (i, used) in [10, 10, 25, 40, 55].into_iter().enumerate() {
        probe.set_used(used * MIB);
        sampler.sample_now();

        let leaks = events
            .lock()
            .iter()
            .filter(|e| e.kind() == EventKind::Leak)
            .count();
        let expected = if i == 4 { 1 } else { 0 };
        assert_eq!(leaks, expected, "after sample {}", i + 1);
    }

    let events = events.lock();
    assert_eq!(events.len(), 1);
    match &events[0] {
        SupervisorEvent::Leak(signal) => {
            assert_eq!(signal.growth_bytes, 15 * MIB);
            assert_eq!(signal.sample.used_bytes, 55 * MIB);
        }
        other => panic!("expected leak, got {:?}", other.kind()),
    }
    assert_eq!(sampler.suspicion(), 0);
    assert_eq!(sampler.stats().leak_signals, 1);
}

#[test]
fn test_critical_takes_precedence_over_warning() {
    let probe = ManualProbe::new(120 * MIB);
    let bus = EventBus::new();
    let (_sub, events) = collect(&bus);
    let config = SamplerConfig::default().with_thresholds(50 * MIB, 100 * MIB);
    let sampler = ResourceSampler::new(config, probe, bus.clone());

    sampler.sample_now();

    assert_eq!(bus.emitted(EventKind::Critical), 1);
    assert_eq!(bus.emitted(EventKind::Warning), 0);
    let events = events.lock();
    assert_eq!(events.len(), 1);
    match &events[0] {
        SupervisorEvent::Critical(signal) => {
            assert_eq!(signal.used_bytes, 120 * MIB);
            assert_eq!(signal.threshold_bytes, 100 * MIB);
        }
        other => panic!("expected critical, got {:?}", other.kind()),
    }
}

#[test]
fn test_warning_below_critical() {
    let probe = ManualProbe::new(60 * MIB);
    let bus = EventBus::new();
    let config = SamplerConfig::default().with_thresholds(50 * MIB, 100 * MIB);
    let sampler = ResourceSampler::new(config, probe, bus.clone());

    sampler.sample_now();
    sampler.sample_now();

    assert_eq!(bus.emitted(EventKind::Warning), 2);
    assert_eq!(bus.emitted(EventKind::Critical), 0);
    assert_eq!(sampler.stats().warning_signals, 2);
}

#[test]
fn test_retention_of_one_still_detects_growth() {
    let probe = ManualProbe::new(0);
    let bus = EventBus::new();
    let sampler = ResourceSampler::new(quiet_thresholds().with_retention(1), probe.clone(), bus.clone());

    for step in 0..4 {
        probe.set_used(step * 20 * MIB);
        sampler.sample_now();
    }

    assert_eq!(sampler.history().len(), 1);
    assert_eq!(bus.emitted(EventKind::Leak), 1);
}

proptest! {
    #[test]
    fn prop_ring_keeps_newest_retention_samples(retention in 1usize..32, extra in 0usize..32) {
        let probe = ManualProbe::new(0);
        let config = quiet_thresholds().with_retention(retention);
        let sampler = ResourceSampler::new(config, probe.clone(), EventBus::new());

        let total = retention + extra;
        for i in 0..total {
            probe.set_used(i as u64);
            sampler.sample_now();
        }

        let history = sampler.history();
        prop_assert_eq!(history.len(), retention);
        let used: Vec<u64> = history.iter().map(|s| s.used_bytes).collect();
        let expected: Vec<u64> = (extra..total).map(|i| i as u64).collect();
        prop_assert_eq!(used, expected);
    }
}

#[tokio::test(start_paused = true)]
async fn test_task_drives_leak_detection() {
    let probe = ManualProbe::new(0);
    let bus = EventBus::new();
    let config = quiet_thresholds().with_interval(Duration::from_secs(5));
    let sampler = ResourceSampler::new(config, probe.clone(), bus.clone());
    let task = SamplerTask::spawn(sampler.clone());

    for _ in 0..4 {
        probe.grow(12 * MIB);
        tokio::time::sleep(Duration::from_secs(5)).await;
        tokio::task::yield_now().await;
    }

    assert_eq!(sampler.stats().samples_taken, 4);
    assert_eq!(bus.emitted(EventKind::Leak), 1);

    task.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_task_interval_update() {
    let sampler = ResourceSampler::new(
        SamplerConfig::default().with_interval(Duration::from_secs(10)),
        ManualProbe::new(0),
        EventBus::new(),
    );
    let task = SamplerTask::spawn(sampler.clone());

    task.update_interval(Duration::from_secs(1));
    tokio::time::sleep(Duration::from_millis(3_500)).await;
    assert_eq!(sampler.stats().samples_taken, 3);

    task.shutdown().await;
}
