/*!
 * Cleanup Verifier Tests
 * Registration, record finalization races, validation, and the final audit
 */

use crate::support::{EventLog, Harness};
use modvisor::core::limits::MIB;
use modvisor::core::{CleanupContext, CleanupReason, CleanupStats, VerifierConfig, VerifierError};
use modvisor::lifecycle::{AuditFinding, CleanupIssue, CleanupStatus, ModuleOptions};
use modvisor::monitoring::{EventKind, SupervisorEvent};
use pretty_assertions::assert_eq;
use std::time::Duration;

#[test]
fn test_final_audit_reports_uncleaned_module() {
    let harness = Harness::new();
    let log = EventLog::attach(&harness.bus);
    harness.verifier.register_module("X", ModuleOptions::default());

    let report = harness.verifier.final_report();

    assert_eq!(
        report.findings,
        vec![AuditFinding::UncleanedModule {
            module_id: "X".into(),
            critical: false,
        }]
    );
    assert_eq!(report.uncleaned_modules(), vec!["X"]);
    assert_eq!(report.registered_modules, 1);
    assert_eq!(log.kinds(), vec![EventKind::Final]);
}

#[test]
fn test_optional_modules_are_not_findings() {
    let harness = Harness::new();
    harness
        .verifier
        .register_module("help", ModuleOptions::default().optional());

    assert!(harness.verifier.final_report().is_clean());
}

#[tokio::test(start_paused = true)]
async fn test_completed_cleanup_record() {
    let harness = Harness::new();
    harness.probe.set_used(40 * MIB);
    harness.verifier.register_module("calendar", ModuleOptions::default());

    let id = harness
        .verifier
        .start_cleanup("calendar", CleanupContext::switch_to("cities"))
        .unwrap();
    assert_eq!(harness.verifier.running_cleanups().len(), 1);

    tokio::time::sleep(Duration::from_millis(30)).await;
    harness.probe.set_used(38 * MIB);
    let stats = CleanupStats {
        listeners_released: 2,
        timers_released: 1,
        errors_encountered: 0,
    };
    let record = harness.verifier.finish_cleanup(id, stats).unwrap();

    assert_eq!(record.status, CleanupStatus::Completed);
    assert_eq!(record.reason, CleanupReason::Switch);
    assert_eq!(record.duration_ms, Some(30));
    assert_eq!(record.memory_before, 40 * MIB);
    assert_eq!(record.memory_after, Some(38 * MIB));
    assert_eq!(record.memory_delta_bytes, Some(-2 * MIB as i64));
    assert_eq!(record.stats, Some(stats));

    let descriptor = harness.verifier.descriptor("calendar").unwrap();
    assert_eq!(descriptor.cleanup_count, 1);
    assert_eq!(descriptor.last_outcome, Some(CleanupStatus::Completed));
    assert!(descriptor.last_cleanup_at.is_some());

    let metrics = harness.verifier.metrics();
    assert_eq!(metrics.successful_cleanups, 1);
    assert_eq!(metrics.longest_duration_ms, 30);
    assert!(harness.verifier.running_cleanups().is_empty());
    assert!(harness.verifier.final_report().is_clean());
}

#[tokio::test(start_paused = true)]
async fn test_timer_finalizes_hung_cleanup() {
    let harness = Harness::new();
    let log = EventLog::attach(&harness.bus);
    harness.verifier.register_module(
        "search",
        ModuleOptions::default().with_timeout(Duration::from_millis(100)),
    );

    let id = harness
        .verifier
        .start_cleanup("search", CleanupContext::manual())
        .unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;

    let record = harness.verifier.record(id).unwrap();
    assert_eq!(record.status, CleanupStatus::Timeout);
    assert_eq!(record.duration_ms, Some(100));
    assert_eq!(log.kinds(), vec![EventKind::Timeout]);

    // The late completion is refused and the record stays untouched
    let late = harness.verifier.finish_cleanup(id, CleanupStats::default());
    assert_eq!(
        late,
        Err(VerifierError::AlreadyFinalized {
            cleanup_id: id,
            status: "timeout".into(),
        })
    );
    assert_eq!(harness.verifier.record(id), Some(record));

    let metrics = harness.verifier.metrics();
    assert_eq!(metrics.total_cleanups, 1);
    assert_eq!(metrics.timed_out_cleanups, 1);
    assert_eq!(metrics.successful_cleanups, 0);
}

#[tokio::test(start_paused = true)]
async fn test_finishing_cancels_timer() {
    let harness = Harness::new();
    let log = EventLog::attach(&harness.bus);
    harness.verifier.register_module(
        "cities",
        ModuleOptions::default().with_timeout(Duration::from_millis(100)),
    );

    let id = harness
        .verifier
        .start_cleanup("cities", CleanupContext::manual())
        .unwrap();
    harness
        .verifier
        .finish_cleanup(id, CleanupStats::default())
        .unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(
        harness.verifier.record(id).unwrap().status,
        CleanupStatus::Completed
    );
    assert!(log.kinds().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_validation_flags_retained_memory() {
    let config = VerifierConfig::default().with_leak_threshold(5 * MIB);
    let harness = Harness::with_verifier_config(config);
    let log = EventLog::attach(&harness.bus);
    harness.probe.set_used(10 * MIB);
    harness.verifier.register_module("cities", ModuleOptions::default());

    let id = harness
        .verifier
        .start_cleanup("cities", CleanupContext::manual())
        .unwrap();
    harness.probe.set_used(20 * MIB);
    let record = harness
        .verifier
        .finish_cleanup(id, CleanupStats::default())
        .unwrap();

    // Issues never change the record
    assert_eq!(record.status, CleanupStatus::Completed);

    let events = log.events();
    assert_eq!(events.len(), 1);
    match &events[0] {
        SupervisorEvent::Issues(report) => {
            assert_eq!(report.record.id, id);
            assert_eq!(
                report.issues,
                vec![CleanupIssue::MemoryRetained {
                    delta_bytes: (10 * MIB) as i64,
                    threshold_bytes: 5 * MIB,
                }]
            );
        }
        other => panic!("expected issues, got {:?}", other.kind()),
    }
}

#[tokio::test(start_paused = true)]
async fn test_failed_cleanup_counts_as_attempt() {
    let harness = Harness::new();
    harness.verifier.register_module("calendar", ModuleOptions::default());

    let id = harness
        .verifier
        .start_cleanup("calendar", CleanupContext::shutdown())
        .unwrap();
    let record = harness
        .verifier
        .fail_cleanup(id, "listener already gone")
        .unwrap();

    assert_eq!(record.status, CleanupStatus::Failed);
    assert_eq!(record.error.as_deref(), Some("listener already gone"));
    assert_eq!(harness.verifier.history_for("calendar"), vec![record]);
    assert!(harness.verifier.uncleaned_modules().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_final_report_lists_running_cleanups() {
    let harness = Harness::new();
    harness.verifier.register_module("search", ModuleOptions::default());

    let id = harness
        .verifier
        .start_cleanup("search", CleanupContext::shutdown())
        .unwrap();
    let report = harness.verifier.final_report();

    match report.findings.as_slice() {
        [AuditFinding::UncleanedModule { module_id, .. }, AuditFinding::ActiveCleanups { cleanups }] =>
        {
            assert_eq!(module_id, "search");
            assert_eq!(cleanups.len(), 1);
            assert_eq!(cleanups[0].id, id);
            assert_eq!(cleanups[0].status, CleanupStatus::Running);
        }
        other => panic!("unexpected findings: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_history_is_bounded() {
    let config = VerifierConfig {
        history_limit: 3,
        ..VerifierConfig::default()
    };
    let harness = Harness::with_verifier_config(config);
    harness.verifier.register_module("cities", ModuleOptions::default());

    let mut ids = Vec::new();
    for _ in 0..5 {
        let id = harness
            .verifier
            .start_cleanup("cities", CleanupContext::manual())
            .unwrap();
        harness
            .verifier
            .finish_cleanup(id, CleanupStats::default())
            .unwrap();
        ids.push(id);
    }

    let kept: Vec<u64> = harness.verifier.history().iter().map(|r| r.id).collect();
    assert_eq!(kept, ids[2..].to_vec());
    assert_eq!(harness.verifier.descriptor("cities").unwrap().cleanup_count, 5);
    assert_eq!(harness.verifier.stats().history_len, 3);
}
