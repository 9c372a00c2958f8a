/*!
 * Module Controller Tests
 * Switching, cleanup coverage, forced scavenging, and fallbacks
 */

use crate::support::{CleanupBehavior, EventLog, Harness, MockModule};
use modvisor::core::{CleanupStats, LifecycleError, ResourceKind, VerifierError};
use modvisor::lifecycle::{
    CleanupStatus, Container, DeactivationOutcome, Module, ModuleController, ModuleOptions,
    ModuleState, SwitchOutcome,
};
use modvisor::monitoring::EventKind;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_switch_is_idempotent() {
    let harness = Harness::new();
    let cities = Arc::new(harness.module("cities"));
    let controller = harness.controller(vec![cities.clone()]);

    assert_eq!(controller.switch_to("cities").await, SwitchOutcome::Activated);
    assert_eq!(controller.switch_to("cities").await, SwitchOutcome::AlreadyActive);

    assert_eq!(cities.render_count(), 1);
    assert_eq!(cities.cleanup_count(), 0);
    assert_eq!(controller.get_stats().switches, 1);
    assert_eq!(controller.current_module_id().as_deref(), Some("cities"));
    assert_eq!(controller.module_state("cities"), ModuleState::Active);
}

#[tokio::test(start_paused = true)]
async fn test_every_replaced_module_is_cleaned() {
    let harness = Harness::new();
    let modules: Vec<Arc<MockModule>> = ["cities", "calendar", "search"]
        .iter()
        .map(|id| Arc::new(harness.module(id)))
        .collect();
    let controller = harness.controller(modules.clone());

    for id in ["cities", "calendar", "search", "cities"] {
        assert!(controller.switch_to(id).await.is_activated());
    }

    for id in ["calendar", "search"] {
        let descriptor = harness.verifier.descriptor(id).unwrap();
        assert!(descriptor.cleanup_count >= 1, "{id} never cleaned");
    }
    assert_eq!(harness.verifier.descriptor("cities").unwrap().cleanup_count, 1);

    // Cached modules are rendered again but resolved only once
    assert_eq!(modules[0].render_count(), 2);
    assert_eq!(controller.get_stats().cached_modules, 3);

    // Only the active module holds tracked resources
    assert_eq!(harness.sampler.tracked_count(ResourceKind::Timer), 1);
    assert!(harness.sampler.is_tracked(ResourceKind::Listener, "cities:click"));
}

#[tokio::test(start_paused = true)]
async fn test_hung_cleanup_is_forced() {
    let harness = Harness::new();
    let log = EventLog::attach(&harness.bus);
    let search = Arc::new(
        harness
            .module("search")
            .with_options(ModuleOptions::default().with_timeout(Duration::from_millis(100)))
            .with_cleanup(CleanupBehavior::Hang),
    );
    let cities = Arc::new(harness.module("cities"));
    let controller = harness.controller(vec![search.clone(), cities.clone()]);

    controller.switch_to("search").await;
    assert!(search.resources().has_resources());

    let outcome = controller.switch_to("cities").await;
    assert_eq!(outcome, SwitchOutcome::Activated);

    let history = harness.verifier.history_for("search");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, CleanupStatus::Timeout);

    assert!(!search.resources().has_resources());
    assert!(search.resources().container().is_none());
    assert!(!harness.sampler.is_tracked(ResourceKind::Timer, "search:poll"));
    assert_eq!(controller.container().owner().as_deref(), Some("cities"));
    assert_eq!(controller.get_stats().forced_cleanups, 1);
    assert_eq!(
        log.kinds().iter().filter(|k| **k == EventKind::Timeout).count(),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_late_cleanup_loses_to_timeout() {
    let harness = Harness::new();
    let log = EventLog::attach(&harness.bus);
    let search = Arc::new(
        harness
            .module("search")
            .with_options(ModuleOptions::default().with_timeout(Duration::from_millis(100)))
            .with_cleanup(CleanupBehavior::Delay(Duration::from_millis(150))),
    );
    let cities = Arc::new(harness.module("cities"));
    let controller = harness.controller(vec![search.clone(), cities]);

    controller.switch_to("search").await;
    assert_eq!(controller.switch_to("cities").await, SwitchOutcome::Activated);

    let history = harness.verifier.history_for("search");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, CleanupStatus::Timeout);
    assert_eq!(history[0].duration_ms, Some(100));

    // A completion reported after the deadline is refused
    let late = harness
        .verifier
        .finish_cleanup(history[0].id, CleanupStats::default());
    assert!(matches!(late, Err(VerifierError::AlreadyFinalized { .. })));

    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(harness.verifier.history_for("search"), history);
    assert_eq!(search.cleanup_count(), 1);
    assert_eq!(harness.verifier.descriptor("search").unwrap().cleanup_count, 1);

    let metrics = harness.verifier.metrics();
    assert_eq!(metrics.total_cleanups, 1);
    assert_eq!(metrics.timed_out_cleanups, 1);
    assert_eq!(metrics.successful_cleanups, 0);
    assert_eq!(
        log.kinds().iter().filter(|k| **k == EventKind::Timeout).count(),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_cleanup_does_not_block_next_module() {
    let harness = Harness::new();
    let calendar = Arc::new(harness.module("calendar").with_cleanup(CleanupBehavior::Fail));
    let cities = Arc::new(harness.module("cities"));
    let controller = harness.controller(vec![calendar.clone(), cities]);

    controller.switch_to("calendar").await;
    assert_eq!(controller.switch_to("cities").await, SwitchOutcome::Activated);

    let history = harness.verifier.history_for("calendar");
    let record = &history[0];
    assert_eq!(record.status, CleanupStatus::Failed);
    assert!(record.error.as_deref().unwrap().contains("listener already gone"));
    assert!(!calendar.resources().has_resources());
    assert_eq!(controller.module_state("calendar"), ModuleState::Inactive);
}

#[tokio::test(start_paused = true)]
async fn test_forgotten_resources_are_scavenged() {
    let harness = Harness::new();
    let cities = Arc::new(harness.module("cities").with_cleanup(CleanupBehavior::Forget));
    let controller = harness.controller(vec![cities.clone()]);

    controller.switch_to("cities").await;
    assert_eq!(
        controller.cleanup_current().await,
        Some(DeactivationOutcome::Completed)
    );

    assert!(!cities.resources().has_resources());
    assert_eq!(harness.sampler.tracked_count(ResourceKind::Listener), 0);
    assert_eq!(controller.cleanup_current().await, None);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_module_falls_back() {
    let harness = Harness::new();
    let controller = harness.controller(vec![]);

    let outcome = controller.switch_to("hotels").await;
    match outcome {
        SwitchOutcome::Fallback(LifecycleError::LoadFailed { module_id, .. }) => {
            assert_eq!(module_id, "hotels");
        }
        other => panic!("expected load failure, got {other:?}"),
    }

    assert!(controller.current_module_id().is_none());
    assert!(!controller.is_cached("hotels"));
    assert!(controller.container().content()[0].contains("hotels"));
    assert_eq!(controller.get_stats().fallbacks, 1);
}

#[tokio::test(start_paused = true)]
async fn test_render_failure_scavenges_and_falls_back() {
    let harness = Harness::new();
    let broken = Arc::new(harness.module("broken").failing_render());
    let cities = Arc::new(harness.module("cities"));
    let controller = harness.controller(vec![cities, broken.clone()]);

    controller.switch_to("cities").await;
    let outcome = controller.switch_to("broken").await;

    assert!(matches!(
        outcome,
        SwitchOutcome::Fallback(LifecycleError::RenderFailed { .. })
    ));
    assert!(!broken.resources().has_resources());
    assert!(controller.container().owner().is_none());
    assert_eq!(controller.module_state("broken"), ModuleState::Inactive);
    assert_eq!(controller.module_state("cities"), ModuleState::Inactive);

    // The previous module was still cleaned before the failed activation
    assert_eq!(harness.verifier.descriptor("cities").unwrap().cleanup_count, 1);

    // A later switch recovers normally
    assert_eq!(controller.switch_to("cities").await, SwitchOutcome::Activated);
}

#[tokio::test(start_paused = true)]
async fn test_bind_failure_falls_back() {
    let harness = Harness::new();
    let module = Arc::new(harness.module("calendar").failing_bind());
    let controller = harness.controller(vec![module.clone()]);

    let outcome = controller.switch_to("calendar").await;

    assert!(matches!(
        outcome,
        SwitchOutcome::Fallback(LifecycleError::BindFailed { .. })
    ));
    assert!(!module.resources().has_resources());
    assert!(controller.current_module_id().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_refresh_keeps_module_active() {
    let harness = Harness::new();
    let cities = Arc::new(harness.module("cities"));
    let flaky = Arc::new(harness.module("flaky").failing_refresh());
    let controller = harness.controller(vec![cities.clone(), flaky]);

    // Nothing active yet
    controller.refresh().await.unwrap();

    controller.switch_to("cities").await;
    controller.refresh().await.unwrap();
    assert_eq!(cities.refresh_count(), 1);
    assert_eq!(cities.cleanup_count(), 0);
    assert!(harness.verifier.history().is_empty());

    controller.switch_to("flaky").await;
    let err = controller.refresh().await.unwrap_err();
    assert!(matches!(err, LifecycleError::RefreshFailed { .. }));
    assert_eq!(controller.current_module_id().as_deref(), Some("flaky"));
}

#[tokio::test(start_paused = true)]
async fn test_hung_refresh_is_bounded() {
    let harness = Harness::new();
    let feed = Arc::new(
        harness
            .module("feed")
            .with_options(ModuleOptions::default().with_timeout(Duration::from_millis(100)))
            .hanging_refresh(),
    );
    let cities = Arc::new(harness.module("cities"));
    let controller = harness.controller(vec![feed, cities]);

    controller.switch_to("feed").await;
    match controller.refresh().await {
        Err(LifecycleError::RefreshFailed { module_id, reason }) => {
            assert_eq!(module_id, "feed");
            assert!(reason.contains("timed out"), "{reason}");
        }
        other => panic!("expected refresh timeout, got {other:?}"),
    }

    // The switch lock was given back
    assert_eq!(controller.switch_to("cities").await, SwitchOutcome::Activated);
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_switch_still_settles() {
    let harness = Harness::new();
    let slow = Arc::new(
        harness
            .module("slow")
            .with_cleanup(CleanupBehavior::Delay(Duration::from_millis(500))),
    );
    let cities = Arc::new(harness.module("cities"));
    let controller = harness.controller(vec![slow.clone(), cities.clone()]);

    controller.switch_to("slow").await;

    let abandoned =
        tokio::time::timeout(Duration::from_millis(50), controller.switch_to("cities")).await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(controller.module_state("slow"), ModuleState::Inactive);
    assert_eq!(controller.module_state("cities"), ModuleState::Active);
    assert_eq!(controller.current_module_id().as_deref(), Some("cities"));
    assert_eq!(controller.container().owner().as_deref(), Some("cities"));
    assert!(!slow.resources().has_resources());
    assert_eq!(
        harness.verifier.history_for("slow")[0].status,
        CleanupStatus::Completed
    );

    // Switching back works normally
    assert_eq!(controller.switch_to("slow").await, SwitchOutcome::Activated);
    assert_eq!(controller.module_state("cities"), ModuleState::Inactive);
    assert_eq!(controller.container().owner().as_deref(), Some("slow"));
}

#[tokio::test(start_paused = true)]
async fn test_next_switch_waits_for_abandoned_one() {
    let harness = Harness::new();
    let slow = Arc::new(
        harness
            .module("slow")
            .with_cleanup(CleanupBehavior::Delay(Duration::from_millis(500))),
    );
    let cities = Arc::new(harness.module("cities"));
    let controller = harness.controller(vec![slow.clone(), cities.clone()]);

    controller.switch_to("slow").await;
    let abandoned =
        tokio::time::timeout(Duration::from_millis(50), controller.switch_to("cities")).await;
    assert!(abandoned.is_err());

    // Queued behind the abandoned switch instead of hitting a busy container
    assert_eq!(controller.switch_to("slow").await, SwitchOutcome::Activated);

    assert_eq!(cities.render_count(), 1);
    assert_eq!(harness.verifier.descriptor("slow").unwrap().cleanup_count, 1);
    assert_eq!(harness.verifier.descriptor("cities").unwrap().cleanup_count, 1);
    assert_eq!(controller.module_state("slow"), ModuleState::Active);
    assert_eq!(controller.get_stats().fallbacks, 0);
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_activation_still_settles() {
    let harness = Harness::new();
    let cities = Arc::new(
        harness
            .module("cities")
            .with_render_delay(Duration::from_millis(200)),
    );
    let controller = harness.controller(vec![cities.clone()]);

    let abandoned =
        tokio::time::timeout(Duration::from_millis(50), controller.switch_to("cities")).await;
    assert!(abandoned.is_err());
    assert_eq!(controller.module_state("cities"), ModuleState::Activating);

    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(controller.module_state("cities"), ModuleState::Active);
    assert_eq!(controller.current_module_id().as_deref(), Some("cities"));
    assert_eq!(controller.container().owner().as_deref(), Some("cities"));
    assert_eq!(controller.switch_to("cities").await, SwitchOutcome::AlreadyActive);
}

#[tokio::test(start_paused = true)]
async fn test_shared_container() {
    let harness = Harness::new();
    let cities = Arc::new(harness.module("cities"));
    let container = Container::new("sidebar");
    let controller =
        ModuleController::builder(Harness::resolver(vec![cities]), harness.verifier.clone())
            .with_container(container.clone())
            .build();

    controller.switch_to("cities").await;

    assert_eq!(container.owner().as_deref(), Some("cities"));
    assert_eq!(controller.get_stats().region, "sidebar");

    controller.shutdown().await;
    assert!(container.owner().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_switches_never_share_container() {
    let harness = Harness::new();
    let slow = Arc::new(
        harness
            .module("slow")
            .with_cleanup(CleanupBehavior::Delay(Duration::from_millis(50))),
    );
    let cities = Arc::new(harness.module("cities"));
    let calendar = Arc::new(harness.module("calendar"));
    let controller = Arc::new(harness.controller(vec![slow, cities, calendar]));

    controller.switch_to("slow").await;

    let a = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.switch_to("cities").await })
    };
    let b = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.switch_to("calendar").await })
    };

    assert!(a.await.unwrap().is_activated());
    assert!(b.await.unwrap().is_activated());

    let active: Vec<_> = ["slow", "cities", "calendar"]
        .into_iter()
        .filter(|id| controller.module_state(id) == ModuleState::Active)
        .collect();
    assert_eq!(active.len(), 1);
    assert_eq!(
        controller.container().owner(),
        controller.current_module_id()
    );
}

#[tokio::test(start_paused = true)]
async fn test_leak_audit_and_shutdown() {
    let harness = Harness::new();
    let cities = Arc::new(harness.module("cities"));
    let calendar = Arc::new(harness.module("calendar").failing_render());
    let controller = harness.controller(vec![cities, calendar]);

    controller.switch_to("calendar").await;
    controller.switch_to("cities").await;

    // calendar never activated, so it never got a cleanup
    let audit = controller.detect_memory_leaks();
    assert_eq!(audit.uncleaned_modules, vec!["calendar".to_string()]);
    assert!(audit.suspected);

    let report = controller.shutdown().await;
    assert_eq!(report.uncleaned_modules(), vec!["calendar"]);
    assert_eq!(harness.verifier.descriptor("cities").unwrap().cleanup_count, 1);
    assert!(controller.current_module_id().is_none());
}
