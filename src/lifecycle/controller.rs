/*!
 * Module Lifecycle Controller
 *
 * Owns the active module of one container region and drives every switch:
 *
 * 1. Deactivate the current module. Its `cleanup` races the registered
 *    timeout; on timeout or error the declared resources are scavenged.
 * 2. Load the next module (resolver + cache, first load registers it with
 *    the verifier).
 * 3. Claim the container, render, bind events, mark active.
 *
 * Any load, render, or bind failure leaves a fallback panel in the container
 * and is returned inside `SwitchOutcome::Fallback`; nothing propagates to the
 * host. Switches are serialized by an async mutex held for the whole switch,
 * so cleanup of one module always settles before the next one renders.
 *
 * Switches, cleanups and shutdown run on spawned tasks. A host that stops
 * waiting (timeout, select against navigation) never leaves a module half
 * deactivated or the container claimed by a module that is not active.
 */

use super::container::Container;
use super::module::{Module, ScavengeReport};
use super::records::FinalReport;
use super::resolver::ModuleResolver;
use super::state::{DeactivationOutcome, ModuleState, StateTable};
use super::verifier::{CleanupVerifier, VerifierStats};
use crate::core::config::ControllerConfig;
use crate::core::errors::{LifecycleError, LifecycleResult};
use crate::core::limits::SLOW_SWITCH_THRESHOLD;
use crate::core::types::{now_ms, CleanupContext, ModuleId, Timestamp};
use crate::monitoring::sampler::{GrowthTrend, ResourceSampler, SamplerStats};
use crate::monitoring::span_operation;
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn, Instrument};

/// Result of `switch_to`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "error", rename_all = "snake_case")]
pub enum SwitchOutcome {
    /// Requested module was already active; nothing happened
    AlreadyActive,
    Activated,
    /// Activation failed and a fallback panel was rendered
    Fallback(LifecycleError),
}

impl SwitchOutcome {
    pub fn is_activated(&self) -> bool {
        matches!(self, Self::Activated | Self::AlreadyActive)
    }

    pub fn error(&self) -> Option<&LifecycleError> {
        match self {
            Self::Fallback(e) => Some(e),
            _ => None,
        }
    }
}

/// The module currently owning the container
#[derive(Clone)]
pub struct ActiveModule {
    id: ModuleId,
    module: Arc<dyn Module>,
    activated_at: Timestamp,
}

impl ActiveModule {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn module(&self) -> &Arc<dyn Module> {
        &self.module
    }

    pub fn activated_at(&self) -> Timestamp {
        self.activated_at
    }
}

impl std::fmt::Debug for ActiveModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveModule")
            .field("id", &self.id)
            .field("activated_at", &self.activated_at)
            .finish()
    }
}

/// Controller statistics, with verifier and sampler snapshots
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerStats {
    pub region: String,
    pub current_module: Option<ModuleId>,
    pub cached_modules: usize,
    pub switches: u64,
    pub fallbacks: u64,
    pub completed_cleanups: u64,
    pub forced_cleanups: u64,
    pub refreshes: u64,
    pub verifier: VerifierStats,
    pub sampler: SamplerStats,
}

/// On-demand leak audit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeakAudit {
    /// Registered modules owing a cleanup, excluding the active one
    pub uncleaned_modules: Vec<ModuleId>,
    /// Memory growth over the sampler's retained history
    pub growth: Option<GrowthTrend>,
    pub suspected: bool,
}

#[derive(Default)]
struct Counters {
    switches: AtomicU64,
    fallbacks: AtomicU64,
    completed_cleanups: AtomicU64,
    forced_cleanups: AtomicU64,
    refreshes: AtomicU64,
}

/// Module lifecycle controller for one container region
///
/// Cloning yields another handle to the same controller.
#[derive(Clone)]
pub struct ModuleController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    resolver: Arc<dyn ModuleResolver>,
    verifier: CleanupVerifier,
    sampler: ResourceSampler,
    container: Container,
    cache: DashMap<ModuleId, Arc<dyn Module>>,
    /// Held across a whole switch
    active: tokio::sync::Mutex<Option<ActiveModule>>,
    /// Readable while a switch is in flight
    current: RwLock<Option<ModuleId>>,
    states: Mutex<StateTable>,
    counters: Counters,
}

/// Builder for ModuleController
pub struct ModuleControllerBuilder {
    resolver: Arc<dyn ModuleResolver>,
    verifier: CleanupVerifier,
    config: ControllerConfig,
    container: Option<Container>,
}

impl ModuleControllerBuilder {
    /// Use a controller configuration (region name)
    pub fn with_config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// Render into an existing container instead of a fresh one
    pub fn with_container(mut self, container: Container) -> Self {
        self.container = Some(container);
        self
    }

    pub fn build(self) -> ModuleController {
        let container = self
            .container
            .unwrap_or_else(|| Container::new(self.config.region.clone()));

        info!(region = container.region(), "module controller created");

        ModuleController {
            inner: Arc::new(ControllerInner {
                resolver: self.resolver,
                sampler: self.verifier.sampler().clone(),
                verifier: self.verifier,
                container,
                cache: DashMap::new(),
                active: tokio::sync::Mutex::new(None),
                current: RwLock::new(None),
                states: Mutex::new(StateTable::new()),
                counters: Counters::default(),
            }),
        }
    }
}

impl ModuleController {
    /// Controller with the default configuration
    pub fn new<R: ModuleResolver + 'static>(resolver: R, verifier: CleanupVerifier) -> Self {
        Self::builder(resolver, verifier).build()
    }

    pub fn builder<R: ModuleResolver + 'static>(
        resolver: R,
        verifier: CleanupVerifier,
    ) -> ModuleControllerBuilder {
        ModuleControllerBuilder {
            resolver: Arc::new(resolver),
            verifier,
            config: ControllerConfig::default(),
            container: None,
        }
    }

    /// Make `module_id` the active module
    ///
    /// The switch runs on its own task. Dropping the returned future does not
    /// interrupt it; the next switch waits for it to settle.
    pub async fn switch_to(&self, module_id: &str) -> SwitchOutcome {
        let inner = Arc::clone(&self.inner);
        let id = module_id.to_string();
        let switch = tokio::spawn(async move { inner.switch_to(&id).await }.in_current_span());

        match switch.await {
            Ok(outcome) => outcome,
            Err(e) => self.inner.fall_back(
                module_id,
                LifecycleError::SwitchAborted {
                    module_id: module_id.to_string(),
                    reason: e.to_string(),
                },
            ),
        }
    }

    /// Deactivate the active module without activating another one
    ///
    /// Returns None when nothing was active. Runs to completion like `switch_to`.
    pub async fn cleanup_current(&self) -> Option<DeactivationOutcome> {
        let inner = Arc::clone(&self.inner);
        let cleanup = tokio::spawn(async move { inner.cleanup_current().await }.in_current_span());

        match cleanup.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "cleanup task aborted");
                None
            }
        }
    }

    /// Re-query the active module's data without deactivating it
    ///
    /// Bounded by the module's cleanup timeout so a hung refresh cannot block
    /// later switches.
    pub async fn refresh(&self) -> LifecycleResult<()> {
        self.inner.refresh().await
    }

    /// Clean up the active module for teardown and run the final audit
    pub async fn shutdown(&self) -> FinalReport {
        let inner = Arc::clone(&self.inner);
        let shutdown = tokio::spawn(async move { inner.shutdown().await }.in_current_span());

        match shutdown.await {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "shutdown task aborted");
                self.inner.verifier.final_report()
            }
        }
    }

    pub fn current_module_id(&self) -> Option<ModuleId> {
        self.inner.current.read().clone()
    }

    pub fn module_state(&self, module_id: &str) -> ModuleState {
        self.inner.states.lock().get(module_id)
    }

    pub fn is_cached(&self, module_id: &str) -> bool {
        self.inner.cache.contains_key(module_id)
    }

    /// Audit combining never-cleaned modules and memory growth
    pub fn detect_memory_leaks(&self) -> LeakAudit {
        let current = self.current_module_id();
        let uncleaned_modules: Vec<ModuleId> = self
            .inner
            .verifier
            .uncleaned_modules()
            .into_iter()
            .filter(|id| Some(id) != current.as_ref())
            .collect();
        let growth = self.inner.sampler.growth_trend();
        let suspected =
            !uncleaned_modules.is_empty() || growth.as_ref().map_or(false, |g| g.suspected);

        if suspected {
            warn!(
                uncleaned = ?uncleaned_modules,
                growth_bytes = growth.as_ref().map_or(0, |g| g.growth_bytes),
                "possible memory leak detected"
            );
        }

        LeakAudit {
            uncleaned_modules,
            growth,
            suspected,
        }
    }

    /// Get controller statistics
    pub fn get_stats(&self) -> ControllerStats {
        let inner = &self.inner;
        ControllerStats {
            region: inner.container.region().to_string(),
            current_module: self.current_module_id(),
            cached_modules: inner.cache.len(),
            switches: inner.counters.switches.load(Ordering::Relaxed),
            fallbacks: inner.counters.fallbacks.load(Ordering::Relaxed),
            completed_cleanups: inner.counters.completed_cleanups.load(Ordering::Relaxed),
            forced_cleanups: inner.counters.forced_cleanups.load(Ordering::Relaxed),
            refreshes: inner.counters.refreshes.load(Ordering::Relaxed),
            verifier: inner.verifier.stats(),
            sampler: inner.sampler.stats(),
        }
    }

    pub fn container(&self) -> &Container {
        &self.inner.container
    }

    pub fn verifier(&self) -> &CleanupVerifier {
        &self.inner.verifier
    }

    pub fn sampler(&self) -> &ResourceSampler {
        &self.inner.sampler
    }
}

impl ControllerInner {
    async fn switch_to(&self, module_id: &str) -> SwitchOutcome {
        let span = span_operation("switch_to", module_id, SLOW_SWITCH_THRESHOLD);
        let mut active = self.active.lock().await;

        if active.as_ref().map(ActiveModule::id) == Some(module_id) {
            debug!(module_id, "module already active");
            span.record_result("already_active");
            return SwitchOutcome::AlreadyActive;
        }

        self.counters.switches.fetch_add(1, Ordering::Relaxed);

        if let Some(previous) = active.take() {
            *self.current.write() = None;
            self.deactivate(previous, CleanupContext::switch_to(module_id))
                .instrument(span.span().clone())
                .await;
        }

        match self
            .activate(module_id)
            .instrument(span.span().clone())
            .await
        {
            Ok(module) => {
                *active = Some(ActiveModule {
                    id: module_id.to_string(),
                    module,
                    activated_at: now_ms(),
                });
                *self.current.write() = Some(module_id.to_string());
                info!(module_id, trace_id = span.trace_id(), "module activated");
                span.record_result("activated");
                SwitchOutcome::Activated
            }
            Err(e) => {
                span.record_error(&e.to_string());
                self.fall_back(module_id, e)
            }
        }
    }

    async fn cleanup_current(&self) -> Option<DeactivationOutcome> {
        let mut active = self.active.lock().await;
        let previous = active.take()?;
        *self.current.write() = None;
        Some(self.deactivate(previous, CleanupContext::manual()).await)
    }

    async fn refresh(&self) -> LifecycleResult<()> {
        let active = self.active.lock().await;
        let Some(current) = active.as_ref() else {
            debug!("refresh with no active module");
            return Ok(());
        };

        self.counters.refreshes.fetch_add(1, Ordering::Relaxed);
        let timeout = self.cleanup_timeout(&current.id);

        let reason = match tokio::time::timeout(timeout, current.module.refresh()).await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => e.to_string(),
            Err(_elapsed) => format!("refresh timed out after {}ms", timeout.as_millis()),
        };

        warn!(module_id = %current.id, reason = %reason, "module refresh failed");
        Err(LifecycleError::RefreshFailed {
            module_id: current.id.clone(),
            reason,
        })
    }

    async fn shutdown(&self) -> FinalReport {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            *self.current.write() = None;
            self.deactivate(previous, CleanupContext::shutdown()).await;
        }
        info!(region = self.container.region(), "module controller shut down");
        self.verifier.final_report()
    }

    /// Render the fallback panel for a failed activation
    fn fall_back(&self, module_id: &str, e: LifecycleError) -> SwitchOutcome {
        self.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
        error!(module_id, error = %e, "module activation failed, showing fallback");
        self.container.show_fallback(module_id, &e.to_string());
        SwitchOutcome::Fallback(e)
    }

    fn cleanup_timeout(&self, module_id: &str) -> Duration {
        self.verifier
            .cleanup_timeout(module_id)
            .unwrap_or(self.verifier.config().default_cleanup_timeout)
    }

    fn transition(&self, module_id: &str, next: ModuleState) {
        if let Err(e) = self.states.lock().transition(module_id, next) {
            error!(module_id, error = %e, "lifecycle state violation");
        }
    }

    async fn load(&self, module_id: &str) -> LifecycleResult<Arc<dyn Module>> {
        let cached = self.cache.get(module_id).map(|entry| Arc::clone(entry.value()));
        if let Some(module) = cached {
            return Ok(module);
        }

        let module = self
            .resolver
            .resolve(module_id)
            .await
            .map_err(|e| LifecycleError::LoadFailed {
                module_id: module_id.to_string(),
                reason: e.to_string(),
            })?;

        if module.id() != module_id {
            warn!(module_id, reported = module.id(), "resolved module reports a different id");
        }

        self.verifier.register_module(module_id, module.options());
        self.cache.insert(module_id.to_string(), Arc::clone(&module));
        debug!(module_id, "module loaded");
        Ok(module)
    }

    async fn activate(&self, module_id: &str) -> LifecycleResult<Arc<dyn Module>> {
        let module = self.load(module_id).await?;

        self.states
            .lock()
            .transition(module_id, ModuleState::Activating)?;

        match self.mount(module_id, module.as_ref()).await {
            Ok(()) => {
                self.transition(module_id, ModuleState::Active);
                Ok(module)
            }
            Err(e) => {
                self.force_cleanup(module_id, module.as_ref());
                self.transition(module_id, ModuleState::Inactive);
                Err(e)
            }
        }
    }

    async fn mount(&self, module_id: &str, module: &dyn Module) -> LifecycleResult<()> {
        self.container.claim(module_id)?;
        self.container.clear();
        module.resources().attach_container(self.container.clone());

        let rendered = AssertUnwindSafe(module.render(&self.container))
            .catch_unwind()
            .await;
        let reason = match rendered {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some("render panicked".to_string()),
        };
        if let Some(reason) = reason {
            return Err(LifecycleError::RenderFailed {
                module_id: module_id.to_string(),
                reason,
            });
        }

        let bound = std::panic::catch_unwind(AssertUnwindSafe(|| {
            module.bind_events(&self.container)
        }));
        let reason = match bound {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some("event binding panicked".to_string()),
        };
        match reason {
            Some(reason) => Err(LifecycleError::BindFailed {
                module_id: module_id.to_string(),
                reason,
            }),
            None => Ok(()),
        }
    }

    /// Scavenge declared resources and give the container back
    fn force_cleanup(&self, module_id: &str, module: &dyn Module) -> ScavengeReport {
        let report = module.resources().scavenge();
        self.container.release(module_id);
        report
    }

    async fn deactivate(
        &self,
        previous: ActiveModule,
        context: CleanupContext,
    ) -> DeactivationOutcome {
        let ActiveModule { id, module, .. } = previous;
        let span = span_operation("cleanup", &id, SLOW_SWITCH_THRESHOLD);
        self.transition(&id, ModuleState::Deactivating);

        let timeout = self.cleanup_timeout(&id);

        let cleanup_id = match self.verifier.start_cleanup(&id, context) {
            Ok(cleanup_id) => Some(cleanup_id),
            Err(e) => {
                warn!(module_id = %id, error = %e, "cleanup not tracked by verifier");
                None
            }
        };

        let settled = tokio::time::timeout(
            timeout,
            AssertUnwindSafe(module.cleanup()).catch_unwind(),
        )
        .await;

        let outcome = match settled {
            Ok(Ok(Ok(stats))) => {
                if module.resources().has_resources() {
                    warn!(module_id = %id, "cleanup left declared resources behind");
                    module.resources().scavenge();
                }
                if let Some(cleanup_id) = cleanup_id {
                    // Losing to the verifier's own timer is logged inside
                    let _ = self.verifier.finish_cleanup(cleanup_id, stats);
                }
                span.record_result("completed");
                DeactivationOutcome::Completed
            }
            Ok(Ok(Err(e))) => {
                self.force_cleanup(&id, module.as_ref());
                if let Some(cleanup_id) = cleanup_id {
                    let _ = self.verifier.fail_cleanup(cleanup_id, e.to_string());
                }
                span.record_error(&e.to_string());
                DeactivationOutcome::Forced
            }
            Ok(Err(_)) => {
                self.force_cleanup(&id, module.as_ref());
                if let Some(cleanup_id) = cleanup_id {
                    let _ = self.verifier.fail_cleanup(cleanup_id, "cleanup panicked");
                }
                span.record_error("cleanup panicked");
                DeactivationOutcome::Forced
            }
            Err(_elapsed) => {
                let report = self.force_cleanup(&id, module.as_ref());
                warn!(
                    module_id = %id,
                    timeout_ms = timeout.as_millis() as u64,
                    listeners = report.listeners_cleared,
                    timers = report.timers_cleared,
                    "cleanup timed out, resources forced"
                );
                if let Some(cleanup_id) = cleanup_id {
                    if let Err(e) = self.verifier.timeout_cleanup(cleanup_id) {
                        debug!(module_id = %id, error = %e, "verifier timer finalized first");
                    }
                }
                span.record_result("forced");
                DeactivationOutcome::Forced
            }
        };

        let counter = match outcome {
            DeactivationOutcome::Completed => &self.counters.completed_cleanups,
            DeactivationOutcome::Forced => &self.counters.forced_cleanups,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        module.resources().detach_container();
        self.container.release(&id);
        self.transition(&id, ModuleState::Inactive);
        outcome
    }
}

impl std::fmt::Debug for ModuleController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleController")
            .field("region", &self.inner.container.region())
            .field("current", &self.current_module_id())
            .field("cached", &self.inner.cache.len())
            .finish()
    }
}
