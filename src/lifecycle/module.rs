/*!
 * Module Contract
 *
 * A module is one tab of the host application. It renders into a container,
 * binds events, and must release every listener and timer it created when it
 * is cleaned up.
 *
 * Modules declare those resources through `ModuleResources` so that the
 * controller can scavenge them by force when `cleanup` hangs or fails.
 */

use super::container::Container;
use super::records::ModuleOptions;
use crate::core::errors::ModuleResult;
use crate::core::types::{CleanupStats, ModuleId, ResourceKind};
use crate::monitoring::sampler::ResourceSampler;
use ahash::HashSet;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Lifecycle contract implemented by every module
#[async_trait]
pub trait Module: Send + Sync {
    fn id(&self) -> &str;

    /// Cleanup obligations registered on first load
    fn options(&self) -> ModuleOptions {
        ModuleOptions::default()
    }

    /// Declared listeners and timers
    fn resources(&self) -> &ModuleResources;

    async fn render(&self, container: &Container) -> ModuleResult<()>;

    fn bind_events(&self, _container: &Container) -> ModuleResult<()> {
        Ok(())
    }

    /// Re-query data without deactivating
    async fn refresh(&self) -> ModuleResult<()> {
        Ok(())
    }

    /// Release everything the module acquired
    ///
    /// The default releases the declared resources and nothing else.
    async fn cleanup(&self) -> ModuleResult<CleanupStats> {
        Ok(self.resources().release_all())
    }
}

/// What a forced scavenge removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScavengeReport {
    pub listeners_cleared: usize,
    pub timers_cleared: usize,
    pub container_detached: bool,
}

impl ScavengeReport {
    pub fn is_empty(&self) -> bool {
        self.listeners_cleared == 0 && self.timers_cleared == 0 && !self.container_detached
    }
}

#[derive(Default)]
struct Declared {
    listeners: HashSet<String>,
    timers: HashSet<String>,
    container: Option<Container>,
}

impl Declared {
    fn set_mut(&mut self, kind: ResourceKind) -> &mut HashSet<String> {
        match kind {
            ResourceKind::Listener => &mut self.listeners,
            ResourceKind::Timer => &mut self.timers,
        }
    }
}

/// Per-module listener and timer sets
///
/// Every add/remove is mirrored into the sampler under a `module:name` key,
/// so the sampler's counts always include declared module resources.
pub struct ModuleResources {
    module_id: ModuleId,
    sampler: ResourceSampler,
    declared: Mutex<Declared>,
}

impl ModuleResources {
    pub fn new(module_id: impl Into<ModuleId>, sampler: ResourceSampler) -> Self {
        Self {
            module_id: module_id.into(),
            sampler,
            declared: Mutex::new(Declared::default()),
        }
    }

    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    #[inline]
    fn sampler_key(&self, name: &str) -> String {
        format!("{}:{}", self.module_id, name)
    }

    fn add(&self, kind: ResourceKind, name: &str) -> bool {
        let inserted = self.declared.lock().set_mut(kind).insert(name.to_string());
        if inserted {
            self.sampler.track_resource(kind, self.sampler_key(name));
        }
        inserted
    }

    fn remove(&self, kind: ResourceKind, name: &str) -> bool {
        let removed = self.declared.lock().set_mut(kind).remove(name);
        if removed {
            self.sampler.untrack_resource(kind, &self.sampler_key(name));
        }
        removed
    }

    pub fn add_listener(&self, name: &str) -> bool {
        self.add(ResourceKind::Listener, name)
    }

    pub fn remove_listener(&self, name: &str) -> bool {
        self.remove(ResourceKind::Listener, name)
    }

    pub fn add_timer(&self, name: &str) -> bool {
        self.add(ResourceKind::Timer, name)
    }

    pub fn remove_timer(&self, name: &str) -> bool {
        self.remove(ResourceKind::Timer, name)
    }

    pub fn listener_count(&self) -> usize {
        self.declared.lock().listeners.len()
    }

    pub fn timer_count(&self) -> usize {
        self.declared.lock().timers.len()
    }

    pub fn has_resources(&self) -> bool {
        let declared = self.declared.lock();
        !declared.listeners.is_empty() || !declared.timers.is_empty()
    }

    pub fn attach_container(&self, container: Container) {
        self.declared.lock().container = Some(container);
    }

    pub fn detach_container(&self) -> Option<Container> {
        self.declared.lock().container.take()
    }

    pub fn container(&self) -> Option<Container> {
        self.declared.lock().container.clone()
    }

    fn drain(&self) -> ScavengeReport {
        let (listeners, timers, container) = {
            let mut declared = self.declared.lock();
            (
                std::mem::take(&mut declared.listeners),
                std::mem::take(&mut declared.timers),
                declared.container.take(),
            )
        };

        for name in &listeners {
            self.sampler
                .untrack_resource(ResourceKind::Listener, &self.sampler_key(name));
        }
        for name in &timers {
            self.sampler
                .untrack_resource(ResourceKind::Timer, &self.sampler_key(name));
        }

        ScavengeReport {
            listeners_cleared: listeners.len(),
            timers_cleared: timers.len(),
            container_detached: container.is_some(),
        }
    }

    /// Release every declared resource as part of a normal cleanup
    pub fn release_all(&self) -> CleanupStats {
        let report = self.drain();
        debug!(
            module_id = %self.module_id,
            listeners = report.listeners_cleared,
            timers = report.timers_cleared,
            "module resources released"
        );
        CleanupStats {
            listeners_released: report.listeners_cleared,
            timers_released: report.timers_cleared,
            errors_encountered: 0,
        }
    }

    /// Forcibly clear declared resources after a hung or failed cleanup
    pub fn scavenge(&self) -> ScavengeReport {
        let report = self.drain();
        if !report.is_empty() {
            warn!(
                module_id = %self.module_id,
                listeners = report.listeners_cleared,
                timers = report.timers_cleared,
                container_detached = report.container_detached,
                "module resources scavenged"
            );
        }
        report
    }
}

impl std::fmt::Debug for ModuleResources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let declared = self.declared.lock();
        f.debug_struct("ModuleResources")
            .field("module_id", &self.module_id)
            .field("listeners", &declared.listeners.len())
            .field("timers", &declared.timers.len())
            .field("container", &declared.container.is_some())
            .finish()
    }
}
