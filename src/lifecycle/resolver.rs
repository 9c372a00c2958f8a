/*!
 * Module Resolution
 * Produces module instances by id for the controller's cache
 */

use super::module::Module;
use crate::core::errors::{ModuleError, ModuleResult};
use crate::core::types::ModuleId;
use ahash::HashMap;
use async_trait::async_trait;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::debug;

/// Capability injected into the controller to load modules lazily
#[async_trait]
pub trait ModuleResolver: Send + Sync {
    async fn resolve(&self, module_id: &str) -> ModuleResult<Arc<dyn Module>>;
}

type Factory = Arc<dyn Fn() -> ModuleResult<Arc<dyn Module>> + Send + Sync>;

/// Resolver backed by a table of factories
#[derive(Clone, Default)]
pub struct RegistryResolver {
    factories: HashMap<ModuleId, Factory>,
}

impl RegistryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory (builder pattern)
    #[must_use]
    pub fn with<F>(mut self, module_id: impl Into<ModuleId>, factory: F) -> Self
    where
        F: Fn() -> ModuleResult<Arc<dyn Module>> + Send + Sync + 'static,
    {
        self.register(module_id, factory);
        self
    }

    pub fn register<F>(&mut self, module_id: impl Into<ModuleId>, factory: F)
    where
        F: Fn() -> ModuleResult<Arc<dyn Module>> + Send + Sync + 'static,
    {
        self.factories.insert(module_id.into(), Arc::new(factory));
    }

    pub fn contains(&self, module_id: &str) -> bool {
        self.factories.contains_key(module_id)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

#[async_trait]
impl ModuleResolver for RegistryResolver {
    async fn resolve(&self, module_id: &str) -> ModuleResult<Arc<dyn Module>> {
        let factory = self
            .factories
            .get(module_id)
            .ok_or_else(|| ModuleError::NotFound(module_id.to_string()))?;

        let module = std::panic::catch_unwind(AssertUnwindSafe(|| factory())).map_err(|_| {
            ModuleError::ResolveFailed {
                module_id: module_id.to_string(),
                reason: "factory panicked".into(),
            }
        })??;
        debug!(module_id, "module resolved");
        Ok(module)
    }
}

impl std::fmt::Debug for RegistryResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        ids.sort_unstable();
        f.debug_struct("RegistryResolver").field("modules", &ids).finish()
    }
}
