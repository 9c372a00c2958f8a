/*!
 * Host Container
 *
 * The region of the host view a controller renders modules into. At most one
 * module owns a container at a time; `claim` refuses a second owner.
 */

use crate::core::errors::{LifecycleError, LifecycleResult};
use crate::core::types::ModuleId;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Default)]
struct ContainerInner {
    content: Vec<String>,
    owner: Option<ModuleId>,
    bindings: Vec<String>,
}

/// Shared handle to a container region
#[derive(Clone)]
pub struct Container {
    region: Arc<str>,
    inner: Arc<RwLock<ContainerInner>>,
}

impl Container {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: Arc::from(region.into()),
            inner: Arc::new(RwLock::new(ContainerInner::default())),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Take ownership for a module
    ///
    /// Claiming a container the module already owns is a no-op.
    pub fn claim(&self, module_id: &str) -> LifecycleResult<()> {
        let mut inner = self.inner.write();
        match inner.owner.as_deref() {
            Some(owner) if owner != module_id => {
                warn!(region = %self.region, owner, module_id, "container already owned");
                Err(LifecycleError::ContainerBusy {
                    region: self.region.to_string(),
                    owner: owner.to_string(),
                })
            }
            _ => {
                inner.owner = Some(module_id.to_string());
                debug!(region = %self.region, module_id, "container claimed");
                Ok(())
            }
        }
    }

    /// Give up ownership; content and bindings are cleared
    ///
    /// Returns false if `module_id` was not the owner.
    pub fn release(&self, module_id: &str) -> bool {
        let mut inner = self.inner.write();
        if inner.owner.as_deref() != Some(module_id) {
            return false;
        }
        inner.owner = None;
        inner.content.clear();
        inner.bindings.clear();
        debug!(region = %self.region, module_id, "container released");
        true
    }

    pub fn owner(&self) -> Option<ModuleId> {
        self.inner.read().owner.clone()
    }

    pub fn replace_content(&self, content: impl Into<String>) {
        let mut inner = self.inner.write();
        inner.content.clear();
        inner.content.push(content.into());
    }

    pub fn append(&self, content: impl Into<String>) {
        self.inner.write().content.push(content.into());
    }

    /// Rendered content, one entry per fragment
    pub fn content(&self) -> Vec<String> {
        self.inner.read().content.clone()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.content.clear();
        inner.bindings.clear();
    }

    /// Attach an event binding (e.g. "click:.tab-item")
    pub fn bind(&self, binding: impl Into<String>) {
        self.inner.write().bindings.push(binding.into());
    }

    pub fn bindings(&self) -> Vec<String> {
        self.inner.read().bindings.clone()
    }

    /// Replace everything with a fallback panel and drop ownership
    pub fn show_fallback(&self, module_id: &str, message: &str) {
        let mut inner = self.inner.write();
        inner.owner = None;
        inner.bindings.clear();
        inner.content.clear();
        inner
            .content
            .push(format!("[{module_id}] unavailable: {message}"));
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("Container")
            .field("region", &self.region)
            .field("owner", &inner.owner)
            .field("fragments", &inner.content.len())
            .finish()
    }
}
