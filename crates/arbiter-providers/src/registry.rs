//! Thread-safe provider registry.
//!
//! The scheduler keeps one provider instance per target name and shares it
//! across concurrent tasks. The registry is owned by the runner rather
//! than being a process-wide singleton, so two runs never interfere.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use arbiter_core::error::Result;

use crate::provider_trait::Provider;

#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Arc<dyn Provider>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under a target name, replacing any previous one.
    pub fn register(&self, target: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.write().insert(target.into(), provider);
    }

    pub fn get(&self, target: &str) -> Option<Arc<dyn Provider>> {
        self.providers.read().get(target).cloned()
    }

    /// Fetch the provider for a target, building it on first use.
    ///
    /// Two tasks racing on the same missing target may both run `init`;
    /// the first insert wins and both see the same instance afterwards.
    pub fn get_or_create<F>(&self, target: &str, init: F) -> Result<Arc<dyn Provider>>
    where
        F: FnOnce() -> Result<Arc<dyn Provider>>,
    {
        if let Some(provider) = self.providers.read().get(target) {
            return Ok(provider.clone());
        }
        let built = init()?;
        let mut guard = self.providers.write();
        let entry = guard.entry(target.to_string()).or_insert(built);
        Ok(entry.clone())
    }

    pub fn len(&self) -> usize {
        self.providers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.read().is_empty()
    }
}
