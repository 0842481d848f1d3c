//! Lookup table of chat providers keyed by identifier.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use crate::provider::ChatProvider;

/// Providers available to the server.
///
/// Built once at startup and shared read-only; adding a backend means
/// registering it here, not touching dispatch code.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn ChatProvider>>,
}

impl ProviderRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a provider under its own [`ChatProvider::id`].
    ///
    /// Returns the provider it replaced, if any.
    pub fn register(&mut self, provider: Arc<dyn ChatProvider>) -> Option<Arc<dyn ChatProvider>> {
        let id = provider.id().to_string();
        info!(provider = %id, model = provider.model(), "provider registered");
        self.providers.insert(id, provider)
    }

    /// Provider by identifier.
    pub fn get(&self, id: &str) -> Option<Arc<dyn ChatProvider>> {
        self.providers.get(id).cloned()
    }

    /// Registered identifiers in sorted order.
    pub fn ids(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }

    /// Number of registered providers.
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether no provider is registered.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.ids())
            .finish()
    }
}
