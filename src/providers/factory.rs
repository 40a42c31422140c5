//! Provider registry
//!
//! Constructors are registered once at startup. `get` builds an instance the
//! first time a given `(id, configuration)` pair is requested and hands out
//! the cached instance afterwards, so a store whose configuration changes
//! gets a fresh provider while an unchanged one keeps its connection state.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::ProviderError;

use super::{BestBuyProvider, ProviderContext, ProviderKind, SupplierProvider, VitacostProvider};

/// Builds a provider for one store
pub type ProviderConstructor =
    Arc<dyn Fn(&ProviderContext) -> Result<Arc<dyn SupplierProvider>, ProviderError> + Send + Sync>;

/// Registry of provider constructors and cached instances
#[derive(Default)]
pub struct ProviderFactory {
    constructors: RwLock<HashMap<String, ProviderConstructor>>,
    instances: RwLock<HashMap<(String, String), Arc<dyn SupplierProvider>>>,
}

static GLOBAL: OnceLock<ProviderFactory> = OnceLock::new();

impl ProviderFactory {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every [`ProviderKind`] registered under its id
    pub async fn with_builtin_providers() -> Self {
        let factory = Self::new();
        factory.register_builtin().await;
        factory
    }

    /// Process-wide registry
    ///
    /// Built-in providers must still be registered once at startup with
    /// [`ProviderFactory::register_builtin`].
    pub fn global() -> &'static ProviderFactory {
        GLOBAL.get_or_init(ProviderFactory::new)
    }

    /// Register every built-in provider
    pub async fn register_builtin(&self) {
        for kind in ProviderKind::ALL {
            self.register(kind.as_str(), builtin_constructor(kind)).await;
        }
    }

    /// Register or replace the constructor for `id`
    pub async fn register(&self, id: &str, constructor: ProviderConstructor) {
        debug!(provider = id, "Registering provider");
        self.constructors
            .write()
            .await
            .insert(id.to_string(), constructor);
    }

    /// Whether a constructor is registered for `id`
    pub async fn has(&self, id: &str) -> bool {
        self.constructors.read().await.contains_key(id)
    }

    /// Registered ids in sorted order
    pub async fn registered(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.constructors.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Get the provider for `id`, constructing it on first use
    pub async fn get(
        &self,
        id: &str,
        ctx: &ProviderContext,
    ) -> Result<Arc<dyn SupplierProvider>, ProviderError> {
        let fingerprint = serde_json::to_string(ctx)
            .map_err(|e| ProviderError::InvalidConfig(e.to_string()))?;
        let key = (id.to_string(), fingerprint);

        if let Some(provider) = self.instances.read().await.get(&key) {
            return Ok(provider.clone());
        }

        let constructor = self
            .constructors
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(id.to_string()))?;

        let mut instances = self.instances.write().await;
        // Another caller may have built it while we waited for the lock.
        if let Some(provider) = instances.get(&key) {
            return Ok(provider.clone());
        }

        let provider = constructor(ctx)?;
        info!(
            provider = id,
            store = %ctx.store_id,
            name = provider.display_name(),
            "Provider constructed"
        );
        instances.insert(key, provider.clone());
        Ok(provider)
    }

    /// Number of cached instances
    pub async fn cached_instances(&self) -> usize {
        self.instances.read().await.len()
    }
}

fn builtin_constructor(kind: ProviderKind) -> ProviderConstructor {
    Arc::new(move |ctx: &ProviderContext| -> Result<Arc<dyn SupplierProvider>, ProviderError> {
        match kind {
            ProviderKind::BestBuy => Ok(Arc::new(BestBuyProvider::new(ctx)?)),
            ProviderKind::Vitacost => Ok(Arc::new(VitacostProvider::new(ctx)?)),
        }
    })
}
