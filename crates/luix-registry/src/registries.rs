use futures::future::join_all;
use luix_common::protocol::{LuixError, Result};
use luix_common::url::Url;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::catalog::{CatalogRegistryFactory, MemoryCatalog};
use crate::direct::DirectRegistryFactory;
use crate::keystore::{KeyStoreRegistryFactory, MemoryKeyValueStore};
use crate::registry::{Registry, RegistryFactory};

/// Registry factories by name, and the registries created from them.
///
/// A registry is created once per registry url identity and shared by every
/// provider and consumer that names it.
#[derive(Default)]
pub struct Registries {
    factories: RwLock<HashMap<String, Arc<dyn RegistryFactory>>>,
    registries: Mutex<HashMap<String, Arc<dyn Registry>>>,
}

impl Registries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with every built-in backend running against in-process stores.
    pub fn in_memory() -> Self {
        let registries = Self::new();
        registries.register_factory(Arc::new(KeyStoreRegistryFactory::new(Arc::new(
            MemoryKeyValueStore::new(),
        ))));
        registries.register_factory(Arc::new(CatalogRegistryFactory::new(Arc::new(
            MemoryCatalog::new(),
        ))));
        registries.register_factory(Arc::new(DirectRegistryFactory));
        registries
    }

    /// Adds or replaces the factory registered under `factory.name()`.
    pub fn register_factory(&self, factory: Arc<dyn RegistryFactory>) {
        self.factories
            .write()
            .insert(factory.name().to_string(), factory);
    }

    pub fn factory_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns the registry for `registry_url`, creating it on first use.
    ///
    /// The backend is chosen by the url protocol.
    ///
    /// # Errors
    ///
    /// Returns [`LuixError::Configuration`] when no factory has that name.
    pub fn get_or_create(&self, registry_url: &Url) -> Result<Arc<dyn Registry>> {
        let key = registry_url.identity();
        let mut registries = self.registries.lock();
        if let Some(registry) = registries.get(&key) {
            return Ok(registry.clone());
        }

        let factory = self
            .factories
            .read()
            .get(registry_url.protocol())
            .cloned()
            .ok_or_else(|| {
                LuixError::Configuration(format!(
                    "No registry factory named '{}'",
                    registry_url.protocol()
                ))
            })?;

        let registry = factory.create(registry_url)?;
        info!(registry = %registry_url, "Created registry");
        registries.insert(key, registry.clone());
        Ok(registry)
    }

    pub fn registries(&self) -> Vec<Arc<dyn Registry>> {
        self.registries.lock().values().cloned().collect()
    }

    /// Closes and forgets every created registry.
    pub async fn close_all(&self) {
        let registries: Vec<Arc<dyn Registry>> =
            self.registries.lock().drain().map(|(_, r)| r).collect();
        join_all(registries.iter().map(|registry| registry.close())).await;
    }
}
