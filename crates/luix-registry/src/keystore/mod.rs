//! Registry backed by a hierarchical key store.
//!
//! # Layout
//!
//! ```text
//! /luix/service/{interface}/active/{host:port[:form]}    -> provider url
//! /luix/service/{interface}/inactive/{host:port[:form]}  -> provider url
//! ```
//!
//! Providers outside the default group and version get `@{group}@{version}`
//! appended to their entry name, so several of them can share an address.
//!
//! Registering writes the inactive entry, activating moves it to `active`.
//! Consumers watch the `active` directory of their interface and receive the
//! full set of entries on every change.

pub mod store;

use async_trait::async_trait;
use luix_common::protocol::Result;
use luix_common::url::Url;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::failback::{FailbackRegistry, RegistryBackend};
use crate::registry::{
    is_provider_entry, listener_id, matches_consumer, notify_safely, service_suffix,
    NotifyListener, Registry, RegistryFactory,
};

pub use store::{KeyValueStore, MemoryKeyValueStore};

pub const NAMESPACE: &str = "/luix";
pub const SERVICE_DIR: &str = "service";

/// Status directory of a provider entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusDir {
    Active,
    Inactive,
}

impl StatusDir {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusDir::Active => "active",
            StatusDir::Inactive => "inactive",
        }
    }
}

pub fn services_path() -> String {
    format!("{}/{}", NAMESPACE, SERVICE_DIR)
}

pub fn service_path(interface: &str) -> String {
    format!("{}/{}", services_path(), interface)
}

pub fn status_path(interface: &str, status: StatusDir) -> String {
    format!("{}/{}", service_path(interface), status.as_str())
}

/// Entry name of a provider: its address, suffixed with its form if any,
/// then with its group and version unless both are the defaults.
pub fn node_name(url: &Url) -> String {
    let address = match url.form() {
        Some(form) => format!("{}:{}", url.address(), form),
        None => url.address(),
    };
    format!("{}{}", address, service_suffix(url))
}

pub fn node_path(url: &Url, status: StatusDir) -> String {
    format!("{}/{}", status_path(url.path(), status), node_name(url))
}

/// Key-store operations behind the failback wrapper.
pub struct KeyStoreBackend {
    store: Arc<dyn KeyValueStore>,
    watches: Mutex<HashMap<(String, usize), CancellationToken>>,
}

impl KeyStoreBackend {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            watches: Mutex::new(HashMap::new()),
        }
    }

    async fn move_entry(&self, url: &Url, from: StatusDir, to: StatusDir) -> Result<()> {
        self.store.delete(&node_path(url, from)).await?;
        self.store
            .create(&node_path(url, to), &url.to_string(), true)
            .await
    }

    async fn active_providers(store: &dyn KeyValueStore, interface: &str) -> Result<Vec<Url>> {
        let dir = status_path(interface, StatusDir::Active);
        let mut providers = Vec::new();
        for child in store.children(&dir).await? {
            let Some(data) = store.read(&format!("{}/{}", dir, child)).await? else {
                continue;
            };
            match Url::parse(&data) {
                Ok(url) if is_provider_entry(&url) => providers.push(url),
                Ok(_) => {}
                Err(e) => warn!(entry = %child, "Skipping malformed provider entry: {}", e),
            }
        }
        providers.sort_by_key(|url| url.to_string());
        Ok(providers)
    }

    async fn matching_providers(store: &dyn KeyValueStore, consumer: &Url) -> Result<Vec<Url>> {
        Ok(Self::active_providers(store, consumer.path())
            .await?
            .into_iter()
            .filter(|provider| matches_consumer(consumer, provider))
            .collect())
    }
}

#[async_trait]
impl RegistryBackend for KeyStoreBackend {
    async fn do_register(&self, url: &Url) -> Result<()> {
        self.move_entry(url, StatusDir::Active, StatusDir::Inactive).await
    }

    async fn do_deregister(&self, url: &Url) -> Result<()> {
        self.store.delete(&node_path(url, StatusDir::Active)).await?;
        self.store.delete(&node_path(url, StatusDir::Inactive)).await
    }

    async fn do_activate(&self, url: &Url) -> Result<()> {
        self.move_entry(url, StatusDir::Inactive, StatusDir::Active).await
    }

    async fn do_deactivate(&self, url: &Url) -> Result<()> {
        self.move_entry(url, StatusDir::Active, StatusDir::Inactive).await
    }

    async fn do_subscribe(
        &self,
        registry_url: &Url,
        consumer: &Url,
        listener: Arc<dyn NotifyListener>,
    ) -> Result<()> {
        let interface = consumer.path().to_string();
        // Watch first so no change between the initial read and the loop is lost.
        let mut changes = self
            .store
            .watch_children(&status_path(&interface, StatusDir::Active));
        let initial = Self::matching_providers(self.store.as_ref(), consumer).await?;
        notify_safely(&listener, registry_url, &interface, initial.clone());

        let token = CancellationToken::new();
        let key = (consumer.to_string(), listener_id(&listener));
        if let Some(previous) = self.watches.lock().insert(key, token.clone()) {
            previous.cancel();
        }

        let store = self.store.clone();
        let registry_url = registry_url.clone();
        let consumer = consumer.clone();
        tokio::spawn(async move {
            let mut last = initial;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    changed = changes.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                match Self::matching_providers(store.as_ref(), &consumer).await {
                    Ok(providers) if providers != last => {
                        last = providers.clone();
                        notify_safely(&listener, &registry_url, &interface, providers);
                    }
                    Ok(_) => {}
                    Err(e) => warn!(interface = %interface, "Failed to read providers: {}", e),
                }
            }
            debug!(interface = %interface, "Stopped watching providers");
        });
        Ok(())
    }

    async fn do_unsubscribe(&self, consumer: &Url, listener: &Arc<dyn NotifyListener>) -> Result<()> {
        if let Some(token) = self
            .watches
            .lock()
            .remove(&(consumer.to_string(), listener_id(listener)))
        {
            token.cancel();
        }
        Ok(())
    }

    async fn do_discover(&self, consumer: &Url) -> Result<Vec<Url>> {
        Self::matching_providers(self.store.as_ref(), consumer).await
    }

    async fn do_discover_all(&self) -> Result<Vec<Url>> {
        let mut providers = Vec::new();
        for interface in self.store.children(&services_path()).await? {
            providers.extend(Self::active_providers(self.store.as_ref(), &interface).await?);
        }
        Ok(providers)
    }

    async fn do_close(&self) {
        for (_, token) in self.watches.lock().drain() {
            token.cancel();
        }
    }
}

/// Creates key-store registries sharing one store.
pub struct KeyStoreRegistryFactory {
    store: Arc<dyn KeyValueStore>,
}

impl KeyStoreRegistryFactory {
    pub const NAME: &'static str = "keystore";

    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }
}

impl RegistryFactory for KeyStoreRegistryFactory {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn create(&self, registry_url: &Url) -> Result<Arc<dyn Registry>> {
        let registry: Arc<dyn Registry> = FailbackRegistry::new(
            registry_url.clone(),
            KeyStoreBackend::new(self.store.clone()),
        )?;
        Ok(registry)
    }
}
