//! Registry backed by a health-checking service catalog.
//!
//! Every provider becomes one catalog instance:
//!
//! - service name `luix`, or `luix-{form}` for providers with a form
//! - instance id `host:port-interface`, plus `@{group}@{version}` outside
//!   the default group and version
//! - tags `protocol_{protocol}` and `URL_{url-encoded provider url}`
//! - a TTL check that is kept passing while the provider is active
//!
//! Consumers run one blocking lookup loop per subscription and are notified
//! whenever the set of healthy instances of their interface changes.

pub mod service;

use async_trait::async_trait;
use luix_common::protocol::Result;
use luix_common::url::Url;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::failback::{FailbackRegistry, RegistryBackend};
use crate::registry::{
    is_provider_entry, listener_id, matches_consumer, notify_safely, service_suffix,
    NotifyListener, Registry, RegistryFactory,
};

pub use service::{CatalogService, MemoryCatalog, ServiceCatalog};

pub const SERVICE_PREFIX: &str = "luix";
pub const PROTOCOL_TAG_PREFIX: &str = "protocol_";
pub const URL_TAG_PREFIX: &str = "URL_";
pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

/// How long one blocking lookup waits for a catalog change.
const LOOKUP_WAIT: Duration = Duration::from_secs(30);
const LOOKUP_ERROR_BACKOFF: Duration = Duration::from_secs(1);

pub fn service_name(url: &Url) -> String {
    match url.form() {
        Some(form) => format!("{}-{}", SERVICE_PREFIX, form),
        None => SERVICE_PREFIX.to_string(),
    }
}

pub fn instance_id(url: &Url) -> String {
    format!("{}-{}{}", url.address(), url.path(), service_suffix(url))
}

pub fn to_catalog_service(url: &Url) -> CatalogService {
    CatalogService {
        id: instance_id(url),
        name: service_name(url),
        address: url.host().to_string(),
        port: url.port(),
        tags: vec![
            format!("{}{}", PROTOCOL_TAG_PREFIX, url.protocol()),
            format!("{}{}", URL_TAG_PREFIX, urlencoding::encode(&url.to_string())),
        ],
    }
}

/// Rebuilds the provider url carried in the instance tags.
pub fn to_url(service: &CatalogService) -> Option<Url> {
    let encoded = service
        .tags
        .iter()
        .find_map(|tag| tag.strip_prefix(URL_TAG_PREFIX))?;
    let decoded = urlencoding::decode(encoded).ok()?;
    Url::parse(&decoded).ok()
}

fn providers_for(consumer: &Url, services: &[CatalogService]) -> Vec<Url> {
    let mut providers: Vec<Url> = services
        .iter()
        .filter_map(to_url)
        .filter(|url| is_provider_entry(url) && matches_consumer(consumer, url))
        .collect();
    providers.sort_by_key(|url| url.to_string());
    providers
}

/// Catalog operations behind the failback wrapper.
pub struct CatalogBackend {
    catalog: Arc<dyn ServiceCatalog>,
    ttl: Duration,
    activated: Arc<Mutex<HashSet<String>>>,
    lookups: Mutex<HashMap<(String, usize), CancellationToken>>,
    heartbeat_started: AtomicBool,
    shutdown: CancellationToken,
}

impl CatalogBackend {
    pub fn new(catalog: Arc<dyn ServiceCatalog>, ttl: Duration) -> Self {
        Self {
            catalog,
            ttl,
            activated: Arc::new(Mutex::new(HashSet::new())),
            lookups: Mutex::new(HashMap::new()),
            heartbeat_started: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }

    /// Starts the task passing the checks of activated instances every third of the TTL.
    fn ensure_heartbeat(&self) {
        if self.heartbeat_started.swap(true, Ordering::AcqRel) {
            return;
        }
        let catalog = self.catalog.clone();
        let activated = self.activated.clone();
        let shutdown = self.shutdown.clone();
        let period = (self.ttl / 3).max(Duration::from_millis(10));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let ids: Vec<String> = activated.lock().iter().cloned().collect();
                for id in ids {
                    if let Err(e) = catalog.pass_check(&id).await {
                        warn!(instance = %id, "Failed to pass TTL check: {}", e);
                    }
                }
            }
        });
    }
}

#[async_trait]
impl RegistryBackend for CatalogBackend {
    async fn do_register(&self, url: &Url) -> Result<()> {
        self.catalog
            .register_service(to_catalog_service(url), self.ttl)
            .await
    }

    async fn do_deregister(&self, url: &Url) -> Result<()> {
        let id = instance_id(url);
        self.activated.lock().remove(&id);
        self.catalog.deregister_service(&id).await
    }

    async fn do_activate(&self, url: &Url) -> Result<()> {
        let id = instance_id(url);
        self.catalog.pass_check(&id).await?;
        self.activated.lock().insert(id);
        self.ensure_heartbeat();
        Ok(())
    }

    async fn do_deactivate(&self, url: &Url) -> Result<()> {
        let id = instance_id(url);
        self.activated.lock().remove(&id);
        self.catalog.fail_check(&id).await
    }

    async fn do_subscribe(
        &self,
        registry_url: &Url,
        consumer: &Url,
        listener: Arc<dyn NotifyListener>,
    ) -> Result<()> {
        let name = service_name(consumer);
        let (index, services) = self
            .catalog
            .healthy_services(&name, 0, Duration::ZERO)
            .await?;
        let initial = providers_for(consumer, &services);
        notify_safely(&listener, registry_url, consumer.path(), initial.clone());

        let token = self.shutdown.child_token();
        let key = (consumer.to_string(), listener_id(&listener));
        if let Some(previous) = self.lookups.lock().insert(key, token.clone()) {
            previous.cancel();
        }

        let catalog = self.catalog.clone();
        let registry_url = registry_url.clone();
        let consumer = consumer.clone();
        tokio::spawn(async move {
            let mut index = index;
            let mut last = initial;
            loop {
                let lookup = tokio::select! {
                    _ = token.cancelled() => break,
                    lookup = catalog.healthy_services(&name, index, LOOKUP_WAIT) => lookup,
                };
                match lookup {
                    Ok((new_index, services)) => {
                        if new_index == index {
                            continue;
                        }
                        index = new_index;
                        let providers = providers_for(&consumer, &services);
                        if providers != last {
                            last = providers.clone();
                            notify_safely(&listener, &registry_url, consumer.path(), providers);
                        }
                    }
                    Err(e) => {
                        warn!(service = %name, "Catalog lookup failed: {}", e);
                        tokio::time::sleep(LOOKUP_ERROR_BACKOFF).await;
                    }
                }
            }
            debug!(interface = %consumer.path(), "Stopped catalog lookup");
        });
        Ok(())
    }

    async fn do_unsubscribe(&self, consumer: &Url, listener: &Arc<dyn NotifyListener>) -> Result<()> {
        if let Some(token) = self
            .lookups
            .lock()
            .remove(&(consumer.to_string(), listener_id(listener)))
        {
            token.cancel();
        }
        Ok(())
    }

    async fn do_discover(&self, consumer: &Url) -> Result<Vec<Url>> {
        let (_, services) = self
            .catalog
            .healthy_services(&service_name(consumer), 0, Duration::ZERO)
            .await?;
        Ok(providers_for(consumer, &services))
    }

    async fn do_discover_all(&self) -> Result<Vec<Url>> {
        let mut providers = Vec::new();
        for name in self.catalog.service_names().await? {
            if name != SERVICE_PREFIX && !name.starts_with(&format!("{}-", SERVICE_PREFIX)) {
                continue;
            }
            let (_, services) = self.catalog.healthy_services(&name, 0, Duration::ZERO).await?;
            providers.extend(
                services
                    .iter()
                    .filter_map(to_url)
                    .filter(is_provider_entry),
            );
        }
        Ok(providers)
    }

    async fn do_close(&self) {
        self.shutdown.cancel();
        self.lookups.lock().clear();
    }
}

impl Drop for CatalogBackend {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Creates catalog registries sharing one catalog.
pub struct CatalogRegistryFactory {
    catalog: Arc<dyn ServiceCatalog>,
    ttl: Duration,
}

impl CatalogRegistryFactory {
    pub const NAME: &'static str = "catalog";

    pub fn new(catalog: Arc<dyn ServiceCatalog>) -> Self {
        Self {
            catalog,
            ttl: DEFAULT_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

impl RegistryFactory for CatalogRegistryFactory {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn create(&self, registry_url: &Url) -> Result<Arc<dyn Registry>> {
        let registry: Arc<dyn Registry> = FailbackRegistry::new(
            registry_url.clone(),
            CatalogBackend::new(self.catalog.clone(), self.ttl),
        )?;
        Ok(registry)
    }
}
