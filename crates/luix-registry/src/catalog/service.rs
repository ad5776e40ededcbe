//! Health-aware service catalog contract and its in-memory implementation.

use async_trait::async_trait;
use luix_common::protocol::{LuixError, Result};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// One service instance in the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogService {
    pub id: String,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub tags: Vec<String>,
}

/// Operations the catalog registry needs from a health-checking service
/// catalog (Consul-style agents and the like).
#[async_trait]
pub trait ServiceCatalog: Send + Sync {
    /// Registers an instance with a TTL check that starts out failing.
    async fn register_service(&self, service: CatalogService, ttl: Duration) -> Result<()>;

    async fn deregister_service(&self, id: &str) -> Result<()>;

    /// Marks the TTL check of `id` as passing for another TTL.
    async fn pass_check(&self, id: &str) -> Result<()>;

    /// Marks the TTL check of `id` as critical.
    async fn fail_check(&self, id: &str) -> Result<()>;

    /// Healthy instances of `name`.
    ///
    /// Blocks up to `wait` while the catalog index is not greater than
    /// `wait_index`, then returns the current index with the instances.
    async fn healthy_services(
        &self,
        name: &str,
        wait_index: u64,
        wait: Duration,
    ) -> Result<(u64, Vec<CatalogService>)>;

    async fn service_names(&self) -> Result<Vec<String>>;
}

#[derive(Debug, Clone)]
struct Instance {
    service: CatalogService,
    ttl: Duration,
    passing_until: Option<Instant>,
}

impl Instance {
    fn is_healthy(&self, now: Instant) -> bool {
        self.passing_until.is_some_and(|deadline| deadline > now)
    }
}

/// In-memory [`ServiceCatalog`] with index-based blocking queries.
pub struct MemoryCatalog {
    instances: Mutex<HashMap<String, Instance>>,
    index: watch::Sender<u64>,
}

impl Default for MemoryCatalog {
    fn default() -> Self {
        Self {
            instances: Mutex::new(HashMap::new()),
            index: watch::channel(1).0,
        }
    }
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current modification index.
    pub fn index(&self) -> u64 {
        *self.index.borrow()
    }

    fn bump(&self) {
        self.index.send_modify(|index| *index += 1);
    }

    fn set_check(&self, id: &str, passing: bool) -> Result<()> {
        let changed = {
            let mut instances = self.instances.lock();
            let instance = instances
                .get_mut(id)
                .ok_or_else(|| LuixError::Registry(format!("Unknown service instance '{}'", id)))?;
            let now = Instant::now();
            let was_healthy = instance.is_healthy(now);
            instance.passing_until = passing.then(|| now + instance.ttl);
            was_healthy != passing
        };
        if changed {
            self.bump();
        }
        Ok(())
    }

    fn snapshot(&self, name: &str) -> Vec<CatalogService> {
        let now = Instant::now();
        let mut services: Vec<CatalogService> = self
            .instances
            .lock()
            .values()
            .filter(|instance| instance.service.name == name && instance.is_healthy(now))
            .map(|instance| instance.service.clone())
            .collect();
        services.sort_by(|a, b| a.id.cmp(&b.id));
        services
    }
}

#[async_trait]
impl ServiceCatalog for MemoryCatalog {
    async fn register_service(&self, service: CatalogService, ttl: Duration) -> Result<()> {
        self.instances.lock().insert(
            service.id.clone(),
            Instance {
                service,
                ttl,
                passing_until: None,
            },
        );
        self.bump();
        Ok(())
    }

    async fn deregister_service(&self, id: &str) -> Result<()> {
        if self.instances.lock().remove(id).is_some() {
            self.bump();
        }
        Ok(())
    }

    async fn pass_check(&self, id: &str) -> Result<()> {
        self.set_check(id, true)
    }

    async fn fail_check(&self, id: &str) -> Result<()> {
        self.set_check(id, false)
    }

    async fn healthy_services(
        &self,
        name: &str,
        wait_index: u64,
        wait: Duration,
    ) -> Result<(u64, Vec<CatalogService>)> {
        let mut changes = self.index.subscribe();
        if *changes.borrow_and_update() <= wait_index {
            // Either the index moves or the wait elapses; both end the query.
            let _ = tokio::time::timeout(wait, changes.changed()).await;
        }
        let index = *changes.borrow();
        Ok((index, self.snapshot(name)))
    }

    async fn service_names(&self) -> Result<Vec<String>> {
        let names: BTreeSet<String> = self
            .instances
            .lock()
            .values()
            .map(|instance| instance.service.name.clone())
            .collect();
        Ok(names.into_iter().collect())
    }
}
