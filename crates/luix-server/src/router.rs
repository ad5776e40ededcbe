use arc_swap::ArcSwap;
use luix_common::protocol::{LuixError, Request, Response, Result};
use luix_common::url::ServiceKey;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::builtin::BUILTIN_INTERFACE;
use crate::service::ServiceDefinition;

/// Service table of one server address.
///
/// Lookups read a copy-on-write snapshot; changes come from the exposer,
/// which serializes them.
#[derive(Default)]
pub struct ServiceRouter {
    services: ArcSwap<HashMap<ServiceKey, Arc<ServiceDefinition>>>,
}

impl ServiceRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `service`, replacing any service with the same key.
    pub fn add(&self, service: Arc<ServiceDefinition>) {
        let key = service.service_key();
        self.services.rcu(|services| {
            let mut services = HashMap::clone(services);
            services.insert(key.clone(), service.clone());
            services
        });
    }

    pub fn remove(&self, key: &ServiceKey) -> Option<Arc<ServiceDefinition>> {
        let removed = self.services.load().get(key).cloned();
        if removed.is_some() {
            self.services.rcu(|services| {
                let mut services = HashMap::clone(services);
                services.remove(key);
                services
            });
        }
        removed
    }

    pub fn contains(&self, key: &ServiceKey) -> bool {
        self.services.load().contains_key(key)
    }

    pub fn service_keys(&self) -> Vec<ServiceKey> {
        let mut keys: Vec<ServiceKey> = self.services.load().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Application services, the built-in service excluded.
    pub fn application_services(&self) -> Vec<ServiceKey> {
        self.service_keys()
            .into_iter()
            .filter(|key| key.interface != BUILTIN_INTERFACE)
            .collect()
    }

    /// Finds the service bound to the request's interface, group and version.
    ///
    /// # Errors
    ///
    /// Returns [`LuixError::ServiceNotFound`] when nothing is bound.
    pub fn route(&self, request: &Request) -> Result<Arc<ServiceDefinition>> {
        let key = request.service_key();
        self.services
            .load()
            .get(&key)
            .cloned()
            .ok_or_else(|| LuixError::ServiceNotFound(key.to_string()))
    }

    pub async fn handle(&self, request: Request) -> Response {
        match self.route(&request) {
            Ok(service) => service.invoke(request).await,
            Err(e) => {
                debug!(request_id = request.id, "{}", e);
                Response::error(request.id, &e)
            }
        }
    }
}
