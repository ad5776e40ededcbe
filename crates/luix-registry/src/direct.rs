//! Registry over a static address list.
//!
//! Used for point-to-point calls without a coordination service:
//!
//! ```text
//! direct://127.0.0.1:0/direct?address=10.0.0.1:20880,10.0.0.2:20880
//! ```
//!
//! Every consumer sees one provider per address; subscribers are notified
//! once, at subscription time.

use async_trait::async_trait;
use luix_common::protocol::{LuixError, Result};
use luix_common::url::{params, Url};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::registry::{notify_safely, NotifyListener, Registry, RegistryFactory};

pub struct DirectRegistry {
    registry_url: Url,
    addresses: Vec<(String, u16)>,
    registered: Mutex<HashMap<String, Url>>,
}

impl DirectRegistry {
    /// Builds the registry from the `address` parameter of `registry_url`,
    /// falling back to the registry url's own address.
    ///
    /// # Errors
    ///
    /// Returns [`LuixError::Configuration`] for a malformed address or an
    /// empty address list.
    pub fn new(registry_url: Url) -> Result<Self> {
        let mut raw = registry_url.list_parameter(params::ADDRESS);
        if raw.is_empty() && registry_url.port() != 0 {
            raw.push(registry_url.address());
        }
        if raw.is_empty() {
            return Err(LuixError::Configuration(format!(
                "Direct registry {} has no address",
                registry_url
            )));
        }

        let addresses = raw
            .iter()
            .map(|address| parse_address(address))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            registry_url,
            addresses,
            registered: Mutex::new(HashMap::new()),
        })
    }

    pub fn addresses(&self) -> &[(String, u16)] {
        &self.addresses
    }

    fn providers_for(&self, consumer: &Url) -> Vec<Url> {
        self.addresses
            .iter()
            .map(|(host, port)| {
                consumer
                    .with_address(host.clone(), *port)
                    .with_parameter(params::TYPE, params::TYPE_PROVIDER)
            })
            .collect()
    }
}

fn parse_address(address: &str) -> Result<(String, u16)> {
    let (host, port) = address.rsplit_once(':').ok_or_else(|| {
        LuixError::Configuration(format!("Address '{}' must be host:port", address))
    })?;
    let port = port
        .parse::<u16>()
        .map_err(|_| LuixError::Configuration(format!("Invalid port in address '{}'", address)))?;
    if host.is_empty() {
        return Err(LuixError::Configuration(format!(
            "Missing host in address '{}'",
            address
        )));
    }
    Ok((host.to_string(), port))
}

#[async_trait]
impl Registry for DirectRegistry {
    fn registry_url(&self) -> &Url {
        &self.registry_url
    }

    async fn register(&self, url: &Url) -> Result<()> {
        self.registered.lock().insert(url.identity(), url.clone());
        Ok(())
    }

    async fn deregister(&self, url: &Url) -> Result<()> {
        self.registered.lock().remove(&url.identity());
        Ok(())
    }

    async fn activate(&self, _url: &Url) -> Result<()> {
        Ok(())
    }

    async fn deactivate(&self, _url: &Url) -> Result<()> {
        Ok(())
    }

    async fn subscribe(&self, consumer: &Url, listener: Arc<dyn NotifyListener>) -> Result<()> {
        notify_safely(
            &listener,
            &self.registry_url,
            consumer.path(),
            self.providers_for(consumer),
        );
        Ok(())
    }

    async fn unsubscribe(&self, _consumer: &Url, _listener: &Arc<dyn NotifyListener>) -> Result<()> {
        Ok(())
    }

    async fn discover(&self, consumer: &Url) -> Result<Vec<Url>> {
        Ok(self.providers_for(consumer))
    }

    async fn discover_all(&self) -> Result<Vec<Url>> {
        Ok(self.registered_urls())
    }

    fn registered_urls(&self) -> Vec<Url> {
        self.registered.lock().values().cloned().collect()
    }
}

#[derive(Debug, Default)]
pub struct DirectRegistryFactory;

impl DirectRegistryFactory {
    pub const NAME: &'static str = "direct";
}

impl RegistryFactory for DirectRegistryFactory {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn create(&self, registry_url: &Url) -> Result<Arc<dyn Registry>> {
        Ok(Arc::new(DirectRegistry::new(registry_url.clone())?))
    }
}
