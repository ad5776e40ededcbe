use luix_common::protocol::{LuixError, Result};
use luix_common::url::{params, Url};
use luix_registry::{Registries, Registry};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::exposer::ProviderExposer;
use crate::service::ServiceDefinition;

/// Provider configuration.
///
/// Interface, group and version come from the service definition.
///
/// # Default Configuration
///
/// - `protocol`: "luix"
/// - `host`: "127.0.0.1"
/// - `port`: 0, a free port is picked when exposing
/// - no registries, the provider is reachable by direct address only
#[derive(Clone)]
pub struct ProviderConfig {
    pub service: Arc<ServiceDefinition>,
    pub protocol: String,
    /// Host bound and advertised to consumers
    pub host: String,
    pub port: u16,
    pub registries: Vec<Url>,
    /// Extra provider url parameters, such as `maxWorkerThread` or `weights`
    pub parameters: BTreeMap<String, String>,
}

impl ProviderConfig {
    pub fn new(service: ServiceDefinition) -> Self {
        Self {
            service: Arc::new(service),
            protocol: "luix".to_string(),
            host: "127.0.0.1".to_string(),
            port: 0,
            registries: Vec::new(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_address(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    pub fn with_registry(mut self, registry_url: Url) -> Self {
        self.registries.push(registry_url);
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Url the provider is exposed with, before the port is resolved.
    pub fn provider_url(&self) -> Url {
        Url::provider(
            self.protocol.clone(),
            self.host.clone(),
            self.port,
            self.service.interface(),
        )
        .with_parameters(self.parameters.clone())
        .with_parameters([
            (params::GROUP, self.service.group()),
            (params::VERSION, self.service.version()),
            (params::CODEC, params::DEFAULT_CODEC),
        ])
    }

    /// Exposes the service, then registers and activates it on every
    /// configured registry.
    ///
    /// A registration failure withdraws whatever was done before it.
    ///
    /// # Errors
    ///
    /// Returns the exposure error, [`LuixError::Configuration`] for an
    /// unknown registry, or the registry error.
    pub async fn export(
        &self,
        exposer: &Arc<ProviderExposer>,
        registries: &Registries,
    ) -> Result<ExportedProvider> {
        if self.service.interface().is_empty() {
            return Err(LuixError::Configuration("Provider interface is empty".to_string()));
        }

        let url = exposer.expose(&self.provider_url(), self.service.clone()).await?;
        let mut exported = ExportedProvider {
            registered_url: url.without_local_parameters(),
            url,
            registries: Vec::new(),
            exposer: exposer.clone(),
        };

        for registry_url in &self.registries {
            if let Err(e) = exported.register_with(registries, registry_url).await {
                warn!(registry = %registry_url, "Failed to register provider: {}", e);
                exported.withdraw().await;
                return Err(e);
            }
        }

        info!(url = %exported.url, registries = exported.registries.len(), "Exported provider");
        Ok(exported)
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("url", &self.provider_url().to_string())
            .field("registries", &self.registries)
            .finish()
    }
}

/// A provider that is exposed and registered.
pub struct ExportedProvider {
    url: Url,
    registered_url: Url,
    registries: Vec<Arc<dyn Registry>>,
    exposer: Arc<ProviderExposer>,
}

impl ExportedProvider {
    /// Url the provider is exposed at, with its resolved port.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Url written to the registries.
    pub fn registered_url(&self) -> &Url {
        &self.registered_url
    }

    async fn register_with(&mut self, registries: &Registries, registry_url: &Url) -> Result<()> {
        let registry = registries.get_or_create(registry_url)?;
        registry.register(&self.registered_url).await?;
        self.registries.push(registry.clone());
        registry.activate(&self.registered_url).await
    }

    /// Deactivates and deregisters on every registry, then unexposes.
    pub async fn unexport(mut self) -> Result<()> {
        self.deregister_all().await;
        self.exposer.unexpose(&self.url).await?;
        info!(url = %self.url, "Unexported provider");
        Ok(())
    }

    async fn deregister_all(&mut self) {
        for registry in self.registries.drain(..) {
            if let Err(e) = registry.deactivate(&self.registered_url).await {
                warn!(registry = %registry.registry_url(), "Failed to deactivate provider: {}", e);
            }
            if let Err(e) = registry.deregister(&self.registered_url).await {
                warn!(registry = %registry.registry_url(), "Failed to deregister provider: {}", e);
            }
        }
    }

    async fn withdraw(&mut self) {
        self.deregister_all().await;
        if let Err(e) = self.exposer.unexpose(&self.url).await {
            warn!(url = %self.url, "Failed to unexpose provider: {}", e);
        }
    }
}

impl fmt::Debug for ExportedProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportedProvider")
            .field("url", &self.url.to_string())
            .field("registries", &self.registries.len())
            .finish()
    }
}
