use luix_common::protocol::{LuixError, Result};
use luix_common::url::Url;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::builtin::{builtin_service, Application};
use crate::router::ServiceRouter;
use crate::server::{RpcServer, ServerConfig};
use crate::service::ServiceDefinition;

#[derive(Default)]
struct ExposureTable {
    /// Running servers by `host:port`.
    servers: HashMap<String, RpcServer>,
    /// Exposed provider urls by `host:port/group/interface/version`.
    exposed: HashMap<String, Url>,
}

fn server_key(host: &str, port: u16) -> String {
    format!("{}:{}", host, port)
}

fn exposure_key(url: &Url) -> String {
    format!("{}:{}/{}", url.host(), url.port(), url.service_key())
}

/// Binds services to server addresses.
///
/// The first service exposed on an address starts its server, which always
/// carries the built-in service too. Exposing the same interface, group and
/// version twice on one address fails with [`LuixError::ExposureConflict`].
pub struct ProviderExposer {
    application: Application,
    table: Mutex<ExposureTable>,
}

impl Default for ProviderExposer {
    fn default() -> Self {
        Self::new(Application::default())
    }
}

impl ProviderExposer {
    pub fn new(application: Application) -> Self {
        Self {
            application,
            table: Mutex::new(ExposureTable::default()),
        }
    }

    pub fn application(&self) -> &Application {
        &self.application
    }

    /// Exposes `service` at the address of `url` and returns the url it is
    /// reachable at. Port 0 picks a free port.
    ///
    /// # Errors
    ///
    /// - [`LuixError::Configuration`] when `service` is not the one `url` names
    /// - [`LuixError::ExposureConflict`] when it is already exposed there
    /// - [`LuixError::Connection`] when the address cannot be bound
    pub async fn expose(&self, url: &Url, service: Arc<ServiceDefinition>) -> Result<Url> {
        if service.service_key() != url.service_key() {
            return Err(LuixError::Configuration(format!(
                "Service {} cannot be exposed as {}",
                service.service_key(),
                url.service_key()
            )));
        }

        let mut table = self.table.lock().await;
        if url.port() != 0 && table.exposed.contains_key(&exposure_key(url)) {
            return Err(LuixError::ExposureConflict(exposure_key(url)));
        }

        let exposed_url = self.open_in(&mut table, url).await?;
        if let Some(server) = table
            .servers
            .get(&server_key(exposed_url.host(), exposed_url.port()))
        {
            server.router().add(service);
        }

        info!(url = %exposed_url, "Exposed service");
        table
            .exposed
            .insert(exposure_key(&exposed_url), exposed_url.clone());
        Ok(exposed_url)
    }

    /// Starts a server on the address of `url` unless one is running there,
    /// and returns `url` with the port it listens on.
    ///
    /// The server only carries the built-in service until something is
    /// exposed on it.
    pub async fn open(&self, url: &Url) -> Result<Url> {
        let mut table = self.table.lock().await;
        self.open_in(&mut table, url).await
    }

    async fn open_in(&self, table: &mut ExposureTable, url: &Url) -> Result<Url> {
        if url.port() != 0 && table.servers.contains_key(&server_key(url.host(), url.port())) {
            return Ok(url.clone());
        }
        let server = self.start_server(url).await?;
        let port = server.local_addr().port();
        table.servers.insert(server_key(url.host(), port), server);
        Ok(url.with_address(url.host(), port))
    }

    async fn start_server(&self, url: &Url) -> Result<RpcServer> {
        let router = Arc::new(ServiceRouter::new());
        router.add(Arc::new(builtin_service(
            self.application.clone(),
            Arc::downgrade(&router),
        )));
        RpcServer::start(ServerConfig::from_url(url), router).await
    }

    /// Withdraws the service `url` names. The server of the address stops
    /// once no application service is left on it.
    ///
    /// # Errors
    ///
    /// Returns [`LuixError::ServiceNotFound`] when nothing is exposed at `url`.
    pub async fn unexpose(&self, url: &Url) -> Result<()> {
        let mut table = self.table.lock().await;
        let key = exposure_key(url);
        if table.exposed.remove(&key).is_none() {
            return Err(LuixError::ServiceNotFound(key));
        }

        let address = server_key(url.host(), url.port());
        let idle = match table.servers.get(&address) {
            Some(server) => {
                server.router().remove(&url.service_key());
                server.router().application_services().is_empty()
            }
            None => false,
        };
        info!(url = %url, "Unexposed service");

        if idle {
            if let Some(server) = table.servers.remove(&address) {
                if let Err(e) = server.stop().await {
                    warn!(address = %address, "Failed to stop server: {}", e);
                }
            }
        }
        Ok(())
    }

    pub async fn is_exposed(&self, url: &Url) -> bool {
        self.table.lock().await.exposed.contains_key(&exposure_key(url))
    }

    /// Exposed provider urls, sorted.
    pub async fn exposed_urls(&self) -> Vec<Url> {
        let table = self.table.lock().await;
        let mut keys: Vec<&String> = table.exposed.keys().collect();
        keys.sort();
        keys.into_iter().map(|key| table.exposed[key].clone()).collect()
    }

    /// Addresses with a running server, sorted.
    pub async fn server_addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.table.lock().await.servers.keys().cloned().collect();
        addresses.sort();
        addresses
    }

    /// Stops every server and forgets every exposure.
    pub async fn shutdown(&self) {
        let mut table = self.table.lock().await;
        table.exposed.clear();
        for (address, server) in table.servers.drain() {
            if let Err(e) = server.stop().await {
                warn!(address = %address, "Failed to stop server: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use luix_common::url::params;

    fn echo() -> Arc<ServiceDefinition> {
        Arc::new(
            ServiceDefinition::new("com.acme.EchoService")
                .method("echo", &["String"], |(text,): (String,)| async move { Ok(text) }),
        )
    }

    fn url(port: u16) -> Url {
        Url::provider("luix", "127.0.0.1", port, "com.acme.EchoService")
    }

    #[tokio::test]
    async fn test_second_exposure_conflicts() {
        let exposer = ProviderExposer::default();
        let exposed = exposer.expose(&url(0), echo()).await.unwrap();
        assert_ne!(exposed.port(), 0);

        let err = exposer.expose(&exposed, echo()).await.unwrap_err();
        assert!(matches!(err, LuixError::ExposureConflict(_)));
        exposer.shutdown().await;
    }

    #[tokio::test]
    async fn test_unexpose_then_expose_again() {
        let exposer = ProviderExposer::default();
        let exposed = exposer.expose(&url(0), echo()).await.unwrap();
        exposer.unexpose(&exposed).await.unwrap();
        assert!(exposer.server_addresses().await.is_empty());
        assert!(matches!(
            exposer.unexpose(&exposed).await,
            Err(LuixError::ServiceNotFound(_))
        ));

        let again = exposer.expose(&url(0), echo()).await.unwrap();
        assert!(exposer.is_exposed(&again).await);
        exposer.shutdown().await;
    }

    #[tokio::test]
    async fn test_services_share_an_address() {
        let exposer = ProviderExposer::default();
        let blue = exposer.expose(&url(0), echo()).await.unwrap();
        let green_url = blue.with_parameter(params::GROUP, "green");
        let green = Arc::new(
            ServiceDefinition::new("com.acme.EchoService")
                .with_group("green")
                .method("echo", &["String"], |(text,): (String,)| async move { Ok(text) }),
        );
        exposer.expose(&green_url, green).await.unwrap();
        assert_eq!(exposer.server_addresses().await.len(), 1);
        assert_eq!(exposer.exposed_urls().await.len(), 2);

        // The server stays up while one application service remains.
        exposer.unexpose(&blue).await.unwrap();
        assert_eq!(exposer.server_addresses().await.len(), 1);
        exposer.unexpose(&green_url).await.unwrap();
        assert!(exposer.server_addresses().await.is_empty());
    }

    #[tokio::test]
    async fn test_open_reuses_running_server() {
        let exposer = ProviderExposer::default();
        let opened = exposer.open(&url(0)).await.unwrap();
        let again = exposer.open(&opened).await.unwrap();
        assert_eq!(again.port(), opened.port());
        assert_eq!(exposer.server_addresses().await.len(), 1);
        assert!(exposer.exposed_urls().await.is_empty());

        exposer.expose(&opened, echo()).await.unwrap();
        assert_eq!(exposer.server_addresses().await.len(), 1);
        exposer.shutdown().await;
    }

    #[tokio::test]
    async fn test_mismatched_service_is_rejected() {
        let exposer = ProviderExposer::default();
        let other = Url::provider("luix", "127.0.0.1", 0, "com.acme.OtherService");
        let err = exposer.expose(&other, echo()).await.unwrap_err();
        assert!(matches!(err, LuixError::Configuration(_)));
    }
}
