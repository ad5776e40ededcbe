use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::client::SharedPoolClient;

/// Health check configuration.
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    pub interval: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
        }
    }
}

/// Re-activates clients that stopped answering.
///
/// Clients are tracked weakly; destroyed or dropped clients fall out of the
/// list on the next round. Only inactive clients receive heartbeats.
pub struct HealthCheckManager {
    config: HealthCheckConfig,
    clients: Mutex<Vec<Weak<SharedPoolClient>>>,
    started: AtomicBool,
    shutdown: CancellationToken,
}

impl Default for HealthCheckManager {
    fn default() -> Self {
        Self::new(HealthCheckConfig::default())
    }
}

impl HealthCheckManager {
    pub fn new(config: HealthCheckConfig) -> Self {
        Self {
            config,
            clients: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &HealthCheckConfig {
        &self.config
    }

    /// Adds `client` to the checked set and starts the check task if a
    /// runtime is available.
    pub fn track(self: &Arc<Self>, client: &Arc<SharedPoolClient>) {
        self.clients.lock().push(Arc::downgrade(client));
        self.ensure_started();
    }

    pub fn tracked(&self) -> usize {
        self.clients
            .lock()
            .iter()
            .filter(|client| client.strong_count() > 0)
            .count()
    }

    fn ensure_started(self: &Arc<Self>) {
        if tokio::runtime::Handle::try_current().is_err() {
            return;
        }
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        self.clone().spawn();
    }

    /// Starts the health check task.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.started.store(true, Ordering::Release);
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.interval);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            self.check_inactive_clients().await;
        }
        debug!("Health check manager stopped");
    }

    /// Heartbeats every inactive client once; returns how many recovered.
    pub async fn check_inactive_clients(&self) -> usize {
        let inactive: Vec<Arc<SharedPoolClient>> = {
            let mut clients = self.clients.lock();
            clients.retain(|client| {
                client
                    .upgrade()
                    .is_some_and(|client| !client.is_destroyed())
            });
            clients
                .iter()
                .filter_map(Weak::upgrade)
                .filter(|client| !client.is_active())
                .collect()
        };
        if inactive.is_empty() {
            return 0;
        }

        let checks = inactive.into_iter().map(|client| async move {
            let healthy = client.check_health().await;
            (client, healthy)
        });
        let results = futures::future::join_all(checks).await;

        let mut recovered = 0;
        for (client, healthy) in results {
            if healthy {
                info!(url = %client.url(), "Client recovered");
                recovered += 1;
            } else {
                debug!(url = %client.url(), "Client still unreachable");
            }
        }
        recovered
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for HealthCheckManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
