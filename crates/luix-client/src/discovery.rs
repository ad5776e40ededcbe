//! Glue between registry notifications and provider clusters.

use luix_common::protocol::Result;
use luix_common::url::Url;
use luix_registry::{NotifyListener, Registry};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cluster::ProviderCluster;

/// Feeds registry snapshots into one [`ProviderCluster`].
///
/// With several registries, the latest snapshot of each is kept and the
/// cluster sees their union. Notifications are handled synchronously,
/// one at a time, and never wait for the network.
pub struct ClusterListener {
    cluster: Arc<ProviderCluster>,
    snapshots: Mutex<BTreeMap<String, Vec<Url>>>,
}

impl ClusterListener {
    pub fn new(cluster: Arc<ProviderCluster>) -> Arc<Self> {
        Arc::new(Self {
            cluster,
            snapshots: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn cluster(&self) -> &Arc<ProviderCluster> {
        &self.cluster
    }
}

impl NotifyListener for ClusterListener {
    fn notify(&self, registry_url: &Url, interface: &str, providers: Vec<Url>) -> Result<()> {
        let consumer = self.cluster.consumer_url();
        if interface != consumer.path() {
            debug!(interface, "Ignoring notification for another interface");
            return Ok(());
        }

        let providers: Vec<Url> = providers
            .into_iter()
            .filter(|url| url.protocol() == consumer.protocol())
            .collect();

        // Merged and applied under one lock, so the cluster always ends up
        // with the union of the latest snapshots.
        let mut snapshots = self.snapshots.lock();
        snapshots.insert(registry_url.identity(), providers);
        let mut seen = HashSet::new();
        let merged: Vec<Url> = snapshots
            .values()
            .flatten()
            .filter(|url| seen.insert(url.identity()))
            .cloned()
            .collect();

        if merged.is_empty() {
            warn!(
                interface,
                registry = %registry_url,
                "No active providers, every instance is offline"
            );
        }
        self.cluster.refresh(merged);
        Ok(())
    }
}

/// Subscribes `listener` to `consumer` on every registry.
///
/// Stops at the first registry that refuses the subscription.
pub async fn subscribe_all(
    registries: &[Arc<dyn Registry>],
    consumer: &Url,
    listener: Arc<dyn NotifyListener>,
) -> Result<()> {
    for registry in registries {
        registry.subscribe(consumer, listener.clone()).await?;
        debug!(
            registry = %registry.registry_url(),
            interface = %consumer.path(),
            "Subscribed consumer"
        );
    }
    Ok(())
}

/// Removes the subscriptions made by [`subscribe_all`], logging failures.
pub async fn unsubscribe_all(
    registries: &[Arc<dyn Registry>],
    consumer: &Url,
    listener: &Arc<dyn NotifyListener>,
) {
    for registry in registries {
        if let Err(e) = registry.unsubscribe(consumer, listener).await {
            warn!(
                registry = %registry.registry_url(),
                interface = %consumer.path(),
                "Failed to unsubscribe: {}",
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::InvokerFactory;
    use crate::fault_tolerance::FailfastFaultTolerance;
    use crate::invoker::Invoker;
    use crate::load_balancer::RandomLoadBalancer;
    use crate::testing::FakeInvoker;

    fn cluster() -> Arc<ProviderCluster> {
        let factory: InvokerFactory = Arc::new(|url: &Url| -> Result<Arc<dyn Invoker>> {
            Ok(FakeInvoker::ok(url.host()) as Arc<dyn Invoker>)
        });
        Arc::new(ProviderCluster::new(
            Url::consumer("luix", "10.0.0.9", "com.acme.OrderService"),
            Arc::new(RandomLoadBalancer::new()),
            Arc::new(FailfastFaultTolerance),
            factory,
        ))
    }

    fn provider(host: &str) -> Url {
        Url::provider("luix", host, 20880, "com.acme.OrderService")
    }

    fn hosts(listener: &ClusterListener) -> Vec<String> {
        let mut hosts: Vec<String> = listener
            .cluster()
            .invokers()
            .iter()
            .map(|i| i.url().host().to_string())
            .collect();
        hosts.sort();
        hosts
    }

    #[tokio::test]
    async fn test_snapshots_of_registries_are_merged() {
        let listener = ClusterListener::new(cluster());
        let first = Url::registry("keystore", "127.0.0.1", 2181);
        let second = Url::registry("catalog", "127.0.0.1", 8500);

        listener
            .notify(&first, "com.acme.OrderService", vec![provider("A"), provider("B")])
            .unwrap();
        listener
            .notify(&second, "com.acme.OrderService", vec![provider("B"), provider("C")])
            .unwrap();
        assert_eq!(hosts(&listener), vec!["A", "B", "C"]);

        // The latest snapshot of a registry replaces its previous one.
        listener
            .notify(&first, "com.acme.OrderService", Vec::new())
            .unwrap();
        assert_eq!(hosts(&listener), vec!["B", "C"]);
    }

    #[tokio::test]
    async fn test_other_protocols_and_interfaces_are_ignored() {
        let listener = ClusterListener::new(cluster());
        let registry = Url::registry("direct", "127.0.0.1", 0);
        let foreign = Url::provider("grpc", "D", 9090, "com.acme.OrderService");

        listener
            .notify(&registry, "com.acme.OrderService", vec![provider("A"), foreign])
            .unwrap();
        listener
            .notify(&registry, "com.acme.StockService", vec![provider("Z")])
            .unwrap();
        assert_eq!(hosts(&listener), vec!["A"]);
    }

    #[test]
    fn test_concurrent_notifications_keep_latest_union() {
        let listener = ClusterListener::new(cluster());
        let registries = [
            (Url::registry("keystore", "127.0.0.1", 2181), "A"),
            (Url::registry("catalog", "127.0.0.1", 8500), "B"),
        ];

        std::thread::scope(|scope| {
            for (registry, host) in &registries {
                let listener = &listener;
                scope.spawn(move || {
                    for round in 0..200 {
                        let providers = match round % 3 {
                            0 => Vec::new(),
                            1 => vec![provider("X")],
                            _ => vec![provider(host)],
                        };
                        listener
                            .notify(registry, "com.acme.OrderService", providers)
                            .unwrap();
                    }
                    listener
                        .notify(registry, "com.acme.OrderService", vec![provider(host)])
                        .unwrap();
                });
            }
        });

        assert_eq!(hosts(&listener), vec!["A", "B"]);
    }
}
