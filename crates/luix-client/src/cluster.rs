use luix_common::protocol::{Request, Response, Result};
use luix_common::url::Url;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::fault_tolerance::FaultTolerance;
use crate::invoker::{Invoker, RequestSender};
use crate::load_balancer::LoadBalancer;

/// Builds the invoker of a newly discovered provider.
pub type InvokerFactory = Arc<dyn Fn(&Url) -> Result<Arc<dyn Invoker>> + Send + Sync>;

/// Factory creating [`RequestSender`]s that connect in the background.
pub fn request_sender_factory() -> InvokerFactory {
    Arc::new(|url: &Url| -> Result<Arc<dyn Invoker>> {
        let invoker: Arc<dyn Invoker> = Arc::new(RequestSender::new(url.clone())?);
        Ok(invoker)
    })
}

/// Invokers of one interface, with the strategies that use them.
///
/// The cluster owns its invokers; the load balancer only ever sees the
/// snapshot handed to it by [`refresh`](Self::refresh).
pub struct ProviderCluster {
    consumer_url: Url,
    invokers: Mutex<HashMap<String, Arc<dyn Invoker>>>,
    load_balancer: Arc<dyn LoadBalancer>,
    fault_tolerance: Arc<dyn FaultTolerance>,
    factory: InvokerFactory,
}

impl ProviderCluster {
    pub fn new(
        consumer_url: Url,
        load_balancer: Arc<dyn LoadBalancer>,
        fault_tolerance: Arc<dyn FaultTolerance>,
        factory: InvokerFactory,
    ) -> Self {
        Self {
            consumer_url,
            invokers: Mutex::new(HashMap::new()),
            load_balancer,
            fault_tolerance,
            factory,
        }
    }

    pub fn consumer_url(&self) -> &Url {
        &self.consumer_url
    }

    pub fn interface(&self) -> &str {
        self.consumer_url.path()
    }

    pub fn load_balancer(&self) -> &Arc<dyn LoadBalancer> {
        &self.load_balancer
    }

    pub fn fault_tolerance(&self) -> &Arc<dyn FaultTolerance> {
        &self.fault_tolerance
    }

    /// Invokers currently visible to the load balancer.
    pub fn invokers(&self) -> Vec<Arc<dyn Invoker>> {
        self.load_balancer.invokers().as_ref().clone()
    }

    /// Reconciles the invoker set with the complete list of providers.
    ///
    /// Existing invokers are reused by url identity, new providers get a new
    /// invoker, and invokers missing from `providers` are handed to the load
    /// balancer for delayed destruction. Never waits for the network.
    pub fn refresh(&self, providers: Vec<Url>) {
        let mut invokers = self.invokers.lock();
        let mut next: HashMap<String, Arc<dyn Invoker>> = HashMap::with_capacity(providers.len());
        let mut ordered: Vec<Arc<dyn Invoker>> = Vec::with_capacity(providers.len());

        for url in providers {
            let identity = url.identity();
            if next.contains_key(&identity) {
                continue;
            }
            let invoker = match invokers.get(&identity) {
                Some(existing) => existing.clone(),
                None => match (self.factory)(&url) {
                    Ok(invoker) => {
                        info!(url = %url, "Created invoker");
                        invoker
                    }
                    Err(e) => {
                        warn!(url = %url, "Failed to create invoker: {}", e);
                        continue;
                    }
                },
            };
            next.insert(identity, invoker.clone());
            ordered.push(invoker);
        }

        let removed = invokers.keys().filter(|key| !next.contains_key(*key)).count();
        debug!(
            interface = %self.interface(),
            invokers = ordered.len(),
            removed,
            "Refreshed provider cluster"
        );

        *invokers = next;
        self.load_balancer.refresh(ordered);
    }

    /// Sends `request` through the fault tolerance strategy.
    pub async fn call(&self, request: Request) -> Result<Response> {
        self.fault_tolerance
            .invoke(self.load_balancer.as_ref(), request)
            .await
    }

    /// Destroys every invoker at once.
    pub fn destroy(&self) {
        let invokers: Vec<Arc<dyn Invoker>> = self.invokers.lock().drain().map(|(_, i)| i).collect();
        self.load_balancer.refresh(Vec::new());
        for invoker in invokers {
            invoker.destroy();
        }
    }
}

impl fmt::Debug for ProviderCluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCluster")
            .field("interface", &self.interface())
            .field("load_balancer", &self.load_balancer.name())
            .field("fault_tolerance", &self.fault_tolerance.name())
            .field("invokers", &self.invokers.lock().len())
            .finish()
    }
}
