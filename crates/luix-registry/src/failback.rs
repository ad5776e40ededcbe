//! Failback wrapper shared by the coordination-service backends.
//!
//! Register, deregister, subscribe and unsubscribe operations that fail are
//! remembered and retried every `retryInterval` until they succeed. The
//! wrapper also caches registered urls and the last discovery result per
//! consumer, so a failed subscription can still be served from the cache.

use async_trait::async_trait;
use luix_common::protocol::{LuixError, Result};
use luix_common::url::{params, Url};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::registry::{listener_id, notify_safely, NotifyListener, Registry};

/// Operations a backend implements; the failback bookkeeping is layered on top.
#[async_trait]
pub trait RegistryBackend: Send + Sync + 'static {
    async fn do_register(&self, url: &Url) -> Result<()>;

    async fn do_deregister(&self, url: &Url) -> Result<()>;

    async fn do_activate(&self, url: &Url) -> Result<()>;

    async fn do_deactivate(&self, url: &Url) -> Result<()>;

    async fn do_subscribe(
        &self,
        registry_url: &Url,
        consumer: &Url,
        listener: Arc<dyn NotifyListener>,
    ) -> Result<()>;

    async fn do_unsubscribe(&self, consumer: &Url, listener: &Arc<dyn NotifyListener>) -> Result<()>;

    async fn do_discover(&self, consumer: &Url) -> Result<Vec<Url>>;

    async fn do_discover_all(&self) -> Result<Vec<Url>>;

    async fn do_close(&self) {}
}

type DiscoveryCache = Arc<Mutex<HashMap<String, Vec<Url>>>>;

/// Records every delivered snapshot before forwarding it.
struct CachingListener {
    inner: Arc<dyn NotifyListener>,
    cache: DiscoveryCache,
    key: String,
}

impl NotifyListener for CachingListener {
    fn notify(&self, registry_url: &Url, interface: &str, providers: Vec<Url>) -> Result<()> {
        self.cache.lock().insert(self.key.clone(), providers.clone());
        self.inner.notify(registry_url, interface, providers)
    }
}

struct Subscription {
    consumer: Url,
    listener: Arc<dyn NotifyListener>,
    delivering: Arc<dyn NotifyListener>,
}

#[derive(Default)]
struct FailedOperations {
    register: HashMap<String, Url>,
    deregister: HashMap<String, Url>,
    subscribe: Vec<(Url, Arc<dyn NotifyListener>)>,
    unsubscribe: Vec<(Url, Arc<dyn NotifyListener>)>,
}

impl FailedOperations {
    fn is_empty(&self) -> bool {
        self.register.is_empty()
            && self.deregister.is_empty()
            && self.subscribe.is_empty()
            && self.unsubscribe.is_empty()
    }
}

/// Registry with failback retries around a [`RegistryBackend`].
pub struct FailbackRegistry<B: RegistryBackend> {
    registry_url: Url,
    backend: B,
    registered: Mutex<HashMap<String, Url>>,
    subscriptions: Mutex<Vec<Subscription>>,
    discovered: DiscoveryCache,
    failed: Mutex<FailedOperations>,
    shutdown: CancellationToken,
}

fn consumer_key(consumer: &Url) -> String {
    consumer.to_string()
}

impl<B: RegistryBackend> FailbackRegistry<B> {
    /// Creates the registry and starts its retry task.
    ///
    /// # Errors
    ///
    /// Returns [`LuixError::Configuration`] when called outside a tokio runtime.
    pub fn new(registry_url: Url, backend: B) -> Result<Arc<Self>> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            LuixError::Configuration(format!(
                "Registry {} must be created inside a tokio runtime",
                registry_url
            ))
        })?;
        let retry_interval =
            registry_url.duration_parameter(params::RETRY_INTERVAL, params::DEFAULT_RETRY_INTERVAL_MS);

        let registry = Arc::new(Self {
            registry_url,
            backend,
            registered: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(Vec::new()),
            discovered: Arc::new(Mutex::new(HashMap::new())),
            failed: Mutex::new(FailedOperations::default()),
            shutdown: CancellationToken::new(),
        });

        handle.spawn(Self::retry_loop(
            Arc::downgrade(&registry),
            retry_interval,
            registry.shutdown.clone(),
        ));
        Ok(registry)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Whether any failed operation is waiting for a retry.
    pub fn has_failed_operations(&self) -> bool {
        !self.failed.lock().is_empty()
    }

    async fn retry_loop(registry: Weak<Self>, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match registry.upgrade() {
                Some(registry) => registry.retry_failed().await,
                None => break,
            }
        }
    }

    /// Retries every failed operation once.
    pub async fn retry_failed(&self) {
        let (register, deregister, subscribe, unsubscribe) = {
            let failed = self.failed.lock();
            if failed.is_empty() {
                return;
            }
            (
                failed.register.clone(),
                failed.deregister.clone(),
                failed.subscribe.clone(),
                failed.unsubscribe.clone(),
            )
        };

        for (key, url) in register {
            if self.backend.do_register(&url).await.is_ok() {
                info!(url = %url, "Retried register succeeded");
                self.failed.lock().register.remove(&key);
            }
        }
        for (key, url) in deregister {
            if self.backend.do_deregister(&url).await.is_ok() {
                info!(url = %url, "Retried deregister succeeded");
                self.failed.lock().deregister.remove(&key);
            }
        }
        for (consumer, listener) in subscribe {
            if self
                .backend
                .do_subscribe(&self.registry_url, &consumer, listener.clone())
                .await
                .is_ok()
            {
                info!(consumer = %consumer, "Retried subscribe succeeded");
                let id = listener_id(&listener);
                self.failed
                    .lock()
                    .subscribe
                    .retain(|(c, l)| !(c == &consumer && listener_id(l) == id));
            }
        }
        for (consumer, listener) in unsubscribe {
            if self.backend.do_unsubscribe(&consumer, &listener).await.is_ok() {
                info!(consumer = %consumer, "Retried unsubscribe succeeded");
                let id = listener_id(&listener);
                self.failed
                    .lock()
                    .unsubscribe
                    .retain(|(c, l)| !(c == &consumer && listener_id(l) == id));
            }
        }
    }
}

#[async_trait]
impl<B: RegistryBackend> Registry for FailbackRegistry<B> {
    fn registry_url(&self) -> &Url {
        &self.registry_url
    }

    async fn register(&self, url: &Url) -> Result<()> {
        let key = url.identity();
        self.registered.lock().insert(key.clone(), url.clone());
        self.failed.lock().deregister.remove(&key);

        if let Err(e) = self.backend.do_register(url).await {
            warn!(url = %url, "Failed to register, will retry: {}", e);
            self.failed.lock().register.insert(key, url.clone());
        } else {
            debug!(url = %url, "Registered provider");
        }
        Ok(())
    }

    async fn deregister(&self, url: &Url) -> Result<()> {
        let key = url.identity();
        self.registered.lock().remove(&key);
        self.failed.lock().register.remove(&key);

        if let Err(e) = self.backend.do_deregister(url).await {
            warn!(url = %url, "Failed to deregister, will retry: {}", e);
            self.failed.lock().deregister.insert(key, url.clone());
        } else {
            debug!(url = %url, "Deregistered provider");
        }
        Ok(())
    }

    async fn activate(&self, url: &Url) -> Result<()> {
        self.backend.do_activate(url).await
    }

    async fn deactivate(&self, url: &Url) -> Result<()> {
        self.backend.do_deactivate(url).await
    }

    async fn subscribe(&self, consumer: &Url, listener: Arc<dyn NotifyListener>) -> Result<()> {
        let key = consumer_key(consumer);
        let delivering: Arc<dyn NotifyListener> = Arc::new(CachingListener {
            inner: listener.clone(),
            cache: self.discovered.clone(),
            key: key.clone(),
        });
        self.subscriptions.lock().push(Subscription {
            consumer: consumer.clone(),
            listener: listener.clone(),
            delivering: delivering.clone(),
        });

        if let Err(e) = self
            .backend
            .do_subscribe(&self.registry_url, consumer, delivering.clone())
            .await
        {
            warn!(consumer = %consumer, "Failed to subscribe, will retry: {}", e);
            let cached = self.discovered.lock().get(&key).cloned();
            if let Some(providers) = cached {
                notify_safely(&listener, &self.registry_url, consumer.path(), providers);
            }
            self.failed.lock().subscribe.push((consumer.clone(), delivering));
        }
        Ok(())
    }

    async fn unsubscribe(&self, consumer: &Url, listener: &Arc<dyn NotifyListener>) -> Result<()> {
        let id = listener_id(listener);
        let removed = {
            let mut subscriptions = self.subscriptions.lock();
            let position = subscriptions
                .iter()
                .position(|s| &s.consumer == consumer && listener_id(&s.listener) == id);
            position.map(|index| subscriptions.remove(index))
        };
        let Some(subscription) = removed else {
            return Ok(());
        };

        let delivering_id = listener_id(&subscription.delivering);
        self.failed
            .lock()
            .subscribe
            .retain(|(c, l)| !(c == consumer && listener_id(l) == delivering_id));

        if let Err(e) = self
            .backend
            .do_unsubscribe(consumer, &subscription.delivering)
            .await
        {
            warn!(consumer = %consumer, "Failed to unsubscribe, will retry: {}", e);
            self.failed
                .lock()
                .unsubscribe
                .push((consumer.clone(), subscription.delivering));
        }
        Ok(())
    }

    async fn discover(&self, consumer: &Url) -> Result<Vec<Url>> {
        let key = consumer_key(consumer);
        match self.backend.do_discover(consumer).await {
            Ok(providers) => {
                self.discovered.lock().insert(key, providers.clone());
                Ok(providers)
            }
            Err(e) => {
                let cached = self.discovered.lock().get(&key).cloned();
                match cached {
                    Some(providers) => {
                        warn!(consumer = %consumer, "Discovery failed, serving cached providers: {}", e);
                        Ok(providers)
                    }
                    None => Err(e),
                }
            }
        }
    }

    async fn discover_all(&self) -> Result<Vec<Url>> {
        self.backend.do_discover_all().await
    }

    fn registered_urls(&self) -> Vec<Url> {
        self.registered.lock().values().cloned().collect()
    }

    async fn close(&self) {
        self.shutdown.cancel();
        self.backend.do_close().await;
    }
}

impl<B: RegistryBackend> Drop for FailbackRegistry<B> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
