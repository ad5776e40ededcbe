//! Registry and discovery contracts.

use async_trait::async_trait;
use luix_common::protocol::Result;
use luix_common::url::{params, Url};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Receives discovery notifications.
///
/// Every notification carries the complete current set of active providers
/// for one interface; an empty set means every instance is offline. Listeners
/// run on registry tasks and must not block on network I/O.
pub trait NotifyListener: Send + Sync {
    fn notify(&self, registry_url: &Url, interface: &str, providers: Vec<Url>) -> Result<()>;
}

/// Listener built from a closure.
pub struct FnListener<F>(pub F);

impl<F> NotifyListener for FnListener<F>
where
    F: Fn(&Url, &str, Vec<Url>) -> Result<()> + Send + Sync,
{
    fn notify(&self, registry_url: &Url, interface: &str, providers: Vec<Url>) -> Result<()> {
        (self.0)(registry_url, interface, providers)
    }
}

/// Contract of every registry backend.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Url of the coordination service this registry talks to.
    fn registry_url(&self) -> &Url;

    /// Registers a provider in the inactive state.
    async fn register(&self, url: &Url) -> Result<()>;

    async fn deregister(&self, url: &Url) -> Result<()>;

    /// Makes a registered provider visible to consumers.
    async fn activate(&self, url: &Url) -> Result<()>;

    /// Hides a provider from consumers without deregistering it.
    async fn deactivate(&self, url: &Url) -> Result<()>;

    /// Subscribes to the active providers of `consumer`'s interface.
    ///
    /// The listener is notified with the current snapshot as soon as it is
    /// available, then on every change.
    async fn subscribe(&self, consumer: &Url, listener: Arc<dyn NotifyListener>) -> Result<()>;

    async fn unsubscribe(&self, consumer: &Url, listener: &Arc<dyn NotifyListener>) -> Result<()>;

    /// Active providers matching `consumer`'s interface, group and version.
    async fn discover(&self, consumer: &Url) -> Result<Vec<Url>>;

    /// Every active provider known to the registry.
    async fn discover_all(&self) -> Result<Vec<Url>>;

    /// Urls registered through this registry instance.
    fn registered_urls(&self) -> Vec<Url>;

    /// Stops background tasks.
    async fn close(&self) {}
}

impl fmt::Debug for dyn Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Registry({})", self.registry_url())
    }
}

/// Creates registries of one backend kind.
pub trait RegistryFactory: Send + Sync {
    /// Name the backend is resolved by, matched against the registry url protocol.
    fn name(&self) -> &str;

    fn create(&self, registry_url: &Url) -> Result<Arc<dyn Registry>>;
}

/// Whether `provider` serves the interface, group and version `consumer` asks for.
pub fn matches_consumer(consumer: &Url, provider: &Url) -> bool {
    provider.path() == consumer.path()
        && provider.group() == consumer.group()
        && provider.version() == consumer.version()
        && match consumer.form() {
            Some(form) => provider.form() == Some(form),
            None => true,
        }
}

/// Tells apart services of one interface sharing an address: empty for the
/// default group and version, `@{group}@{version}` otherwise.
pub fn service_suffix(url: &Url) -> String {
    if url.group() == params::DEFAULT_GROUP && url.version() == params::DEFAULT_VERSION {
        return String::new();
    }
    format!(
        "@{}@{}",
        urlencoding::encode(url.group()),
        urlencoding::encode(url.version())
    )
}

/// Keeps only provider urls, dropping consumer or registry entries.
pub fn is_provider_entry(url: &Url) -> bool {
    url.url_type().map_or(true, |t| t == params::TYPE_PROVIDER)
}

/// Delivers a notification, containing failures so one faulty subscriber
/// never breaks delivery to the others.
pub fn notify_safely(
    listener: &Arc<dyn NotifyListener>,
    registry_url: &Url,
    interface: &str,
    providers: Vec<Url>,
) {
    let count = providers.len();
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        listener.notify(registry_url, interface, providers)
    }));
    match outcome {
        Ok(Ok(())) => debug!(interface, providers = count, "Delivered discovery notification"),
        Ok(Err(e)) => warn!(interface, "Discovery listener failed: {}", e),
        Err(_) => error!(interface, "Discovery listener panicked"),
    }
}

/// Identity of a listener allocation, used to find it again on unsubscribe.
pub(crate) fn listener_id(listener: &Arc<dyn NotifyListener>) -> usize {
    Arc::as_ptr(listener) as *const () as usize
}
