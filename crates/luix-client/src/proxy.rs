//! Consumer stubs.
//!
//! A [`Proxy`] turns method calls into requests for one interface. The
//! methods it accepts come from an explicit [`MethodTable`]; application code
//! wraps the proxy in a struct implementing its own service trait:
//!
//! ```no_run
//! use luix_client::{Components, MethodTable, Proxy, StubConfig};
//! use luix_common::url::Url;
//! use luix_common::Result;
//!
//! struct OrderClient {
//!     proxy: Proxy,
//! }
//!
//! impl OrderClient {
//!     async fn place_order(&self, sku: &str, quantity: u32) -> Result<u64> {
//!         self.proxy.call("placeOrder", &(sku, quantity)).await
//!     }
//! }
//!
//! # async fn run() -> Result<()> {
//! let components = Components::default();
//! let proxy = StubConfig::new("com.acme.OrderService")
//!     .with_registry(Url::registry("direct", "10.0.0.5", 20880))
//!     .with_max_retries(2)
//!     .build(
//!         MethodTable::new().with_method("placeOrder", &["String", "u32"]),
//!         &components,
//!     )
//!     .await?;
//! let client = OrderClient { proxy };
//! let order_id = client.place_order("sku-1", 3).await?;
//! # Ok(())
//! # }
//! ```

use luix_common::protocol::{FutureResponse, LuixError, Request, Result};
use luix_common::url::{params, Url};
use luix_common::Serializer;
use luix_registry::{NotifyListener, Registry};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::cluster::ProviderCluster;
use crate::components::Components;
use crate::discovery::{subscribe_all, unsubscribe_all, ClusterListener};
use crate::generic::GenericCall;

/// Methods answered locally and never sent to a provider.
pub const LOCAL_METHODS: [&str; 3] = ["equals", "hashCode", "toString"];

/// Consumer stub configuration.
///
/// # Default Configuration
///
/// - `group`: "default", `version`: "1.0.0"
/// - `protocol`: "luix"
/// - `request_timeout_ms`: 500
/// - `max_retries`: 0
/// - `fault_tolerance`: "failover", `load_balancer`: "random"
/// - `serializer`: postcard
#[derive(Debug, Clone)]
pub struct StubConfig {
    pub interface: String,
    pub group: String,
    pub version: String,
    pub protocol: String,
    /// Host recorded in the consumer url
    pub host: String,
    pub request_timeout_ms: u64,
    pub max_retries: u32,
    pub fault_tolerance: String,
    pub load_balancer: String,
    pub serializer: Serializer,
    pub registries: Vec<Url>,
    /// Extra consumer url parameters, such as `weights` or `minClientConnection`
    pub parameters: BTreeMap<String, String>,
}

impl StubConfig {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            group: params::DEFAULT_GROUP.to_string(),
            version: params::DEFAULT_VERSION.to_string(),
            protocol: "luix".to_string(),
            host: "127.0.0.1".to_string(),
            request_timeout_ms: params::DEFAULT_REQUEST_TIMEOUT_MS,
            max_retries: params::DEFAULT_MAX_RETRIES,
            fault_tolerance: params::DEFAULT_FAULT_TOLERANCE.to_string(),
            load_balancer: params::DEFAULT_LOAD_BALANCER.to_string(),
            serializer: Serializer::default(),
            registries: Vec::new(),
            parameters: BTreeMap::new(),
        }
    }

    /// Stub calling the provider at `provider` directly, with its interface,
    /// group and version.
    pub fn direct(provider: &Url) -> Self {
        Self::new(provider.path())
            .with_group(provider.group())
            .with_version(provider.version())
            .with_registry(Url::registry("direct", provider.host(), provider.port()))
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.request_timeout_ms = timeout_ms;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_fault_tolerance(mut self, name: impl Into<String>) -> Self {
        self.fault_tolerance = name.into();
        self
    }

    pub fn with_load_balancer(mut self, name: impl Into<String>) -> Self {
        self.load_balancer = name.into();
        self
    }

    pub fn with_serializer(mut self, serializer: Serializer) -> Self {
        self.serializer = serializer;
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

    /// Url the stub subscribes with.
    pub fn consumer_url(&self) -> Url {
        Url::consumer(self.protocol.clone(), self.host.clone(), self.interface.clone())
            .with_parameters(self.parameters.clone())
            .with_parameters([
                (params::GROUP, self.group.clone()),
                (params::VERSION, self.version.clone()),
                (params::REQUEST_TIMEOUT, self.request_timeout_ms.to_string()),
                (params::MAX_RETRIES, self.max_retries.to_string()),
                (params::FAULT_TOLERANCE, self.fault_tolerance.clone()),
                (params::LOAD_BALANCER, self.load_balancer.clone()),
                (params::SERIALIZER, self.serializer.name().to_string()),
            ])
    }

    /// Creates the proxy and subscribes it to every configured registry.
    ///
    /// # Errors
    ///
    /// Returns [`LuixError::Configuration`] for a missing interface, no
    /// registry, or an unknown strategy name, and the registry error if a
    /// subscription fails.
    pub async fn build(self, methods: MethodTable, components: &Components) -> Result<Proxy> {
        if self.interface.is_empty() {
            return Err(LuixError::Configuration("Stub interface is empty".to_string()));
        }
        if self.registries.is_empty() {
            return Err(LuixError::Configuration(format!(
                "Stub for {} has no registry",
                self.interface
            )));
        }

        let consumer_url = self.consumer_url();
        let cluster = Arc::new(ProviderCluster::new(
            consumer_url.clone(),
            components.load_balancer(&consumer_url)?,
            components.fault_tolerance(&consumer_url)?,
            components.invoker_factory().clone(),
        ));
        let registries = self
            .registries
            .iter()
            .map(|url| components.registries().get_or_create(url))
            .collect::<Result<Vec<Arc<dyn Registry>>>>()?;

        let listener: Arc<dyn NotifyListener> = ClusterListener::new(cluster.clone());
        subscribe_all(&registries, &consumer_url, listener.clone()).await?;

        info!(
            interface = %self.interface,
            group = %self.group,
            version = %self.version,
            invokers = cluster.invokers().len(),
            "Created consumer stub"
        );
        Ok(Proxy {
            config: self,
            consumer_url,
            methods,
            cluster,
            listener,
            registries,
        })
    }
}

/// One callable method of an interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub name: String,
    pub parameter_types: Vec<String>,
    /// The method hands back a [`FutureResponse`] instead of waiting
    pub returns_future: bool,
}

impl MethodDescriptor {
    pub fn new<S: AsRef<str>>(name: impl Into<String>, parameter_types: &[S]) -> Self {
        Self {
            name: name.into(),
            parameter_types: parameter_types
                .iter()
                .map(|t| t.as_ref().trim().to_string())
                .collect(),
            returns_future: false,
        }
    }

    pub fn signature(&self) -> String {
        self.parameter_types.join(",")
    }
}

/// Dispatch table of the methods a proxy accepts, keyed by name and signature.
#[derive(Debug, Clone, Default)]
pub struct MethodTable {
    methods: HashMap<(String, String), MethodDescriptor>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_method<S: AsRef<str>>(mut self, name: &str, parameter_types: &[S]) -> Self {
        self.insert(MethodDescriptor::new(name, parameter_types));
        self
    }

    pub fn with_async_method<S: AsRef<str>>(mut self, name: &str, parameter_types: &[S]) -> Self {
        let mut descriptor = MethodDescriptor::new(name, parameter_types);
        descriptor.returns_future = true;
        self.insert(descriptor);
        self
    }

    pub fn insert(&mut self, descriptor: MethodDescriptor) {
        self.methods
            .insert((descriptor.name.clone(), descriptor.signature()), descriptor);
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// The only method called `name`.
    ///
    /// # Errors
    ///
    /// Returns [`LuixError::InvalidRequest`] when no method or more than one
    /// overload has that name.
    pub fn lookup(&self, name: &str) -> Result<&MethodDescriptor> {
        let mut matches = self.methods.values().filter(|m| m.name == name);
        match (matches.next(), matches.next()) {
            (Some(descriptor), None) => Ok(descriptor),
            (None, _) => Err(LuixError::InvalidRequest(format!("Unknown method '{}'", name))),
            (Some(_), Some(_)) => Err(LuixError::InvalidRequest(format!(
                "Method '{}' is overloaded, call it with its parameter types",
                name
            ))),
        }
    }

    pub fn lookup_overload<S: AsRef<str>>(
        &self,
        name: &str,
        parameter_types: &[S],
    ) -> Result<&MethodDescriptor> {
        let signature = MethodDescriptor::new(name, parameter_types).signature();
        self.methods
            .get(&(name.to_string(), signature.clone()))
            .ok_or_else(|| {
                LuixError::InvalidRequest(format!("Unknown method '{}({})'", name, signature))
            })
    }
}

/// Client-side stand-in for one remote interface.
pub struct Proxy {
    config: StubConfig,
    consumer_url: Url,
    methods: MethodTable,
    cluster: Arc<ProviderCluster>,
    listener: Arc<dyn NotifyListener>,
    registries: Vec<Arc<dyn Registry>>,
}

impl Proxy {
    pub fn config(&self) -> &StubConfig {
        &self.config
    }

    pub fn consumer_url(&self) -> &Url {
        &self.consumer_url
    }

    pub fn methods(&self) -> &MethodTable {
        &self.methods
    }

    pub fn cluster(&self) -> &Arc<ProviderCluster> {
        &self.cluster
    }

    /// Calls `method` with `args` (a tuple of the arguments) and decodes the result.
    pub async fn call<A, R>(&self, method: &str, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        reject_local(method)?;
        let descriptor = self.methods.lookup(method)?;
        let request = self.build_request(descriptor, args)?;
        self.cluster.call(request).await?.value()
    }

    /// Like [`call`](Self::call), for overloaded methods.
    pub async fn call_overload<A, R, S>(&self, method: &str, parameter_types: &[S], args: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
        S: AsRef<str>,
    {
        reject_local(method)?;
        let descriptor = self.methods.lookup_overload(method, parameter_types)?;
        let request = self.build_request(descriptor, args)?;
        self.cluster.call(request).await?.value()
    }

    /// Starts the call and returns its pending response at once.
    ///
    /// The future times out after the request timeout of every allowed
    /// attempt; retries apply as for [`call`](Self::call).
    pub async fn call_async<A>(&self, method: &str, args: &A) -> Result<FutureResponse>
    where
        A: Serialize + ?Sized,
    {
        reject_local(method)?;
        let descriptor = self.methods.lookup(method)?;
        let request = self.build_request(descriptor, args)?.mark_async();

        let attempts = u64::from(self.config.max_retries) + 1;
        let future = FutureResponse::new(
            request.id,
            Duration::from_millis(self.config.request_timeout_ms.saturating_mul(attempts)),
        );
        let pending = future.clone();
        let cluster = self.cluster.clone();
        tokio::spawn(async move {
            match cluster.call(request).await {
                Ok(response) => pending.complete(response),
                Err(e) => pending.fail(e),
            };
        });
        Ok(future)
    }

    /// Generic call path over the same providers.
    pub fn generic(&self) -> GenericCall {
        GenericCall::new(self.cluster.clone())
    }

    /// Unsubscribes from the registries and destroys every invoker.
    pub async fn close(&self) {
        unsubscribe_all(&self.registries, &self.consumer_url, &self.listener).await;
        self.cluster.destroy();
        debug!(interface = %self.config.interface, "Closed consumer stub");
    }

    fn build_request<A>(&self, descriptor: &MethodDescriptor, args: &A) -> Result<Request>
    where
        A: Serialize + ?Sized,
    {
        let payload = self.config.serializer.serialize(args)?;
        let mut request = Request::new(self.config.interface.clone(), descriptor.name.clone())
            .with_parameter_types(&descriptor.parameter_types)
            .with_payload(payload)
            .with_serializer(self.config.serializer)
            .with_attachment(params::GROUP, self.config.group.clone())
            .with_attachment(params::VERSION, self.config.version.clone())
            .with_timeout(self.config.request_timeout_ms)
            .with_max_retries(self.config.max_retries);
        if descriptor.returns_future {
            request = request.mark_async();
        }
        Ok(request)
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("consumer_url", &self.consumer_url.to_string())
            .field("methods", &self.methods.len())
            .field("cluster", &self.cluster)
            .finish()
    }
}

fn reject_local(method: &str) -> Result<()> {
    if LOCAL_METHODS.contains(&method) {
        return Err(LuixError::InvalidRequest(format!(
            "Method '{}' is local and never sent to a provider",
            method
        )));
    }
    Ok(())
}
