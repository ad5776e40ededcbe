//! Named strategies and shared services, built once at startup.

use luix_common::protocol::{LuixError, Result};
use luix_common::url::{params, Url};
use luix_registry::Registries;
use std::collections::HashMap;
use std::sync::Arc;

use crate::cluster::InvokerFactory;
use crate::fault_tolerance::{
    FailfastFaultTolerance, FailoverFaultTolerance, FaultTolerance, FAILFAST, FAILOVER,
};
use crate::health::HealthCheckManager;
use crate::invoker::{Invoker, RequestSender};
use crate::load_balancer::{
    LoadBalancer, RandomLoadBalancer, RoundRobinLoadBalancer, WeightedLoadBalancer, RANDOM,
    ROUND_ROBIN, WEIGHTED,
};

/// Builds a load balancer for one consumer url.
pub type LoadBalancerFactory = Arc<dyn Fn(&Url) -> Arc<dyn LoadBalancer> + Send + Sync>;

/// Builds a fault tolerance strategy for one consumer url.
pub type FaultToleranceFactory = Arc<dyn Fn(&Url) -> Arc<dyn FaultTolerance> + Send + Sync>;

/// Component catalog handed to every stub.
///
/// Holds the load balancers and fault tolerance strategies by name, the
/// registry catalog, the invoker factory and the health check manager.
/// Tests swap any of them through the `with_*` builders.
pub struct Components {
    load_balancers: HashMap<String, LoadBalancerFactory>,
    fault_tolerances: HashMap<String, FaultToleranceFactory>,
    registries: Arc<Registries>,
    invoker_factory: InvokerFactory,
    health: Arc<HealthCheckManager>,
}

impl Default for Components {
    fn default() -> Self {
        Self::new(Arc::new(Registries::in_memory()))
    }
}

impl Components {
    /// Catalog with the built-in strategies over `registries`.
    pub fn new(registries: Arc<Registries>) -> Self {
        let health = Arc::new(HealthCheckManager::default());
        Self {
            load_balancers: HashMap::new(),
            fault_tolerances: HashMap::new(),
            registries,
            invoker_factory: tracked_sender_factory(health.clone()),
            health,
        }
        .with_load_balancer(RANDOM, Arc::new(|_: &Url| -> Arc<dyn LoadBalancer> {
            Arc::new(RandomLoadBalancer::new())
        }))
        .with_load_balancer(ROUND_ROBIN, Arc::new(|_: &Url| -> Arc<dyn LoadBalancer> {
            Arc::new(RoundRobinLoadBalancer::new())
        }))
        .with_load_balancer(WEIGHTED, Arc::new(|url: &Url| -> Arc<dyn LoadBalancer> {
            Arc::new(WeightedLoadBalancer::from_url(url))
        }))
        .with_fault_tolerance(FAILFAST, Arc::new(|_: &Url| -> Arc<dyn FaultTolerance> {
            Arc::new(FailfastFaultTolerance)
        }))
        .with_fault_tolerance(FAILOVER, Arc::new(|url: &Url| -> Arc<dyn FaultTolerance> {
            Arc::new(FailoverFaultTolerance::from_url(url))
        }))
    }

    pub fn with_load_balancer(mut self, name: impl Into<String>, factory: LoadBalancerFactory) -> Self {
        self.load_balancers.insert(name.into(), factory);
        self
    }

    pub fn with_fault_tolerance(
        mut self,
        name: impl Into<String>,
        factory: FaultToleranceFactory,
    ) -> Self {
        self.fault_tolerances.insert(name.into(), factory);
        self
    }

    pub fn with_invoker_factory(mut self, factory: InvokerFactory) -> Self {
        self.invoker_factory = factory;
        self
    }

    pub fn registries(&self) -> &Arc<Registries> {
        &self.registries
    }

    pub fn invoker_factory(&self) -> &InvokerFactory {
        &self.invoker_factory
    }

    pub fn health(&self) -> &Arc<HealthCheckManager> {
        &self.health
    }

    /// Load balancer named by the url's `loadBalancer` parameter.
    ///
    /// # Errors
    ///
    /// Returns [`LuixError::Configuration`] for an unknown name.
    pub fn load_balancer(&self, url: &Url) -> Result<Arc<dyn LoadBalancer>> {
        let name = url.parameter_or(params::LOAD_BALANCER, params::DEFAULT_LOAD_BALANCER);
        let factory = self.load_balancers.get(name).ok_or_else(|| {
            LuixError::Configuration(format!("Unknown load balancer '{}'", name))
        })?;
        Ok(factory(url))
    }

    /// Fault tolerance strategy named by the url's `faultTolerance` parameter.
    ///
    /// # Errors
    ///
    /// Returns [`LuixError::Configuration`] for an unknown name.
    pub fn fault_tolerance(&self, url: &Url) -> Result<Arc<dyn FaultTolerance>> {
        let name = url.parameter_or(params::FAULT_TOLERANCE, params::DEFAULT_FAULT_TOLERANCE);
        let factory = self.fault_tolerances.get(name).ok_or_else(|| {
            LuixError::Configuration(format!("Unknown fault tolerance '{}'", name))
        })?;
        Ok(factory(url))
    }

    pub fn load_balancer_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.load_balancers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn fault_tolerance_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.fault_tolerances.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Creates [`RequestSender`]s whose clients are watched by `health`.
fn tracked_sender_factory(health: Arc<HealthCheckManager>) -> InvokerFactory {
    Arc::new(move |url: &Url| -> Result<Arc<dyn Invoker>> {
        let sender = RequestSender::new(url.clone())?;
        health.track(sender.client());
        let invoker: Arc<dyn Invoker> = Arc::new(sender);
        Ok(invoker)
    })
}
