//! luix Client
//!
//! Consumer side of luix: stubs, provider clusters, load balancing, fault
//! tolerance and pooled multiplexed connections.
//!
//! A [`Proxy`] built from a [`StubConfig`] subscribes to its registries; each
//! notification reconciles the [`ProviderCluster`] behind it. Calls go
//! through the cluster's [`FaultTolerance`] strategy, which picks invokers
//! from its [`LoadBalancer`].

pub mod channel;
pub mod client;
pub mod cluster;
pub mod components;
pub mod discovery;
pub mod fault_tolerance;
pub mod generic;
pub mod health;
pub mod invoker;
pub mod load_balancer;
pub mod proxy;

#[cfg(test)]
mod testing;

pub use client::{PoolConfig, SharedPoolClient};
pub use cluster::{request_sender_factory, InvokerFactory, ProviderCluster};
pub use components::Components;
pub use discovery::ClusterListener;
pub use fault_tolerance::{FailfastFaultTolerance, FailoverFaultTolerance, FaultTolerance};
pub use generic::{CallOptions, GenericCall};
pub use health::{HealthCheckConfig, HealthCheckManager};
pub use invoker::{Invoker, RequestSender};
pub use load_balancer::{
    InvokerSnapshot, LoadBalancer, RandomLoadBalancer, RoundRobinLoadBalancer,
    WeightedLoadBalancer,
};
pub use proxy::{MethodDescriptor, MethodTable, Proxy, StubConfig};
