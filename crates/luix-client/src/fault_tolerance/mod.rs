//! Fault tolerance strategies for one logical call.

mod failfast;
mod failover;

#[cfg(test)]
mod tests;

pub use failfast::FailfastFaultTolerance;
pub use failover::FailoverFaultTolerance;

use async_trait::async_trait;
use luix_common::protocol::{Request, Response, Result};

use crate::load_balancer::LoadBalancer;

pub const FAILFAST: &str = "failfast";
pub const FAILOVER: &str = "failover";

/// Sends a request through the invokers of a load balancer.
#[async_trait]
pub trait FaultTolerance: Send + Sync {
    fn name(&self) -> &'static str;

    async fn invoke(&self, load_balancer: &dyn LoadBalancer, request: Request) -> Result<Response>;
}
