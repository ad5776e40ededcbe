use async_trait::async_trait;
use luix_common::protocol::{Request, Response, Result};

use super::{FaultTolerance, FAILFAST};
use crate::load_balancer::LoadBalancer;

/// One invoker, one attempt.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailfastFaultTolerance;

#[async_trait]
impl FaultTolerance for FailfastFaultTolerance {
    fn name(&self) -> &'static str {
        FAILFAST
    }

    async fn invoke(&self, load_balancer: &dyn LoadBalancer, request: Request) -> Result<Response> {
        let invoker = load_balancer.select_one(&request)?;
        invoker.invoke(request).await
    }
}
