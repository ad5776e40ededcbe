use luix_common::protocol::Request;
use rand::Rng;
use std::sync::Arc;

use super::{first_active_from, InvokerSnapshot, LoadBalancer, RANDOM};
use crate::invoker::Invoker;

/// Starts at a random invoker and takes the first active one from there.
#[derive(Default)]
pub struct RandomLoadBalancer {
    snapshot: InvokerSnapshot,
}

impl RandomLoadBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: InvokerSnapshot) -> Self {
        Self { snapshot }
    }
}

impl LoadBalancer for RandomLoadBalancer {
    fn name(&self) -> &'static str {
        RANDOM
    }

    fn snapshot(&self) -> &InvokerSnapshot {
        &self.snapshot
    }

    fn pick(&self, invokers: &[Arc<dyn Invoker>], _request: &Request) -> Option<Arc<dyn Invoker>> {
        let start = rand::thread_rng().gen_range(0..invokers.len());
        first_active_from(invokers, start)
    }
}
