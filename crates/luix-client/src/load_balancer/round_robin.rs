use luix_common::protocol::Request;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::{first_active_from, InvokerSnapshot, LoadBalancer, ROUND_ROBIN};
use crate::invoker::Invoker;

/// Round-robin load balancer for invokers
#[derive(Default)]
pub struct RoundRobinLoadBalancer {
    snapshot: InvokerSnapshot,
    next: AtomicUsize,
}

impl RoundRobinLoadBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: InvokerSnapshot) -> Self {
        Self {
            snapshot,
            next: AtomicUsize::new(0),
        }
    }
}

impl LoadBalancer for RoundRobinLoadBalancer {
    fn name(&self) -> &'static str {
        ROUND_ROBIN
    }

    fn snapshot(&self) -> &InvokerSnapshot {
        &self.snapshot
    }

    fn pick(&self, invokers: &[Arc<dyn Invoker>], _request: &Request) -> Option<Arc<dyn Invoker>> {
        // Rotate: take the next position, skip inactive ones
        let start = self.next.fetch_add(1, Ordering::Relaxed) % invokers.len();
        first_active_from(invokers, start)
    }
}
