//! Load balancing over the invokers of one cluster.
//!
//! Every balancer reads from an [`InvokerSnapshot`] that the cluster replaces
//! wholesale on each discovery notification. Inactive invokers are never
//! selected, and an empty or fully inactive snapshot fails immediately with
//! [`LuixError::NoActiveInvoker`].

mod random;
mod round_robin;
mod weighted;

#[cfg(test)]
mod tests;

pub use random::RandomLoadBalancer;
pub use round_robin::RoundRobinLoadBalancer;
pub use weighted::WeightedLoadBalancer;

use arc_swap::ArcSwap;
use luix_common::protocol::{LuixError, Request, Result};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::invoker::Invoker;

pub const RANDOM: &str = "random";
pub const ROUND_ROBIN: &str = "roundRobin";
pub const WEIGHTED: &str = "weighted";

/// Delay before invokers dropped by a refresh are destroyed.
pub const DEFAULT_DESTROY_GRACE: Duration = Duration::from_millis(1000);

/// Atomically swappable list of invokers.
pub struct InvokerSnapshot {
    invokers: ArcSwap<Vec<Arc<dyn Invoker>>>,
    grace: Duration,
}

impl Default for InvokerSnapshot {
    fn default() -> Self {
        Self::new(DEFAULT_DESTROY_GRACE)
    }
}

impl InvokerSnapshot {
    /// Removed invokers are destroyed `grace` after the refresh that drops
    /// them, or once their in-flight requests finish, whichever is later.
    pub fn new(grace: Duration) -> Self {
        Self {
            invokers: ArcSwap::from_pointee(Vec::new()),
            grace,
        }
    }

    pub fn load(&self) -> Arc<Vec<Arc<dyn Invoker>>> {
        self.invokers.load_full()
    }

    /// Swaps in `invokers` and schedules the destruction of the ones that
    /// are no longer present.
    pub fn replace(&self, invokers: Vec<Arc<dyn Invoker>>) {
        let kept: HashSet<String> = invokers.iter().map(|i| i.url().identity()).collect();
        let previous = self.invokers.swap(Arc::new(invokers));

        for removed in previous
            .iter()
            .filter(|invoker| !kept.contains(&invoker.url().identity()))
        {
            let invoker = removed.clone();
            debug!(url = %invoker.url(), "Scheduling invoker destruction");
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let grace = self.grace;
                    handle.spawn(async move {
                        invoker.destroy_when_idle(grace).await;
                    });
                }
                Err(_) => {
                    warn!(url = %invoker.url(), "No runtime for delayed destruction, destroying now");
                    invoker.destroy();
                }
            }
        }
    }
}

/// Chooses invokers for requests.
pub trait LoadBalancer: Send + Sync {
    fn name(&self) -> &'static str;

    fn snapshot(&self) -> &InvokerSnapshot;

    /// Picks an active invoker out of the non-empty `invokers`.
    fn pick(&self, invokers: &[Arc<dyn Invoker>], request: &Request) -> Option<Arc<dyn Invoker>>;

    /// Replaces the invoker set.
    fn refresh(&self, invokers: Vec<Arc<dyn Invoker>>) {
        self.snapshot().replace(invokers);
    }

    fn invokers(&self) -> Arc<Vec<Arc<dyn Invoker>>> {
        self.snapshot().load()
    }

    fn select_one(&self, request: &Request) -> Result<Arc<dyn Invoker>> {
        let invokers = self.invokers();
        if invokers.is_empty() {
            return Err(LuixError::NoActiveInvoker(request.interface_name.clone()));
        }
        self.pick(&invokers, request)
            .ok_or_else(|| LuixError::NoActiveInvoker(request.interface_name.clone()))
    }

    /// Whether `invoker` may serve requests at all. Defaults to being active.
    fn is_eligible(&self, invoker: &Arc<dyn Invoker>) -> bool {
        invoker.is_active()
    }

    /// Every eligible invoker, starting with the one [`select_one`](Self::select_one) would pick.
    fn select_all(&self, request: &Request) -> Result<Vec<Arc<dyn Invoker>>> {
        let first = self.select_one(request)?;
        let first_identity = first.url().identity();
        let mut selected = vec![first];
        selected.extend(
            self.invokers()
                .iter()
                .filter(|invoker| self.is_eligible(invoker) && invoker.url().identity() != first_identity)
                .cloned(),
        );
        Ok(selected)
    }
}

/// Scans `invokers` from `start`, wrapping around, for the first active one.
pub(crate) fn first_active_from(
    invokers: &[Arc<dyn Invoker>],
    start: usize,
) -> Option<Arc<dyn Invoker>> {
    let len = invokers.len();
    (0..len)
        .map(|offset| &invokers[(start + offset) % len])
        .find(|invoker| invoker.is_active())
        .cloned()
}
