use luix_common::protocol::Request;
use luix_common::url::{params, Url};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;

use super::{InvokerSnapshot, LoadBalancer, WEIGHTED};
use crate::invoker::Invoker;

const DEFAULT_WEIGHT: u32 = 1;

/// Random selection proportional to per-address weights.
///
/// Weights come from the consumer url, e.g.
/// `weights=10.0.0.1:20880=3,10.0.0.2:20880=1`. Unlisted addresses weigh 1;
/// a weight of 0 takes the address out of rotation.
#[derive(Default)]
pub struct WeightedLoadBalancer {
    snapshot: InvokerSnapshot,
    weights: HashMap<String, u32>,
}

impl WeightedLoadBalancer {
    pub fn new(weights: HashMap<String, u32>) -> Self {
        Self {
            snapshot: InvokerSnapshot::default(),
            weights,
        }
    }

    pub fn from_url(url: &Url) -> Self {
        Self::new(parse_weights(url))
    }

    pub fn with_snapshot(mut self, snapshot: InvokerSnapshot) -> Self {
        self.snapshot = snapshot;
        self
    }

    fn weight_of(&self, invoker: &Arc<dyn Invoker>) -> u32 {
        self.weights
            .get(&invoker.url().address())
            .copied()
            .unwrap_or(DEFAULT_WEIGHT)
    }
}

/// Parses the `weights` parameter, skipping malformed entries.
pub fn parse_weights(url: &Url) -> HashMap<String, u32> {
    url.list_parameter(params::WEIGHTS)
        .iter()
        .filter_map(|entry| {
            let (address, weight) = entry.rsplit_once('=')?;
            Some((address.trim().to_string(), weight.trim().parse().ok()?))
        })
        .collect()
}

impl LoadBalancer for WeightedLoadBalancer {
    fn name(&self) -> &'static str {
        WEIGHTED
    }

    fn snapshot(&self) -> &InvokerSnapshot {
        &self.snapshot
    }

    fn is_eligible(&self, invoker: &Arc<dyn Invoker>) -> bool {
        invoker.is_active() && self.weight_of(invoker) > 0
    }

    fn pick(&self, invokers: &[Arc<dyn Invoker>], _request: &Request) -> Option<Arc<dyn Invoker>> {
        let weighted: Vec<(&Arc<dyn Invoker>, u32)> = invokers
            .iter()
            .filter(|invoker| self.is_eligible(invoker))
            .map(|invoker| (invoker, self.weight_of(invoker)))
            .collect();

        let total: u64 = weighted.iter().map(|(_, weight)| u64::from(*weight)).sum();
        if total == 0 {
            return None;
        }

        let mut point = rand::thread_rng().gen_range(0..total);
        for (invoker, weight) in weighted {
            let weight = u64::from(weight);
            if point < weight {
                return Some(invoker.clone());
            }
            point -= weight;
        }
        None
    }
}
