// Criterion benchmarks for luix-client load balancers
//
// Run benchmarks with:
//   cargo bench -p luix-client
//
// For detailed output with plots:
//   cargo bench -p luix-client -- --save-baseline main

use async_trait::async_trait;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use luix_client::{
    Invoker, LoadBalancer, RandomLoadBalancer, RoundRobinLoadBalancer, WeightedLoadBalancer,
};
use luix_common::protocol::{LuixError, Request, Response, Result};
use luix_common::url::Url;
use std::sync::Arc;

/// Invoker that is never called, only selected.
struct IdleInvoker {
    url: Url,
    active: bool,
}

#[async_trait]
impl Invoker for IdleInvoker {
    fn url(&self) -> &Url {
        &self.url
    }

    fn is_active(&self) -> bool {
        self.active
    }

    async fn invoke(&self, _request: Request) -> Result<Response> {
        Err(LuixError::Connection("idle".to_string()))
    }

    fn in_flight(&self) -> usize {
        0
    }

    fn destroy(&self) {}
}

fn invokers(count: usize, inactive_every: usize) -> Vec<Arc<dyn Invoker>> {
    (0..count)
        .map(|i| {
            let invoker: Arc<dyn Invoker> = Arc::new(IdleInvoker {
                url: Url::provider("luix", format!("10.0.0.{}", i), 20880, "com.acme.OrderService"),
                active: inactive_every == 0 || i % inactive_every != 0,
            });
            invoker
        })
        .collect()
}

fn balancers() -> Vec<Box<dyn LoadBalancer>> {
    vec![
        Box::new(RandomLoadBalancer::new()),
        Box::new(RoundRobinLoadBalancer::new()),
        Box::new(WeightedLoadBalancer::default()),
    ]
}

fn bench_select_one(c: &mut Criterion) {
    let mut group = c.benchmark_group("select_one");
    let request = Request::new("com.acme.OrderService", "placeOrder");

    for lb in balancers() {
        for count in [2, 10, 50] {
            lb.refresh(invokers(count, 0));
            group.bench_with_input(BenchmarkId::new(lb.name(), count), &count, |b, _| {
                b.iter(|| black_box(lb.select_one(black_box(&request))).is_ok());
            });
        }
    }

    group.finish();
}

fn bench_select_one_with_inactive(c: &mut Criterion) {
    let mut group = c.benchmark_group("select_one_with_inactive");
    let request = Request::new("com.acme.OrderService", "placeOrder");

    for lb in balancers() {
        // Every other invoker is inactive.
        lb.refresh(invokers(20, 2));
        group.bench_function(lb.name(), |b| {
            b.iter(|| black_box(lb.select_one(black_box(&request))).is_ok());
        });
    }

    group.finish();
}

fn bench_select_all(c: &mut Criterion) {
    let mut group = c.benchmark_group("select_all");
    let request = Request::new("com.acme.OrderService", "placeOrder");

    for count in [5, 20] {
        let lb = RoundRobinLoadBalancer::new();
        lb.refresh(invokers(count, 0));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| black_box(lb.select_all(black_box(&request))).map(|all| all.len()));
        });
    }

    group.finish();
}

fn bench_refresh(c: &mut Criterion) {
    let mut group = c.benchmark_group("refresh");

    group.bench_function("swap_10_invokers", |b| {
        let lb = RoundRobinLoadBalancer::new();
        let snapshot = invokers(10, 0);
        b.iter(|| lb.refresh(black_box(snapshot.clone())));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_select_one,
    bench_select_one_with_inactive,
    bench_select_all,
    bench_refresh
);
criterion_main!(benches);
