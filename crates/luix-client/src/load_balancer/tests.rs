use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use luix_common::protocol::{LuixError, Request};
use luix_common::url::Url;

use super::*;
use crate::testing::{as_dyn, FakeInvoker};

fn request() -> Request {
    Request::new("com.acme.OrderService", "placeOrder")
}

fn hosts(invokers: &[Arc<dyn Invoker>]) -> Vec<String> {
    invokers.iter().map(|i| i.url().host().to_string()).collect()
}

fn balancers() -> Vec<Box<dyn LoadBalancer>> {
    vec![
        Box::new(RandomLoadBalancer::new()),
        Box::new(RoundRobinLoadBalancer::new()),
        Box::new(WeightedLoadBalancer::default()),
    ]
}

#[test]
fn test_empty_snapshot_fails_immediately() {
    for lb in balancers() {
        let err = lb.select_one(&request()).unwrap_err();
        assert!(matches!(err, LuixError::NoActiveInvoker(_)), "{}", lb.name());
        assert!(lb.select_all(&request()).is_err());
    }
}

#[test]
fn test_inactive_invokers_are_never_selected() {
    let a = FakeInvoker::ok("10.0.0.1");
    let b = FakeInvoker::ok("10.0.0.2");
    let c = FakeInvoker::ok("10.0.0.3");
    b.set_active(false);

    for lb in balancers() {
        lb.refresh(as_dyn(&[a.clone(), b.clone(), c.clone()]));
        for _ in 0..50 {
            let selected = lb.select_one(&request()).unwrap();
            assert_ne!(selected.url().host(), "10.0.0.2", "{}", lb.name());
        }
        let all = lb.select_all(&request()).unwrap();
        assert_eq!(all.len(), 2);
        assert!(!hosts(&all).contains(&"10.0.0.2".to_string()));
    }
}

#[test]
fn test_all_inactive_fails_immediately() {
    let a = FakeInvoker::ok("10.0.0.1");
    let b = FakeInvoker::ok("10.0.0.2");
    a.set_active(false);
    b.set_active(false);

    for lb in balancers() {
        lb.refresh(as_dyn(&[a.clone(), b.clone()]));
        assert!(matches!(
            lb.select_one(&request()),
            Err(LuixError::NoActiveInvoker(_))
        ));
    }
}

#[test]
fn test_round_robin() {
    let invokers = [
        FakeInvoker::ok("node1"),
        FakeInvoker::ok("node2"),
        FakeInvoker::ok("node3"),
    ];
    let lb = RoundRobinLoadBalancer::new();
    lb.refresh(as_dyn(&invokers));

    let picked: Vec<String> = (0..4)
        .map(|_| lb.select_one(&request()).unwrap().url().host().to_string())
        .collect();
    // wraps around
    assert_eq!(picked, vec!["node1", "node2", "node3", "node1"]);
}

#[test]
fn test_random_eventually_picks_every_active_invoker() {
    let invokers = [FakeInvoker::ok("node1"), FakeInvoker::ok("node2")];
    let lb = RandomLoadBalancer::new();
    lb.refresh(as_dyn(&invokers));

    let seen: HashSet<String> = (0..200)
        .map(|_| lb.select_one(&request()).unwrap().url().host().to_string())
        .collect();
    assert_eq!(seen.len(), 2);
}

#[test]
fn test_weighted_skips_zero_weights() {
    let url: Url = "luix://127.0.0.1:0/svc?weights=10.0.0.1:20880=0,10.0.0.2:20880=5"
        .parse()
        .unwrap();
    let lb = WeightedLoadBalancer::from_url(&url);
    lb.refresh(as_dyn(&[FakeInvoker::ok("10.0.0.1"), FakeInvoker::ok("10.0.0.2")]));

    for _ in 0..50 {
        assert_eq!(lb.select_one(&request()).unwrap().url().host(), "10.0.0.2");
    }
    // Failover candidates leave the zero weight address out too.
    assert_eq!(hosts(&lb.select_all(&request()).unwrap()), vec!["10.0.0.2"]);
}

#[test]
fn test_parse_weights_skips_malformed_entries() {
    let url: Url = "luix://127.0.0.1:0/svc?weights=a:1=3,broken,b:2=x".parse().unwrap();
    let weights = weighted::parse_weights(&url);
    assert_eq!(weights.len(), 1);
    assert_eq!(weights.get("a:1"), Some(&3));
}

#[test]
fn test_select_all_starts_with_selected_invoker() {
    let invokers = [
        FakeInvoker::ok("node1"),
        FakeInvoker::ok("node2"),
        FakeInvoker::ok("node3"),
    ];
    let lb = RoundRobinLoadBalancer::new();
    lb.refresh(as_dyn(&invokers));
    lb.select_one(&request()).unwrap();

    let all = lb.select_all(&request()).unwrap();
    assert_eq!(hosts(&all), vec!["node2", "node1", "node3"]);
}

#[tokio::test]
async fn test_refresh_destroys_removed_invokers_after_grace() {
    let a = FakeInvoker::ok("10.0.0.1");
    let b = FakeInvoker::ok("10.0.0.2");
    let lb = RoundRobinLoadBalancer::with_snapshot(InvokerSnapshot::new(Duration::from_millis(50)));

    lb.refresh(as_dyn(&[a.clone(), b.clone()]));
    lb.refresh(as_dyn(&[b.clone()]));

    assert_eq!(hosts(&lb.invokers()), vec!["10.0.0.2"]);
    assert!(!a.is_destroyed());

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(a.is_destroyed());
    assert!(!b.is_destroyed());
}

#[test]
fn test_refresh_without_runtime_destroys_immediately() {
    let a = FakeInvoker::ok("10.0.0.1");
    let lb = RandomLoadBalancer::new();
    lb.refresh(as_dyn(&[a.clone()]));
    lb.refresh(Vec::new());
    assert!(a.is_destroyed());
}
