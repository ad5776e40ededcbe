use luix_common::protocol::{BusinessError, LuixError, Request};
use luix_common::url::Url;
use luix_common::Serializer;

use super::*;
use crate::load_balancer::{LoadBalancer, RoundRobinLoadBalancer};
use crate::testing::{as_dyn, FakeInvoker};

fn request() -> Request {
    Request::new("com.acme.OrderService", "placeOrder")
}

fn connection_error() -> LuixError {
    LuixError::Connection("connection refused".to_string())
}

#[tokio::test]
async fn test_failover_reaches_third_provider() {
    let url: Url = "luix://10.0.0.5:20880/com.acme.OrderService?group=default&version=1.0.0"
        .parse()
        .unwrap();
    assert_eq!(url.group(), "default");

    let p1 = FakeInvoker::failing("10.0.0.1", connection_error());
    let p2 = FakeInvoker::failing("10.0.0.2", LuixError::Timeout(500));
    let p3 = FakeInvoker::ok("10.0.0.3");
    let lb = RoundRobinLoadBalancer::new();
    lb.refresh(as_dyn(&[p1.clone(), p2.clone(), p3.clone()]));

    let response = FailoverFaultTolerance::default()
        .invoke(&lb, request().with_max_retries(2))
        .await
        .unwrap();

    let served_by: String = Serializer::Json.deserialize(&response.into_payload().unwrap()).unwrap();
    assert_eq!(served_by, "10.0.0.3:20880");
    assert_eq!(p1.requests()[0].retry_number, 0);
    assert_eq!(p2.requests()[0].retry_number, 1);
    assert_eq!(p3.requests()[0].retry_number, 2);
}

#[tokio::test]
async fn test_failover_uses_fresh_ids_for_retries() {
    let p1 = FakeInvoker::failing("10.0.0.1", connection_error());
    let p2 = FakeInvoker::ok("10.0.0.2");
    let lb = RoundRobinLoadBalancer::new();
    lb.refresh(as_dyn(&[p1.clone(), p2.clone()]));

    FailoverFaultTolerance::new(1).invoke(&lb, request()).await.unwrap();
    assert_ne!(p1.requests()[0].id, p2.requests()[0].id);
}

#[tokio::test]
async fn test_business_error_is_not_retried() {
    let p1 = FakeInvoker::failing(
        "10.0.0.1",
        LuixError::Business(BusinessError::new("insufficient stock").with_code("E42")),
    );
    let p2 = FakeInvoker::ok("10.0.0.2");
    let lb = RoundRobinLoadBalancer::new();
    lb.refresh(as_dyn(&[p1.clone(), p2.clone()]));

    let err = FailoverFaultTolerance::new(3)
        .invoke(&lb, request())
        .await
        .unwrap_err();
    assert!(err.is_business());
    assert!(p2.requests().is_empty());
}

#[tokio::test]
async fn test_exhausted_retries_name_last_url() {
    let p1 = FakeInvoker::failing("10.0.0.1", connection_error());
    let p2 = FakeInvoker::failing("10.0.0.2", connection_error());
    let lb = RoundRobinLoadBalancer::new();
    lb.refresh(as_dyn(&[p1.clone(), p2.clone()]));

    let err = FailoverFaultTolerance::default()
        .invoke(&lb, request().with_max_retries(2))
        .await
        .unwrap_err();
    match err {
        LuixError::RetriesExhausted { url, retries, source } => {
            assert!(url.contains("10.0.0.1"));
            assert_eq!(retries, 2);
            assert!(matches!(*source, LuixError::Connection(_)));
        }
        other => panic!("unexpected error: {}", other),
    }
    // Attempts wrap around the candidates.
    assert_eq!(p1.requests().len(), 2);
    assert_eq!(p2.requests().len(), 1);
}

#[tokio::test]
async fn test_request_budget_overrides_default() {
    let p1 = FakeInvoker::failing("10.0.0.1", connection_error());
    let p2 = FakeInvoker::ok("10.0.0.2");
    let lb = RoundRobinLoadBalancer::new();
    lb.refresh(as_dyn(&[p1.clone(), p2.clone()]));

    let err = FailoverFaultTolerance::new(5)
        .invoke(&lb, request().with_max_retries(0))
        .await
        .unwrap_err();
    assert!(matches!(err, LuixError::Connection(_)));
    assert!(p2.requests().is_empty());
}

#[tokio::test]
async fn test_failfast_does_not_retry() {
    let p1 = FakeInvoker::failing("10.0.0.1", connection_error());
    let p2 = FakeInvoker::ok("10.0.0.2");
    let lb = RoundRobinLoadBalancer::new();
    lb.refresh(as_dyn(&[p1.clone(), p2.clone()]));

    let err = FailfastFaultTolerance
        .invoke(&lb, request().with_max_retries(3))
        .await
        .unwrap_err();
    assert!(matches!(err, LuixError::Connection(_)));
    assert_eq!(p1.requests().len(), 1);
    assert!(p2.requests().is_empty());
}

#[tokio::test]
async fn test_no_active_invoker_fails_before_any_attempt() {
    let lb = RoundRobinLoadBalancer::new();
    let err = FailoverFaultTolerance::new(2)
        .invoke(&lb, request())
        .await
        .unwrap_err();
    assert!(matches!(err, LuixError::NoActiveInvoker(_)));
}
