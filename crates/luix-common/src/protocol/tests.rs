#[cfg(test)]
mod tests {
    use crate::protocol::*;
    use crate::transport::Serializer;
    use crate::url::params;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_request_creation() {
        let req = Request::new("com.acme.OrderService", "getOrder");
        assert_eq!(req.interface_name, "com.acme.OrderService");
        assert_eq!(req.method_name, "getOrder");
        assert_eq!(req.retry_number, 0);
        assert!(!req.async_call);
        assert_eq!(req.serializer_id, Serializer::Postcard.id());
    }

    #[test]
    fn test_request_ids_are_unique() {
        let ids: HashSet<_> = (0..10_000).map(|_| generate_request_id()).collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn test_request_attachments() {
        let req = Request::new("svc", "m")
            .with_attachment(params::GROUP, "orders")
            .with_attachment(params::VERSION, "2.0.0")
            .with_timeout(1500)
            .with_max_retries(2);

        assert_eq!(req.group(), "orders");
        assert_eq!(req.version(), "2.0.0");
        assert_eq!(req.timeout_ms(), Some(1500));
        assert_eq!(req.max_retries(), Some(2));
        assert_eq!(req.service_key().to_string(), "orders/svc/2.0.0");
    }

    #[test]
    fn test_request_defaults_for_missing_attachments() {
        let req = Request::new("svc", "m");
        assert_eq!(req.group(), params::DEFAULT_GROUP);
        assert_eq!(req.version(), params::DEFAULT_VERSION);
        assert_eq!(req.timeout_ms(), None);
        assert_eq!(req.max_retries(), None);
    }

    #[test]
    fn test_parameter_signature() {
        let req = Request::new("svc", "m").with_parameter_types(&["u64", " String "]);
        assert_eq!(req.method_parameters, "u64,String");
    }

    #[test]
    fn test_with_serializer_stamps_envelope() {
        let req = Request::new("svc", "m").with_serializer(Serializer::Json);
        assert_eq!(req.serializer_id, Serializer::JSON_ID);
        assert_eq!(req.attachment(params::SERIALIZER), Some("json"));
    }

    #[test]
    fn test_response_value() {
        let payload = Serializer::Json.serialize(&vec![1, 2, 3]).unwrap();
        let response = Response::success(1, payload, Serializer::Json);
        assert!(response.is_success());
        assert_eq!(response.value::<Vec<i32>>().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_business_error_survives_the_wire() {
        let err = LuixError::Business(BusinessError::new("out of stock").with_code("E42"));
        let response = Response::error(9, &err);
        let encoded = Serializer::Postcard.serialize(&response).unwrap();
        let decoded: Response = Serializer::Postcard.deserialize(&encoded).unwrap();

        match decoded.into_payload() {
            Err(LuixError::Business(business)) => {
                assert_eq!(business.code.as_deref(), Some("E42"));
                assert_eq!(business.message, "out of stock");
            }
            other => panic!("expected business error, got {:?}", other),
        }
    }

    #[test]
    fn test_remote_error_kinds() {
        let not_found = Response::error(1, &LuixError::ServiceNotFound("svc".into()));
        assert!(matches!(not_found.into_payload(), Err(LuixError::ServiceNotFound(_))));

        let timeout = Response::error(2, &LuixError::Timeout(250));
        assert!(matches!(timeout.into_payload(), Err(LuixError::Timeout(250))));

        let framework = Response::error(3, &LuixError::Codec("bad".into()));
        let err = framework.into_payload().unwrap_err();
        assert!(matches!(err, LuixError::Remote(_)));
        assert!(err.is_framework());
    }

    #[test]
    fn test_error_classification() {
        assert!(LuixError::Business(BusinessError::new("x")).is_business());
        assert!(LuixError::Timeout(10).is_timeout());
        assert!(LuixError::Timeout(10).is_framework());
        assert!(LuixError::NoActiveInvoker("svc".into()).is_framework());
        let exhausted = LuixError::RetriesExhausted {
            url: "luix://h:1/svc".into(),
            retries: 2,
            source: Box::new(LuixError::Connection("refused".into())),
        };
        assert!(exhausted.is_framework());
        assert!(exhausted.to_string().contains("luix://h:1/svc"));
        assert!(exhausted.to_string().contains("2 retries"));
    }

    #[test]
    fn test_heartbeat_round_trip() {
        let request = heartbeat::heartbeat_request();
        assert!(heartbeat::is_heartbeat(&request));
        let response = heartbeat::heartbeat_response(&request).unwrap();
        assert!(heartbeat::is_heartbeat_success(response));
        assert!(!heartbeat::is_heartbeat(&Request::new("svc", "checkHealth")));
    }

    #[tokio::test]
    async fn test_future_completes_once() {
        let future = FutureResponse::new(1, Duration::from_secs(1));
        assert_eq!(future.state(), FutureState::Doing);

        assert!(future.complete(Response::success(1, vec![], Serializer::Postcard)));
        assert!(!future.complete(Response::success(1, vec![1], Serializer::Postcard)));
        assert!(!future.cancel(LuixError::Timeout(1)));

        let response = future.get().await.unwrap();
        assert_eq!(response.payload, Some(vec![]));
        assert_eq!(future.state(), FutureState::Done);
    }

    #[tokio::test]
    async fn test_future_listeners_run_exactly_once() {
        let future = FutureResponse::new(2, Duration::from_secs(1));
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        future.add_listener(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        future.fail(LuixError::Connection("closed".into()));
        future.fail(LuixError::Connection("closed again".into()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Added after completion: runs immediately.
        let counter = calls.clone();
        future.add_listener(move |outcome| {
            assert!(outcome.is_err());
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_future_times_out_and_ignores_late_response() {
        let future = FutureResponse::new(3, Duration::from_millis(20));

        let outcome = future.get().await;
        assert!(matches!(outcome, Err(LuixError::Timeout(20))));
        assert_eq!(future.state(), FutureState::Cancelled);

        assert!(!future.complete(Response::success(3, vec![], Serializer::Postcard)));
        assert!(matches!(future.wait().await, Err(LuixError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_future_wakes_waiter() {
        let future = FutureResponse::new(4, Duration::from_secs(5));
        let waiter = {
            let future = future.clone();
            tokio::spawn(async move { future.get().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        future.complete(Response::success(4, vec![5], Serializer::Postcard));

        let response = waiter.await.unwrap().unwrap();
        assert_eq!(response.payload, Some(vec![5]));
    }
}
