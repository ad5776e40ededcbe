//! Scripted invokers for unit tests.

use async_trait::async_trait;
use luix_common::protocol::{LuixError, Request, Response, Result};
use luix_common::url::Url;
use luix_common::Serializer;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::invoker::Invoker;

pub(crate) struct FakeInvoker {
    url: Url,
    failure: Mutex<Option<LuixError>>,
    active: AtomicBool,
    destroyed: AtomicBool,
    in_flight: AtomicUsize,
    requests: Mutex<Vec<Request>>,
}

impl FakeInvoker {
    /// Invoker answering with its own address.
    pub(crate) fn ok(host: &str) -> Arc<Self> {
        Arc::new(Self {
            url: Url::provider("luix", host, 20880, "com.acme.OrderService"),
            failure: Mutex::new(None),
            active: AtomicBool::new(true),
            destroyed: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn failing(host: &str, err: LuixError) -> Arc<Self> {
        let invoker = Self::ok(host);
        *invoker.failure.lock() = Some(err);
        invoker
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    pub(crate) fn set_in_flight(&self, in_flight: usize) {
        self.in_flight.store(in_flight, Ordering::SeqCst);
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub(crate) fn requests(&self) -> Vec<Request> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Invoker for FakeInvoker {
    fn url(&self) -> &Url {
        &self.url
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst) && !self.is_destroyed()
    }

    async fn invoke(&self, request: Request) -> Result<Response> {
        self.requests.lock().push(request.clone());
        if let Some(err) = self.failure.lock().clone() {
            return Err(err);
        }
        let payload = Serializer::Json.serialize(&self.url.address())?;
        Ok(Response::success(request.id, payload, Serializer::Json))
    }

    fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
    }
}

pub(crate) fn as_dyn(invokers: &[Arc<FakeInvoker>]) -> Vec<Arc<dyn Invoker>> {
    invokers
        .iter()
        .map(|invoker| invoker.clone() as Arc<dyn Invoker>)
        .collect()
}
