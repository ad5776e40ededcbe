//! Per-provider request senders.

use async_trait::async_trait;
use luix_common::protocol::{FutureResponse, LuixError, Request, Response, Result};
use luix_common::url::{params, Url};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::client::{PoolConfig, SharedPoolClient};

/// Delay between two checks of the in-flight counter while draining.
const DRAIN_POLL: Duration = Duration::from_millis(10);

/// Sends requests to exactly one provider.
#[async_trait]
pub trait Invoker: Send + Sync {
    fn url(&self) -> &Url;

    fn is_active(&self) -> bool;

    /// Sends `request` and waits for its response.
    ///
    /// Remote errors come back as `Err`, business errors included.
    async fn invoke(&self, request: Request) -> Result<Response>;

    /// Requests sent and not yet answered or timed out.
    fn in_flight(&self) -> usize;

    /// Releases the connections. Idempotent; the invoker stays inactive afterwards.
    fn destroy(&self);

    /// Longest time a request sent through this invoker may stay in flight.
    fn drain_timeout(&self) -> Duration {
        self.url()
            .duration_parameter(params::REQUEST_TIMEOUT, params::DEFAULT_REQUEST_TIMEOUT_MS)
    }

    /// Waits `grace`, then for the in-flight counter to drop to zero (at most
    /// [`drain_timeout`](Self::drain_timeout)), then destroys the invoker.
    async fn destroy_when_idle(&self, grace: Duration) {
        tokio::time::sleep(grace).await;
        let deadline = Instant::now() + self.drain_timeout() + DRAIN_POLL;
        while self.in_flight() > 0 && Instant::now() < deadline {
            tokio::time::sleep(DRAIN_POLL).await;
        }
        if self.in_flight() > 0 {
            warn!(
                url = %self.url(),
                in_flight = self.in_flight(),
                "Destroying invoker with requests still in flight"
            );
        }
        self.destroy();
    }
}

impl fmt::Debug for dyn Invoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invoker")
            .field("url", &self.url().to_string())
            .field("active", &self.is_active())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

/// Converts a response carrying a remote error into that error.
pub fn into_result(response: Response) -> Result<Response> {
    match response.error {
        Some(err) => Err(err.into_error()),
        None => Ok(response),
    }
}

/// [`Invoker`] over a [`SharedPoolClient`].
pub struct RequestSender {
    url: Url,
    client: Arc<SharedPoolClient>,
    in_flight: Arc<AtomicUsize>,
    destroyed: AtomicBool,
    default_timeout: Duration,
    /// Largest per-request timeout sent so far, in milliseconds.
    longest_timeout_ms: AtomicU64,
}

impl RequestSender {
    /// Creates the sender, connecting in the background.
    pub fn new(url: Url) -> Result<Self> {
        let client = SharedPoolClient::spawn(url.clone(), PoolConfig::from_url(&url))?;
        Ok(Self::with_client(url, client))
    }

    /// Creates the sender once the pool is connected, unless the url asks for
    /// asynchronous initialization.
    pub async fn connect(url: Url) -> Result<Self> {
        let client = SharedPoolClient::connect(url.clone(), PoolConfig::from_url(&url)).await?;
        Ok(Self::with_client(url, client))
    }

    pub fn with_client(url: Url, client: Arc<SharedPoolClient>) -> Self {
        let default_timeout =
            url.duration_parameter(params::REQUEST_TIMEOUT, params::DEFAULT_REQUEST_TIMEOUT_MS);
        Self {
            url,
            client,
            in_flight: Arc::new(AtomicUsize::new(0)),
            destroyed: AtomicBool::new(false),
            default_timeout,
            longest_timeout_ms: AtomicU64::new(0),
        }
    }

    pub fn client(&self) -> &Arc<SharedPoolClient> {
        &self.client
    }

    /// Sends `request` and returns the future of its response.
    pub async fn send_async(&self, request: &Request) -> Result<FutureResponse> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(LuixError::Connection(format!(
                "Invoker for {} is destroyed",
                self.url.address()
            )));
        }

        let timeout = request
            .timeout_ms()
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout);

        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self.longest_timeout_ms.fetch_max(timeout_ms, Ordering::AcqRel);
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        match self.client.request(request, timeout).await {
            Ok(future) => {
                let in_flight = self.in_flight.clone();
                future.add_listener(move |_| {
                    in_flight.fetch_sub(1, Ordering::AcqRel);
                });
                Ok(future)
            }
            Err(e) => {
                self.in_flight.fetch_sub(1, Ordering::AcqRel);
                Err(e)
            }
        }
    }
}

#[async_trait]
impl Invoker for RequestSender {
    fn url(&self) -> &Url {
        &self.url
    }

    fn is_active(&self) -> bool {
        !self.destroyed.load(Ordering::Acquire) && self.client.is_active()
    }

    async fn invoke(&self, request: Request) -> Result<Response> {
        let future = self.send_async(&request).await?;
        let response = future.get().await?;
        debug!(
            request_id = request.id,
            url = %self.url.address(),
            "Received response"
        );
        into_result(response)
    }

    fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Covers the timeout of every request sent so far.
    fn drain_timeout(&self) -> Duration {
        let longest = Duration::from_millis(self.longest_timeout_ms.load(Ordering::Acquire));
        self.default_timeout.max(longest)
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.client.destroy();
        info!(url = %self.url, "Destroyed invoker");
    }
}

impl fmt::Debug for RequestSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestSender")
            .field("url", &self.url.to_string())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
