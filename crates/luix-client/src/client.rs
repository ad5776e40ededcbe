use arc_swap::ArcSwapOption;
use luix_common::protocol::heartbeat::{heartbeat_request, is_heartbeat_success};
use luix_common::protocol::{FutureResponse, LuixError, Request, Result};
use luix_common::transport::{Codec, TcpTransportAsync};
use luix_common::url::{params, Url};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::{Channel, PendingRequests};

/// Connection pool configuration.
///
/// # Default Configuration
///
/// - `size`: 2 connections
/// - `connect_timeout`: 1000ms
/// - `max_content_length`: 10 MiB
/// - `max_failed`: 10 consecutive failures before the client turns inactive
/// - `max_pending`: 20000 requests waiting for a response
/// - `async_init`: false
/// - `rebuild_concurrency`: 4 background reconnects
/// - `sweep_interval`: 1000ms
///
/// # Example
///
/// ```rust
/// use luix_client::PoolConfig;
/// use luix_common::url::Url;
///
/// let url: Url = "luix://10.0.0.5:20880/com.acme.OrderService?minClientConnection=4"
///     .parse()
///     .unwrap();
/// let config = PoolConfig::from_url(&url);
/// assert_eq!(config.size, 4);
/// ```
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Connections kept open to the provider
    pub size: usize,
    pub connect_timeout: Duration,
    pub max_content_length: usize,
    /// Consecutive framework failures after which the client is inactive
    pub max_failed: u32,
    /// Requests allowed to wait for a response at once
    pub max_pending: usize,
    /// Open the connections in the background instead of before returning
    pub async_init: bool,
    /// Background reconnects allowed at once; further ones run on the caller
    pub rebuild_concurrency: usize,
    /// Period of the task timing out abandoned pending requests
    pub sweep_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: params::DEFAULT_MIN_CLIENT_CONNECTION,
            connect_timeout: Duration::from_millis(params::DEFAULT_CONNECT_TIMEOUT_MS),
            max_content_length: params::DEFAULT_MAX_CONTENT_LENGTH,
            max_failed: params::DEFAULT_MAX_CLIENT_FAILED_CONNECTION,
            max_pending: params::DEFAULT_MAX_PENDING_REQUESTS,
            async_init: params::DEFAULT_ASYNC_INIT_CONNECTION,
            rebuild_concurrency: 4,
            sweep_interval: Duration::from_millis(1000),
        }
    }
}

impl PoolConfig {
    /// Reads the pool settings from a provider url, defaulting what is absent.
    pub fn from_url(url: &Url) -> Self {
        let defaults = Self::default();
        Self {
            size: url
                .typed_parameter(params::MIN_CLIENT_CONNECTION, defaults.size)
                .max(1),
            connect_timeout: url
                .duration_parameter(params::CONNECT_TIMEOUT, params::DEFAULT_CONNECT_TIMEOUT_MS),
            max_content_length: url
                .typed_parameter(params::MAX_CONTENT_LENGTH, defaults.max_content_length),
            max_failed: url
                .typed_parameter(params::MAX_CLIENT_FAILED_CONNECTION, defaults.max_failed)
                .max(1),
            max_pending: url.typed_parameter(params::MAX_PENDING_REQUESTS, defaults.max_pending),
            async_init: url.bool_parameter(params::ASYNC_INIT_CONNECTION, defaults.async_init),
            ..defaults
        }
    }
}

/// Fixed-size pool of multiplexed connections to one provider.
///
/// Connections are picked round-robin. A closed connection is rebuilt in the
/// background while the next one is tried; when none is usable, one is
/// rebuilt inline. After `max_failed` consecutive framework failures the
/// client reports itself inactive until a request or heartbeat succeeds.
pub struct SharedPoolClient {
    url: Url,
    codec: Codec,
    config: PoolConfig,
    transport: TcpTransportAsync,
    channels: Vec<ArcSwapOption<Channel>>,
    rebuild_locks: Vec<Mutex<()>>,
    rebuild_permits: Arc<Semaphore>,
    next: AtomicUsize,
    pending: Arc<PendingRequests>,
    failures: AtomicU32,
    active: AtomicBool,
    shutdown: CancellationToken,
}

impl SharedPoolClient {
    /// Creates the client, opening its connections before returning unless
    /// `async_init` is set.
    pub async fn connect(url: Url, config: PoolConfig) -> Result<Arc<Self>> {
        let async_init = config.async_init;
        let client = Self::create(url, config)?;
        if async_init {
            tokio::spawn(client.clone().init());
        } else {
            client.clone().init().await;
        }
        Ok(client)
    }

    /// Creates the client and opens its connections in the background.
    ///
    /// Never waits for the network, so it can run inside registry callbacks.
    pub fn spawn(url: Url, config: PoolConfig) -> Result<Arc<Self>> {
        let client = Self::create(url, config)?;
        tokio::spawn(client.clone().init());
        Ok(client)
    }

    fn create(url: Url, config: PoolConfig) -> Result<Arc<Self>> {
        tokio::runtime::Handle::try_current().map_err(|_| {
            LuixError::Configuration(format!(
                "Client for {} must be created inside a tokio runtime",
                url
            ))
        })?;
        let codec = Codec::from_url(&url)?;
        let size = config.size.max(1);

        let client = Arc::new(Self {
            transport: TcpTransportAsync::new(config.connect_timeout, config.max_content_length),
            channels: (0..size).map(|_| ArcSwapOption::empty()).collect(),
            rebuild_locks: (0..size).map(|_| Mutex::new(())).collect(),
            rebuild_permits: Arc::new(Semaphore::new(config.rebuild_concurrency.max(1))),
            next: AtomicUsize::new(0),
            pending: Arc::new(PendingRequests::new(config.max_pending)),
            failures: AtomicU32::new(0),
            active: AtomicBool::new(true),
            shutdown: CancellationToken::new(),
            url,
            codec,
            config,
        });

        tokio::spawn(Self::sweep_loop(
            Arc::downgrade(&client),
            client.config.sweep_interval,
            client.shutdown.clone(),
        ));
        Ok(client)
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire) && !self.is_destroyed()
    }

    pub fn is_destroyed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Requests waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Connections currently open.
    pub fn open_connections(&self) -> usize {
        self.channels
            .iter()
            .filter(|slot| slot.load_full().is_some_and(|c| c.is_active()))
            .count()
    }

    async fn init(self: Arc<Self>) {
        let mut opened = 0;
        for slot in 0..self.channels.len() {
            match self.rebuild(slot).await {
                Ok(_) => opened += 1,
                Err(e) => {
                    warn!(url = %self.url, "Failed to open connection: {}", e);
                    self.record_failure();
                }
            }
        }
        debug!(url = %self.url, opened, size = self.channels.len(), "Initialized connection pool");
    }

    /// Writes `request` and returns the future its response will complete.
    pub async fn request(self: &Arc<Self>, request: &Request, timeout: Duration) -> Result<FutureResponse> {
        if self.is_destroyed() {
            return Err(LuixError::Connection(format!(
                "Client for {} is destroyed",
                self.url.address()
            )));
        }

        let channel = match self.channel().await {
            Ok(channel) => channel,
            Err(e) => {
                self.record_failure();
                return Err(e);
            }
        };

        let future = FutureResponse::new(request.id, timeout);
        let client = Arc::downgrade(self);
        let request_id = request.id;
        future.add_listener(move |outcome| {
            if let Some(client) = client.upgrade() {
                client.pending.remove(request_id);
                match outcome {
                    Ok(_) => client.record_success(),
                    Err(e) if e.is_framework() => client.record_failure(),
                    Err(_) => {}
                }
            }
        });

        if let Err(e) = channel.send(&self.codec, request, future.clone()).await {
            future.fail(e.clone());
            return Err(e);
        }
        Ok(future)
    }

    /// Sends a heartbeat, reactivating the client when it is answered.
    pub async fn check_health(self: &Arc<Self>) -> bool {
        let request = heartbeat_request().with_serializer(self.codec.serializer());
        let healthy = match self.request(&request, self.config.connect_timeout).await {
            Ok(future) => match future.get().await {
                Ok(response) => is_heartbeat_success(response),
                Err(_) => false,
            },
            Err(_) => false,
        };
        if healthy {
            self.record_success();
        }
        healthy
    }

    async fn channel(self: &Arc<Self>) -> Result<Arc<Channel>> {
        let size = self.channels.len();
        let start = self.next.fetch_add(1, Ordering::Relaxed);

        for offset in 0..size {
            let slot = (start + offset) % size;
            if let Some(channel) = self.channels[slot].load_full() {
                if channel.is_active() {
                    return Ok(channel);
                }
            }
            self.schedule_rebuild(slot).await;
        }

        self.rebuild(start % size).await
    }

    /// Rebuilds `slot` on the rebuild executor, or on the caller when it is saturated.
    async fn schedule_rebuild(self: &Arc<Self>, slot: usize) {
        match self.rebuild_permits.clone().try_acquire_owned() {
            Ok(permit) => {
                let client = self.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(e) = client.rebuild(slot).await {
                        debug!(url = %client.url, slot, "Background reconnect failed: {}", e);
                    }
                });
            }
            Err(_) => {
                if let Err(e) = self.rebuild(slot).await {
                    debug!(url = %self.url, slot, "Reconnect failed: {}", e);
                }
            }
        }
    }

    async fn rebuild(&self, slot: usize) -> Result<Arc<Channel>> {
        let _guard = self.rebuild_locks[slot].lock().await;

        if let Some(channel) = self.channels[slot].load_full() {
            if channel.is_active() {
                return Ok(channel);
            }
        }
        if self.is_destroyed() {
            return Err(LuixError::Connection(format!(
                "Client for {} is destroyed",
                self.url.address()
            )));
        }

        let channel = Channel::open(&self.transport, &self.url.address(), self.pending.clone()).await?;
        if let Some(previous) = self.channels[slot].swap(Some(channel.clone())) {
            previous.close();
        }
        Ok(channel)
    }

    fn record_success(&self) {
        self.failures.store(0, Ordering::Release);
        if !self.active.swap(true, Ordering::AcqRel) && !self.is_destroyed() {
            info!(url = %self.url, "Client is active again");
        }
    }

    fn record_failure(&self) {
        let failures = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures >= self.config.max_failed && self.active.swap(false, Ordering::AcqRel) {
            warn!(
                url = %self.url,
                failures,
                "Client marked inactive after consecutive failures"
            );
        }
    }

    async fn sweep_loop(client: Weak<Self>, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let Some(client) = client.upgrade() else {
                break;
            };
            let swept = client.pending.sweep(Instant::now());
            if swept > 0 {
                debug!(url = %client.url, swept, "Timed out abandoned requests");
            }
        }
    }

    /// Closes every connection and fails the requests still waiting. Idempotent.
    pub fn destroy(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        self.active.store(false, Ordering::Release);
        for slot in &self.channels {
            if let Some(channel) = slot.swap(None) {
                channel.close();
            }
        }
        self.pending.fail_all(&LuixError::Connection(format!(
            "Client for {} is destroyed",
            self.url.address()
        )));
        info!(url = %self.url, "Destroyed client");
    }
}

impl Drop for SharedPoolClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
