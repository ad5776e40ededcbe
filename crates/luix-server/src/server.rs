use luix_common::protocol::{LuixError, Result};
use luix_common::transport::{TcpServer, WorkerLimits};
use luix_common::url::{params, Url};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::router::ServiceRouter;

/// Server configuration.
///
/// # Default Configuration
///
/// - `bind_host`: "0.0.0.0"
/// - `port`: 26010
/// - shared server: 20 to 200 workers, unbounded queue
/// - `max_content_length`: 10 MiB
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_host: String,
    pub port: u16,
    pub limits: WorkerLimits,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: 26010,
            limits: WorkerLimits::default(),
        }
    }
}

impl ServerConfig {
    /// Reads the server settings of a provider url.
    ///
    /// A dedicated server (`sharedServer=false`) defaults to fewer workers
    /// than a shared one.
    pub fn from_url(url: &Url) -> Self {
        let shared = url.bool_parameter(params::SHARED_SERVER, params::DEFAULT_SHARED_SERVER);
        let (min_default, max_default) = if shared {
            (params::SHARED_MIN_WORKER_THREAD, params::SHARED_MAX_WORKER_THREAD)
        } else {
            (params::DEDICATED_MIN_WORKER_THREAD, params::DEDICATED_MAX_WORKER_THREAD)
        };
        let min_workers = url.typed_parameter(params::MIN_WORKER_THREAD, min_default);
        let max_workers = url
            .typed_parameter(params::MAX_WORKER_THREAD, max_default)
            .max(min_workers)
            .max(1);
        Self {
            bind_host: url.host().to_string(),
            port: url.port(),
            limits: WorkerLimits {
                min_workers,
                max_workers,
                queue_size: url
                    .typed_parameter(params::WORKER_QUEUE_SIZE, params::DEFAULT_WORKER_QUEUE_SIZE),
                max_content_length: url
                    .typed_parameter(params::MAX_CONTENT_LENGTH, params::DEFAULT_MAX_CONTENT_LENGTH),
            },
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }
}

/// Listener of one address dispatching to a [`ServiceRouter`].
pub struct RpcServer {
    local_addr: SocketAddr,
    router: Arc<ServiceRouter>,
    shutdown: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl RpcServer {
    /// Binds the listener and starts serving in the background.
    pub async fn start(config: ServerConfig, router: Arc<ServiceRouter>) -> Result<Self> {
        let server = TcpServer::new(&config.bind_addr(), config.limits.clone()).await?;
        let local_addr = server.local_addr()?;
        let shutdown = CancellationToken::new();

        let handler_router = router.clone();
        let token = shutdown.clone();
        let handle = tokio::spawn(async move {
            let result = server
                .run_with_handler(
                    move |request| {
                        let router = handler_router.clone();
                        async move { router.handle(request).await }
                    },
                    token,
                )
                .await;
            if let Err(e) = result {
                error!(addr = %local_addr, "Server stopped: {}", e);
            }
        });

        info!(addr = %local_addr, "Started RPC server");
        Ok(Self {
            local_addr,
            router,
            shutdown,
            handle: Some(handle),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn router(&self) -> &Arc<ServiceRouter> {
        &self.router
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    /// Stops accepting connections and closes the open ones.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Shuts down and waits for the listener task to end.
    pub async fn stop(mut self) -> Result<()> {
        self.shutdown.cancel();
        if let Some(handle) = self.handle.take() {
            handle
                .await
                .map_err(|e| LuixError::Transport(format!("Server task failed: {}", e)))?;
        }
        info!(addr = %self.local_addr, "Stopped RPC server");
        Ok(())
    }
}

impl Drop for RpcServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
