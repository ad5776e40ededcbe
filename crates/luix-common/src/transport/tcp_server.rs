use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::protocol::error::{LuixError, Result};
use crate::protocol::heartbeat::{heartbeat_response, is_heartbeat};
use crate::protocol::{Request, Response};
use crate::transport::codec::Codec;
use crate::transport::frame::{read_frame, write_frame, Frame};

/// Outbound frames buffered per connection before the reader applies backpressure.
const WRITE_QUEUE_DEPTH: usize = 1024;

/// Worker limits of a server.
#[derive(Debug, Clone)]
pub struct WorkerLimits {
    /// Workers kept warm. Reported for diagnostics, the runtime grows on demand.
    pub min_workers: usize,
    /// Maximum number of requests handled concurrently.
    pub max_workers: usize,
    /// Maximum number of requests waiting for a worker, 0 for unbounded.
    pub queue_size: usize,
    /// Largest accepted frame body.
    pub max_content_length: usize,
}

impl Default for WorkerLimits {
    fn default() -> Self {
        Self {
            min_workers: 20,
            max_workers: 200,
            queue_size: 0,
            max_content_length: 10 * 1024 * 1024,
        }
    }
}

/// Async TCP server for luix.
///
/// One listener per exposed port. Every accepted connection gets a reader
/// task and a writer task; requests on one connection are handled
/// concurrently and answered in completion order, correlated by id.
pub struct TcpServer {
    listener: TcpListener,
    limits: WorkerLimits,
}

struct Workers {
    permits: Semaphore,
    waiting: AtomicUsize,
    limits: WorkerLimits,
}

impl TcpServer {
    /// Creates a new TCP server bound to the specified address.
    ///
    /// # Arguments
    /// * `bind_addr` - The address to bind to (e.g., "0.0.0.0:26010")
    /// * `limits` - Worker and frame limits
    pub async fn new(bind_addr: &str, limits: WorkerLimits) -> Result<Self> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| LuixError::Connection(format!("Failed to bind to {}: {}", bind_addr, e)))?;

        Ok(Self { listener, limits })
    }

    /// Gets the actual bound address.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| LuixError::Connection(format!("Failed to get local addr: {}", e)))
    }

    /// Runs the server until `shutdown` is cancelled.
    ///
    /// Heartbeats are answered on the connection reader itself; every other
    /// request waits for a worker permit before `handler` runs.
    pub async fn run_with_handler<F, Fut>(self, handler: F, shutdown: CancellationToken) -> Result<()>
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Response> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let workers = Arc::new(Workers {
            permits: Semaphore::new(self.limits.max_workers.max(1)),
            waiting: AtomicUsize::new(0),
            limits: self.limits.clone(),
        });

        info!(
            addr = ?self.listener.local_addr().ok(),
            min_workers = self.limits.min_workers,
            max_workers = self.limits.max_workers,
            "Server listening"
        );

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Server shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => accepted,
            };

            let (stream, peer_addr) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    continue;
                }
            };

            debug!("Connection established from {}", peer_addr);

            let handler = handler.clone();
            let workers = workers.clone();
            let shutdown = shutdown.child_token();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, handler, workers, shutdown).await {
                    debug!("Connection error from {}: {}", peer_addr, e);
                }
            });
        }
    }
}

/// Handle a single TCP connection until the peer closes it or the server stops.
async fn handle_connection<F, Fut>(
    stream: TcpStream,
    handler: Arc<F>,
    workers: Arc<Workers>,
    shutdown: CancellationToken,
) -> Result<()>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Response> + Send + 'static,
{
    stream.set_nodelay(true)?;
    let (mut reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::channel::<Frame>(WRITE_QUEUE_DEPTH);

    let writer_shutdown = shutdown.clone();
    let writer_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = write_frame(&mut writer, &frame).await {
                debug!("Failed to send response: {}", e);
                writer_shutdown.cancel();
                break;
            }
        }
    });

    let result = loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break Ok(()),
            frame = read_frame(&mut reader, workers.limits.max_content_length) => frame,
        };

        let frame = match frame {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!("Connection closed by peer");
                break Ok(());
            }
            Err(e) => break Err(e),
        };

        let codec = match frame.codec() {
            Ok(codec) => codec,
            Err(e) => {
                warn!("Unknown serializer in frame header: {}", e);
                if let Some(frame) = error_frame(&Codec::new(), 0, &e) {
                    let _ = tx.send(frame).await;
                }
                continue;
            }
        };

        let request = match codec.decode_request(&frame.body) {
            Ok(request) => request,
            Err(e) => {
                warn!("Failed to decode request: {}", e);
                if let Some(frame) = error_frame(&codec, 0, &e) {
                    let _ = tx.send(frame).await;
                }
                continue;
            }
        };

        if frame.header.is_heartbeat() || is_heartbeat(&request) {
            let response = match heartbeat_response(&request) {
                Ok(response) => response,
                Err(e) => Response::error(request.id, &e),
            };
            if let Ok(frame) = Frame::response(&codec, &response, true) {
                let _ = tx.send(frame).await;
            }
            continue;
        }

        let queue_size = workers.limits.queue_size;
        let waiting = workers.waiting.fetch_add(1, Ordering::AcqRel);
        if queue_size > 0 && waiting >= queue_size && workers.permits.available_permits() == 0 {
            workers.waiting.fetch_sub(1, Ordering::AcqRel);
            let err = LuixError::Transport(format!(
                "Server busy: {} requests waiting for a worker",
                waiting
            ));
            warn!(request_id = request.id, "{}", err);
            if let Some(frame) = error_frame(&codec, request.id, &err) {
                let _ = tx.send(frame).await;
            }
            continue;
        }

        let handler = handler.clone();
        let workers = workers.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let permit = workers.permits.acquire().await;
            workers.waiting.fetch_sub(1, Ordering::AcqRel);
            if permit.is_err() {
                return;
            }

            let request_id = request.id;
            let response = handler(request).await;
            match Frame::response(&codec, &response, false) {
                Ok(frame) => {
                    let _ = tx.send(frame).await;
                }
                Err(e) => {
                    warn!(request_id, "Failed to encode response: {}", e);
                    if let Some(frame) = error_frame(&codec, request_id, &e) {
                        let _ = tx.send(frame).await;
                    }
                }
            }
        });
    };

    drop(tx);
    let _ = writer_task.await;
    result
}

fn error_frame(codec: &Codec, request_id: u64, err: &LuixError) -> Option<Frame> {
    Frame::response(codec, &Response::error(request_id, err), false).ok()
}
