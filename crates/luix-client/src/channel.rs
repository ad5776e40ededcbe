//! Multiplexed connections.
//!
//! A [`Channel`] owns one TCP connection. Requests are written under a lock on
//! the write half; a reader task correlates every inbound response with its
//! waiting [`FutureResponse`] through the shared [`PendingRequests`] map.

use dashmap::DashMap;
use luix_common::protocol::heartbeat::is_heartbeat;
use luix_common::protocol::{FutureResponse, LuixError, Request, RequestId, Response, Result};
use luix_common::transport::frame::{read_frame, write_frame, Frame};
use luix_common::transport::{Codec, TcpTransportAsync};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

struct PendingEntry {
    channel_id: u64,
    future: FutureResponse,
}

/// Requests waiting for their response, keyed by request id.
pub struct PendingRequests {
    entries: DashMap<RequestId, PendingEntry>,
    capacity: usize,
}

impl PendingRequests {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Tracks `future` until its response arrives.
    ///
    /// # Errors
    ///
    /// Returns [`LuixError::Transport`] once `capacity` requests are pending.
    pub fn register(&self, channel_id: u64, future: FutureResponse) -> Result<()> {
        if self.entries.len() >= self.capacity {
            return Err(LuixError::Transport(format!(
                "Pending requests reached the limit of {}",
                self.capacity
            )));
        }
        self.entries
            .insert(future.request_id(), PendingEntry { channel_id, future });
        Ok(())
    }

    /// Hands `response` to its waiter. Responses nobody waits for any more are dropped.
    pub fn complete(&self, response: Response) -> bool {
        match self.entries.remove(&response.request_id) {
            Some((_, entry)) => entry.future.complete(response),
            None => {
                debug!(
                    request_id = response.request_id,
                    "No response found for request, discarding"
                );
                false
            }
        }
    }

    pub fn remove(&self, request_id: RequestId) {
        self.entries.remove(&request_id);
    }

    /// Cancels every entry whose timeout elapsed before `now`.
    pub fn sweep(&self, now: Instant) -> usize {
        let expired: Vec<RequestId> = self
            .entries
            .iter()
            .filter(|entry| entry.future.is_expired(now))
            .map(|entry| *entry.key())
            .collect();

        let mut swept = 0;
        for id in expired {
            if let Some((_, entry)) = self.entries.remove(&id) {
                let timeout = entry.future.timeout().as_millis() as u64;
                if entry.future.cancel(LuixError::Timeout(timeout)) {
                    swept += 1;
                }
            }
        }
        swept
    }

    /// Fails every request written to `channel_id`.
    pub fn fail_channel(&self, channel_id: u64, err: &LuixError) {
        let ids: Vec<RequestId> = self
            .entries
            .iter()
            .filter(|entry| entry.channel_id == channel_id)
            .map(|entry| *entry.key())
            .collect();
        for id in ids {
            if let Some((_, entry)) = self.entries.remove(&id) {
                entry.future.fail(err.clone());
            }
        }
    }

    pub fn fail_all(&self, err: &LuixError) {
        let ids: Vec<RequestId> = self.entries.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, entry)) = self.entries.remove(&id) {
                entry.future.fail(err.clone());
            }
        }
    }
}

/// One multiplexed connection to a provider.
pub struct Channel {
    id: u64,
    address: String,
    writer: Mutex<OwnedWriteHalf>,
    pending: Arc<PendingRequests>,
    closed: CancellationToken,
}

impl Channel {
    /// Connects to `address` and starts the reader task.
    pub async fn open(
        transport: &TcpTransportAsync,
        address: &str,
        pending: Arc<PendingRequests>,
    ) -> Result<Arc<Self>> {
        let stream = transport.connect(address).await?;
        let (reader, writer) = stream.into_split();

        let channel = Arc::new(Self {
            id: NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed),
            address: address.to_string(),
            writer: Mutex::new(writer),
            pending,
            closed: CancellationToken::new(),
        });

        tokio::spawn(Self::read_loop(
            reader,
            transport.max_content_length(),
            channel.id,
            channel.address.clone(),
            channel.pending.clone(),
            channel.closed.clone(),
        ));

        debug!(address, channel = channel.id, "Opened channel");
        Ok(channel)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_active(&self) -> bool {
        !self.closed.is_cancelled()
    }

    /// Writes `request`; its response completes `future`.
    pub async fn send(&self, codec: &Codec, request: &Request, future: FutureResponse) -> Result<()> {
        if !self.is_active() {
            return Err(LuixError::Connection(format!(
                "Channel to {} is closed",
                self.address
            )));
        }

        let frame = Frame::request(codec, request, is_heartbeat(request))?;
        self.pending.register(self.id, future)?;

        let written = {
            let mut writer = self.writer.lock().await;
            write_frame(&mut *writer, &frame).await
        };
        if let Err(e) = written {
            self.pending.remove(request.id);
            self.close();
            return Err(e);
        }
        Ok(())
    }

    pub fn close(&self) {
        self.closed.cancel();
    }

    async fn read_loop(
        mut reader: OwnedReadHalf,
        max_content_length: usize,
        id: u64,
        address: String,
        pending: Arc<PendingRequests>,
        closed: CancellationToken,
    ) {
        loop {
            let frame = tokio::select! {
                _ = closed.cancelled() => break,
                frame = read_frame(&mut reader, max_content_length) => frame,
            };

            match frame {
                Ok(Some(frame)) => match frame.decode_response() {
                    Ok(response) => {
                        pending.complete(response);
                    }
                    Err(e) => warn!(address = %address, "Failed to decode response: {}", e),
                },
                Ok(None) => {
                    debug!(address = %address, "Connection closed by peer");
                    break;
                }
                Err(e) => {
                    debug!(address = %address, "Connection error: {}", e);
                    break;
                }
            }
        }

        closed.cancel();
        pending.fail_channel(
            id,
            &LuixError::Connection(format!("Connection to {} closed", address)),
        );
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn response(id: RequestId) -> Response {
        Response::success(id, vec![], luix_common::Serializer::Postcard)
    }

    #[test]
    fn test_pending_capacity() {
        let pending = PendingRequests::new(1);
        pending
            .register(1, FutureResponse::new(1, Duration::from_secs(1)))
            .unwrap();
        let err = pending
            .register(1, FutureResponse::new(2, Duration::from_secs(1)))
            .unwrap_err();
        assert!(matches!(err, LuixError::Transport(_)));
    }

    #[test]
    fn test_late_response_is_discarded() {
        let pending = PendingRequests::new(10);
        assert!(!pending.complete(response(99)));
    }

    #[test]
    fn test_complete_removes_entry() {
        let pending = PendingRequests::new(10);
        let future = FutureResponse::new(7, Duration::from_secs(1));
        pending.register(1, future.clone()).unwrap();
        assert!(pending.complete(response(7)));
        assert!(future.is_done());
        assert!(pending.is_empty());
    }

    #[test]
    fn test_sweep_cancels_expired_entries() {
        let pending = PendingRequests::new(10);
        let expired = FutureResponse::new(1, Duration::ZERO);
        let fresh = FutureResponse::new(2, Duration::from_secs(60));
        pending.register(1, expired.clone()).unwrap();
        pending.register(1, fresh.clone()).unwrap();

        let swept = pending.sweep(Instant::now() + Duration::from_millis(1));
        assert_eq!(swept, 1);
        assert_eq!(expired.state(), luix_common::FutureState::Cancelled);
        assert!(!fresh.is_done());
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_fail_channel_only_touches_its_requests() {
        let pending = PendingRequests::new(10);
        let first = FutureResponse::new(1, Duration::from_secs(60));
        let second = FutureResponse::new(2, Duration::from_secs(60));
        pending.register(1, first.clone()).unwrap();
        pending.register(2, second.clone()).unwrap();

        pending.fail_channel(1, &LuixError::Connection("closed".into()));
        assert!(first.is_done());
        assert!(!second.is_done());
    }
}
