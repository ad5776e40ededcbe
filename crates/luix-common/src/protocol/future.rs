//! Future responses for asynchronous calls.
//!
//! A [`FutureResponse`] is created when a request is written and completed by
//! the connection reader once the correlated response arrives, or cancelled
//! when its timeout elapses. Listeners run exactly once, on whichever task
//! completes the future, so they must not block.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

use crate::protocol::error::LuixError;
use crate::protocol::requests::RequestId;
use crate::protocol::responses::Response;

pub type ResponseResult = std::result::Result<Response, LuixError>;

type Listener = Box<dyn FnOnce(&ResponseResult) + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutureState {
    Doing,
    Done,
    Cancelled,
}

struct Inner {
    state: FutureState,
    outcome: Option<ResponseResult>,
    listeners: Vec<Listener>,
}

struct Shared {
    request_id: RequestId,
    timeout: Duration,
    created_at: Instant,
    inner: Mutex<Inner>,
    notify: Notify,
}

/// Pending response of one request.
#[derive(Clone)]
pub struct FutureResponse {
    shared: Arc<Shared>,
}

impl FutureResponse {
    pub fn new(request_id: RequestId, timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                request_id,
                timeout,
                created_at: Instant::now(),
                inner: Mutex::new(Inner {
                    state: FutureState::Doing,
                    outcome: None,
                    listeners: Vec::new(),
                }),
                notify: Notify::new(),
            }),
        }
    }

    pub fn request_id(&self) -> RequestId {
        self.shared.request_id
    }

    pub fn timeout(&self) -> Duration {
        self.shared.timeout
    }

    pub fn state(&self) -> FutureState {
        self.shared.inner.lock().state
    }

    pub fn is_done(&self) -> bool {
        self.state() != FutureState::Doing
    }

    /// Whether the timeout has elapsed since the request was sent.
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.shared.created_at) > self.shared.timeout
    }

    /// Completes the future with a response. Returns `false` if it was already finished.
    pub fn complete(&self, response: Response) -> bool {
        self.finish(FutureState::Done, Ok(response))
    }

    /// Completes the future with an error.
    pub fn fail(&self, err: LuixError) -> bool {
        self.finish(FutureState::Done, Err(err))
    }

    /// Cancels the future, typically because its timeout elapsed.
    pub fn cancel(&self, err: LuixError) -> bool {
        self.finish(FutureState::Cancelled, Err(err))
    }

    /// Registers a completion listener.
    ///
    /// If the future has already finished the listener runs immediately on the
    /// calling task.
    pub fn add_listener<F>(&self, listener: F)
    where
        F: FnOnce(&ResponseResult) + Send + 'static,
    {
        let outcome = {
            let mut inner = self.shared.inner.lock();
            match &inner.outcome {
                Some(outcome) => outcome.clone(),
                None => {
                    inner.listeners.push(Box::new(listener));
                    return;
                }
            }
        };
        listener(&outcome);
    }

    /// Waits until the future finishes, without applying the timeout.
    pub async fn wait(&self) -> ResponseResult {
        loop {
            let notified = self.shared.notify.notified();
            if let Some(outcome) = self.outcome() {
                return outcome;
            }
            notified.await;
        }
    }

    /// Waits for the response, cancelling the future with a timeout error
    /// once its timeout elapses.
    pub async fn get(&self) -> ResponseResult {
        let remaining = self
            .shared
            .timeout
            .saturating_sub(self.shared.created_at.elapsed());
        match tokio::time::timeout(remaining, self.wait()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                self.cancel(LuixError::Timeout(self.shared.timeout.as_millis() as u64));
                // A response may have won the race against the cancellation.
                self.outcome()
                    .unwrap_or_else(|| Err(LuixError::Timeout(self.shared.timeout.as_millis() as u64)))
            }
        }
    }

    fn outcome(&self) -> Option<ResponseResult> {
        self.shared.inner.lock().outcome.clone()
    }

    fn finish(&self, state: FutureState, outcome: ResponseResult) -> bool {
        let listeners = {
            let mut inner = self.shared.inner.lock();
            if inner.state != FutureState::Doing {
                return false;
            }
            inner.state = state;
            inner.outcome = Some(outcome.clone());
            std::mem::take(&mut inner.listeners)
        };

        self.shared.notify.notify_waiters();
        for listener in listeners {
            listener(&outcome);
        }
        true
    }
}

impl fmt::Debug for FutureResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FutureResponse")
            .field("request_id", &self.shared.request_id)
            .field("state", &self.state())
            .field("timeout", &self.shared.timeout)
            .finish()
    }
}
