use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use crate::protocol::error::{BusinessError, LuixError, Result};
use crate::protocol::requests::RequestId;
use crate::transport::codec::Serializer;

/// Error category carried on the wire so the caller can rebuild a typed error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Business,
    ServiceNotFound,
    Timeout,
    Framework,
}

/// Error descriptor carried by a failed response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub kind: ErrorKind,
    pub code: Option<String>,
    pub message: String,
}

impl RemoteError {
    pub fn from_error(err: &LuixError) -> Self {
        match err {
            LuixError::Business(business) => Self {
                kind: ErrorKind::Business,
                code: business.code.clone(),
                message: business.message.clone(),
            },
            LuixError::ServiceNotFound(message) => Self {
                kind: ErrorKind::ServiceNotFound,
                code: None,
                message: message.clone(),
            },
            LuixError::Timeout(ms) => Self {
                kind: ErrorKind::Timeout,
                code: Some(ms.to_string()),
                message: err.to_string(),
            },
            other => Self {
                kind: ErrorKind::Framework,
                code: None,
                message: other.to_string(),
            },
        }
    }

    pub fn into_error(self) -> LuixError {
        match self.kind {
            ErrorKind::Business => LuixError::Business(BusinessError {
                code: self.code,
                message: self.message,
            }),
            ErrorKind::ServiceNotFound => LuixError::ServiceNotFound(self.message),
            ErrorKind::Timeout => {
                LuixError::Timeout(self.code.and_then(|c| c.parse().ok()).unwrap_or(0))
            }
            ErrorKind::Framework => LuixError::Remote(self.message),
        }
    }
}

/// Response envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    pub request_id: RequestId,
    pub payload: Option<Vec<u8>>,
    pub error: Option<RemoteError>,
    pub created_at_ms: u64,
    pub serializer_id: u8,
}

impl Response {
    pub fn success(request_id: RequestId, payload: Vec<u8>, serializer: Serializer) -> Self {
        Response {
            request_id,
            payload: Some(payload),
            error: None,
            created_at_ms: now_millis(),
            serializer_id: serializer.id(),
        }
    }

    pub fn error(request_id: RequestId, err: &LuixError) -> Self {
        Response {
            request_id,
            payload: None,
            error: Some(RemoteError::from_error(err)),
            created_at_ms: now_millis(),
            serializer_id: Serializer::default().id(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Converts the response into its raw payload or its typed error.
    pub fn into_payload(self) -> Result<Vec<u8>> {
        match self.error {
            Some(err) => Err(err.into_error()),
            None => Ok(self.payload.unwrap_or_default()),
        }
    }

    /// Decodes the result with the serializer that produced it.
    pub fn value<T: DeserializeOwned>(self) -> Result<T> {
        let serializer = Serializer::from_id(self.serializer_id)?;
        let payload = self.into_payload()?;
        serializer.deserialize(&payload)
    }

    /// Checks whether the response is older than `timeout_ms`.
    pub fn is_stale(&self, timeout_ms: u64) -> bool {
        now_millis().saturating_sub(self.created_at_ms) > timeout_ms
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
