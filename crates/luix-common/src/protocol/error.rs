use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Application-level error raised by a remote service implementation.
///
/// Business errors travel back to the caller verbatim and are never retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessError {
    pub code: Option<String>,
    pub message: String,
}

impl BusinessError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl fmt::Display for BusinessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "[{}] {}", code, self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for BusinessError {}

#[derive(Error, Debug, Clone)]
pub enum LuixError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("No active provider invoker for {0}")]
    NoActiveInvoker(String),

    #[error("Can not re-expose provider {0}")]
    ExposureConflict(String),

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Remote framework error: {0}")]
    Remote(String),

    #[error("Failed to call {url} after {retries} retries: {source}")]
    RetriesExhausted {
        url: String,
        retries: u32,
        #[source]
        source: Box<LuixError>,
    },

    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Business error: {0}")]
    Business(BusinessError),
}

impl LuixError {
    /// Whether the remote service implementation raised this error.
    pub fn is_business(&self) -> bool {
        matches!(self, LuixError::Business(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, LuixError::Timeout(_))
    }

    /// Whether the error originated in the runtime itself.
    ///
    /// Framework errors, timeouts included, are eligible for failover.
    pub fn is_framework(&self) -> bool {
        !self.is_business()
    }
}

impl From<std::io::Error> for LuixError {
    fn from(err: std::io::Error) -> Self {
        LuixError::Io(Arc::new(err))
    }
}

impl From<postcard::Error> for LuixError {
    fn from(err: postcard::Error) -> Self {
        LuixError::Codec(err.to_string())
    }
}

impl From<serde_json::Error> for LuixError {
    fn from(err: serde_json::Error) -> Self {
        LuixError::Codec(err.to_string())
    }
}

impl From<std::net::AddrParseError> for LuixError {
    fn from(err: std::net::AddrParseError) -> Self {
        LuixError::Configuration(err.to_string())
    }
}

impl From<BusinessError> for LuixError {
    fn from(err: BusinessError) -> Self {
        LuixError::Business(err)
    }
}

pub type Result<T> = std::result::Result<T, LuixError>;
