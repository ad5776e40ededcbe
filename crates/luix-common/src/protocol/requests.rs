use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use crate::transport::codec::Serializer;
use crate::url::{params, ServiceKey};

pub type RequestId = u64;
pub type Attachments = BTreeMap<String, String>;

/// Bits of the request id reserved for the per-millisecond sequence.
const SEQUENCE_BITS: u32 = 20;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;

static REQUEST_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Request envelope.
///
/// Everything a later pipeline stage needs is carried here; nothing is read
/// from ambient state once the request has been built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub interface_name: String,
    pub method_name: String,
    /// Comma separated parameter type names.
    pub method_parameters: String,
    /// Arguments encoded with the serializer named by `serializer_id`.
    pub payload: Vec<u8>,
    pub attachments: Attachments,
    pub retry_number: u32,
    pub async_call: bool,
    pub serializer_id: u8,
}

impl Request {
    pub fn new(interface_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Request {
            id: generate_request_id(),
            interface_name: interface_name.into(),
            method_name: method_name.into(),
            method_parameters: String::new(),
            payload: Vec::new(),
            attachments: Attachments::new(),
            retry_number: 0,
            async_call: false,
            serializer_id: Serializer::default().id(),
        }
    }

    pub fn with_parameter_types<S: AsRef<str>>(mut self, types: &[S]) -> Self {
        self.method_parameters = join_parameter_types(types);
        self
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_serializer(mut self, serializer: Serializer) -> Self {
        self.serializer_id = serializer.id();
        self.attachments
            .insert(params::SERIALIZER.to_string(), serializer.name().to_string());
        self
    }

    pub fn with_attachment(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attachments.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(self, timeout_ms: u64) -> Self {
        self.with_attachment(params::REQUEST_TIMEOUT, timeout_ms.to_string())
    }

    pub fn with_max_retries(self, max_retries: u32) -> Self {
        self.with_attachment(params::MAX_RETRIES, max_retries.to_string())
    }

    pub fn mark_async(mut self) -> Self {
        self.async_call = true;
        self
    }

    pub fn attachment(&self, key: &str) -> Option<&str> {
        self.attachments.get(key).map(String::as_str)
    }

    pub fn group(&self) -> &str {
        self.attachment(params::GROUP).unwrap_or(params::DEFAULT_GROUP)
    }

    pub fn version(&self) -> &str {
        self.attachment(params::VERSION).unwrap_or(params::DEFAULT_VERSION)
    }

    pub fn timeout_ms(&self) -> Option<u64> {
        self.attachment(params::REQUEST_TIMEOUT)?.parse().ok()
    }

    pub fn max_retries(&self) -> Option<u32> {
        self.attachment(params::MAX_RETRIES)?.parse().ok()
    }

    pub fn service_key(&self) -> ServiceKey {
        ServiceKey::new(self.interface_name.clone(), self.group(), self.version())
    }

    pub fn serializer(&self) -> crate::protocol::Result<Serializer> {
        Serializer::from_id(self.serializer_id)
    }
}

/// Joins parameter type names into the signature carried by a request.
pub fn join_parameter_types<S: AsRef<str>>(types: &[S]) -> String {
    types
        .iter()
        .map(|t| t.as_ref().trim())
        .collect::<Vec<_>>()
        .join(",")
}

/// Generates a unique request id: milliseconds since the epoch in the upper
/// bits, a wrapping sequence in the lower 20.
pub fn generate_request_id() -> RequestId {
    let millis = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);

    let sequence = REQUEST_SEQUENCE.fetch_add(1, Ordering::Relaxed) & SEQUENCE_MASK;

    (millis << SEQUENCE_BITS) | sequence
}
