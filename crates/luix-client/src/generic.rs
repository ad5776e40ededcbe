//! Calls without a compiled interface.
//!
//! Arguments and results are plain JSON values, so the self-describing JSON
//! serializer is always used regardless of the stub's serializer.

use luix_common::protocol::{Request, Result};
use luix_common::url::params;
use luix_common::Serializer;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::cluster::ProviderCluster;

/// Per-call settings of a generic call.
#[derive(Debug, Clone)]
pub struct CallOptions {
    pub group: String,
    pub version: String,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub attachments: BTreeMap<String, String>,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            group: params::DEFAULT_GROUP.to_string(),
            version: params::DEFAULT_VERSION.to_string(),
            timeout_ms: params::DEFAULT_REQUEST_TIMEOUT_MS,
            max_retries: params::DEFAULT_MAX_RETRIES,
            attachments: BTreeMap::new(),
        }
    }
}

impl CallOptions {
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// Generic entry point over the providers of one interface.
#[derive(Debug, Clone)]
pub struct GenericCall {
    cluster: Arc<ProviderCluster>,
}

impl GenericCall {
    pub fn new(cluster: Arc<ProviderCluster>) -> Self {
        Self { cluster }
    }

    pub fn interface(&self) -> &str {
        self.cluster.interface()
    }

    /// Calls `method` with the given parameter types and arguments.
    pub async fn invoke(
        &self,
        method: &str,
        parameter_types: &[&str],
        arguments: Vec<Value>,
        options: &CallOptions,
    ) -> Result<Value> {
        let request = build_request(self.interface(), method, parameter_types, arguments, options)?;
        self.cluster.call(request).await?.value()
    }
}

pub(crate) fn build_request(
    interface: &str,
    method: &str,
    parameter_types: &[&str],
    arguments: Vec<Value>,
    options: &CallOptions,
) -> Result<Request> {
    // Zero-argument methods take the unit value.
    let payload = if arguments.is_empty() {
        Serializer::Json.serialize(&())?
    } else {
        Serializer::Json.serialize(&arguments)?
    };

    let mut request = Request::new(interface, method)
        .with_parameter_types(parameter_types)
        .with_payload(payload)
        .with_serializer(Serializer::Json);
    for (key, value) in &options.attachments {
        request = request.with_attachment(key.clone(), value.clone());
    }
    Ok(request
        .with_attachment(params::GROUP, options.group.clone())
        .with_attachment(params::VERSION, options.version.clone())
        .with_timeout(options.timeout_ms)
        .with_max_retries(options.max_retries))
}
