//! Provider-side service implementations.
//!
//! A [`ServiceDefinition`] is the explicit dispatch table of one interface:
//! every method is registered with its parameter type signature and a typed
//! async closure. Arguments arrive as one tuple encoded with the caller's
//! serializer and the result is encoded with the same serializer.

use futures::future::BoxFuture;
use futures::FutureExt;
use luix_common::protocol::requests::join_parameter_types;
use luix_common::protocol::{LuixError, Request, Response, Result};
use luix_common::url::{params, ServiceKey};
use luix_common::Serializer;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

type MethodHandler =
    Arc<dyn Fn(Serializer, Vec<u8>) -> BoxFuture<'static, Result<Vec<u8>>> + Send + Sync>;

/// Methods of one exposed interface, keyed by name and signature.
#[derive(Clone)]
pub struct ServiceDefinition {
    interface: String,
    group: String,
    version: String,
    methods: HashMap<(String, String), MethodHandler>,
}

impl ServiceDefinition {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            group: params::DEFAULT_GROUP.to_string(),
            version: params::DEFAULT_VERSION.to_string(),
            methods: HashMap::new(),
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Registers `name(parameter_types)`.
    ///
    /// `A` is the tuple of arguments, `()` for methods without any. A
    /// [`LuixError::Business`] returned by the handler reaches the caller
    /// unchanged.
    pub fn method<A, R, F, Fut>(mut self, name: &str, parameter_types: &[&str], handler: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let erased: MethodHandler = Arc::new(
            move |serializer: Serializer, payload: Vec<u8>| -> BoxFuture<'static, Result<Vec<u8>>> {
                let handler = handler.clone();
                async move {
                    let args: A = serializer.deserialize(&payload).map_err(|e| {
                        LuixError::InvalidRequest(format!("Failed to decode arguments: {}", e))
                    })?;
                    let result = handler(args).await?;
                    serializer.serialize(&result)
                }
                .boxed()
            },
        );
        self.methods.insert(
            (name.to_string(), join_parameter_types(parameter_types)),
            erased,
        );
        self
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn service_key(&self) -> ServiceKey {
        ServiceKey::new(self.interface.clone(), self.group.clone(), self.version.clone())
    }

    /// `name(types)` of every method, sorted.
    pub fn method_signatures(&self) -> Vec<String> {
        let mut signatures: Vec<String> = self
            .methods
            .keys()
            .map(|(name, types)| format!("{}({})", name, types))
            .collect();
        signatures.sort();
        signatures
    }

    fn handler_for(&self, request: &Request) -> Option<&MethodHandler> {
        let key = (request.method_name.clone(), request.method_parameters.clone());
        if let Some(handler) = self.methods.get(&key) {
            return Some(handler);
        }
        // Callers without a signature get the method if its name is unique.
        if request.method_parameters.is_empty() {
            let mut candidates = self
                .methods
                .iter()
                .filter(|((name, _), _)| *name == request.method_name);
            if let (Some((_, handler)), None) = (candidates.next(), candidates.next()) {
                return Some(handler);
            }
        }
        None
    }

    /// Runs the method named by `request` and builds the response.
    pub async fn invoke(&self, request: Request) -> Response {
        let serializer = match request.serializer() {
            Ok(serializer) => serializer,
            Err(e) => return Response::error(request.id, &e),
        };
        let Some(handler) = self.handler_for(&request) else {
            return Response::error(
                request.id,
                &LuixError::InvalidRequest(format!(
                    "Method {}({}) not found on {}",
                    request.method_name, request.method_parameters, self.interface
                )),
            );
        };

        match handler(serializer, request.payload).await {
            Ok(payload) => Response::success(request.id, payload, serializer),
            Err(e) => {
                debug!(
                    interface = %self.interface,
                    method = %request.method_name,
                    "Method failed: {}",
                    e
                );
                Response::error(request.id, &e)
            }
        }
    }
}

impl fmt::Debug for ServiceDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDefinition")
            .field("service", &self.service_key().to_string())
            .field("methods", &self.method_signatures())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use luix_common::protocol::BusinessError;

    fn orders() -> ServiceDefinition {
        ServiceDefinition::new("com.acme.OrderService")
            .method("placeOrder", &["String", "u32"], |(sku, quantity): (String, u32)| async move {
                if quantity == 0 {
                    return Err(LuixError::Business(
                        BusinessError::new("quantity must be positive").with_code("E400"),
                    ));
                }
                Ok(format!("{}x{}", quantity, sku))
            })
            .method("count", &[], |_: ()| async move { Ok(7u64) })
            .method("find", &["u64"], |(id,): (u64,)| async move { Ok(id * 2) })
            .method("find", &["String"], |(name,): (String,)| async move { Ok(name.len() as u64) })
    }

    fn request(method: &str, types: &[&str], serializer: Serializer, payload: Vec<u8>) -> Request {
        Request::new("com.acme.OrderService", method)
            .with_parameter_types(types)
            .with_serializer(serializer)
            .with_payload(payload)
    }

    #[tokio::test]
    async fn test_invoke_with_each_serializer() {
        let service = orders();
        for serializer in [Serializer::Postcard, Serializer::Json] {
            let payload = serializer.serialize(&("sku-1", 2u32)).unwrap();
            let response = service
                .invoke(request("placeOrder", &["String", "u32"], serializer, payload))
                .await;
            assert_eq!(response.serializer_id, serializer.id());
            assert_eq!(response.value::<String>().unwrap(), "2xsku-1");
        }
    }

    #[tokio::test]
    async fn test_business_error_is_preserved() {
        let payload = Serializer::Json.serialize(&("sku-1", 0u32)).unwrap();
        let response = orders()
            .invoke(request("placeOrder", &["String", "u32"], Serializer::Json, payload))
            .await;
        match response.into_payload().unwrap_err() {
            LuixError::Business(err) => assert_eq!(err.code.as_deref(), Some("E400")),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_overloads_dispatch_by_signature() {
        let service = orders();
        let payload = Serializer::Postcard.serialize(&(21u64,)).unwrap();
        let response = service
            .invoke(request("find", &["u64"], Serializer::Postcard, payload))
            .await;
        assert_eq!(response.value::<u64>().unwrap(), 42);

        // Ambiguous without a signature.
        let payload = Serializer::Postcard.serialize(&(21u64,)).unwrap();
        let response = service
            .invoke(request("find", &[], Serializer::Postcard, payload))
            .await;
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn test_unit_arguments_and_unique_name_fallback() {
        let payload = Serializer::Json.serialize(&()).unwrap();
        let response = orders()
            .invoke(request("count", &[], Serializer::Json, payload))
            .await;
        assert_eq!(response.value::<u64>().unwrap(), 7);
    }

    #[tokio::test]
    async fn test_malformed_arguments_are_invalid_request() {
        let response = orders()
            .invoke(request("placeOrder", &["String", "u32"], Serializer::Json, b"{".to_vec()))
            .await;
        // Framework errors come back as remote errors.
        assert!(matches!(response.into_payload(), Err(LuixError::Remote(_))));
    }

    #[test]
    fn test_method_signatures_are_sorted() {
        assert_eq!(
            orders().method_signatures(),
            vec!["count()", "find(String)", "find(u64)", "placeOrder(String,u32)"]
        );
    }
}
