//! luix Server
//!
//! Provider side of luix: service definitions, per-address routing,
//! exposure and registration.
//!
//! A [`ProviderConfig`] wraps a [`ServiceDefinition`]. Exporting it exposes
//! the service through the shared [`ProviderExposer`], which starts one
//! [`RpcServer`] per address, then registers the provider url with every
//! configured registry.
//!
//! # Example
//!
//! ```no_run
//! use luix_registry::Registries;
//! use luix_server::{ProviderConfig, ProviderExposer, ServiceDefinition};
//! use std::sync::Arc;
//!
//! # async fn run() -> luix_common::Result<()> {
//! let service = ServiceDefinition::new("com.acme.OrderService").method(
//!     "placeOrder",
//!     &["String", "u32"],
//!     |(sku, quantity): (String, u32)| async move { Ok(format!("{}x{}", quantity, sku)) },
//! );
//! let exposer = Arc::new(ProviderExposer::default());
//! let registries = Registries::in_memory();
//! let exported = ProviderConfig::new(service)
//!     .with_address("127.0.0.1", 20880)
//!     .export(&exposer, &registries)
//!     .await?;
//! println!("serving {}", exported.url());
//! # Ok(())
//! # }
//! ```

pub mod builtin;
pub mod exposer;
pub mod provider;
pub mod router;
pub mod server;
pub mod service;

pub use builtin::{
    builtin_service, Application, ApplicationInfo, ServerInfo, BUILTIN_INTERFACE,
    METHOD_GET_APPLICATION_INFO, METHOD_GET_SERVER_INFO,
};
pub use exposer::ProviderExposer;
pub use provider::{ExportedProvider, ProviderConfig};
pub use router::ServiceRouter;
pub use server::{RpcServer, ServerConfig};
pub use service::ServiceDefinition;
