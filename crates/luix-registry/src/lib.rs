//! luix Registry
//!
//! Registration and discovery of providers.
//!
//! # Overview
//!
//! - **Contracts**: [`Registry`], [`NotifyListener`] and [`RegistryFactory`]
//! - **Failback**: [`FailbackRegistry`] retries failed operations and serves
//!   cached discovery results while the backend is unreachable
//! - **Backends**: hierarchical key store ([`keystore`]), health-checking
//!   service catalog ([`catalog`]) and static address lists ([`direct`])
//! - **Catalog**: [`Registries`] resolves registry urls to shared instances
//!   by backend name
//!
//! # Example
//!
//! ```
//! use luix_common::url::Url;
//! use luix_registry::Registries;
//!
//! # #[tokio::main]
//! # async fn main() -> luix_common::Result<()> {
//! let registries = Registries::in_memory();
//! let registry = registries.get_or_create(&Url::registry("keystore", "127.0.0.1", 2181))?;
//!
//! let provider = Url::provider("luix", "10.0.0.5", 20880, "com.acme.OrderService");
//! registry.register(&provider).await?;
//! registry.activate(&provider).await?;
//!
//! let consumer = Url::consumer("luix", "10.0.0.9", "com.acme.OrderService");
//! assert_eq!(registry.discover(&consumer).await?, vec![provider]);
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod direct;
pub mod failback;
pub mod keystore;
pub mod registries;
pub mod registry;

#[cfg(test)]
mod tests;

pub use failback::{FailbackRegistry, RegistryBackend};
pub use registries::Registries;
pub use registry::{
    is_provider_entry, matches_consumer, notify_safely, FnListener, NotifyListener, Registry,
    RegistryFactory,
};
