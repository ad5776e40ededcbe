//! luix Common Types and Transport
//!
//! This crate provides the endpoint descriptors, envelopes, codecs and TCP
//! framing shared by every part of the luix RPC runtime.
//!
//! # Overview
//!
//! - **Url**: [`url::Url`], the immutable identity of providers, consumers and registries
//! - **Protocol Layer**: request/response envelopes, future responses, errors, heartbeats
//! - **Transport Layer**: frame header, postcard/JSON codecs, TCP client and server loops
//!
//! # Wire Protocol
//!
//! - **Transport**: TCP, multiplexed by request id
//! - **Serialization**: postcard or JSON, named in every frame header
//! - **Message Format**: `[magic][version][flags][serializer][length u32 BE] + [envelope]`
//!
//! # Example
//!
//! ```
//! use luix_common::{Request, Response, Serializer};
//!
//! let request = Request::new("com.acme.OrderService", "getOrder")
//!     .with_parameter_types(&["u64"])
//!     .with_payload(Serializer::Postcard.serialize(&(42u64,)).unwrap())
//!     .with_timeout(1000);
//!
//! let response = Response::success(request.id, Serializer::Postcard.serialize("ok").unwrap(), Serializer::Postcard);
//! assert_eq!(response.value::<String>().unwrap(), "ok");
//! ```

pub mod protocol;
pub mod transport;
pub mod url;

pub use protocol::*;
pub use transport::{Codec, Serializer};
pub use url::{ServiceKey, Url};
