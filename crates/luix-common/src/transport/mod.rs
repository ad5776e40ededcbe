//! luix Transport Layer
//!
//! This module provides framing, codecs and the TCP transport used to move
//! request and response envelopes between consumers and providers.
//!
//! # Architecture
//!
//! - **Transport**: TCP, one long-lived multiplexed connection per pool slot
//! - **Codec**: postcard (default) or JSON envelopes, chosen by url parameters
//! - **Wire Format**: `[9-byte header] + [codec-encoded envelope]`
//!
//! # Components
//!
//! - **[`Codec`]** / **[`Serializer`]**: Encode/decode envelopes and payloads
//! - **[`Frame`]**: Header validation and async frame I/O
//! - **[`TcpTransportAsync`]**: Connection establishment and one-shot exchanges
//! - **[`TcpServer`]**: Accept loop with heartbeat fast path and bounded workers
//!
//! # Message Size Limits
//!
//! Frames are rejected at header time when their body exceeds the configured
//! `maxContentLength` (10 MiB by default).

pub mod codec;
pub mod frame;
pub mod tcp;
pub mod tcp_server;

pub use codec::{Codec, JsonCodec, PostcardCodec, Serializer};
pub use frame::{read_frame, write_frame, Frame, FrameHeader};
pub use tcp::TcpTransportAsync;
pub use tcp_server::{TcpServer, WorkerLimits};

#[cfg(test)]
mod tests;
