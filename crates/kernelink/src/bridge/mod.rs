//! Transport layer between the client and the engine process.
//!
//! # Architecture
//!
//! - **protocol**: Message types (EngineRequest/EngineReply, CorrelationToken)
//! - **codec**: JSON framing codec for AsyncRead/AsyncWrite
//! - **transport**: Engine endpoints (spawned child, Unix socket, TCP)
//! - **channel**: Ordered writer + correlated reader over one connection

pub mod channel;
pub mod codec;
pub mod protocol;
pub mod transport;
