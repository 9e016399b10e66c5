//! JSON-RPC 2.0 over TCP.
//!
//! ## Architecture
//!
//! - `protocol`: JSON-RPC 2.0 request/response types and server metadata
//! - `transport`: TCP listener with newline-delimited JSON framing
//! - `methods`: the built-in full-capability method handler
//! - `client`: client for calling a running server
//!
//! Lifecycle (bind, start, stop, join) lives in [`crate::server`].

pub mod client;
pub mod methods;
pub mod protocol;
pub(crate) mod transport;

pub use client::{ClientError, RpcClient};
pub use methods::MethodHandler;
pub use protocol::{Request, Response, RpcError, RpcServerMetadata};
