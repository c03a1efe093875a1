//! chaincrawl-rpc: JSON-RPC plumbing for the per-network crawlers.
//!
//! # Overview
//!
//! - [`RpcTransport`]: the async trait every endpoint connection implements
//! - [`JsonRpcRequest`] / [`JsonRpcResponse`]: wire types
//! - [`TransportError`]: structured error type
//! - [`HttpRpcClient`]: `reqwest` transport with a per-request timeout and
//!   bounded exponential retry ([`RetryPolicy`])
//!
//! Endpoint rotation is not done here: a transport talks to exactly one URL,
//! and the crawler's connection manager decides which transport is active.

pub mod error;
pub mod http;
pub mod request;
pub mod retry;
pub mod transport;

pub use error::TransportError;
pub use http::{HttpClientConfig, HttpRpcClient};
pub use request::{
    hex_quantity, parse_hex_quantity, JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcId,
};
pub use retry::{RetryConfig, RetryPolicy};
pub use transport::{call, RpcTransport};
