//! Native JSON-RPC client for Bitcoin Core compatible endpoints.
//!
//! Implements [`super::BitcoinRpc`] over JSON-RPC using `reqwest`, with
//! support for HTTP transport, optional request rate limiting, single and
//! batched calls, basic auth, and transient-failure retry.

mod client;
mod connection;
mod protocol;

pub use client::HttpRpcClient;
