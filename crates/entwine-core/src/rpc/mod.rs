//! Bitcoin Core RPC abstraction layer.
//!
//! Defines the [`BitcoinRpc`] trait and provides an HTTP JSON-RPC
//! implementation ([`HttpRpcClient`]) plus a test mock (`mock::MockRpc`).

mod http_adapter;
#[cfg(test)]
pub mod mock;
pub mod types;

pub use http_adapter::HttpRpcClient;
pub use types::{RawBlock, RawTx};

use async_trait::async_trait;
use bitcoin::{BlockHash, Txid};

use crate::error::CoreError;

/// Minimal trait covering the Bitcoin Core RPC methods that Entwine needs.
///
/// Implementations are expected to handle authentication, connection
/// management, retries, and response deserialization internally. All loading
/// is explicit: nothing in the domain model performs RPC behind a field read.
#[async_trait]
pub trait BitcoinRpc: Send + Sync {
    /// Height of the chain tip (`getblockcount`).
    async fn get_block_count(&self) -> Result<u64, CoreError>;

    /// Hash of the block at `height` on the canonical chain (`getblockhash`).
    async fn get_block_hash(&self, height: u64) -> Result<BlockHash, CoreError>;

    /// Fetch a raw block record by hash (`getblock`, verbosity 1).
    async fn get_block(&self, hash: &BlockHash) -> Result<RawBlock, CoreError>;

    /// Fetch many decoded transactions. Implementations may batch these
    /// requests into one or more RPC calls; the response order must
    /// correspond to the request order. Any transaction the node cannot
    /// return fails the whole call.
    async fn get_transactions(&self, txids: &[Txid]) -> Result<Vec<RawTx>, CoreError>;

    /// Like [`get_transactions`](Self::get_transactions), but a transaction
    /// the node reports as unknown yields `None` in its slot instead of
    /// failing the call. Used for previous-output lookups, where a missing
    /// ancestor is recoverable.
    async fn find_transactions(&self, txids: &[Txid]) -> Result<Vec<Option<RawTx>>, CoreError>;
}
