//! Core library for **Entwine** — a Bitcoin ledger graph extractor.
//!
//! This crate walks a block range over Bitcoin Core's JSON-RPC interface,
//! normalizes blocks, transactions, outputs, and addresses into a family of
//! bulk-loadable CSV files, and clusters addresses into entities with the
//! common-input-ownership heuristic. It is intentionally transport-agnostic:
//! the [`rpc::BitcoinRpc`] trait can be backed by HTTP JSON-RPC, a mock, or
//! any future transport.

pub mod chain;
pub mod dump;
pub mod entities;
pub mod error;
pub mod export;
pub mod resolve;
pub mod rpc;
pub mod types;

#[cfg(test)]
pub(crate) mod test_util;

pub use error::{CoreError, RpcError};
pub use types::{Block, OutputKey, ResolvedPrevout, Transaction, TxInput, TxOutput};
