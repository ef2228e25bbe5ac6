//! Mock [`BitcoinRpc`] implementation for unit tests.
//!
//! Uses a builder pattern (`MockRpc::builder()`) to register canned blocks
//! and transactions before the mock is consumed.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use bitcoin::{BlockHash, Txid};

use crate::error::{CoreError, RpcError};

use super::types::{RawBlock, RawTx};
use super::BitcoinRpc;

/// A mock Bitcoin RPC backend for testing. Returns canned block and
/// transaction data from maps populated via the builder pattern.
pub struct MockRpc {
    blocks: HashMap<BlockHash, RawBlock>,
    hash_by_height: BTreeMap<u64, BlockHash>,
    transactions: HashMap<Txid, RawTx>,
}

impl MockRpc {
    pub fn builder() -> MockRpcBuilder {
        MockRpcBuilder {
            blocks: HashMap::new(),
            hash_by_height: BTreeMap::new(),
            transactions: HashMap::new(),
        }
    }
}

/// Builder for configuring a [`MockRpc`] with canned data.
pub struct MockRpcBuilder {
    blocks: HashMap<BlockHash, RawBlock>,
    hash_by_height: BTreeMap<u64, BlockHash>,
    transactions: HashMap<Txid, RawTx>,
}

impl MockRpcBuilder {
    /// Register a block, keyed by both hash and height.
    pub fn with_block(mut self, block: RawBlock) -> Self {
        self.hash_by_height.insert(block.height, block.hash);
        self.blocks.insert(block.hash, block);
        self
    }

    /// Register a transaction, keyed by its `txid`.
    pub fn with_tx(mut self, tx: RawTx) -> Self {
        self.transactions.insert(tx.txid, tx);
        self
    }

    /// Consume the builder and produce a [`MockRpc`].
    pub fn build(self) -> MockRpc {
        MockRpc {
            blocks: self.blocks,
            hash_by_height: self.hash_by_height,
            transactions: self.transactions,
        }
    }
}

fn not_found(message: &str) -> CoreError {
    CoreError::Rpc(RpcError::ServerError {
        code: -5,
        message: message.to_owned(),
    })
}

#[async_trait]
impl BitcoinRpc for MockRpc {
    async fn get_block_count(&self) -> Result<u64, CoreError> {
        Ok(self
            .hash_by_height
            .keys()
            .next_back()
            .copied()
            .unwrap_or(0))
    }

    async fn get_block_hash(&self, height: u64) -> Result<BlockHash, CoreError> {
        self.hash_by_height
            .get(&height)
            .copied()
            .ok_or_else(|| not_found("Block height out of range"))
    }

    async fn get_block(&self, hash: &BlockHash) -> Result<RawBlock, CoreError> {
        self.blocks
            .get(hash)
            .cloned()
            .ok_or_else(|| not_found("Block not found"))
    }

    async fn get_transactions(&self, txids: &[Txid]) -> Result<Vec<RawTx>, CoreError> {
        txids
            .iter()
            .map(|txid| {
                self.transactions
                    .get(txid)
                    .cloned()
                    .ok_or_else(|| not_found("No such mempool or blockchain transaction"))
            })
            .collect()
    }

    async fn find_transactions(&self, txids: &[Txid]) -> Result<Vec<Option<RawTx>>, CoreError> {
        Ok(txids
            .iter()
            .map(|txid| self.transactions.get(txid).cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::*;

    #[tokio::test]
    async fn block_count_is_highest_registered_height() {
        let rpc = MockRpc::builder()
            .with_block(make_raw_block(1, 10, &[], None))
            .with_block(make_raw_block(2, 12, &[], None))
            .build();
        assert_eq!(rpc.get_block_count().await.unwrap(), 12);
    }

    #[tokio::test]
    async fn get_transactions_fails_on_missing_txid() {
        let rpc = MockRpc::builder().build();
        let err = rpc
            .get_transactions(&[txid_from_byte(1)])
            .await
            .expect_err("unknown txid must fail the strict batch");
        assert!(matches!(
            err,
            CoreError::Rpc(RpcError::ServerError { code: -5, .. })
        ));
    }

    #[tokio::test]
    async fn find_transactions_yields_none_on_missing_txid() {
        let tx = make_raw_tx(
            txid_from_byte(1),
            vec![coinbase_vin()],
            vec![simple_vout(0, 50.0, &["X"])],
        );
        let rpc = MockRpc::builder().with_tx(tx).build();

        let found = rpc
            .find_transactions(&[txid_from_byte(1), txid_from_byte(9)])
            .await
            .unwrap();
        assert!(found[0].is_some());
        assert!(found[1].is_none());
    }
}
