//! Input resolution — attaching referenced-output data to every spend.
//!
//! Outputs produced inside the walked range are served from an in-memory
//! index. Inputs referencing ancestor ranges trigger previous-transaction
//! lookups, batched and de-duplicated per block, with a bounded LRU cache so
//! repeated ancestor references across blocks do not re-fetch.

use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;

use bitcoin::{OutPoint, Txid};
use lru::LruCache;
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::rpc::BitcoinRpc;
use crate::types::{Block, ResolvedPrevout, Transaction, TxInput, TxOutput};

/// Maximum number of ancestor transactions kept for re-resolution.
const ANCESTOR_CACHE_CAP: usize = 100_000;

/// An out-of-range transaction whose outputs were referenced by the current
/// block. The dump writer re-emits these so every referenced output key
/// exists in the dump; re-observation across blocks is compensated by the
/// dedup pass.
#[derive(Debug, Clone)]
pub struct ResolvedAncestor {
    pub txid: Txid,
    pub is_coinbase: bool,
    /// Only the outputs actually referenced, in first-reference order.
    pub outputs: Vec<TxOutput>,
}

/// Resolves every non-coinbase input of a block to the output it spends.
///
/// The in-range index spans one ingestion run and is only appended to;
/// ancestor lookups go through [`BitcoinRpc::find_transactions`] so an
/// unknown previous transaction is a local recovery, not a failure.
pub struct InputResolver<'a> {
    rpc: &'a dyn BitcoinRpc,
    index: HashMap<OutPoint, ResolvedPrevout>,
    ancestors: LruCache<Txid, Transaction>,
    unresolved: u64,
}

impl<'a> InputResolver<'a> {
    pub fn new(rpc: &'a dyn BitcoinRpc) -> Self {
        Self {
            rpc,
            index: HashMap::new(),
            ancestors: LruCache::new(
                NonZeroUsize::new(ANCESTOR_CACHE_CAP).expect("ANCESTOR_CACHE_CAP is non-zero"),
            ),
            unresolved: 0,
        }
    }

    /// Inputs that stayed unresolved across the whole run so far.
    pub fn unresolved_count(&self) -> u64 {
        self.unresolved
    }

    /// Index the block's outputs, then attach referenced-output data to each
    /// of its inputs. Returns the ancestor transactions (with only their
    /// referenced outputs) that the dump writer must re-emit.
    pub async fn resolve_block(
        &mut self,
        block: &mut Block,
    ) -> Result<Vec<ResolvedAncestor>, CoreError> {
        // Index the whole block first: inputs may reference outputs of an
        // earlier transaction in the same block.
        for tx in &block.transactions {
            for output in &tx.outputs {
                self.index.insert(
                    OutPoint::new(tx.txid, output.n),
                    ResolvedPrevout {
                        value: output.value,
                        script_type: output.script_type.clone(),
                        addresses: output.addresses.clone(),
                    },
                );
            }
        }

        self.fetch_missing_ancestors(block).await?;

        let mut referenced_order: Vec<Txid> = Vec::new();
        let mut referenced: HashMap<Txid, ResolvedAncestor> = HashMap::new();

        for tx in &mut block.transactions {
            for input in &mut tx.inputs {
                let TxInput::Spend { prev, resolved } = input else {
                    continue;
                };

                if let Some(data) = self.index.get(prev) {
                    *resolved = Some(data.clone());
                    continue;
                }

                let Some(ancestor) = self.ancestors.get(&prev.txid) else {
                    self.unresolved += 1;
                    continue;
                };
                let Some(output) = ancestor.outputs.iter().find(|o| o.n == prev.vout) else {
                    self.unresolved += 1;
                    warn!(
                        prev_txid = %prev.txid,
                        vout = prev.vout,
                        "referenced vout does not exist in previous transaction"
                    );
                    continue;
                };

                *resolved = Some(ResolvedPrevout {
                    value: output.value,
                    script_type: output.script_type.clone(),
                    addresses: output.addresses.clone(),
                });

                let entry = referenced.entry(prev.txid).or_insert_with(|| {
                    referenced_order.push(prev.txid);
                    ResolvedAncestor {
                        txid: prev.txid,
                        is_coinbase: ancestor.is_coinbase(),
                        outputs: Vec::new(),
                    }
                });
                if !entry.outputs.iter().any(|o| o.n == output.n) {
                    entry.outputs.push(output.clone());
                }
            }
        }

        Ok(referenced_order
            .into_iter()
            .map(|txid| {
                referenced
                    .remove(&txid)
                    .expect("every recorded txid has an entry")
            })
            .collect())
    }

    /// Collect out-of-range prevout txids not yet cached, de-duplicated, and
    /// fetch them as one batch. Unknown transactions are logged and skipped.
    async fn fetch_missing_ancestors(&mut self, block: &Block) -> Result<(), CoreError> {
        let mut missing: Vec<Txid> = Vec::new();
        let mut missing_set: HashSet<Txid> = HashSet::new();

        for tx in &block.transactions {
            for input in &tx.inputs {
                let Some(prev) = input.prevout() else { continue };
                if self.index.contains_key(&prev) || self.ancestors.contains(&prev.txid) {
                    continue;
                }
                if missing_set.insert(prev.txid) {
                    missing.push(prev.txid);
                }
            }
        }

        if missing.is_empty() {
            return Ok(());
        }
        debug!(
            height = block.height,
            count = missing.len(),
            "fetching out-of-range previous transactions"
        );

        let fetched = self.rpc.find_transactions(&missing).await?;
        for (txid, raw) in missing.into_iter().zip(fetched) {
            match raw {
                Some(raw_tx) => {
                    let tx = Transaction::from_raw(raw_tx)?;
                    self.ancestors.put(txid, tx);
                }
                None => {
                    warn!(
                        prev_txid = %txid,
                        "previous transaction unknown to node; its inputs stay unresolved"
                    );
                }
            }
        }
        Ok(())
    }
}

// ==============================================================================
// Tests
// ==============================================================================
