//! Chain walker — a lazy, ordered stream of fully decoded blocks.
//!
//! The walker resolves the start height to a hash once, then follows
//! `nextblockhash` links so each step costs a single `getblock` plus one
//! batched `getrawtransaction` call for the block's transactions.

use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::{debug, warn};

use crate::error::CoreError;
use crate::rpc::BitcoinRpc;
use crate::types::Block;

/// Advisory progress observer, invoked with a non-decreasing fraction in
/// [0, 1] as blocks are emitted.
pub type ProgressFn = Box<dyn FnMut(f64) + Send>;

/// A finite, ordered, non-restartable walk over the blocks at heights
/// `[start, min(end, tip)]`.
///
/// Blocks are emitted in strictly ascending height order with their
/// transactions fully decoded. The walk is lazy: nothing is fetched until
/// [`next_block`](Self::next_block) is called.
pub struct ChainWalker<'a> {
    rpc: &'a dyn BitcoinRpc,
    /// Hash and expected height of the next block, or `None` when done.
    next: Option<(bitcoin::BlockHash, u64)>,
    start: u64,
    end: u64,
    emitted: u64,
    progress: Option<ProgressFn>,
    last_percent: u64,
}

impl<'a> ChainWalker<'a> {
    /// Set up a walk over `[start, end]`, clamped to the node's tip. If the
    /// chain is shorter than `start` (or `start > end`) the walk is empty.
    pub async fn new(
        rpc: &'a dyn BitcoinRpc,
        start: u64,
        end: u64,
    ) -> Result<ChainWalker<'a>, CoreError> {
        let tip = rpc.get_block_count().await?;
        let end = end.min(tip);

        let next = if start > end {
            None
        } else {
            let start_hash = rpc.get_block_hash(start).await?;
            Some((start_hash, start))
        };
        debug!(start, end, tip, empty = next.is_none(), "chain walk prepared");

        Ok(ChainWalker {
            rpc,
            next,
            start,
            end,
            emitted: 0,
            progress: None,
            last_percent: 0,
        })
    }

    /// Attach a progress observer. Observer panics are caught and logged;
    /// they never interrupt the walk.
    pub fn with_progress(mut self, observer: ProgressFn) -> Self {
        self.progress = Some(observer);
        self
    }

    /// Fetch and emit the next block, or `None` once the range is done.
    pub async fn next_block(&mut self) -> Result<Option<Block>, CoreError> {
        let Some((hash, expected_height)) = self.next else {
            return Ok(None);
        };

        let raw = self.rpc.get_block(&hash).await?;
        if raw.height != expected_height {
            return Err(CoreError::ChainInconsistency(format!(
                "block {hash} reports height {}, expected {expected_height}",
                raw.height
            )));
        }

        let raw_txs = self.rpc.get_transactions(&raw.tx).await?;
        let block = Block::from_raw(&raw, raw_txs)?;

        self.next = if raw.height >= self.end {
            None
        } else {
            match raw.next_block_hash {
                Some(next_hash) => Some((next_hash, raw.height + 1)),
                None => {
                    return Err(CoreError::ChainInconsistency(format!(
                        "block {hash} at height {} has no nextblockhash before range end {}",
                        raw.height, self.end
                    )));
                }
            }
        };

        self.emitted += 1;
        self.report_progress();
        Ok(Some(block))
    }

    /// Invoke the observer when the integer percentage advances, so callers
    /// printing per-callback output are not flooded on large ranges.
    fn report_progress(&mut self) {
        let Some(observer) = self.progress.as_mut() else {
            return;
        };

        let total = self.end - self.start + 1;
        let percent = self.emitted * 100 / total;
        if percent <= self.last_percent && self.emitted != total {
            return;
        }
        self.last_percent = percent;

        let fraction = self.emitted as f64 / total as f64;
        if catch_unwind(AssertUnwindSafe(|| observer(fraction))).is_err() {
            warn!(fraction, "progress observer panicked; continuing walk");
        }
    }
}

// ==============================================================================
// Tests
// ==============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::rpc::mock::MockRpc;
    use crate::test_util::*;

    /// Three linked empty blocks at heights 100..=102.
    fn three_block_chain() -> MockRpc {
        MockRpc::builder()
            .with_block(make_raw_block(
                1,
                100,
                &[],
                Some(block_hash_from_byte(2)),
            ))
            .with_block(make_raw_block(
                2,
                101,
                &[],
                Some(block_hash_from_byte(3)),
            ))
            .with_block(make_raw_block(3, 102, &[], None))
            .build()
    }

    async fn collect_heights(
        rpc: &MockRpc,
        start: u64,
        end: u64,
    ) -> Result<Vec<u64>, CoreError> {
        let mut walker = ChainWalker::new(rpc, start, end).await?;
        let mut heights = Vec::new();
        while let Some(block) = walker.next_block().await? {
            heights.push(block.height);
        }
        Ok(heights)
    }

    #[tokio::test]
    async fn emits_exact_height_range() {
        let rpc = three_block_chain();
        assert_eq!(collect_heights(&rpc, 100, 102).await.unwrap(), [100, 101, 102]);
        assert_eq!(collect_heights(&rpc, 101, 101).await.unwrap(), [101]);
    }

    #[tokio::test]
    async fn clamps_to_tip() {
        let rpc = three_block_chain();
        assert_eq!(
            collect_heights(&rpc, 100, 5000).await.unwrap(),
            [100, 101, 102]
        );
    }

    #[tokio::test]
    async fn start_past_tip_is_empty() {
        let rpc = three_block_chain();
        assert_eq!(collect_heights(&rpc, 103, 110).await.unwrap(), Vec::<u64>::new());
    }

    #[tokio::test]
    async fn inverted_range_is_empty() {
        let rpc = three_block_chain();
        assert_eq!(collect_heights(&rpc, 102, 100).await.unwrap(), Vec::<u64>::new());
    }

    #[tokio::test]
    async fn height_skip_is_fatal() {
        // Block 1 links to a block that claims height 105 instead of 101.
        let rpc = MockRpc::builder()
            .with_block(make_raw_block(1, 100, &[], Some(block_hash_from_byte(2))))
            .with_block(make_raw_block(2, 105, &[], None))
            .build();

        let mut walker = ChainWalker::new(&rpc, 100, 105).await.unwrap();
        walker.next_block().await.unwrap();
        let err = walker.next_block().await.expect_err("height skip must fail");
        assert!(matches!(err, CoreError::ChainInconsistency(_)));
    }

    #[tokio::test]
    async fn missing_next_hash_mid_range_is_fatal() {
        // Tip is height 102 via a disconnected block, so the range is not
        // clamped, but block 100 has no nextblockhash.
        let rpc = MockRpc::builder()
            .with_block(make_raw_block(1, 100, &[], None))
            .with_block(make_raw_block(9, 102, &[], None))
            .build();

        let mut walker = ChainWalker::new(&rpc, 100, 102).await.unwrap();
        let err = walker
            .next_block()
            .await
            .expect_err("missing nextblockhash mid-range must fail");
        assert!(matches!(err, CoreError::ChainInconsistency(_)));
    }

    #[tokio::test]
    async fn blocks_carry_decoded_transactions() {
        let coinbase = make_raw_tx(
            txid_from_byte(10),
            vec![coinbase_vin()],
            vec![simple_vout(0, 50.0, &["X"])],
        );
        let rpc = MockRpc::builder()
            .with_block(make_raw_block(1, 100, &[txid_from_byte(10)], None))
            .with_tx(coinbase)
            .build();

        let mut walker = ChainWalker::new(&rpc, 100, 100).await.unwrap();
        let block = walker.next_block().await.unwrap().expect("one block");
        assert_eq!(block.transactions.len(), 1);
        assert!(block.transactions[0].is_coinbase());
        assert!(walker.next_block().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn progress_is_monotone_and_reaches_one() {
        let rpc = three_block_chain();
        let fractions = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = fractions.clone();

        let mut walker = ChainWalker::new(&rpc, 100, 102)
            .await
            .unwrap()
            .with_progress(Box::new(move |f| sink.lock().unwrap().push(f)));
        while walker.next_block().await.unwrap().is_some() {}

        let seen = fractions.lock().unwrap().clone();
        assert!(!seen.is_empty());
        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "non-decreasing");
        assert_eq!(*seen.last().unwrap(), 1.0);
    }

    #[tokio::test]
    async fn panicking_observer_does_not_interrupt_walk() {
        let rpc = three_block_chain();
        let calls = Arc::new(AtomicU64::new(0));
        let counter = calls.clone();

        let mut walker = ChainWalker::new(&rpc, 100, 102)
            .await
            .unwrap()
            .with_progress(Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                panic!("observer failure");
            }));

        let heights = {
            let mut heights = Vec::new();
            while let Some(block) = walker.next_block().await.unwrap() {
                heights.push(block.height);
            }
            heights
        };
        assert_eq!(heights, [100, 101, 102]);
        assert!(calls.load(Ordering::SeqCst) > 0);
    }
}
