//! Block ingestion: the steady-state sync engine and the reorg
//! coordinator that preempts it on chain-tip changes.

pub mod reorg;
pub mod service;

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Notify;

use consensus_core::Hash;
use parking_lot::Mutex;
use rpc_core::BlockVerbose;

use crate::error::{ExplorerError, Result};

/// Progress bar identifiers understood by the status websocket consumer.
pub const BAR_ID_INITIAL_LOAD: &str = "initial-load";
pub const BAR_ID_ADDRESSES: &str = "addresses";

/// One progress event, published onto a buffered channel during long
/// syncs. The websocket fan-out that consumes these is an external
/// collaborator.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SyncProgress {
    pub from: i64,
    pub to: i64,
    pub msg: String,
    pub subtitle: String,
    pub bar_id: &'static str,
    /// UTC seconds.
    pub timestamp: i64,
}

/// Coordinated block acquisition for consumers that must stay in lockstep
/// with a master fetcher instead of hitting the node directly.
#[async_trait]
pub trait BlockGetter: Send + Sync {
    /// Block until the block at `height` is available, returning its hash.
    async fn wait_for(&self, height: u32) -> Result<Hash>;

    /// The block previously announced for `hash`.
    async fn block(&self, hash: Hash) -> Result<BlockVerbose>;
}

/// In-process [`BlockGetter`] with an explicit single-block look-ahead
/// contract: the master publishes exactly one height beyond what consumers
/// have taken, and publishing height H discards anything staged below H.
/// There is no deeper buffering.
#[derive(Default)]
pub struct BlockGate {
    staged: Mutex<HashMap<u32, (Hash, BlockVerbose)>>,
    notify: Notify,
}

impl BlockGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish the block for `height`, dropping any lower staged entry.
    pub fn advance(&self, height: u32, block: BlockVerbose) {
        let hash = block.block.hash;
        let mut staged = self.staged.lock();
        staged.retain(|h, _| *h >= height);
        staged.insert(height, (hash, block));
        drop(staged);
        self.notify.notify_waiters();
    }
}

#[async_trait]
impl BlockGetter for BlockGate {
    async fn wait_for(&self, height: u32) -> Result<Hash> {
        loop {
            let notified = self.notify.notified();
            if let Some((hash, _)) = self.staged.lock().get(&height) {
                return Ok(*hash);
            }
            notified.await;
        }
    }

    async fn block(&self, hash: Hash) -> Result<BlockVerbose> {
        let staged = self.staged.lock();
        staged
            .values()
            .find(|(h, _)| *h == hash)
            .map(|(_, b)| b.clone())
            .ok_or_else(|| ExplorerError::NotFound(format!("block {hash} not staged")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use consensus_core::{Block, BlockHeader};

    fn verbose(height: u32, tag: u8) -> BlockVerbose {
        let mut bytes = [0u8; 32];
        bytes[0] = tag;
        BlockVerbose {
            block: Block {
                hash: Hash::new(bytes),
                header: BlockHeader {
                    version: 1,
                    prev_block: Hash::ZERO,
                    merkle_root: Hash::ZERO,
                    stake_root: Hash::ZERO,
                    vote_bits: 1,
                    final_state: vec![],
                    voters: 0,
                    fresh_stake: 0,
                    revocations: 0,
                    pool_size: 0,
                    bits: 0x1d00ffff,
                    s_bits: 0,
                    height,
                    size: 100,
                    timestamp: 0,
                    nonce: 0,
                    stake_version: 0,
                    extra_data: vec![],
                },
                transactions: vec![],
                stake_transactions: vec![],
            },
            chain_work: "00".into(),
            confirmations: 1,
            next_hash: None,
            validators: vec![],
        }
    }

    #[tokio::test]
    async fn gate_hands_out_staged_blocks() {
        let gate = BlockGate::new();
        gate.advance(5, verbose(5, 0xaa));
        let hash = gate.wait_for(5).await.unwrap();
        let block = gate.block(hash).await.unwrap();
        assert_eq!(block.block.height(), 5);
    }

    #[tokio::test]
    async fn gate_wakes_pending_waiters() {
        let gate = std::sync::Arc::new(BlockGate::new());
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait_for(7).await })
        };
        tokio::task::yield_now().await;
        gate.advance(7, verbose(7, 0xbb));
        let hash = waiter.await.unwrap().unwrap();
        assert_eq!(hash, verbose(7, 0xbb).block.hash);
    }

    #[tokio::test]
    async fn gate_discards_below_the_published_height() {
        let gate = BlockGate::new();
        gate.advance(3, verbose(3, 0x03));
        gate.advance(4, verbose(4, 0x04));
        let stale = gate.block(verbose(3, 0x03).block.hash).await;
        assert!(stale.is_err(), "single-block look-ahead keeps no history");
    }
}
