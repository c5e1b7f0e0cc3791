//! The sync engine: brings the primary store from its current best height
//! to the node's best height, then keeps it there block by block.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use rpc_core::NodeApi;
use stakedb::StakeDatabase;

use crate::database::store::InsertMode;
use crate::database::ChainDb;
use crate::error::{ExplorerError, Result};
use crate::indexer::{BlockGetter, SyncProgress, BAR_ID_INITIAL_LOAD};

/// A backfill this far behind the node runs unchecked inserts with unique
/// indexes dropped, then dedups and indexes once at the end.
const BULK_LOAD_THRESHOLD: i64 = 7500;

const INITIAL_LOAD_MSG: &str = "Syncing stake and primary databases...";

pub struct SyncEngine {
    node: Arc<dyn NodeApi>,
    db: ChainDb,
    stake_db: Arc<StakeDatabase>,
    /// When supplied, blocks are taken through the gate instead of fetched
    /// directly; the gate owner paces the sync.
    block_getter: Option<Arc<dyn BlockGetter>>,
    progress: Option<mpsc::Sender<SyncProgress>>,
    progress_log_interval: u32,
}

impl SyncEngine {
    pub fn new(node: Arc<dyn NodeApi>, db: ChainDb, stake_db: Arc<StakeDatabase>) -> Self {
        Self {
            node,
            db,
            stake_db,
            block_getter: None,
            progress: None,
            progress_log_interval: 1000,
        }
    }

    pub fn with_block_getter(mut self, getter: Arc<dyn BlockGetter>) -> Self {
        self.block_getter = Some(getter);
        self
    }

    pub fn with_progress(mut self, tx: mpsc::Sender<SyncProgress>, interval: u32) -> Self {
        self.progress = Some(tx);
        self.progress_log_interval = interval.max(1);
        self
    }

    /// Synchronize to the node's best block. Returns the height of the last
    /// block committed to the primary store. On cancellation the loop exits
    /// cleanly at a block boundary; every block is one database
    /// transaction, so no partial block can be observed.
    pub async fn sync(&self, shutdown: watch::Receiver<bool>) -> Result<i64> {
        let started = std::time::Instant::now();

        // 1. Heights census.
        let primary_best = self.db.best_block().await?.map_or(-1, |(h, _)| h);
        let mut stake_height = self.stake_db.height();
        let node_best = self.node.best_block().await?;
        let mut target = node_best.height as i64;

        info!("current best block (node):          {target}");
        info!("current best block (primary store): {primary_best}");
        info!("current best block (stake db):      {stake_height}");

        // 2. The stake DB may never lead the primary store. A stake DB more
        // than twice ahead indicates corruption and must be deleted by the
        // operator.
        if stake_height > primary_best {
            self.stake_db.check_divergence(primary_best)?;
            info!("rewinding stake db from {stake_height} to {primary_best}");
            while self.stake_db.height() > primary_best {
                if *shutdown.borrow() {
                    info!("rewind cancelled at height {}", self.stake_db.height());
                    return Ok(primary_best);
                }
                self.stake_db.disconnect_block()?;
            }
            stake_height = self.stake_db.height();
        }

        // 3. Already synchronized.
        if primary_best >= target {
            if primary_best > target {
                return Err(ExplorerError::Integrity(format!(
                    "primary store at {primary_best} is ahead of the node at {target}"
                )));
            }
            info!("primary store already synchronized with node at height {target}");
            return Ok(primary_best);
        }

        // 4. Choose the insert path. Deep backfills drop the unique
        // indexes and insert unchecked; steady-state uses upserts.
        let blocks_behind = target - primary_best;
        let bulk = blocks_behind > BULK_LOAD_THRESHOLD && !self.db.unique_indexes_exist().await?;
        let mode = if bulk { InsertMode::BULK } else { InsertMode::UPSERT };
        info!(
            "syncing {blocks_behind} blocks ({} inserts)",
            if bulk { "unchecked bulk" } else { "checked" }
        );

        self.send_progress(primary_best + 1, target, "").await;

        // 5. One block at a time.
        let mut last_committed = primary_best;
        let mut height = primary_best + 1;
        while height <= target {
            if *shutdown.borrow() {
                info!("sync cancelled at height {height}");
                return Ok(last_committed);
            }

            let block = self.acquire_block(height as u32, &shutdown).await?;
            let Some(block) = block else {
                // Cancelled while waiting on the gate.
                return Ok(last_committed);
            };

            // Stake DB first; its pool snapshot feeds the block row.
            if height > stake_height {
                self.stake_db.connect_block(&block.block)?;
                stake_height = self.stake_db.height();
            }
            let pool_value = self
                .stake_db
                .pool_info(&block.block.hash)?
                .map_or(0, |info| info.value);

            {
                let _write_guard = self.db.lock_writes().await;
                self.db
                    .store_block(&block, pool_value, true, true, mode)
                    .await?;
            }
            last_committed = height;

            if height % self.progress_log_interval as i64 == 0 {
                let done = height - primary_best;
                let rate = done as f64 / started.elapsed().as_secs_f64().max(0.001);
                debug!("scanned to block {height} ({rate:.0} blocks/s)");
                self.send_progress(height, target, "").await;
            }

            // New blocks arriving mid-sync extend the loop.
            if height == target {
                let best = self.node.best_block().await?;
                if best.height as i64 > target {
                    target = best.height as i64;
                    info!("node advanced during sync; extending to {target}");
                }
            }
            height += 1;
        }

        // 6. Indexes after bulk load.
        if bulk {
            info!("bulk load complete; deduplicating and creating unique indexes");
            self.db.dedup_and_create_unique_indexes().await?;
        }

        self.send_progress(target, target, "sync complete").await;

        // 7. End-state validation.
        self.validate_end_state(last_committed).await?;
        info!(
            "sync finished at height {last_committed} in {:.1?}",
            started.elapsed()
        );
        Ok(last_committed)
    }

    /// Fetch a block directly, or take it through the coordinating gate
    /// when one is wired. Returns `None` on cancellation.
    async fn acquire_block(
        &self,
        height: u32,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<Option<rpc_core::BlockVerbose>> {
        match &self.block_getter {
            None => Ok(Some(self.node.block_by_height(height).await?)),
            Some(gate) => {
                let mut shutdown = shutdown.clone();
                tokio::select! {
                    hash = gate.wait_for(height) => {
                        let block = gate.block(hash?).await?;
                        Ok(Some(block))
                    }
                    _ = shutdown.changed() => {
                        info!("block wait cancelled at height {height}");
                        Ok(None)
                    }
                }
            }
        }
    }

    async fn send_progress(&self, from: i64, to: i64, subtitle: &str) {
        if let Some(tx) = &self.progress {
            let event = SyncProgress {
                from,
                to,
                msg: INITIAL_LOAD_MSG.to_string(),
                subtitle: subtitle.to_string(),
                bar_id: BAR_ID_INITIAL_LOAD,
                timestamp: Utc::now().timestamp(),
            };
            // The channel is buffered; a stalled consumer must not stall
            // the sync.
            if let Err(e) = tx.try_send(event) {
                debug!("progress event dropped: {e}");
            }
        }
    }

    async fn validate_end_state(&self, last_committed: i64) -> Result<()> {
        let node_best = self.node.best_block().await?.height as i64;
        if last_committed != node_best {
            warn!("node moved to {node_best} while finishing sync at {last_committed}");
        }
        let stake_height = self.stake_db.height();
        if stake_height != last_committed {
            return Err(ExplorerError::Integrity(format!(
                "stake db at {stake_height} does not match primary store at {last_committed}"
            )));
        }
        let validation_start = self.db.params.stake_validation_height as i64;
        if last_committed >= validation_start {
            let expected = self.db.params.tickets_per_block as i64;
            let bad = self.db.vote_miss_imbalance(validation_start, expected).await?;
            if let Some((hash, total)) = bad.first() {
                return Err(ExplorerError::Integrity(format!(
                    "block {hash}: votes + misses = {total}, expected {expected} ({} blocks total)",
                    bad.len()
                )));
            }
        }
        Ok(())
    }

    /// Import all known side chains after the initial sync, so reorg
    /// handling starts from a complete picture of the block tree. Blocks
    /// already present are left untouched.
    pub async fn import_side_chains(&self) -> Result<usize> {
        let tips = crate::rpc_client::side_chains(self.node.as_ref()).await?;
        let mut imported = 0usize;
        for tip in &tips {
            debug!("inspecting side chain with tip {} at {}", tip.hash, tip.height);
            let chain = match crate::rpc_client::side_chain_full(self.node.as_ref(), tip.hash).await {
                Ok(chain) => chain,
                Err(e) => {
                    error!("unable to walk side chain tip {}: {e}", tip.hash);
                    continue;
                }
            };
            for hash in chain {
                match self.db.block_height(hash).await {
                    Ok(_) => continue, // already stored
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                }
                let block = match self.node.block_by_hash(hash).await {
                    Ok(b) => b,
                    Err(e) => {
                        error!("unable to fetch side chain block {hash}: {e}");
                        continue;
                    }
                };
                let _write_guard = self.db.lock_writes().await;
                self.db
                    .store_block(&block, 0, true, false, InsertMode::UPSERT)
                    .await?;
                imported += 1;
            }
        }
        if imported > 0 {
            info!("imported {imported} side-chain blocks");
        }
        Ok(imported)
    }
}
