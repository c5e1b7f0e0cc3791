//! Chain reorganization handling.
//!
//! On a tip-change notification the coordinator finds the common ancestor
//! of the old and new tips, demotes the abandoned branch to side chain,
//! connects the new branch, re-evaluates approval flags at the boundary,
//! replays the stake database onto the new branch, and invalidates the
//! charts cache. The store write guard is held for the entire operation;
//! the sync engine cannot interleave.

use std::sync::Arc;

use tracing::{error, info, warn};

use consensus_core::Hash;
use rpc_core::{BlockVerbose, NodeApi};
use stakedb::StakeDatabase;

use crate::charts::ChartsCache;
use crate::database::store::InsertMode;
use crate::database::ChainDb;
use crate::error::Result;
use crate::models::{TicketPoolStatus, TicketSpendType};
use crate::rpc_client::common_ancestor;

/// Payload of a reorg notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReorgData {
    pub old_tip: Hash,
    pub new_tip: Hash,
}

pub struct ReorgCoordinator {
    node: Arc<dyn NodeApi>,
    db: ChainDb,
    stake_db: Arc<StakeDatabase>,
    charts: Arc<ChartsCache>,
}

impl ReorgCoordinator {
    pub fn new(
        node: Arc<dyn NodeApi>,
        db: ChainDb,
        stake_db: Arc<StakeDatabase>,
        charts: Arc<ChartsCache>,
    ) -> Self {
        Self { node, db, stake_db, charts }
    }

    /// Reconcile the store with a new chain tip. A failed ancestor search
    /// abandons the reorg with a logged error; nothing is modified.
    pub async fn handle_reorg(&self, data: ReorgData) -> Result<()> {
        info!("reorg: old tip {}, new tip {}", data.old_tip, data.new_tip);

        // The whole reorg runs under the store write guard.
        let _write_guard = self.db.lock_writes().await;

        // 1. Common ancestor and both branches, oldest first.
        let (ancestor, old_branch, new_branch) =
            match common_ancestor(self.node.as_ref(), data.old_tip, data.new_tip).await {
                Ok(found) => found,
                Err(e) => {
                    error!("reorg abandoned, no common ancestor: {e}");
                    return Err(e.into());
                }
            };
        let ancestor_height = self.db.block_height(ancestor).await?;
        info!(
            "reorg: common ancestor {ancestor} at {ancestor_height}; \
             {} blocks leave the main chain, {} join",
            old_branch.len(),
            new_branch.len()
        );

        // 2. Demote the old branch, oldest first.
        for hash in &old_branch {
            self.set_branch_mainchain(*hash, false).await?;
        }

        // 3. Rewind the stake database to the ancestor, then feed it the
        // new branch so pool snapshots exist for the blocks about to be
        // stored.
        while self.stake_db.height() > ancestor_height {
            self.stake_db.disconnect_block()?;
        }
        let mut new_blocks: Vec<BlockVerbose> = Vec::with_capacity(new_branch.len());
        for hash in &new_branch {
            let block = self.node.block_by_hash(*hash).await?;
            self.stake_db.connect_block(&block.block)?;
            new_blocks.push(block);
        }

        // 4. Connect the new branch, oldest first: ingest unknown blocks,
        // flip known ones.
        for block in &new_blocks {
            let hash = block.block.hash;
            let known = match self.db.block_height(hash).await {
                Ok(_) => true,
                Err(e) if e.is_not_found() => false,
                Err(e) => return Err(e),
            };
            let pool_value = self.stake_db.pool_info(&hash)?.map_or(0, |i| i.value);
            if known {
                self.set_branch_mainchain(hash, true).await?;
                // A flipped block's parent gets its validity from this
                // block's header; ingest covers this inside store_block.
                self.db
                    .update_block_validity(block.block.header.prev_block, block.block.header.approves_parent())
                    .await?;
            } else {
                self.db
                    .store_block(block, pool_value, true, true, InsertMode::UPSERT)
                    .await?;
            }
        }

        // 5. Tickets spent only by now-demoted votes return to the live
        // pool; the former tip's validity is provisional again.
        self.reset_tickets_for_sidechain_votes(&old_branch).await?;
        if let Some(old_tip_demoted) = old_branch.last() {
            warn!(
                "former tip {old_tip_demoted} is side chain; its approval state \
                 now follows its own branch"
            );
        }

        // 6. Aggregates must never lie after a reorg.
        self.charts.invalidate();

        info!("reorg complete: new tip {}", data.new_tip);
        Ok(())
    }

    /// Flip a block's main-chain flag and cascade through every derived
    /// table: transactions, address rows (via the vin/vout id sets),
    /// tickets, votes, misses.
    async fn set_branch_mainchain(&self, hash: Hash, is_mainchain: bool) -> Result<()> {
        self.db.set_block_mainchain(hash, is_mainchain).await?;
        let tx_ids = self.db.set_transactions_mainchain(hash, is_mainchain).await?;
        let (vin_ids, vout_ids) = self.db.txns_vins_vouts_by_block(hash, false).await?;
        let (spending, funding) = self
            .db
            .set_addresses_mainchain(&vin_ids, &vout_ids, is_mainchain)
            .await?;
        self.db.set_tickets_mainchain(hash, is_mainchain).await?;
        self.db.set_votes_mainchain(hash, is_mainchain).await?;
        self.db.set_misses_mainchain(hash, is_mainchain).await?;
        info!(
            "block {hash}: is_mainchain={is_mainchain} across {} transactions, \
             {spending}+{funding} address rows",
            tx_ids.len()
        );
        Ok(())
    }

    /// Votes on a demoted branch no longer spend their tickets. Any ticket
    /// whose only spending vote went side-chain reverts to unspent and
    /// live. Tickets re-spent by the new branch were already advanced when
    /// their vote was stored.
    async fn reset_tickets_for_sidechain_votes(&self, old_branch: &[Hash]) -> Result<()> {
        for block_hash in old_branch {
            let tickets: Vec<String> = sqlx::query_scalar(
                "SELECT ticket_hash FROM votes WHERE block_hash = $1;",
            )
            .bind(block_hash.to_string())
            .fetch_all(self.db.pool())
            .await?;
            for ticket in tickets {
                let still_spent: bool = sqlx::query_scalar(
                    "SELECT EXISTS (SELECT 1 FROM votes
                     WHERE ticket_hash = $1 AND is_mainchain = TRUE);",
                )
                .bind(&ticket)
                .fetch_one(self.db.pool())
                .await?;
                if still_spent {
                    continue;
                }
                sqlx::query(crate::database::schema::SET_TICKET_SPENDING_BY_HASH)
                    .bind(TicketSpendType::Unspent)
                    .bind(TicketPoolStatus::Live)
                    .bind(&ticket)
                    .execute(self.db.pool())
                    .await?;
            }
        }
        Ok(())
    }
}
