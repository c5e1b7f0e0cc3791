//! Per-block write path. All writes for one block happen inside a single
//! database transaction, in dependency order: block -> vouts -> vins ->
//! transactions -> funding address rows -> spending address rows (with the
//! matching-hash back-reference) -> tickets -> votes -> misses -> agendas.
//! The order is total and must not be rearranged; vins reference previous
//! vouts by (hash, index, tree) rather than id, which breaks the reference
//! cycle at ingest.

use std::collections::HashMap;

use sqlx::{Postgres, Transaction as SqlTx};
use tracing::warn;

use consensus_core::stake::{self, TxType};
use consensus_core::{Block, Hash, TxTree};
use rpc_core::BlockVerbose;

use crate::database::{schema, ChainDb};
use crate::error::{ExplorerError, Result};
use crate::models::*;

/// Conflict-handling mode for one block's inserts. See the table in
/// [`schema`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertMode {
    pub checked: bool,
    pub update_on_conflict: bool,
}

impl InsertMode {
    /// Unchecked insert for bulk load, before unique indexes exist.
    pub const BULK: InsertMode = InsertMode { checked: false, update_on_conflict: false };
    /// Insert-or-return-existing; never modifies a conflicting row.
    pub const CHECKED: InsertMode = InsertMode { checked: true, update_on_conflict: false };
    /// Upsert; flips mutable columns on conflict.
    pub const UPSERT: InsertMode = InsertMode { checked: true, update_on_conflict: true };
}

/// Row ids produced while storing one block.
#[derive(Debug, Default)]
pub struct StoredBlock {
    pub block_db_id: i64,
    pub height: i64,
    pub hash: Hash,
    /// tx hash -> transactions row id, both trees.
    pub tx_ids: HashMap<Hash, i64>,
    /// Per transaction (both trees, regular first), the vin/vout row id
    /// sets.
    pub vin_ids: Vec<Vec<i64>>,
    pub vout_ids: Vec<Vec<i64>>,
}

/// Proof-of-work difficulty ratio for a compact `bits` target.
pub fn difficulty_ratio(bits: u32) -> f64 {
    let exp = (bits >> 24) as i32;
    let mantissa = (bits & 0x00ff_ffff) as f64;
    if mantissa == 0.0 {
        return 0.0;
    }
    let target = mantissa * 256f64.powi(exp - 3);
    // diff-1 target: 0x00ffff * 256^(0x1d - 3)
    let diff1 = 65535.0 * 256f64.powi(0x1d - 3);
    diff1 / target
}

impl ChainDb {
    /// Insert one block and every derived row, atomically. `is_valid`
    /// applies to the regular tree (stake transactions are always valid
    /// once mined); both flags are provisional and may be flipped by the
    /// next block or a reorg.
    pub async fn store_block(
        &self,
        block: &BlockVerbose,
        pool_value: i64,
        is_valid: bool,
        is_mainchain: bool,
        mode: InsertMode,
    ) -> Result<StoredBlock> {
        let mut dbtx = self.pool().begin().await?;
        let stored = self
            .store_block_in_tx(&mut dbtx, block, pool_value, is_valid, is_mainchain, mode)
            .await?;
        dbtx.commit().await?;
        Ok(stored)
    }

    async fn store_block_in_tx(
        &self,
        dbtx: &mut SqlTx<'_, Postgres>,
        block: &BlockVerbose,
        pool_value: i64,
        is_valid: bool,
        is_mainchain: bool,
        mode: InsertMode,
    ) -> Result<StoredBlock> {
        let b = &block.block;
        let height = b.height() as i64;
        let mut stored = StoredBlock {
            height,
            hash: b.hash,
            ..Default::default()
        };

        // 1. Block row and chain linkage.
        let block_row = build_block_row(block, pool_value, is_valid, is_mainchain);
        stored.block_db_id = insert_block_row(dbtx, &block_row, mode).await?;
        sqlx::query(schema::INSERT_BLOCK_CHAIN_ROW)
            .bind(stored.block_db_id)
            .bind(b.header.prev_block.to_string())
            .bind(b.hash.to_string())
            .bind(block.next_hash.map(|h| h.to_string()))
            .execute(&mut **dbtx)
            .await?;
        if height > 0 {
            sqlx::query(schema::UPDATE_BLOCK_NEXT_BY_HASH)
                .bind(b.header.prev_block.to_string())
                .bind(b.hash.to_string())
                .execute(&mut **dbtx)
                .await?;
        }

        // 2.-5. Decompose both trees: vouts, vins, transactions, addresses.
        for tree in [TxTree::Regular, TxTree::Stake] {
            // Stake transactions are valid regardless of the next block's
            // approval vote; only the regular tree is provisional.
            let tree_valid = match tree {
                TxTree::Regular => is_valid,
                TxTree::Stake => true,
            };
            for (block_index, tx) in b.tree(tree).iter().enumerate() {
                let tx_type = stake::determine_tx_type(tree, tx);
                let valid_mainchain = tree_valid && is_mainchain;

                // Vouts first: vins and address rows refer back to them.
                let mut vout_ids = Vec::with_capacity(tx.outputs.len());
                let mut funding_rows: Vec<AddressRow> = Vec::new();
                for (vout_index, out) in tx.outputs.iter().enumerate() {
                    let row = VoutRow {
                        tx_hash: tx.hash,
                        tx_index: vout_index as i32,
                        tx_tree: tree.as_i8() as i16,
                        value: out.value,
                        version: out.version as i16,
                        pkscript: out.pk_script.clone(),
                        script_req_sigs: out.required_sigs,
                        script_type: out.script_class.clone(),
                        script_addresses: out.addresses.clone(),
                    };
                    let vout_id = insert_vout_row(dbtx, &row, mode).await?;
                    vout_ids.push(vout_id);
                    for address in &out.addresses {
                        funding_rows.push(AddressRow {
                            address: address.clone(),
                            matching_tx_hash: None,
                            tx_hash: tx.hash,
                            tx_vin_vout_index: vout_index as i32,
                            vin_vout_db_id: vout_id,
                            value: out.value,
                            block_time: b.header.timestamp,
                            is_funding: true,
                            valid_mainchain,
                            tx_type,
                        });
                    }
                }

                let mut vin_ids = Vec::with_capacity(tx.inputs.len());
                for (vin_index, input) in tx.inputs.iter().enumerate() {
                    let row = VinRow {
                        tx_hash: tx.hash,
                        tx_index: vin_index as i32,
                        tx_tree: tree.as_i8() as i16,
                        prev_out_hash: input.previous_outpoint.hash,
                        prev_out_index: input.previous_outpoint.index as i64,
                        prev_out_tree: input.previous_outpoint.tree.as_i8() as i16,
                        value_in: input.value_in,
                        is_valid: tree_valid,
                        is_mainchain,
                        block_time: b.header.timestamp,
                        tx_type,
                    };
                    vin_ids.push(insert_vin_row(dbtx, &row, mode).await?);
                }

                let tx_row = TxRow {
                    block_hash: b.hash,
                    block_height: height,
                    block_time: b.header.timestamp,
                    time: b.header.timestamp,
                    tx_type,
                    version: tx.version as i32,
                    tree: tree.as_i8() as i16,
                    tx_hash: tx.hash,
                    block_index: block_index as i32,
                    lock_time: tx.lock_time as i64,
                    expiry: tx.expiry as i64,
                    size: tx.size as i32,
                    spent: tx.spent(),
                    sent: tx.sent(),
                    fees: tx.fees(),
                    num_vin: tx.inputs.len() as i32,
                    vin_db_ids: vin_ids.clone(),
                    num_vout: tx.outputs.len() as i32,
                    vout_db_ids: vout_ids.clone(),
                    is_valid: tree_valid,
                    is_mainchain,
                };
                let tx_db_id = insert_tx_row(dbtx, &tx_row, mode).await?;
                stored.tx_ids.insert(tx.hash, tx_db_id);
                if tx_type == TxType::TicketPurchase {
                    self.ticket_cache.insert(tx.hash, tx_db_id);
                }

                // Funding side of the address ledger.
                for row in &funding_rows {
                    insert_address_row(dbtx, row, mode).await?;
                }

                // Spending side, with the back-reference onto the funding
                // rows. Coinbase and stakebase inputs have no funder.
                for (vin_index, input) in tx.inputs.iter().enumerate() {
                    let prev = &input.previous_outpoint;
                    if prev.is_null() {
                        continue;
                    }
                    self.insert_spending_address_rows(
                        dbtx,
                        prev.hash,
                        prev.index as i32,
                        prev.tree.as_i8() as i16,
                        tx.hash,
                        vin_index as i32,
                        vin_ids[vin_index],
                        b.header.timestamp,
                        valid_mainchain,
                        tx_type,
                        mode,
                    )
                    .await?;
                }

                stored.vin_ids.push(vin_ids);
                stored.vout_ids.push(vout_ids);
            }
        }

        // 6. Tickets.
        self.insert_tickets(dbtx, block, &stored, is_mainchain, mode).await?;

        // 7. Votes, misses, agendas, and ticket state transitions.
        self.insert_votes(dbtx, block, &stored, is_mainchain, mode).await?;

        // 8. Revocations flip spend_type on their tickets.
        self.apply_revocations(dbtx, b).await?;

        // 9. Tickets purchased ticket_maturity blocks ago go live, and
        // live tickets that ran out their expiry window without voting
        // expire.
        if is_mainchain && height >= self.params.ticket_maturity as i64 {
            sqlx::query(schema::MATURE_TICKETS_AT_HEIGHT)
                .bind(height - self.params.ticket_maturity as i64)
                .execute(&mut **dbtx)
                .await?;
        }
        let expiry_window = (self.params.ticket_maturity + self.params.ticket_expiry) as i64;
        if is_mainchain && height >= expiry_window {
            sqlx::query(schema::EXPIRE_TICKETS_AT_HEIGHT)
                .bind(height - expiry_window)
                .execute(&mut **dbtx)
                .await?;
        }

        // 10. This block's header votes decide the parent's validity.
        if is_mainchain && height > 0 {
            self.apply_parent_approval(dbtx, b.header.prev_block, b.header.approves_parent())
                .await?;
        }

        Ok(stored)
    }

    /// Insert the spending-side address rows for one input and point the
    /// matching funding rows at the spender. If the funding vout is not yet
    /// present (out-of-order side-chain ingest), the rows are skipped; the
    /// caller re-ingests after the funding block lands, the store does not
    /// queue.
    #[allow(clippy::too_many_arguments)]
    async fn insert_spending_address_rows(
        &self,
        dbtx: &mut SqlTx<'_, Postgres>,
        funding_tx_hash: Hash,
        funding_vout_index: i32,
        funding_tree: i16,
        spending_tx_hash: Hash,
        spending_vin_index: i32,
        vin_db_id: i64,
        block_time: i64,
        valid_mainchain: bool,
        tx_type: TxType,
        mode: InsertMode,
    ) -> Result<()> {
        let funder: Option<(Vec<String>, i64)> = sqlx::query_as(
            "SELECT script_addresses, value FROM vouts
             WHERE tx_hash = $1 AND tx_index = $2 AND tx_tree = $3 LIMIT 1;",
        )
        .bind(funding_tx_hash.to_string())
        .bind(funding_vout_index)
        .bind(funding_tree)
        .fetch_optional(&mut **dbtx)
        .await?;

        let Some((addresses, value)) = funder else {
            warn!(
                "funding vout {funding_tx_hash}:{funding_vout_index} not found \
                 for spender {spending_tx_hash}; linkage deferred"
            );
            return Ok(());
        };

        for address in &addresses {
            let row = AddressRow {
                address: address.clone(),
                matching_tx_hash: Some(funding_tx_hash),
                tx_hash: spending_tx_hash,
                tx_vin_vout_index: spending_vin_index,
                vin_vout_db_id: vin_db_id,
                value,
                block_time,
                is_funding: false,
                valid_mainchain,
                tx_type,
            };
            insert_address_row(dbtx, &row, mode).await?;
        }

        sqlx::query(schema::SET_ADDRESS_MATCHING_TX_HASH_FOR_OUTPOINT)
            .bind(spending_tx_hash.to_string())
            .bind(funding_tx_hash.to_string())
            .bind(funding_vout_index)
            .execute(&mut **dbtx)
            .await?;
        Ok(())
    }

    async fn insert_tickets(
        &self,
        dbtx: &mut SqlTx<'_, Postgres>,
        block: &BlockVerbose,
        stored: &StoredBlock,
        is_mainchain: bool,
        mode: InsertMode,
    ) -> Result<()> {
        let b = &block.block;
        for tx in &b.stake_transactions {
            if stake::determine_tx_type(TxTree::Stake, tx) != TxType::TicketPurchase {
                continue;
            }
            let submission = &tx.outputs[0];
            let row = TicketRow {
                tx_hash: tx.hash,
                block_hash: b.hash,
                block_height: stored.height,
                purchase_tx_db_id: stored.tx_ids.get(&tx.hash).copied().unwrap_or_default(),
                stakesubmission_address: submission
                    .addresses
                    .first()
                    .cloned()
                    .unwrap_or_default(),
                is_multisig: submission.required_sigs > 1,
                is_split: tx.inputs.len() > 1,
                num_inputs: tx.inputs.len() as i16,
                price: submission.value,
                fee: tx.fees(),
                spend_type: TicketSpendType::Unspent,
                pool_status: TicketPoolStatus::Immature,
                is_mainchain,
            };
            insert_ticket_row(dbtx, &row, mode).await?;
        }
        Ok(())
    }

    /// Insert this block's votes and the derived misses and agenda rows,
    /// and advance the spent tickets' state machines. Misses are the
    /// header-declared validators that cast no vote; past the stake
    /// validation height, `votes + misses` must equal the network's
    /// tickets-per-block or the block is rejected as an integrity
    /// violation.
    async fn insert_votes(
        &self,
        dbtx: &mut SqlTx<'_, Postgres>,
        block: &BlockVerbose,
        stored: &StoredBlock,
        is_mainchain: bool,
        mode: InsertMode,
    ) -> Result<()> {
        let b = &block.block;
        let candidate_block_hash = b.header.prev_block;
        let mut misses: Vec<Hash> = block.validators.clone();
        let mut num_votes = 0usize;
        let mut voted_tickets: Vec<Hash> = Vec::new();

        for tx in &b.stake_transactions {
            if stake::determine_tx_type(TxTree::Stake, tx) != TxType::Vote {
                continue;
            }
            let info = stake::parse_vote(tx)
                .map_err(|e| ExplorerError::Integrity(e.to_string()))?;
            let ticket_hash = stake::ticket_spent_by_vote(tx).ok_or_else(|| {
                ExplorerError::Integrity(format!("vote {} has no ticket input", tx.hash))
            })?;

            // Hot path: the purchase's row id is almost always cached from
            // when its block was stored.
            let ticket_tx_db_id = match self.ticket_cache.get(&ticket_hash) {
                Some(id) => id,
                None => {
                    let found: Option<i64> = sqlx::query_scalar(
                        "SELECT id FROM transactions WHERE tx_hash = $1
                         ORDER BY is_mainchain DESC, block_height DESC LIMIT 1;",
                    )
                    .bind(ticket_hash.to_string())
                    .fetch_optional(&mut **dbtx)
                    .await?;
                    match found {
                        Some(id) => {
                            self.ticket_cache.insert(ticket_hash, id);
                            id
                        }
                        None => {
                            warn!("ticket {ticket_hash} spent by vote {} not indexed", tx.hash);
                            0
                        }
                    }
                }
            };

            misses.retain(|m| *m != ticket_hash);
            voted_tickets.push(ticket_hash);
            num_votes += 1;

            let row = VoteRow {
                height: stored.height,
                tx_hash: tx.hash,
                block_hash: b.hash,
                candidate_block_hash,
                version: info.version as i64,
                vote_bits: info.bits.0 as i16,
                block_valid: info.bits.approves_parent(),
                ticket_hash,
                ticket_tx_db_id,
                stakesubmission_amount: tx.inputs[1].value_in,
                vote_reward: tx.inputs[0].value_in,
                is_mainchain,
            };
            insert_vote_row(dbtx, &row, mode).await?;

            // Agenda rows, one per choice the vote selected, flagged at
            // the lifecycle milestone heights.
            if mode.checked && !mode.update_on_conflict {
                continue;
            }
            for choice in stake::vote_choices(info.bits, info.version, &self.params) {
                let milestones = self.params.voting_milestones(&choice.agenda_id);
                let row = AgendaRow {
                    agenda_id: choice.agenda_id,
                    choice_index: choice.choice_index,
                    tx_hash: tx.hash,
                    block_height: stored.height,
                    block_time: b.header.timestamp,
                    locked_in: milestones.is_some_and(|m| m.locked_in as i64 == stored.height),
                    activated: milestones.is_some_and(|m| m.activated as i64 == stored.height),
                    hard_forked: milestones.is_some_and(|m| m.hard_forked as i64 == stored.height),
                };
                insert_agenda_row(dbtx, &row, mode).await?;
            }
        }

        // Miss accounting must balance once validators are declared.
        let expected = self.params.tickets_per_block as usize;
        if !block.validators.is_empty() && num_votes + misses.len() != expected {
            return Err(ExplorerError::Integrity(format!(
                "block {}: votes ({num_votes}) + misses ({}) != {expected}",
                b.hash,
                misses.len()
            )));
        }

        for ticket_hash in &misses {
            let row = MissRow {
                height: stored.height,
                block_hash: b.hash,
                candidate_block_hash,
                ticket_hash: *ticket_hash,
            };
            insert_miss_row(dbtx, &row, is_mainchain, mode).await?;
            sqlx::query(schema::SET_TICKET_POOL_STATUS_BY_HASH)
                .bind(TicketPoolStatus::Missed)
                .bind(ticket_hash.to_string())
                .execute(&mut **dbtx)
                .await?;
        }

        for ticket_hash in &voted_tickets {
            sqlx::query(schema::SET_TICKET_SPENDING_BY_HASH)
                .bind(TicketSpendType::Voted)
                .bind(TicketPoolStatus::Voted)
                .bind(ticket_hash.to_string())
                .execute(&mut **dbtx)
                .await?;
        }

        Ok(())
    }

    /// A revocation reclaims a missed or expired ticket. The pool status
    /// stays Missed when the ticket missed; otherwise the ticket ran out
    /// its expiry.
    async fn apply_revocations(&self, dbtx: &mut SqlTx<'_, Postgres>, b: &Block) -> Result<()> {
        for tx in &b.stake_transactions {
            if stake::determine_tx_type(TxTree::Stake, tx) != TxType::Revocation {
                continue;
            }
            let Some(input) = tx.inputs.first() else { continue };
            let ticket_hash = input.previous_outpoint.hash;

            let status: Option<TicketPoolStatus> =
                sqlx::query_scalar("SELECT pool_status FROM tickets WHERE tx_hash = $1 LIMIT 1;")
                    .bind(ticket_hash.to_string())
                    .fetch_optional(&mut **dbtx)
                    .await?;
            let pool_status = match status {
                Some(TicketPoolStatus::Missed) => TicketPoolStatus::Missed,
                _ => TicketPoolStatus::Expired,
            };
            sqlx::query(schema::SET_TICKET_SPENDING_BY_HASH)
                .bind(TicketSpendType::Revoked)
                .bind(pool_status)
                .bind(ticket_hash.to_string())
                .execute(&mut **dbtx)
                .await?;
        }
        Ok(())
    }

    /// Apply this block's approval verdict to its parent: block `is_valid`,
    /// the parent's regular transactions, and their address rows. A
    /// block's validity mirrors the vote-bits majority observed in its
    /// child, so it is provisional until the child connects.
    async fn apply_parent_approval(
        &self,
        dbtx: &mut SqlTx<'_, Postgres>,
        parent: Hash,
        approves: bool,
    ) -> Result<()> {
        sqlx::query(schema::UPDATE_BLOCK_VALID)
            .bind(parent.to_string())
            .bind(approves)
            .execute(&mut **dbtx)
            .await?;
        sqlx::query(schema::UPDATE_REGULAR_TXNS_VALID_BY_BLOCK)
            .bind(approves)
            .bind(parent.to_string())
            .fetch_all(&mut **dbtx)
            .await?;

        let rows: Vec<(Vec<i64>, Vec<i64>)> = sqlx::query_as(
            "SELECT vin_db_ids, vout_db_ids FROM transactions
             WHERE block_hash = $1 AND tree = 0;",
        )
        .bind(parent.to_string())
        .fetch_all(&mut **dbtx)
        .await?;
        for (vin_ids, vout_ids) in rows {
            for vin in vin_ids {
                sqlx::query(schema::SET_ADDRESS_MAINCHAIN_FOR_VIN_IDS)
                    .bind(approves)
                    .bind(vin)
                    .execute(&mut **dbtx)
                    .await?;
            }
            for vout in vout_ids {
                sqlx::query(schema::SET_ADDRESS_MAINCHAIN_FOR_VOUT_IDS)
                    .bind(approves)
                    .bind(vout)
                    .execute(&mut **dbtx)
                    .await?;
            }
        }
        Ok(())
    }

    // --- bulk flag updates used by the reorg coordinator ---

    /// Flip a block's main-chain flag, returning its previous hash.
    pub async fn set_block_mainchain(&self, hash: Hash, is_mainchain: bool) -> Result<Hash> {
        let prev: String = sqlx::query_scalar(schema::UPDATE_BLOCK_MAINCHAIN)
            .bind(hash.to_string())
            .bind(is_mainchain)
            .fetch_one(self.pool())
            .await?;
        prev.parse()
            .map_err(|_| ExplorerError::Integrity(format!("bad previous_hash for {hash}")))
    }

    /// Update all transactions in the block; returns the affected row ids.
    pub async fn set_transactions_mainchain(&self, hash: Hash, is_mainchain: bool) -> Result<Vec<i64>> {
        let rows: Vec<(i64,)> = sqlx::query_as(schema::UPDATE_TXNS_MAINCHAIN_BY_BLOCK)
            .bind(is_mainchain)
            .bind(hash.to_string())
            .fetch_all(self.pool())
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Update only tree-0 transactions; reflects stakeholder approval
    /// flipping.
    pub async fn set_regular_transactions_valid(&self, hash: Hash, is_valid: bool) -> Result<Vec<i64>> {
        let rows: Vec<(i64,)> = sqlx::query_as(schema::UPDATE_REGULAR_TXNS_VALID_BY_BLOCK)
            .bind(is_valid)
            .bind(hash.to_string())
            .fetch_all(self.pool())
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    pub async fn set_votes_mainchain(&self, hash: Hash, is_mainchain: bool) -> Result<u64> {
        let res = sqlx::query(schema::UPDATE_VOTES_MAINCHAIN_BY_BLOCK)
            .bind(is_mainchain)
            .bind(hash.to_string())
            .execute(self.pool())
            .await?;
        Ok(res.rows_affected())
    }

    pub async fn set_tickets_mainchain(&self, hash: Hash, is_mainchain: bool) -> Result<u64> {
        let res = sqlx::query(schema::UPDATE_TICKETS_MAINCHAIN_BY_BLOCK)
            .bind(is_mainchain)
            .bind(hash.to_string())
            .execute(self.pool())
            .await?;
        Ok(res.rows_affected())
    }

    pub async fn set_misses_mainchain(&self, hash: Hash, is_mainchain: bool) -> Result<u64> {
        let res = sqlx::query(schema::UPDATE_MISSES_MAINCHAIN_BY_BLOCK)
            .bind(is_mainchain)
            .bind(hash.to_string())
            .execute(self.pool())
            .await?;
        Ok(res.rows_affected())
    }

    /// Cascade the main-chain flag through address rows referenced by the
    /// given vin/vout surrogate id sets.
    pub async fn set_addresses_mainchain(
        &self,
        vin_ids: &[Vec<i64>],
        vout_ids: &[Vec<i64>],
        valid_mainchain: bool,
    ) -> Result<(u64, u64)> {
        let mut spending = 0u64;
        let mut funding = 0u64;
        for vins in vin_ids {
            for vin in vins {
                let res = sqlx::query(schema::SET_ADDRESS_MAINCHAIN_FOR_VIN_IDS)
                    .bind(valid_mainchain)
                    .bind(vin)
                    .execute(self.pool())
                    .await?;
                spending += res.rows_affected();
            }
        }
        for vouts in vout_ids {
            for vout in vouts {
                let res = sqlx::query(schema::SET_ADDRESS_MAINCHAIN_FOR_VOUT_IDS)
                    .bind(valid_mainchain)
                    .bind(vout)
                    .execute(self.pool())
                    .await?;
                funding += res.rows_affected();
            }
        }
        Ok((spending, funding))
    }

    /// Vin/vout surrogate id sets for a block's transactions, for the
    /// address cascade. `only_regular` restricts to tree 0.
    pub async fn txns_vins_vouts_by_block(
        &self,
        hash: Hash,
        only_regular: bool,
    ) -> Result<(Vec<Vec<i64>>, Vec<Vec<i64>>)> {
        let stmt = if only_regular {
            "SELECT vin_db_ids, vout_db_ids FROM transactions WHERE block_hash = $1 AND tree = 0;"
        } else {
            "SELECT vin_db_ids, vout_db_ids FROM transactions WHERE block_hash = $1;"
        };
        let rows: Vec<(Vec<i64>, Vec<i64>)> = sqlx::query_as(stmt)
            .bind(hash.to_string())
            .fetch_all(self.pool())
            .await?;
        Ok(rows.into_iter().unzip())
    }

    /// Re-evaluate a block's validity from a (new) child's vote bits,
    /// cascading to its regular transactions and their address rows. Used
    /// at reorg boundaries where a block's deciding child changed.
    pub async fn update_block_validity(&self, hash: Hash, is_valid: bool) -> Result<()> {
        sqlx::query(schema::UPDATE_BLOCK_VALID)
            .bind(hash.to_string())
            .bind(is_valid)
            .execute(self.pool())
            .await?;
        self.set_regular_transactions_valid(hash, is_valid).await?;
        let (vins, vouts) = self.txns_vins_vouts_by_block(hash, true).await?;
        self.set_addresses_mainchain(&vins, &vouts, is_valid).await?;
        Ok(())
    }
}

// --- row insert helpers ---

fn build_block_row(block: &BlockVerbose, pool_value: i64, is_valid: bool, is_mainchain: bool) -> BlockRow {
    let b = &block.block;
    let h = &b.header;
    BlockRow {
        hash: b.hash,
        height: h.height as i64,
        size: h.size as i32,
        is_valid,
        is_mainchain,
        version: h.version,
        merkle_root: h.merkle_root,
        stake_root: h.stake_root,
        num_tx: b.num_tx() as i32,
        num_rtx: b.transactions.len() as i32,
        num_stx: b.stake_transactions.len() as i32,
        time: h.timestamp,
        nonce: h.nonce as i64,
        vote_bits: h.vote_bits as i16,
        voters: h.voters as i16,
        fresh_stake: h.fresh_stake as i16,
        revocations: h.revocations as i16,
        pool_size: h.pool_size as i32,
        pool_value,
        bits: h.bits as i64,
        sbits: h.s_bits,
        difficulty: difficulty_ratio(h.bits),
        stake_version: h.stake_version as i64,
        previous_hash: h.prev_block,
        chain_work: block.chain_work.clone(),
    }
}

async fn insert_block_row(dbtx: &mut SqlTx<'_, Postgres>, row: &BlockRow, mode: InsertMode) -> Result<i64> {
    let stmt = schema::make_block_insert_statement(mode.checked, mode.update_on_conflict);
    let id: i64 = sqlx::query_scalar(&stmt)
        .bind(row.hash.to_string())
        .bind(row.height)
        .bind(row.size)
        .bind(row.is_valid)
        .bind(row.is_mainchain)
        .bind(row.version)
        .bind(row.merkle_root.to_string())
        .bind(row.stake_root.to_string())
        .bind(row.num_tx)
        .bind(row.num_rtx)
        .bind(row.num_stx)
        .bind(row.time)
        .bind(row.nonce)
        .bind(row.vote_bits)
        .bind(row.voters)
        .bind(row.fresh_stake)
        .bind(row.revocations)
        .bind(row.pool_size)
        .bind(row.pool_value)
        .bind(row.bits)
        .bind(row.sbits)
        .bind(row.difficulty)
        .bind(row.stake_version)
        .bind(row.previous_hash.to_string())
        .bind(&row.chain_work)
        .fetch_one(&mut **dbtx)
        .await?;
    Ok(id)
}

async fn insert_tx_row(dbtx: &mut SqlTx<'_, Postgres>, row: &TxRow, mode: InsertMode) -> Result<i64> {
    let stmt = schema::make_tx_insert_statement(mode.checked, mode.update_on_conflict);
    let id: i64 = sqlx::query_scalar(&stmt)
        .bind(row.block_hash.to_string())
        .bind(row.block_height)
        .bind(row.block_time)
        .bind(row.time)
        .bind(row.tx_type.as_i16())
        .bind(row.version)
        .bind(row.tree)
        .bind(row.tx_hash.to_string())
        .bind(row.block_index)
        .bind(row.lock_time)
        .bind(row.expiry)
        .bind(row.size)
        .bind(row.spent)
        .bind(row.sent)
        .bind(row.fees)
        .bind(row.num_vin)
        .bind(&row.vin_db_ids)
        .bind(row.num_vout)
        .bind(&row.vout_db_ids)
        .bind(row.is_valid)
        .bind(row.is_mainchain)
        .fetch_one(&mut **dbtx)
        .await?;
    Ok(id)
}

async fn insert_vin_row(dbtx: &mut SqlTx<'_, Postgres>, row: &VinRow, mode: InsertMode) -> Result<i64> {
    let stmt = schema::make_vin_insert_statement(mode.checked, mode.update_on_conflict);
    let id: i64 = sqlx::query_scalar(&stmt)
        .bind(row.tx_hash.to_string())
        .bind(row.tx_index)
        .bind(row.tx_tree)
        .bind(row.prev_out_hash.to_string())
        .bind(row.prev_out_index)
        .bind(row.prev_out_tree)
        .bind(row.value_in)
        .bind(row.is_valid)
        .bind(row.is_mainchain)
        .bind(row.block_time)
        .bind(row.tx_type.as_i16())
        .fetch_one(&mut **dbtx)
        .await?;
    Ok(id)
}

async fn insert_vout_row(dbtx: &mut SqlTx<'_, Postgres>, row: &VoutRow, mode: InsertMode) -> Result<i64> {
    let stmt = schema::make_vout_insert_statement(mode.checked, mode.update_on_conflict);
    let id: i64 = sqlx::query_scalar(&stmt)
        .bind(row.tx_hash.to_string())
        .bind(row.tx_index)
        .bind(row.tx_tree)
        .bind(row.value)
        .bind(row.version)
        .bind(&row.pkscript)
        .bind(row.script_req_sigs)
        .bind(&row.script_type)
        .bind(&row.script_addresses)
        .fetch_one(&mut **dbtx)
        .await?;
    Ok(id)
}

async fn insert_address_row(dbtx: &mut SqlTx<'_, Postgres>, row: &AddressRow, mode: InsertMode) -> Result<i64> {
    let stmt = schema::make_address_row_insert_statement(mode.checked, mode.update_on_conflict);
    let id: Option<i64> = sqlx::query_scalar(&stmt)
        .bind(&row.address)
        .bind(row.matching_tx_hash.map(|h| h.to_string()))
        .bind(row.tx_hash.to_string())
        .bind(row.tx_vin_vout_index)
        .bind(row.vin_vout_db_id)
        .bind(row.value)
        .bind(row.block_time)
        .bind(row.is_funding)
        .bind(row.valid_mainchain)
        .bind(row.tx_type.as_i16())
        .fetch_optional(&mut **dbtx)
        .await?;
    Ok(id.unwrap_or_default())
}

async fn insert_ticket_row(dbtx: &mut SqlTx<'_, Postgres>, row: &TicketRow, mode: InsertMode) -> Result<i64> {
    let stmt = schema::make_ticket_insert_statement(mode.checked, mode.update_on_conflict);
    let id: i64 = sqlx::query_scalar(&stmt)
        .bind(row.tx_hash.to_string())
        .bind(row.block_hash.to_string())
        .bind(row.block_height)
        .bind(row.purchase_tx_db_id)
        .bind(&row.stakesubmission_address)
        .bind(row.is_multisig)
        .bind(row.is_split)
        .bind(row.num_inputs)
        .bind(row.price)
        .bind(row.fee)
        .bind(row.spend_type)
        .bind(row.pool_status)
        .bind(row.is_mainchain)
        .fetch_one(&mut **dbtx)
        .await?;
    Ok(id)
}

async fn insert_vote_row(dbtx: &mut SqlTx<'_, Postgres>, row: &VoteRow, mode: InsertMode) -> Result<i64> {
    let stmt = schema::make_vote_insert_statement(mode.checked, mode.update_on_conflict);
    let id: Option<i64> = sqlx::query_scalar(&stmt)
        .bind(row.height)
        .bind(row.tx_hash.to_string())
        .bind(row.block_hash.to_string())
        .bind(row.candidate_block_hash.to_string())
        .bind(row.version)
        .bind(row.vote_bits)
        .bind(row.block_valid)
        .bind(row.ticket_hash.to_string())
        .bind(row.ticket_tx_db_id)
        .bind(row.stakesubmission_amount)
        .bind(row.vote_reward)
        .bind(row.is_mainchain)
        .fetch_optional(&mut **dbtx)
        .await?;
    Ok(id.unwrap_or_default())
}

async fn insert_miss_row(
    dbtx: &mut SqlTx<'_, Postgres>,
    row: &MissRow,
    is_mainchain: bool,
    mode: InsertMode,
) -> Result<i64> {
    let stmt = schema::make_miss_insert_statement(mode.checked, mode.update_on_conflict);
    let id: Option<i64> = sqlx::query_scalar(&stmt)
        .bind(row.height)
        .bind(row.block_hash.to_string())
        .bind(row.candidate_block_hash.to_string())
        .bind(row.ticket_hash.to_string())
        .bind(is_mainchain)
        .fetch_optional(&mut **dbtx)
        .await?;
    Ok(id.unwrap_or_default())
}

async fn insert_agenda_row(dbtx: &mut SqlTx<'_, Postgres>, row: &AgendaRow, mode: InsertMode) -> Result<i64> {
    let stmt = schema::make_agenda_insert_statement(mode.checked);
    let id: Option<i64> = sqlx::query_scalar(&stmt)
        .bind(&row.agenda_id)
        .bind(row.choice_index)
        .bind(row.tx_hash.to_string())
        .bind(row.block_height)
        .bind(row.block_time)
        .bind(row.locked_in)
        .bind(row.activated)
        .bind(row.hard_forked)
        .fetch_optional(&mut **dbtx)
        .await?;
    Ok(id.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_mode_constants() {
        assert!(!InsertMode::BULK.checked);
        assert!(InsertMode::CHECKED.checked && !InsertMode::CHECKED.update_on_conflict);
        assert!(InsertMode::UPSERT.checked && InsertMode::UPSERT.update_on_conflict);
    }

    #[test]
    fn difficulty_of_diff1_target_is_one() {
        let d = difficulty_ratio(0x1d00ffff);
        assert!((d - 1.0).abs() < 1e-9, "got {d}");
    }

    #[test]
    fn difficulty_scales_with_smaller_targets() {
        assert!(difficulty_ratio(0x1c00ffff) > difficulty_ratio(0x1d00ffff));
        assert_eq!(difficulty_ratio(0x1d000000), 0.0);
    }
}
