//! Live ticket-pool state machine.
//!
//! The pool advances one block at a time. Connecting a block matures
//! pending tickets, removes tickets consumed by the block's votes (and
//! tickets that missed their call), expires overdue tickets, registers the
//! block's fresh purchases, and draws the lottery winners that the *next*
//! block's header will call to vote. Every connect writes an undo entry so
//! [`StakeDatabase::disconnect_block`] restores the exact prior state.

use std::collections::HashSet;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use consensus_core::stake::{self, TxType};
use consensus_core::{Atoms, Block, ChainParams, Hash, TxTree};

use crate::db::{self, Database};
use crate::errors::{StakeDbError, StakeDbResult};

const META_STATE: &[u8] = b"state";

/// A ticket known to the pool, immature or live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolTicket {
    pub hash: Hash,
    pub purchase_height: u32,
    pub value: Atoms,
    pub mature_at: u32,
    pub expires_at: u32,
}

impl PoolTicket {
    fn is_live_at(&self, height: u32) -> bool {
        height >= self.mature_at && height < self.expires_at
    }
}

/// Snapshot of the live pool after connecting a block, keyed by that
/// block's hash. `winners` are the tickets called to vote on the next
/// block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolInfo {
    pub height: u32,
    pub size: u32,
    pub value: Atoms,
    pub winners: Vec<Hash>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PoolState {
    /// Height of the last connected block; `None` for an empty database.
    height: Option<u32>,
    tip: Hash,
    live_count: u32,
    live_value: Atoms,
}

impl Default for PoolState {
    fn default() -> Self {
        PoolState { height: None, tip: Hash::ZERO, live_count: 0, live_value: 0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UndoEntry {
    block_hash: Hash,
    prev_state: PoolState,
    /// Fresh purchases registered by this block.
    added: Vec<Hash>,
    /// Tickets removed by this block (voted, missed, expired), with full
    /// records for restoration.
    removed: Vec<PoolTicket>,
    /// Maturing-schedule hashes consumed at this height.
    matured: Vec<Hash>,
    /// Expiring-schedule hashes consumed at this height.
    expired_keys: Vec<Hash>,
}

fn height_key(height: u32) -> [u8; 4] {
    height.to_be_bytes()
}

fn schedule_key(height: u32, hash: &Hash) -> Vec<u8> {
    let mut key = Vec::with_capacity(36);
    key.extend_from_slice(&height.to_be_bytes());
    key.extend_from_slice(hash.as_bytes());
    key
}

/// The embedded stake database. Both mutating operations are synchronous
/// and exclusive; an internal mutex is the stake DB guard.
pub struct StakeDatabase {
    db: Database,
    params: ChainParams,
    state: Mutex<PoolState>,
}

impl StakeDatabase {
    pub fn open<P: AsRef<std::path::Path>>(path: P, params: ChainParams) -> StakeDbResult<Self> {
        let db = Database::open(path)?;
        let state = match db.get(db::CF_META, META_STATE)? {
            Some(raw) => bincode::deserialize(&raw)?,
            None => PoolState::default(),
        };
        Ok(Self { db, params, state: Mutex::new(state) })
    }

    /// Height of the last connected block, or −1 for an empty database.
    pub fn height(&self) -> i64 {
        self.state.lock().height.map_or(-1, |h| h as i64)
    }

    pub fn tip_hash(&self) -> Hash {
        self.state.lock().tip
    }

    /// Fails with the fatal divergence error when this database is more
    /// than twice ahead of the primary store; the operator must delete the
    /// stake database directory to force a rebuild.
    pub fn check_divergence(&self, primary_best: i64) -> StakeDbResult<()> {
        let stake = self.height();
        if primary_best >= 0 && stake > 2 * primary_best {
            return Err(StakeDbError::Divergence {
                stake: stake as u32,
                primary: primary_best as u32,
            });
        }
        Ok(())
    }

    pub fn pool_info(&self, block_hash: &Hash) -> StakeDbResult<Option<PoolInfo>> {
        match self.db.get(db::CF_POOL_INFO, block_hash.as_bytes())? {
            Some(raw) => Ok(Some(bincode::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn pool_info_best(&self) -> StakeDbResult<Option<PoolInfo>> {
        let tip = self.tip_hash();
        if tip.is_zero() {
            return Ok(None);
        }
        self.pool_info(&tip)
    }

    /// Advance the pool by one block. The block must extend the current
    /// tip. Returns the pool snapshot after connection.
    pub fn connect_block(&self, block: &Block) -> StakeDbResult<PoolInfo> {
        let mut state = self.state.lock();
        let height = block.height();
        let expected = state.height.map_or(0, |h| h + 1);
        if height != expected || (state.height.is_some() && block.header.prev_block != state.tip) {
            return Err(StakeDbError::NotTipChild {
                got: format!("{} @ {}", block.hash, height),
                tip: format!("{} @ {:?}", state.tip, state.height),
            });
        }

        let prev_state = state.clone();
        let mut batch = self.db.batch();
        let mut undo = UndoEntry {
            block_hash: block.hash,
            prev_state: prev_state.clone(),
            added: Vec::new(),
            removed: Vec::new(),
            matured: Vec::new(),
            expired_keys: Vec::new(),
        };

        // Tickets reaching maturity at this height join the live pool.
        for (key, raw) in self.db.scan_prefix(db::CF_MATURING, &height_key(height))? {
            let ticket_hash: Hash = bincode::deserialize(&raw)?;
            self.db.batch_delete(&mut batch, db::CF_MATURING, &key)?;
            if let Some(ticket) = self.ticket(&ticket_hash)? {
                state.live_count += 1;
                state.live_value += ticket.value;
                undo.matured.push(ticket_hash);
            }
        }

        // Tickets consumed by this block's votes leave the pool. Batched
        // deletes are not visible to reads until commit, so removals are
        // tracked to keep the expiry sweep from double-counting.
        let mut voted = HashSet::new();
        let mut removed_here: HashSet<Hash> = HashSet::new();
        for tx in &block.stake_transactions {
            if stake::determine_tx_type(TxTree::Stake, tx) != TxType::Vote {
                continue;
            }
            let Some(ticket_hash) = stake::ticket_spent_by_vote(tx) else {
                continue;
            };
            voted.insert(ticket_hash);
            if let Some(ticket) = self.ticket(&ticket_hash)? {
                self.remove_live(&mut batch, &mut state, &ticket)?;
                removed_here.insert(ticket.hash);
                undo.removed.push(ticket);
            }
        }

        // Winners that failed to vote are misses; they leave the live pool
        // as well. Miss accounting only applies once voting is required.
        if height >= self.params.stake_validation_height {
            if let Some(prev_info) = self.pool_info(&block.header.prev_block)? {
                for winner in &prev_info.winners {
                    if voted.contains(winner) {
                        continue;
                    }
                    if let Some(ticket) = self.ticket(winner)? {
                        self.remove_live(&mut batch, &mut state, &ticket)?;
                        removed_here.insert(ticket.hash);
                        undo.removed.push(ticket);
                    }
                }
            }
        }

        // Overdue tickets expire.
        for (key, raw) in self.db.scan_prefix(db::CF_EXPIRING, &height_key(height))? {
            let ticket_hash: Hash = bincode::deserialize(&raw)?;
            self.db.batch_delete(&mut batch, db::CF_EXPIRING, &key)?;
            undo.expired_keys.push(ticket_hash);
            if removed_here.contains(&ticket_hash) {
                continue;
            }
            if let Some(ticket) = self.ticket(&ticket_hash)? {
                self.db.batch_delete(&mut batch, db::CF_TICKETS, ticket_hash.as_bytes())?;
                if ticket.is_live_at(height) {
                    state.live_count -= 1;
                    state.live_value -= ticket.value;
                }
                removed_here.insert(ticket.hash);
                undo.removed.push(ticket);
            }
        }

        // Fresh purchases enter as immature tickets.
        for tx in &block.stake_transactions {
            if stake::determine_tx_type(TxTree::Stake, tx) != TxType::TicketPurchase {
                continue;
            }
            let ticket = PoolTicket {
                hash: tx.hash,
                purchase_height: height,
                value: tx.outputs.first().map_or(0, |o| o.value),
                mature_at: self.params.maturity_height(height),
                expires_at: self.params.expiry_height(height),
            };
            self.db.batch_put(
                &mut batch,
                db::CF_TICKETS,
                ticket.hash.as_bytes(),
                &bincode::serialize(&ticket)?,
            )?;
            self.db.batch_put(
                &mut batch,
                db::CF_MATURING,
                &schedule_key(ticket.mature_at, &ticket.hash),
                &bincode::serialize(&ticket.hash)?,
            )?;
            self.db.batch_put(
                &mut batch,
                db::CF_EXPIRING,
                &schedule_key(ticket.expires_at, &ticket.hash),
                &bincode::serialize(&ticket.hash)?,
            )?;
            undo.added.push(ticket.hash);
        }

        state.height = Some(height);
        state.tip = block.hash;

        // Draw the winners the next block will call to vote. The batch is
        // not committed yet, so this block's removals are masked out.
        let winners = self.draw_winners(block.hash, height, &removed_here)?;
        let info = PoolInfo {
            height,
            size: state.live_count,
            value: state.live_value,
            winners,
        };

        self.db.batch_put(
            &mut batch,
            db::CF_POOL_INFO,
            block.hash.as_bytes(),
            &bincode::serialize(&info)?,
        )?;
        self.db.batch_put(&mut batch, db::CF_UNDO, &height_key(height), &bincode::serialize(&undo)?)?;
        self.db.batch_put(&mut batch, db::CF_META, META_STATE, &bincode::serialize(&*state)?)?;
        self.db.write_batch(batch)?;

        debug!(height, pool_size = info.size, "connected block to stake db");
        Ok(info)
    }

    /// Rewind the pool by one block.
    pub fn disconnect_block(&self) -> StakeDbResult<i64> {
        let mut state = self.state.lock();
        let Some(height) = state.height else {
            return Err(StakeDbError::AtGenesis);
        };

        let raw = self
            .db
            .get(db::CF_UNDO, &height_key(height))?
            .ok_or(StakeDbError::AtGenesis)?;
        let undo: UndoEntry = bincode::deserialize(&raw)?;

        let mut batch = self.db.batch();

        // Drop this block's fresh purchases and their schedule entries.
        for hash in &undo.added {
            if let Some(ticket) = self.ticket(hash)? {
                self.db.batch_delete(&mut batch, db::CF_TICKETS, hash.as_bytes())?;
                self.db.batch_delete(&mut batch, db::CF_MATURING, &schedule_key(ticket.mature_at, hash))?;
                self.db.batch_delete(&mut batch, db::CF_EXPIRING, &schedule_key(ticket.expires_at, hash))?;
            }
        }

        // Restore removed tickets and their outstanding schedule entries.
        for ticket in &undo.removed {
            self.db.batch_put(
                &mut batch,
                db::CF_TICKETS,
                ticket.hash.as_bytes(),
                &bincode::serialize(ticket)?,
            )?;
            if ticket.expires_at > height {
                self.db.batch_put(
                    &mut batch,
                    db::CF_EXPIRING,
                    &schedule_key(ticket.expires_at, &ticket.hash),
                    &bincode::serialize(&ticket.hash)?,
                )?;
            }
        }

        // Re-arm schedule entries consumed at this height.
        for hash in &undo.matured {
            self.db.batch_put(
                &mut batch,
                db::CF_MATURING,
                &schedule_key(height, hash),
                &bincode::serialize(hash)?,
            )?;
        }
        for hash in &undo.expired_keys {
            self.db.batch_put(
                &mut batch,
                db::CF_EXPIRING,
                &schedule_key(height, hash),
                &bincode::serialize(hash)?,
            )?;
        }

        self.db.batch_delete(&mut batch, db::CF_POOL_INFO, undo.block_hash.as_bytes())?;
        self.db.batch_delete(&mut batch, db::CF_UNDO, &height_key(height))?;

        *state = undo.prev_state;
        self.db.batch_put(&mut batch, db::CF_META, META_STATE, &bincode::serialize(&*state)?)?;
        self.db.write_batch(batch)?;

        debug!(from = height, to = ?state.height, "disconnected block from stake db");
        Ok(state.height.map_or(-1, |h| h as i64))
    }

    fn ticket(&self, hash: &Hash) -> StakeDbResult<Option<PoolTicket>> {
        match self.db.get(db::CF_TICKETS, hash.as_bytes())? {
            Some(raw) => Ok(Some(bincode::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    fn remove_live(
        &self,
        batch: &mut rocksdb::WriteBatch,
        state: &mut PoolState,
        ticket: &PoolTicket,
    ) -> StakeDbResult<()> {
        self.db.batch_delete(batch, db::CF_TICKETS, ticket.hash.as_bytes())?;
        self.db.batch_delete(batch, db::CF_EXPIRING, &schedule_key(ticket.expires_at, &ticket.hash))?;
        if ticket.is_live_at(state.height.map_or(0, |h| h + 1)) {
            state.live_count -= 1;
            state.live_value -= ticket.value;
        }
        Ok(())
    }

    /// Deterministic lottery over the live pool, seeded by the connected
    /// block's hash.
    fn draw_winners(&self, seed: Hash, height: u32, removed: &HashSet<Hash>) -> StakeDbResult<Vec<Hash>> {
        let mut live: Vec<PoolTicket> = Vec::new();
        for (_, raw) in self.db.scan_prefix(db::CF_TICKETS, &[])? {
            let ticket: PoolTicket = bincode::deserialize(&raw)?;
            if ticket.is_live_at(height + 1) && !removed.contains(&ticket.hash) {
                live.push(ticket);
            }
        }
        live.sort_by_key(|t| t.hash);

        let n = self.params.tickets_per_block as usize;
        let mut rng = u64::from_le_bytes(seed.as_bytes()[0..8].try_into().unwrap()) | 1;
        let mut winners = Vec::with_capacity(n);
        while winners.len() < n && !live.is_empty() {
            // xorshift64
            rng ^= rng << 13;
            rng ^= rng >> 7;
            rng ^= rng << 17;
            let idx = (rng % live.len() as u64) as usize;
            winners.push(live.swap_remove(idx).hash);
        }
        Ok(winners)
    }
}
