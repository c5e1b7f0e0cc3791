//! Row types of the relational mirror and the query layer's result shapes.

use serde::{Deserialize, Serialize};

use consensus_core::stake::TxType;
use consensus_core::{Atoms, Hash};

/// How a ticket's value eventually left the stake system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[repr(i16)]
pub enum TicketSpendType {
    Unspent = 0,
    Voted = 1,
    Revoked = 2,
}

/// Where a ticket currently stands in the pool lifecycle.
///
/// ```text
/// Immature -> Live -> Voted
///               |---> Missed  -> (Revoked via spend_type)
///               `---> Expired -> (Revoked via spend_type)
/// ```
/// Voted, Missed+Revoked and Expired+Revoked are terminal; only the reorg
/// coordinator rewinds them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[repr(i16)]
pub enum TicketPoolStatus {
    Live = 0,
    Voted = 1,
    Expired = 2,
    Missed = 3,
    Immature = 4,
}

/// Address history views offered by the query layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrTxViewType {
    All,
    Credits,
    Debits,
    MergedDebits,
}

/// One row of the blocks table.
#[derive(Debug, Clone)]
pub struct BlockRow {
    pub hash: Hash,
    pub height: i64,
    pub size: i32,
    pub is_valid: bool,
    pub is_mainchain: bool,
    pub version: i32,
    pub merkle_root: Hash,
    pub stake_root: Hash,
    pub num_tx: i32,
    pub num_rtx: i32,
    pub num_stx: i32,
    pub time: i64,
    pub nonce: i64,
    pub vote_bits: i16,
    pub voters: i16,
    pub fresh_stake: i16,
    pub revocations: i16,
    pub pool_size: i32,
    pub pool_value: Atoms,
    pub bits: i64,
    pub sbits: Atoms,
    pub difficulty: f64,
    pub stake_version: i64,
    pub previous_hash: Hash,
    pub chain_work: String,
}

/// One row of the transactions table. `vin_db_ids`/`vout_db_ids` carry the
/// surrogate ids of the decomposed inputs and outputs, in input/output
/// order.
#[derive(Debug, Clone)]
pub struct TxRow {
    pub block_hash: Hash,
    pub block_height: i64,
    pub block_time: i64,
    pub time: i64,
    pub tx_type: TxType,
    pub version: i32,
    pub tree: i16,
    pub tx_hash: Hash,
    pub block_index: i32,
    pub lock_time: i64,
    pub expiry: i64,
    pub size: i32,
    pub spent: Atoms,
    pub sent: Atoms,
    pub fees: Atoms,
    pub num_vin: i32,
    pub vin_db_ids: Vec<i64>,
    pub num_vout: i32,
    pub vout_db_ids: Vec<i64>,
    pub is_valid: bool,
    pub is_mainchain: bool,
}

#[derive(Debug, Clone)]
pub struct VinRow {
    pub tx_hash: Hash,
    pub tx_index: i32,
    pub tx_tree: i16,
    pub prev_out_hash: Hash,
    pub prev_out_index: i64,
    pub prev_out_tree: i16,
    pub value_in: Atoms,
    pub is_valid: bool,
    pub is_mainchain: bool,
    pub block_time: i64,
    pub tx_type: TxType,
}

#[derive(Debug, Clone)]
pub struct VoutRow {
    pub tx_hash: Hash,
    pub tx_index: i32,
    pub tx_tree: i16,
    pub value: Atoms,
    pub version: i16,
    pub pkscript: Vec<u8>,
    pub script_req_sigs: i32,
    pub script_type: String,
    pub script_addresses: Vec<String>,
}

/// The canonical ledger entry: one row per (address, vin-or-vout).
///
/// For a funding row (`is_funding = true`, backed by a vout),
/// `matching_tx_hash` is the spender's hash once the output is spent; an
/// address's UTXO set is its funding rows with no matching hash and
/// `valid_mainchain` set. For a spending row it is the funder's hash.
#[derive(Debug, Clone)]
pub struct AddressRow {
    pub address: String,
    pub matching_tx_hash: Option<Hash>,
    pub tx_hash: Hash,
    pub tx_vin_vout_index: i32,
    pub vin_vout_db_id: i64,
    pub value: Atoms,
    pub block_time: i64,
    pub is_funding: bool,
    pub valid_mainchain: bool,
    pub tx_type: TxType,
}

#[derive(Debug, Clone)]
pub struct TicketRow {
    pub tx_hash: Hash,
    pub block_hash: Hash,
    pub block_height: i64,
    pub purchase_tx_db_id: i64,
    pub stakesubmission_address: String,
    pub is_multisig: bool,
    pub is_split: bool,
    pub num_inputs: i16,
    pub price: Atoms,
    pub fee: Atoms,
    pub spend_type: TicketSpendType,
    pub pool_status: TicketPoolStatus,
    pub is_mainchain: bool,
}

#[derive(Debug, Clone)]
pub struct VoteRow {
    pub height: i64,
    pub tx_hash: Hash,
    pub block_hash: Hash,
    pub candidate_block_hash: Hash,
    pub version: i64,
    pub vote_bits: i16,
    pub block_valid: bool,
    pub ticket_hash: Hash,
    pub ticket_tx_db_id: i64,
    pub stakesubmission_amount: Atoms,
    pub vote_reward: Atoms,
    pub is_mainchain: bool,
}

#[derive(Debug, Clone)]
pub struct MissRow {
    pub height: i64,
    pub block_hash: Hash,
    pub candidate_block_hash: Hash,
    pub ticket_hash: Hash,
}

#[derive(Debug, Clone)]
pub struct AgendaRow {
    pub agenda_id: String,
    pub choice_index: i32,
    pub tx_hash: Hash,
    pub block_height: i64,
    pub block_time: i64,
    pub locked_in: bool,
    pub activated: bool,
    pub hard_forked: bool,
}

// --- query layer result shapes ---

/// Totals for an address, split by spent/unspent funding rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressBalance {
    pub num_spent: i64,
    pub num_unspent: i64,
    pub amt_spent: Atoms,
    pub amt_unspent: Atoms,
    /// Distinct spending transactions (repeated tx hashes merged).
    pub num_merged_spent: i64,
}

/// One unspent output paying to an address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressUtxo {
    pub address: String,
    pub tx_hash: String,
    pub vout: i32,
    pub script_pub_key: String,
    pub atoms: Atoms,
    pub height: i64,
    pub confirmations: i64,
}

/// One row of an address history listing. `merged_count` is populated only
/// by the merged-debits view, where rows sharing a spending transaction
/// collapse into one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressHistoryRow {
    pub address: String,
    pub tx_hash: String,
    pub matching_tx_hash: Option<String>,
    pub value: Atoms,
    pub block_time: i64,
    pub is_funding: bool,
    pub valid_mainchain: bool,
    pub merged_count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketStatus {
    pub spend_type: TicketSpendType,
    pub pool_status: TicketPoolStatus,
    pub block_height: i64,
    pub is_mainchain: bool,
}

/// One block placement of a transaction. A transaction can sit in several
/// blocks across forks; at most one placement is main chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxBlockPlacement {
    pub block_hash: String,
    pub block_height: i64,
    pub block_index: i32,
    pub is_valid: bool,
    pub is_mainchain: bool,
}

/// Per-choice vote tallies for one agenda, bucketed by block height or by
/// UTC day (cumulative).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgendaVoteChoices {
    pub height: Vec<i64>,
    pub time: Vec<i64>,
    pub yes: Vec<i64>,
    pub no: Vec<i64>,
    pub abstain: Vec<i64>,
    pub total: Vec<i64>,
}

/// Chain placement of a block, served to status pages and used by the
/// reorg coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockStatus {
    pub hash: String,
    pub previous_hash: String,
    pub next_hash: Option<String>,
    pub height: i64,
    pub is_valid: bool,
    pub is_mainchain: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_discriminants_are_stable() {
        // Stored values; renumbering would corrupt existing databases.
        assert_eq!(TicketSpendType::Unspent as i16, 0);
        assert_eq!(TicketSpendType::Voted as i16, 1);
        assert_eq!(TicketSpendType::Revoked as i16, 2);
        assert_eq!(TicketPoolStatus::Live as i16, 0);
        assert_eq!(TicketPoolStatus::Missed as i16, 3);
        assert_eq!(TicketPoolStatus::Immature as i16, 4);
    }
}
