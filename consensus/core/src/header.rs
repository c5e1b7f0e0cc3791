use serde::{Deserialize, Serialize};

use crate::{Atoms, Hash};

/// Block header as decoded from the node. Vanta headers commit to both
/// transaction trees and carry the stake participation summary for the
/// block: the votes cast on the parent, fresh ticket purchases, revocations,
/// and the live ticket pool size after connecting the block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    pub version: i32,
    pub prev_block: Hash,
    pub merkle_root: Hash,
    pub stake_root: Hash,
    /// Bit 0 approves the parent block's regular transactions; the
    /// remaining bits are consensus vote flags.
    pub vote_bits: u16,
    #[serde(with = "crate::tx::hex_bytes")]
    pub final_state: Vec<u8>,
    /// Number of votes mined into this block.
    pub voters: u16,
    /// Number of new ticket purchases in this block.
    pub fresh_stake: u8,
    pub revocations: u8,
    /// Live ticket pool size after this block.
    pub pool_size: u32,
    pub bits: u32,
    /// Stake difficulty (ticket price) in atoms.
    pub s_bits: Atoms,
    pub height: u32,
    pub size: u32,
    /// UTC seconds.
    pub timestamp: i64,
    pub nonce: u32,
    pub stake_version: u32,
    #[serde(with = "crate::tx::hex_bytes")]
    pub extra_data: Vec<u8>,
}

impl BlockHeader {
    pub fn approves_parent(&self) -> bool {
        self.vote_bits & 0x0001 != 0
    }
}
