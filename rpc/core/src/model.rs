//! RPC wire models and error type.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use consensus_core::{Atoms, Block, BlockHeader, Hash, Transaction};

/// RPC error type. `NotFound` is an expected condition for lookups by
/// unknown hash and must never be logged as an error by callers.
#[derive(Error, Debug, Clone)]
pub enum RpcError {
    #[error("network error: {0}")]
    Network(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("not found")]
    NotFound,

    #[error("node connection shut down")]
    Shutdown,
}

/// `getbestblock` result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BestBlock {
    pub height: u32,
    pub hash: Hash,
}

/// Status of a chain tip as reported by `getchaintips`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TipStatus {
    Active,
    ValidHeaders,
    ValidFork,
    Invalid,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainTip {
    pub hash: Hash,
    pub height: u32,
    pub status: TipStatus,
}

/// A block with its chain placement, as returned by verbose `getblock`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockVerbose {
    #[serde(flatten)]
    pub block: Block,
    /// Cumulative work up to and including this block, big-endian hex.
    pub chain_work: String,
    /// −1 when the block is not on the node's main chain.
    pub confirmations: i64,
    pub next_hash: Option<Hash>,
    /// Tickets the header called to vote on this block. Empty before the
    /// stake validation height.
    pub validators: Vec<Hash>,
}

/// A block header with its chain placement, as returned by
/// `getblockheader`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeaderVerbose {
    pub hash: Hash,
    #[serde(flatten)]
    pub header: BlockHeader,
    pub chain_work: String,
    pub confirmations: i64,
    pub next_hash: Option<Hash>,
}

/// A decoded transaction with optional block placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxVerbose {
    #[serde(flatten)]
    pub tx: Transaction,
    pub block_hash: Option<Hash>,
    pub block_height: Option<u32>,
    pub block_index: Option<u32>,
    pub confirmations: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MempoolEntry {
    pub hash: Hash,
    /// UTC seconds the node first saw the transaction.
    pub time: i64,
    pub fee: Atoms,
    pub size: u32,
}

/// Current and estimated next stake difficulty, in atoms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StakeDiff {
    pub current: Atoms,
    pub next: Atoms,
    pub estimated_min: Atoms,
    pub estimated_max: Atoms,
    pub estimated_expected: Atoms,
}

/// Push notifications delivered over the node's websocket channel.
/// Delivery is at-least-once; consumers must be idempotent with respect to
/// repeated delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum NodeNotification {
    #[serde(rename = "blockconnected")]
    BlockConnected { hash: Hash, height: u32 },
    #[serde(rename = "chainreorg")]
    Reorg { old_tip: Hash, new_tip: Hash },
}
