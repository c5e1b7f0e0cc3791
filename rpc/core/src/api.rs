//! Node RPC API trait definitions.

use async_trait::async_trait;
use consensus_core::Hash;

use crate::model::*;

/// Read-only view of a `vantad` full node over JSON-RPC. Every method
/// returns a consistent snapshot or fails; there are no partial results.
/// The node is trusted; responses are mirrored, not validated.
#[async_trait]
pub trait NodeApi: Send + Sync {
    /// `getbestblock`: the node's current main-chain tip.
    async fn best_block(&self) -> Result<BestBlock, RpcError>;

    /// `getblockhash`: main-chain block hash at the given height.
    async fn block_hash(&self, height: u32) -> Result<Hash, RpcError>;

    /// `getblock` with verbose transaction decoding.
    async fn block_by_hash(&self, hash: Hash) -> Result<BlockVerbose, RpcError>;

    /// `getblockhash` followed by `getblock`.
    async fn block_by_height(&self, height: u32) -> Result<BlockVerbose, RpcError>;

    /// `getblockheader`: header plus chain placement (confirmations,
    /// chain work, next hash).
    async fn block_header(&self, hash: Hash) -> Result<BlockHeaderVerbose, RpcError>;

    /// `getrawtransaction` with verbose decoding.
    async fn raw_transaction(&self, hash: Hash) -> Result<TxVerbose, RpcError>;

    /// `getchaintips`: every known chain tip with its status.
    async fn chain_tips(&self) -> Result<Vec<ChainTip>, RpcError>;

    /// `getrawmempool` with per-transaction receive times.
    async fn raw_mempool(&self) -> Result<Vec<MempoolEntry>, RpcError>;

    /// `getstakedifficulty` and `estimatestakediff`, combined.
    async fn stake_difficulty(&self) -> Result<StakeDiff, RpcError>;
}
