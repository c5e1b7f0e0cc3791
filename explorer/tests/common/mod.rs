//! In-memory `NodeApi` fake and block-tree builders shared by the
//! integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use consensus_core::{Block, BlockHeader, Hash, Transaction};
use rpc_core::{
    BestBlock, BlockHeaderVerbose, BlockVerbose, ChainTip, MempoolEntry, NodeApi, RpcError,
    StakeDiff, TxVerbose,
};

pub fn hash(n: u8) -> Hash {
    Hash::new([n; 32])
}

pub fn header(height: u32, prev: Hash, vote_bits: u16) -> BlockHeader {
    BlockHeader {
        version: 1,
        prev_block: prev,
        merkle_root: Hash::ZERO,
        stake_root: Hash::ZERO,
        vote_bits,
        final_state: vec![0; 6],
        voters: 0,
        fresh_stake: 0,
        revocations: 0,
        pool_size: 0,
        bits: 0x1d00ffff,
        s_bits: 2 * consensus_core::ATOMS_PER_COIN,
        height,
        size: 1000,
        timestamp: 1_600_000_000 + height as i64 * 300,
        nonce: height,
        stake_version: 7,
        extra_data: vec![],
    }
}

pub fn block_with(
    block_hash: Hash,
    height: u32,
    prev: Hash,
    transactions: Vec<Transaction>,
    stake_transactions: Vec<Transaction>,
) -> BlockVerbose {
    BlockVerbose {
        block: Block {
            hash: block_hash,
            header: header(height, prev, 1),
            transactions,
            stake_transactions,
        },
        chain_work: format!("{:016x}", (height as u64 + 1) * 0x10000),
        confirmations: 1,
        next_hash: None,
        validators: vec![],
    }
}

fn output_to(address: &str, value: i64) -> consensus_core::TransactionOutput {
    consensus_core::TransactionOutput {
        value,
        version: 0,
        pk_script: vec![0x76, 0xa9, 0x14],
        script_class: "pubkeyhash".into(),
        required_sigs: 1,
        addresses: vec![address.to_string()],
    }
}

fn input_from(prev: consensus_core::TxOutpoint, value_in: i64) -> consensus_core::TransactionInput {
    consensus_core::TransactionInput {
        previous_outpoint: prev,
        value_in,
        block_height: 0,
        block_index: 0,
        signature_script: vec![],
        sequence: u32::MAX,
    }
}

/// A coinbase-funded transaction paying the given amounts to `address`.
pub fn regular_tx_to(tx_hash: Hash, address: &str, values: &[i64]) -> Transaction {
    Transaction {
        hash: tx_hash,
        version: 1,
        lock_time: 0,
        expiry: 0,
        size: 250,
        inputs: vec![input_from(
            consensus_core::TxOutpoint::new(Hash::ZERO, u32::MAX, consensus_core::TxTree::Regular),
            values.iter().sum::<i64>() + 10,
        )],
        outputs: values.iter().map(|v| output_to(address, *v)).collect(),
    }
}

/// A transaction spending `prev_hash:prev_index` (regular tree).
pub fn spending_tx(tx_hash: Hash, prev_hash: Hash, prev_index: u32, value: i64, to: &str) -> Transaction {
    Transaction {
        hash: tx_hash,
        version: 1,
        lock_time: 0,
        expiry: 0,
        size: 250,
        inputs: vec![input_from(
            consensus_core::TxOutpoint::new(prev_hash, prev_index, consensus_core::TxTree::Regular),
            value,
        )],
        outputs: vec![output_to(to, value - 5)],
    }
}

/// A ticket purchase with the stake-submission tag on output 0.
pub fn ticket_purchase(tx_hash: Hash, price: i64, address: &str) -> Transaction {
    use consensus_core::stake::opcodes;
    let mut submission = output_to(address, price);
    submission.pk_script = vec![opcodes::OP_SSTX, 0x76, 0xa9];
    submission.script_class = "stakesubmission".into();
    Transaction {
        hash: tx_hash,
        version: 1,
        lock_time: 0,
        expiry: 0,
        size: 300,
        inputs: vec![input_from(
            consensus_core::TxOutpoint::new(hash(0xfe), 0, consensus_core::TxTree::Regular),
            price + 100,
        )],
        outputs: vec![submission],
    }
}

/// A vote spending `ticket`, approving `candidate` per `vote_bits`.
pub fn vote_tx(tx_hash: Hash, ticket: Hash, candidate: Hash, candidate_height: u32, vote_bits: u16) -> Transaction {
    use consensus_core::stake::{self, opcodes, VoteBits};
    let stakebase = input_from(
        consensus_core::TxOutpoint::new(Hash::ZERO, u32::MAX, consensus_core::TxTree::Regular),
        50,
    );
    let ticket_in = input_from(
        consensus_core::TxOutpoint::new(ticket, 0, consensus_core::TxTree::Stake),
        10_000,
    );
    let commitment = consensus_core::TransactionOutput {
        value: 0,
        version: 0,
        pk_script: stake::vote_commitment_script(candidate, candidate_height),
        script_class: "nulldata".into(),
        required_sigs: 0,
        addresses: vec![],
    };
    let bits = consensus_core::TransactionOutput {
        value: 0,
        version: 0,
        pk_script: stake::vote_bits_script(VoteBits(vote_bits), 7),
        script_class: "nulldata".into(),
        required_sigs: 0,
        addresses: vec![],
    };
    let mut payout = output_to("VsVoter", 10_050);
    payout.pk_script = vec![opcodes::OP_SSGEN, 0x76, 0xa9];
    Transaction {
        hash: tx_hash,
        version: 1,
        lock_time: 0,
        expiry: 0,
        size: 300,
        inputs: vec![stakebase, ticket_in],
        outputs: vec![commitment, bits, payout],
    }
}

/// A block tree served over the `NodeApi` contract. Branches are added as
/// hash chains; the designated best tip answers `best_block`.
#[derive(Default)]
pub struct FakeNode {
    state: RwLock<FakeNodeState>,
}

#[derive(Default)]
struct FakeNodeState {
    blocks: HashMap<Hash, BlockVerbose>,
    mainchain_by_height: HashMap<u32, Hash>,
    best: Option<BestBlock>,
    tips: Vec<ChainTip>,
}

impl FakeNode {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Install a block; `mainchain` blocks also answer height lookups and
    /// report positive confirmations.
    pub fn add_block(&self, mut block: BlockVerbose, mainchain: bool) {
        let hash = block.block.hash;
        let height = block.block.height();
        block.confirmations = if mainchain { 1 } else { -1 };
        let mut state = self.state.write();
        state.blocks.insert(hash, block);
        if mainchain {
            state.mainchain_by_height.insert(height, hash);
            state.best = Some(BestBlock { height, hash });
        }
    }

    pub fn set_best(&self, height: u32, hash: Hash) {
        self.state.write().best = Some(BestBlock { height, hash });
    }

    pub fn set_tips(&self, tips: Vec<ChainTip>) {
        self.state.write().tips = tips;
    }

    /// Append a linear run of empty main-chain blocks from `start` to
    /// `end` inclusive, tagging hashes from the height. Returns the tip
    /// hash.
    pub fn extend_main(&self, start: u32, end: u32, mut prev: Hash) -> Hash {
        for h in start..=end {
            let mut bytes = [0u8; 32];
            bytes[0..4].copy_from_slice(&h.to_le_bytes());
            bytes[31] = 0xaa;
            let block_hash = Hash::new(bytes);
            self.add_block(block_with(block_hash, h, prev, vec![], vec![]), true);
            prev = block_hash;
        }
        prev
    }
}

#[async_trait]
impl NodeApi for FakeNode {
    async fn best_block(&self) -> Result<BestBlock, RpcError> {
        self.state.read().best.ok_or(RpcError::NotFound)
    }

    async fn block_hash(&self, height: u32) -> Result<Hash, RpcError> {
        self.state
            .read()
            .mainchain_by_height
            .get(&height)
            .copied()
            .ok_or(RpcError::NotFound)
    }

    async fn block_by_hash(&self, hash: Hash) -> Result<BlockVerbose, RpcError> {
        self.state.read().blocks.get(&hash).cloned().ok_or(RpcError::NotFound)
    }

    async fn block_by_height(&self, height: u32) -> Result<BlockVerbose, RpcError> {
        let hash = self.block_hash(height).await?;
        self.block_by_hash(hash).await
    }

    async fn block_header(&self, hash: Hash) -> Result<BlockHeaderVerbose, RpcError> {
        let state = self.state.read();
        let block = state.blocks.get(&hash).ok_or(RpcError::NotFound)?;
        Ok(BlockHeaderVerbose {
            hash,
            header: block.block.header.clone(),
            chain_work: block.chain_work.clone(),
            confirmations: block.confirmations,
            next_hash: block.next_hash,
        })
    }

    async fn raw_transaction(&self, _hash: Hash) -> Result<TxVerbose, RpcError> {
        Err(RpcError::NotFound)
    }

    async fn chain_tips(&self) -> Result<Vec<ChainTip>, RpcError> {
        Ok(self.state.read().tips.clone())
    }

    async fn raw_mempool(&self) -> Result<Vec<MempoolEntry>, RpcError> {
        Ok(vec![])
    }

    async fn stake_difficulty(&self) -> Result<StakeDiff, RpcError> {
        Ok(StakeDiff {
            current: 2 * consensus_core::ATOMS_PER_COIN,
            next: 2 * consensus_core::ATOMS_PER_COIN,
            estimated_min: consensus_core::ATOMS_PER_COIN,
            estimated_max: 4 * consensus_core::ATOMS_PER_COIN,
            estimated_expected: 2 * consensus_core::ATOMS_PER_COIN,
        })
    }
}
