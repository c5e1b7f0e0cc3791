use serde::{Deserialize, Serialize};

use crate::header::BlockHeader;
use crate::tx::{Transaction, TxTree};
use crate::Hash;

/// Complete block: header plus both transaction trees. The regular tree
/// holds value transfers; the stake tree holds ticket purchases, votes and
/// revocations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub hash: Hash,
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    pub stake_transactions: Vec<Transaction>,
}

impl Block {
    pub fn height(&self) -> u32 {
        self.header.height
    }

    /// Iterate one tree of the block.
    pub fn tree(&self, tree: TxTree) -> &[Transaction] {
        match tree {
            TxTree::Regular => &self.transactions,
            TxTree::Stake => &self.stake_transactions,
        }
    }

    pub fn num_tx(&self) -> usize {
        self.transactions.len() + self.stake_transactions.len()
    }
}
