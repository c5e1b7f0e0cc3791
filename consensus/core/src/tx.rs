//! Transaction structures as decoded from the node's verbose JSON-RPC
//! responses. The node is the authority on script decoding; each output
//! carries the address list and script class `vantad` reported for it.

use serde::{Deserialize, Serialize};

use crate::{Atoms, Hash};

/// Which of the two per-block transaction trees a transaction lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TxTree {
    Regular,
    Stake,
}

impl TxTree {
    pub fn as_i8(self) -> i8 {
        match self {
            TxTree::Regular => 0,
            TxTree::Stake => 1,
        }
    }

    pub fn from_i8(v: i8) -> Option<Self> {
        match v {
            0 => Some(TxTree::Regular),
            1 => Some(TxTree::Stake),
            _ => None,
        }
    }
}

/// A reference to a transaction output, qualified by the tree it lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxOutpoint {
    pub hash: Hash,
    pub index: u32,
    pub tree: TxTree,
}

impl TxOutpoint {
    pub fn new(hash: Hash, index: u32, tree: TxTree) -> Self {
        Self { hash, index, tree }
    }

    /// Coinbase and stakebase inputs reference the zero hash.
    pub fn is_null(&self) -> bool {
        self.hash.is_zero()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionInput {
    pub previous_outpoint: TxOutpoint,
    /// Value consumed from the previous outpoint, in atoms. Supplied by the
    /// node for decoded transactions; the stakebase input reports the vote
    /// subsidy here.
    pub value_in: Atoms,
    pub block_height: u32,
    pub block_index: u32,
    #[serde(with = "hex_bytes")]
    pub signature_script: Vec<u8>,
    pub sequence: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionOutput {
    pub value: Atoms,
    pub version: u16,
    #[serde(with = "hex_bytes")]
    pub pk_script: Vec<u8>,
    /// Script class as reported by the node, e.g. "pubkeyhash",
    /// "stakesubmission", "nulldata".
    pub script_class: String,
    pub required_sigs: i32,
    /// Addresses the script pays to. More than one element for bare
    /// multisig.
    pub addresses: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub hash: Hash,
    pub version: u16,
    pub lock_time: u32,
    pub expiry: u32,
    pub size: u32,
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
}

impl Transaction {
    /// Total value of all outputs, in atoms.
    pub fn sent(&self) -> Atoms {
        self.outputs.iter().map(|o| o.value).sum()
    }

    /// Total value consumed by all inputs, in atoms.
    pub fn spent(&self) -> Atoms {
        self.inputs.iter().map(|i| i.value_in).sum()
    }

    /// Fees = inputs − outputs. Negative only for subsidy-bearing
    /// transactions (coinbase, votes), which create value.
    pub fn fees(&self) -> Atoms {
        self.spent() - self.sent()
    }

    /// A coinbase spends exactly one null previous outpoint in the regular
    /// tree.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1
            && self.inputs[0].previous_outpoint.is_null()
            && self.inputs[0].previous_outpoint.tree == TxTree::Regular
    }
}

/// Serde adapter for byte vectors represented as hex strings on the wire.
pub mod hex_bytes {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(value: Atoms) -> TransactionOutput {
        TransactionOutput {
            value,
            version: 0,
            pk_script: vec![],
            script_class: "pubkeyhash".into(),
            required_sigs: 1,
            addresses: vec!["VsTestAddress".into()],
        }
    }

    #[test]
    fn amounts() {
        let tx = Transaction {
            hash: Hash::ZERO,
            version: 1,
            lock_time: 0,
            expiry: 0,
            size: 250,
            inputs: vec![TransactionInput {
                previous_outpoint: TxOutpoint::new(Hash::new([1; 32]), 0, TxTree::Regular),
                value_in: 500,
                block_height: 1,
                block_index: 0,
                signature_script: vec![],
                sequence: 0,
            }],
            outputs: vec![output(300), output(150)],
        };
        assert_eq!(tx.sent(), 450);
        assert_eq!(tx.spent(), 500);
        assert_eq!(tx.fees(), 50);
        assert!(!tx.is_coinbase());
    }

    #[test]
    fn coinbase_detection() {
        let tx = Transaction {
            hash: Hash::ZERO,
            version: 1,
            lock_time: 0,
            expiry: 0,
            size: 100,
            inputs: vec![TransactionInput {
                previous_outpoint: TxOutpoint::new(Hash::ZERO, u32::MAX, TxTree::Regular),
                value_in: 0,
                block_height: 0,
                block_index: 0,
                signature_script: vec![],
                sequence: 0,
            }],
            outputs: vec![output(5000)],
        };
        assert!(tx.is_coinbase());
    }
}
