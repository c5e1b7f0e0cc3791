//! Stake transaction classification and vote decoding.
//!
//! Stake-tree outputs are tagged with a leading opcode that identifies their
//! role, and votes commit to the block they approve through a pair of
//! OP_RETURN outputs: output 0 carries the candidate block hash and height,
//! output 1 carries the 16-bit vote bits followed by the 32-bit vote
//! version. Bit 0 of the vote bits approves the candidate block's regular
//! transaction tree; the remaining bits select agenda choices according to
//! the deployment masks in [`ChainParams`].

use serde::{Deserialize, Serialize};

use crate::errors::ChainError;
use crate::params::ChainParams;
use crate::tx::{Transaction, TransactionInput, TxTree};
use crate::Hash;

pub mod opcodes {
    pub const OP_RETURN: u8 = 0x6a;
    pub const OP_DATA_36: u8 = 0x24;
    pub const OP_SSTX: u8 = 0xba;
    pub const OP_SSGEN: u8 = 0xbb;
    pub const OP_SSRTX: u8 = 0xbc;
    pub const OP_SSTXCHANGE: u8 = 0xbd;
}

/// Transaction type as stored in the relational mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxType {
    Regular,
    TicketPurchase,
    Vote,
    Revocation,
}

impl TxType {
    pub fn as_i16(self) -> i16 {
        match self {
            TxType::Regular => 0,
            TxType::TicketPurchase => 1,
            TxType::Vote => 2,
            TxType::Revocation => 3,
        }
    }

    pub fn from_i16(v: i16) -> Option<Self> {
        match v {
            0 => Some(TxType::Regular),
            1 => Some(TxType::TicketPurchase),
            2 => Some(TxType::Vote),
            3 => Some(TxType::Revocation),
            _ => None,
        }
    }
}

/// The stakebase is the subsidy input of a vote: a null previous outpoint
/// with the maximum index, mirroring the coinbase convention.
pub fn is_stakebase(input: &TransactionInput) -> bool {
    input.previous_outpoint.is_null() && input.previous_outpoint.index == u32::MAX
}

fn first_output_opcode(tx: &Transaction) -> Option<u8> {
    tx.outputs.first().and_then(|o| o.pk_script.first()).copied()
}

pub fn is_vote(tx: &Transaction) -> bool {
    tx.inputs.len() >= 2
        && is_stakebase(&tx.inputs[0])
        && tx.outputs.len() >= 2
        && tx.outputs[0].pk_script.first() == Some(&opcodes::OP_RETURN)
        && tx.outputs[1].pk_script.first() == Some(&opcodes::OP_RETURN)
}

pub fn is_ticket_purchase(tx: &Transaction) -> bool {
    first_output_opcode(tx) == Some(opcodes::OP_SSTX)
}

pub fn is_revocation(tx: &Transaction) -> bool {
    first_output_opcode(tx) == Some(opcodes::OP_SSRTX)
}

/// Classify a transaction given the tree it was mined in. Regular-tree
/// transactions are always [`TxType::Regular`]; the stake tree is
/// discriminated structurally.
pub fn determine_tx_type(tree: TxTree, tx: &Transaction) -> TxType {
    if tree == TxTree::Regular {
        return TxType::Regular;
    }
    if is_vote(tx) {
        TxType::Vote
    } else if is_ticket_purchase(tx) {
        TxType::TicketPurchase
    } else if is_revocation(tx) {
        TxType::Revocation
    } else {
        TxType::Regular
    }
}

/// The 16-bit vote bits mined into a vote's second OP_RETURN output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteBits(pub u16);

impl VoteBits {
    /// Whether this vote approves the candidate block's regular
    /// transactions.
    pub fn approves_parent(self) -> bool {
        self.0 & 0x0001 != 0
    }
}

/// Decoded vote commitment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteInfo {
    pub candidate_hash: Hash,
    pub candidate_height: u32,
    pub bits: VoteBits,
    pub version: u32,
}

/// An agenda choice selected by a vote's bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteChoice {
    pub agenda_id: String,
    pub choice_index: i32,
    pub choice_id: String,
}

/// Decode the candidate block reference and vote bits from a vote
/// transaction. Fails on anything that does not carry both OP_RETURN
/// commitments in the expected shape.
pub fn parse_vote(tx: &Transaction) -> Result<VoteInfo, ChainError> {
    if !is_vote(tx) {
        return Err(ChainError::MalformedVote(format!(
            "{} is not a vote transaction",
            tx.hash
        )));
    }

    // Output 0: OP_RETURN OP_DATA_36 <32-byte block hash><LE u32 height>.
    let ref_script = &tx.outputs[0].pk_script;
    if ref_script.len() != 38 || ref_script[1] != opcodes::OP_DATA_36 {
        return Err(ChainError::MalformedVote(format!(
            "bad block reference script in {}",
            tx.hash
        )));
    }
    let mut hash_bytes = [0u8; 32];
    hash_bytes.copy_from_slice(&ref_script[2..34]);
    let candidate_height = u32::from_le_bytes(ref_script[34..38].try_into().unwrap());

    // Output 1: OP_RETURN <push> <LE u16 vote bits><LE u32 vote version>.
    let bits_script = &tx.outputs[1].pk_script;
    if bits_script.len() < 8 {
        return Err(ChainError::MalformedVote(format!(
            "bad vote bits script in {}",
            tx.hash
        )));
    }
    let data = &bits_script[2..];
    let bits = u16::from_le_bytes(data[0..2].try_into().unwrap());
    let version = u32::from_le_bytes(data[2..6].try_into().unwrap());

    Ok(VoteInfo {
        candidate_hash: Hash::new(hash_bytes),
        candidate_height,
        bits: VoteBits(bits),
        version,
    })
}

/// The ticket a vote spends: the previous outpoint of input 1 (input 0 is
/// the stakebase).
pub fn ticket_spent_by_vote(tx: &Transaction) -> Option<Hash> {
    tx.inputs.get(1).map(|i| i.previous_outpoint.hash)
}

/// Resolve the agenda choices a vote selected, per the deployments active
/// for its vote version. Bits that match no deployment are ignored, as are
/// deployments whose masked bits match no declared choice.
pub fn vote_choices(bits: VoteBits, version: u32, params: &ChainParams) -> Vec<VoteChoice> {
    let mut choices = Vec::new();
    for agenda in params.deployments.iter().filter(|a| a.vote_version == version) {
        let masked = bits.0 & agenda.mask;
        if let Some((index, choice)) = agenda
            .choices
            .iter()
            .enumerate()
            .find(|(_, c)| c.bits == masked)
        {
            choices.push(VoteChoice {
                agenda_id: agenda.id.clone(),
                choice_index: index as i32,
                choice_id: choice.id.clone(),
            });
        }
    }
    choices
}

/// Build the block-reference script of a vote. Used when synthesizing votes
/// in tests and by the simnet harness.
pub fn vote_commitment_script(candidate: Hash, height: u32) -> Vec<u8> {
    let mut script = Vec::with_capacity(38);
    script.push(opcodes::OP_RETURN);
    script.push(opcodes::OP_DATA_36);
    script.extend_from_slice(candidate.as_bytes());
    script.extend_from_slice(&height.to_le_bytes());
    script
}

/// Build the vote-bits script of a vote. See [`vote_commitment_script`].
pub fn vote_bits_script(bits: VoteBits, version: u32) -> Vec<u8> {
    let mut script = Vec::with_capacity(8);
    script.push(opcodes::OP_RETURN);
    script.push(6);
    script.extend_from_slice(&bits.0.to_le_bytes());
    script.extend_from_slice(&version.to_le_bytes());
    script
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::{TransactionOutput, TxOutpoint};

    fn stakebase_input() -> TransactionInput {
        TransactionInput {
            previous_outpoint: TxOutpoint::new(Hash::ZERO, u32::MAX, TxTree::Regular),
            value_in: 100,
            block_height: 0,
            block_index: 0,
            signature_script: vec![0x00, 0x00],
            sequence: u32::MAX,
        }
    }

    fn ticket_input(ticket: Hash) -> TransactionInput {
        TransactionInput {
            previous_outpoint: TxOutpoint::new(ticket, 0, TxTree::Stake),
            value_in: 10_000,
            block_height: 5,
            block_index: 1,
            signature_script: vec![],
            sequence: u32::MAX,
        }
    }

    fn opcode_output(opcode: u8, value: i64) -> TransactionOutput {
        TransactionOutput {
            value,
            version: 0,
            pk_script: vec![opcode, 0x76, 0xa9],
            script_class: String::new(),
            required_sigs: 1,
            addresses: vec!["VsAddr".into()],
        }
    }

    fn raw_output(script: Vec<u8>) -> TransactionOutput {
        TransactionOutput {
            value: 0,
            version: 0,
            pk_script: script,
            script_class: "nulldata".into(),
            required_sigs: 0,
            addresses: vec![],
        }
    }

    fn make_vote(candidate: Hash, height: u32, bits: u16, ticket: Hash) -> Transaction {
        Transaction {
            hash: Hash::new([7; 32]),
            version: 1,
            lock_time: 0,
            expiry: 0,
            size: 300,
            inputs: vec![stakebase_input(), ticket_input(ticket)],
            outputs: vec![
                raw_output(vote_commitment_script(candidate, height)),
                raw_output(vote_bits_script(VoteBits(bits), 7)),
                opcode_output(opcodes::OP_SSGEN, 10_100),
            ],
        }
    }

    #[test]
    fn classifies_stake_tree() {
        let candidate = Hash::new([9; 32]);
        let ticket_hash = Hash::new([4; 32]);
        let vote = make_vote(candidate, 41, 0x0001, ticket_hash);
        assert_eq!(determine_tx_type(TxTree::Stake, &vote), TxType::Vote);

        let ticket = Transaction {
            outputs: vec![opcode_output(opcodes::OP_SSTX, 10_000)],
            inputs: vec![ticket_input(Hash::new([2; 32]))],
            ..vote.clone()
        };
        assert_eq!(
            determine_tx_type(TxTree::Stake, &ticket),
            TxType::TicketPurchase
        );

        let revocation = Transaction {
            outputs: vec![opcode_output(opcodes::OP_SSRTX, 9_900)],
            ..ticket.clone()
        };
        assert_eq!(
            determine_tx_type(TxTree::Stake, &revocation),
            TxType::Revocation
        );

        assert_eq!(determine_tx_type(TxTree::Regular, &vote), TxType::Regular);
    }

    #[test]
    fn vote_round_trip() {
        let candidate = Hash::new([9; 32]);
        let ticket = Hash::new([4; 32]);
        let vote = make_vote(candidate, 41, 0x0005, ticket);

        let info = parse_vote(&vote).unwrap();
        assert_eq!(info.candidate_hash, candidate);
        assert_eq!(info.candidate_height, 41);
        assert_eq!(info.version, 7);
        assert!(info.bits.approves_parent());
        assert_eq!(ticket_spent_by_vote(&vote), Some(ticket));
    }

    #[test]
    fn disapproval_bit() {
        let vote = make_vote(Hash::new([9; 32]), 41, 0x0004, Hash::new([4; 32]));
        let info = parse_vote(&vote).unwrap();
        assert!(!info.bits.approves_parent());
    }

    #[test]
    fn malformed_vote_rejected() {
        let mut vote = make_vote(Hash::new([9; 32]), 41, 1, Hash::new([4; 32]));
        vote.outputs[0].pk_script.truncate(10);
        assert!(parse_vote(&vote).is_err());
    }

    #[test]
    fn agenda_choice_resolution() {
        let params = ChainParams::mainnet();
        // Mask 0x0006: abstain=0x0000, no=0x0002, yes=0x0004.
        let choices = vote_choices(VoteBits(0x0005), 7, &params);
        assert_eq!(choices.len(), 1);
        assert_eq!(choices[0].choice_id, "yes");
        assert_eq!(choices[0].choice_index, 2);

        let abstain = vote_choices(VoteBits(0x0001), 7, &params);
        assert_eq!(abstain[0].choice_id, "abstain");
        assert_eq!(abstain[0].choice_index, 0);
    }
}
