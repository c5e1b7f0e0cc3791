//! Ticket pool lifecycle tests: maturity, vote spending, expiry, and
//! exact rewind through the undo log.

use consensus_core::stake::{self, opcodes, VoteBits};
use consensus_core::{Block, BlockHeader, ChainParams, Hash, Transaction, TransactionInput, TransactionOutput, TxOutpoint, TxTree};
use stakedb::{StakeDatabase, StakeDbError};
use tempfile::TempDir;

fn hash(n: u8) -> Hash {
    Hash::new([n; 32])
}

fn header(height: u32, prev: Hash) -> BlockHeader {
    BlockHeader {
        version: 1,
        prev_block: prev,
        merkle_root: Hash::ZERO,
        stake_root: Hash::ZERO,
        vote_bits: 1,
        final_state: vec![0; 6],
        voters: 0,
        fresh_stake: 0,
        revocations: 0,
        pool_size: 0,
        bits: 0x1d00ffff,
        s_bits: 2_0000_0000,
        height,
        size: 1000,
        timestamp: 1_500_000_000 + height as i64 * 300,
        nonce: height,
        stake_version: 7,
        extra_data: vec![],
    }
}

fn block(height: u32, prev: Hash, stake_txs: Vec<Transaction>) -> Block {
    let mut hash_bytes = [0u8; 32];
    hash_bytes[0..4].copy_from_slice(&height.to_le_bytes());
    hash_bytes[31] = 0xb1;
    Block {
        hash: Hash::new(hash_bytes),
        header: header(height, prev),
        transactions: vec![],
        stake_transactions: stake_txs,
    }
}

fn ticket_purchase(seed: u8, price: i64) -> Transaction {
    Transaction {
        hash: hash(seed),
        version: 1,
        lock_time: 0,
        expiry: 0,
        size: 300,
        inputs: vec![TransactionInput {
            previous_outpoint: TxOutpoint::new(hash(seed.wrapping_add(100)), 0, TxTree::Regular),
            value_in: price + 100,
            block_height: 0,
            block_index: 0,
            signature_script: vec![],
            sequence: u32::MAX,
        }],
        outputs: vec![TransactionOutput {
            value: price,
            version: 0,
            pk_script: vec![opcodes::OP_SSTX, 0x76, 0xa9],
            script_class: "stakesubmission".into(),
            required_sigs: 1,
            addresses: vec![format!("VsTicket{seed}")],
        }],
    }
}

fn vote(seed: u8, ticket: Hash, candidate: Hash, candidate_height: u32) -> Transaction {
    Transaction {
        hash: hash(seed),
        version: 1,
        lock_time: 0,
        expiry: 0,
        size: 300,
        inputs: vec![
            TransactionInput {
                previous_outpoint: TxOutpoint::new(Hash::ZERO, u32::MAX, TxTree::Regular),
                value_in: 50,
                block_height: 0,
                block_index: 0,
                signature_script: vec![0x00, 0x00],
                sequence: u32::MAX,
            },
            TransactionInput {
                previous_outpoint: TxOutpoint::new(ticket, 0, TxTree::Stake),
                value_in: 0,
                block_height: 0,
                block_index: 0,
                signature_script: vec![],
                sequence: u32::MAX,
            },
        ],
        outputs: vec![
            TransactionOutput {
                value: 0,
                version: 0,
                pk_script: stake::vote_commitment_script(candidate, candidate_height),
                script_class: "nulldata".into(),
                required_sigs: 0,
                addresses: vec![],
            },
            TransactionOutput {
                value: 0,
                version: 0,
                pk_script: stake::vote_bits_script(VoteBits(1), 7),
                script_class: "nulldata".into(),
                required_sigs: 0,
                addresses: vec![],
            },
        ],
    }
}

/// Simnet with a tiny maturity window so tests stay short.
fn test_params() -> ChainParams {
    ChainParams::simnet()
}

#[test]
fn connect_tracks_maturity_and_counts() {
    let tmp = TempDir::new().unwrap();
    let sdb = StakeDatabase::open(tmp.path(), test_params()).unwrap();
    assert_eq!(sdb.height(), -1);

    let params = test_params();
    let mut prev = Hash::ZERO;

    // Genesis, then a ticket purchase at height 1.
    let b0 = block(0, prev, vec![]);
    sdb.connect_block(&b0).unwrap();
    prev = b0.hash;

    let b1 = block(1, prev, vec![ticket_purchase(1, 500)]);
    let info1 = sdb.connect_block(&b1).unwrap();
    prev = b1.hash;
    assert_eq!(info1.size, 0, "ticket is immature immediately after purchase");

    // Connect empty blocks until the ticket matures.
    let mature_at = params.maturity_height(1);
    let mut info = info1;
    for h in 2..=mature_at {
        let b = block(h, prev, vec![]);
        info = sdb.connect_block(&b).unwrap();
        prev = b.hash;
    }
    assert_eq!(info.size, 1);
    assert_eq!(info.value, 500);
    assert_eq!(info.winners, vec![hash(1)]);
    assert_eq!(sdb.height(), mature_at as i64);
}

#[test]
fn vote_removes_ticket_and_disconnect_restores_it() {
    let tmp = TempDir::new().unwrap();
    let sdb = StakeDatabase::open(tmp.path(), test_params()).unwrap();
    let params = test_params();

    let mut prev = Hash::ZERO;
    let b0 = block(0, prev, vec![]);
    sdb.connect_block(&b0).unwrap();
    prev = b0.hash;

    let b1 = block(1, prev, vec![ticket_purchase(1, 500)]);
    sdb.connect_block(&b1).unwrap();
    prev = b1.hash;

    let mature_at = params.maturity_height(1);
    for h in 2..=mature_at {
        let b = block(h, prev, vec![]);
        sdb.connect_block(&b).unwrap();
        prev = b.hash;
    }

    let vote_height = mature_at + 1;
    let bv = block(vote_height, prev, vec![vote(9, hash(1), prev, mature_at)]);
    let info = sdb.connect_block(&bv).unwrap();
    assert_eq!(info.size, 0, "voted ticket leaves the live pool");

    let new_height = sdb.disconnect_block().unwrap();
    assert_eq!(new_height, mature_at as i64);
    let restored = sdb.pool_info_best().unwrap().unwrap();
    assert_eq!(restored.size, 1);
    assert_eq!(restored.value, 500);
}

#[test]
fn expiry_sweeps_unvoted_tickets() {
    let tmp = TempDir::new().unwrap();
    // Push the validation height out of the way so the ticket reaches its
    // expiry height without being swept earlier as a miss.
    let mut params = test_params();
    params.stake_validation_height = 100_000;
    let sdb = StakeDatabase::open(tmp.path(), params.clone()).unwrap();

    let mut prev = Hash::ZERO;
    let b0 = block(0, prev, vec![]);
    sdb.connect_block(&b0).unwrap();
    prev = b0.hash;

    let b1 = block(1, prev, vec![ticket_purchase(1, 500)]);
    sdb.connect_block(&b1).unwrap();
    prev = b1.hash;

    let expiry_at = params.expiry_height(1);
    let mut last = None;
    for h in 2..=expiry_at {
        let b = block(h, prev, vec![]);
        last = Some(sdb.connect_block(&b).unwrap());
        prev = b.hash;
    }
    let info = last.unwrap();
    assert_eq!(info.size, 0, "expired ticket left the pool");
    assert_eq!(info.value, 0);
}

#[test]
fn rejects_non_tip_child() {
    let tmp = TempDir::new().unwrap();
    let sdb = StakeDatabase::open(tmp.path(), test_params()).unwrap();
    let b0 = block(0, Hash::ZERO, vec![]);
    sdb.connect_block(&b0).unwrap();

    // Wrong parent hash.
    let orphan = block(1, hash(77), vec![]);
    assert!(matches!(
        sdb.connect_block(&orphan),
        Err(StakeDbError::NotTipChild { .. })
    ));

    // Wrong height.
    let skip = block(5, b0.hash, vec![]);
    assert!(matches!(
        sdb.connect_block(&skip),
        Err(StakeDbError::NotTipChild { .. })
    ));
}

#[test]
fn divergence_detection() {
    let tmp = TempDir::new().unwrap();
    let sdb = StakeDatabase::open(tmp.path(), test_params()).unwrap();
    let mut prev = Hash::ZERO;
    for h in 0..=10 {
        let b = block(h, prev, vec![]);
        sdb.connect_block(&b).unwrap();
        prev = b.hash;
    }
    assert!(sdb.check_divergence(5).is_ok());
    assert!(matches!(
        sdb.check_divergence(4),
        Err(StakeDbError::Divergence { stake: 10, primary: 4 })
    ));
}

#[test]
fn state_survives_reopen() {
    let tmp = TempDir::new().unwrap();
    let mut prev = Hash::ZERO;
    {
        let sdb = StakeDatabase::open(tmp.path(), test_params()).unwrap();
        for h in 0..3 {
            let b = block(h, prev, vec![]);
            sdb.connect_block(&b).unwrap();
            prev = b.hash;
        }
    }
    let sdb = StakeDatabase::open(tmp.path(), test_params()).unwrap();
    assert_eq!(sdb.height(), 2);
    assert_eq!(sdb.tip_hash(), prev);
}

#[test]
fn disconnect_at_genesis_fails() {
    let tmp = TempDir::new().unwrap();
    let sdb = StakeDatabase::open(tmp.path(), test_params()).unwrap();
    assert!(matches!(sdb.disconnect_block(), Err(StakeDbError::AtGenesis)));
}
