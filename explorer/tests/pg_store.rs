//! PostgreSQL-backed store tests.
//!
//! These need a disposable database and are ignored by default:
//!
//! ```text
//! VANTA_PG_TEST_URL=postgresql://vanta@localhost/vanta_test \
//!     cargo test -p vanta-explorer -- --ignored
//! ```
//!
//! Each test works in its own hash/address namespace so the suite can run
//! against a shared database without truncation.

mod common;

use common::{block_with, regular_tx_to, spending_tx, ticket_purchase, vote_tx};
use consensus_core::{ChainParams, Hash};
use vanta_explorer::database::store::InsertMode;
use vanta_explorer::database::ChainDb;
use vanta_explorer::models::{AddrTxViewType, TicketPoolStatus, TicketSpendType};

fn pg_url() -> String {
    std::env::var("VANTA_PG_TEST_URL")
        .expect("set VANTA_PG_TEST_URL to run the PostgreSQL store tests")
}

async fn test_db_with(params: ChainParams) -> ChainDb {
    let db = ChainDb::connect(&pg_url(), params)
        .await
        .expect("connect to test database");
    db.create_tables().await.unwrap();
    // Checked inserts need the conflict targets in place.
    db.dedup_and_create_unique_indexes().await.unwrap();
    db
}

async fn test_db() -> ChainDb {
    test_db_with(ChainParams::simnet()).await
}

fn tagged(tag: u8, n: u8) -> Hash {
    let mut bytes = [0u8; 32];
    bytes[0] = n;
    bytes[30] = tag;
    bytes[31] = 0xcc;
    Hash::new(bytes)
}

async fn table_counts_for_block(db: &ChainDb, block_hash: Hash) -> (i64, i64, i64) {
    let b = block_hash.to_string();
    let blocks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM blocks WHERE hash = $1;")
        .bind(&b)
        .fetch_one(db.pool())
        .await
        .unwrap();
    let txs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transactions WHERE block_hash = $1;")
        .bind(&b)
        .fetch_one(db.pool())
        .await
        .unwrap();
    let tickets: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tickets WHERE block_hash = $1;")
        .bind(&b)
        .fetch_one(db.pool())
        .await
        .unwrap();
    (blocks, txs, tickets)
}

#[tokio::test]
#[ignore]
async fn duplicate_insertion_is_a_noop() {
    let db = test_db().await;
    let tag = 0x01;
    let block_hash = tagged(tag, 10);
    let tx = regular_tx_to(tagged(tag, 11), "VsDupAddr", &[100, 200]);
    let block = block_with(block_hash, 1_000, tagged(tag, 9), vec![tx], vec![]);

    let first = db
        .store_block(&block, 0, true, true, InsertMode::CHECKED)
        .await
        .unwrap();
    let counts = table_counts_for_block(&db, block_hash).await;

    let second = db
        .store_block(&block, 0, true, true, InsertMode::CHECKED)
        .await
        .unwrap();
    assert_eq!(counts, table_counts_for_block(&db, block_hash).await);
    // Returned ids equal the originals; nothing was rewritten.
    assert_eq!(first.tx_ids, second.tx_ids);
    assert_eq!(first.vin_ids, second.vin_ids);
    assert_eq!(first.vout_ids, second.vout_ids);
}

#[tokio::test]
#[ignore]
async fn upsert_flips_mainchain_monotonically() {
    let db = test_db().await;
    let tag = 0x02;
    let block_hash = tagged(tag, 10);
    let block = block_with(block_hash, 1_010, tagged(tag, 9), vec![], vec![]);

    db.store_block(&block, 0, true, false, InsertMode::UPSERT)
        .await
        .unwrap();
    let (_, is_mainchain) = db.block_flags(block_hash).await.unwrap();
    assert!(!is_mainchain);

    db.store_block(&block, 0, true, true, InsertMode::UPSERT)
        .await
        .unwrap();
    let (_, is_mainchain) = db.block_flags(block_hash).await.unwrap();
    assert!(is_mainchain, "upsert must leave the row main chain");
}

#[tokio::test]
#[ignore]
async fn utxo_set_and_balance() {
    let db = test_db().await;
    let tag = 0x03;
    let address = "VsUtxoCorrectness";

    // Address receives o1=100, o2=200, o3=300 in one funding tx.
    let funding_hash = tagged(tag, 11);
    let funding = regular_tx_to(funding_hash, address, &[100, 200, 300]);
    let b1_hash = tagged(tag, 10);
    let b1 = block_with(b1_hash, 1_020, tagged(tag, 9), vec![funding], vec![]);
    db.store_block(&b1, 0, true, true, InsertMode::CHECKED)
        .await
        .unwrap();

    // o2 is spent by tx T in the next block.
    let spender_hash = tagged(tag, 12);
    let spender = spending_tx(spender_hash, funding_hash, 1, 200, "VsElsewhere");
    let b2_hash = tagged(tag, 20);
    let b2 = block_with(b2_hash, 1_021, b1_hash, vec![spender], vec![]);
    db.store_block(&b2, 0, true, true, InsertMode::CHECKED)
        .await
        .unwrap();

    let balance = db.address_balance(address).await.unwrap();
    assert_eq!(balance.num_spent, 1);
    assert_eq!(balance.num_unspent, 2);
    assert_eq!(balance.amt_spent, 200);
    assert_eq!(balance.amt_unspent, 400);
    assert_eq!(balance.num_merged_spent, 1);

    let utxos = db.address_utxos(address, 1_021).await.unwrap();
    let mut values: Vec<i64> = utxos.iter().map(|u| u.atoms).collect();
    values.sort();
    assert_eq!(values, vec![100, 300]);
    for utxo in &utxos {
        assert_eq!(utxo.confirmations, 1_021 - utxo.height + 1);
    }

    let history = db
        .address_history(address, 10, 0, AddrTxViewType::All)
        .await
        .unwrap();
    assert_eq!(history.len(), 4, "three funding rows and one spending row");
    assert!(history[0].block_time >= history[history.len() - 1].block_time);
}

#[tokio::test]
#[ignore]
async fn ticket_lifecycle_through_vote() {
    // One ticket per block keeps the vote/miss census satisfied with a
    // single validator.
    let mut params = ChainParams::simnet();
    params.tickets_per_block = 1;
    let db = test_db_with(params).await;
    let tag = 0x04;
    let ticket_hash = tagged(tag, 11);
    let ticket_addr = "VsTicketLifecycle";

    let b1_hash = tagged(tag, 10);
    let b1 = block_with(
        b1_hash,
        1_030,
        tagged(tag, 9),
        vec![],
        vec![ticket_purchase(ticket_hash, 5_000, ticket_addr)],
    );
    db.store_block(&b1, 0, true, true, InsertMode::CHECKED)
        .await
        .unwrap();

    let status = db.ticket_status(ticket_hash).await.unwrap();
    assert_eq!(status.spend_type, TicketSpendType::Unspent);
    assert_eq!(status.pool_status, TicketPoolStatus::Immature);

    // A vote in the next block spends the ticket, approving b1.
    let vote_hash = tagged(tag, 12);
    let b2_hash = tagged(tag, 20);
    let mut b2 = block_with(
        b2_hash,
        1_031,
        b1_hash,
        vec![],
        vec![vote_tx(vote_hash, ticket_hash, b1_hash, 1_030, 0x0001)],
    );
    b2.validators = vec![ticket_hash];
    db.store_block(&b2, 0, true, true, InsertMode::CHECKED)
        .await
        .unwrap();

    let status = db.ticket_status(ticket_hash).await.unwrap();
    assert_eq!(status.spend_type, TicketSpendType::Voted);
    assert_eq!(status.pool_status, TicketPoolStatus::Voted);

    // The vote row names b1 as its candidate.
    let candidate: String =
        sqlx::query_scalar("SELECT candidate_block_hash FROM votes WHERE tx_hash = $1;")
            .bind(vote_hash.to_string())
            .fetch_one(db.pool())
            .await
            .unwrap();
    assert_eq!(candidate, b1_hash.to_string());

    // The ticket's funding address row points at the vote as its spender.
    let matching: Option<String> = sqlx::query_scalar(
        "SELECT matching_tx_hash FROM addresses
         WHERE tx_hash = $1 AND is_funding = TRUE LIMIT 1;",
    )
    .bind(ticket_hash.to_string())
    .fetch_one(db.pool())
    .await
    .unwrap();
    assert_eq!(matching, Some(vote_hash.to_string()));

    // Miss accounting balances: the lone validator voted.
    assert!(db.missed_votes_in_block(b2_hash).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore]
async fn reorg_flip_demotes_and_promotes() {
    let db = test_db().await;
    let tag = 0x05;
    let addr = "VsReorgFlip";

    // Branch A block with a funded address.
    let a_hash = tagged(tag, 10);
    let a_tx = regular_tx_to(tagged(tag, 11), addr, &[500]);
    let a = block_with(a_hash, 1_040, tagged(tag, 9), vec![a_tx], vec![]);
    db.store_block(&a, 0, true, true, InsertMode::CHECKED)
        .await
        .unwrap();

    // Demote the branch: block, transactions, addresses.
    db.set_block_mainchain(a_hash, false).await.unwrap();
    let tx_ids = db.set_transactions_mainchain(a_hash, false).await.unwrap();
    assert!(!tx_ids.is_empty());
    let (vins, vouts) = db.txns_vins_vouts_by_block(a_hash, false).await.unwrap();
    db.set_addresses_mainchain(&vins, &vouts, false).await.unwrap();
    db.set_tickets_mainchain(a_hash, false).await.unwrap();
    db.set_votes_mainchain(a_hash, false).await.unwrap();
    db.set_misses_mainchain(a_hash, false).await.unwrap();

    let (_, is_mainchain) = db.block_flags(a_hash).await.unwrap();
    assert!(!is_mainchain);
    let balance = db.address_balance(addr).await.unwrap();
    assert_eq!(balance.num_unspent, 0, "side-chain rows leave the balance");

    // Competing branch B at the same height becomes the main chain.
    let b_hash = tagged(tag, 20);
    let b_tx = regular_tx_to(tagged(tag, 21), addr, &[700]);
    let b = block_with(b_hash, 1_040, tagged(tag, 9), vec![b_tx], vec![]);
    db.store_block(&b, 0, true, true, InsertMode::UPSERT)
        .await
        .unwrap();

    let balance = db.address_balance(addr).await.unwrap();
    assert_eq!(balance.num_unspent, 1);
    assert_eq!(balance.amt_unspent, 700);

    // At most one main-chain block can occupy the height.
    let mainchain_at_height: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM blocks WHERE height = 1040 AND is_mainchain = TRUE AND hash IN ($1, $2);",
    )
    .bind(a_hash.to_string())
    .bind(b_hash.to_string())
    .fetch_one(db.pool())
    .await
    .unwrap();
    assert_eq!(mainchain_at_height, 1);
}

#[tokio::test]
#[ignore]
async fn disapproval_cascades_to_parent_regular_txs() {
    let db = test_db().await;
    let tag = 0x06;
    let addr = "VsDisapproved";

    let parent_hash = tagged(tag, 10);
    let parent_tx = regular_tx_to(tagged(tag, 11), addr, &[900]);
    let parent = block_with(parent_hash, 1_050, tagged(tag, 9), vec![parent_tx], vec![]);
    db.store_block(&parent, 0, true, true, InsertMode::CHECKED)
        .await
        .unwrap();
    assert_eq!(db.address_balance(addr).await.unwrap().num_unspent, 1);

    // Child disapproves: vote bit 0 clear.
    let child_hash = tagged(tag, 20);
    let mut child = block_with(child_hash, 1_051, parent_hash, vec![], vec![]);
    child.block.header.vote_bits = 0x0000;
    db.store_block(&child, 0, true, true, InsertMode::CHECKED)
        .await
        .unwrap();

    let (is_valid, _) = db.block_flags(parent_hash).await.unwrap();
    assert!(!is_valid, "parent must be invalidated by its child's votes");
    assert_eq!(
        db.address_balance(addr).await.unwrap().num_unspent,
        0,
        "invalidated outputs leave the observable balance"
    );
}
