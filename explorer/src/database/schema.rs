//! Table definitions and statement builders for the relational mirror.
//!
//! Insert statements come in three shapes selected by a
//! `(checked, update_on_conflict)` pair:
//!
//! | checked | update | behavior |
//! |---------|--------|----------|
//! | false   | —      | plain insert; only safe before the unique indexes exist |
//! | true    | false  | insert-or-nothing that still returns the row id, new or existing |
//! | true    | true   | upsert updating the mutable columns |
//!
//! The insert-or-nothing shape is a single round trip: the `INSERT … ON
//! CONFLICT DO NOTHING RETURNING id` runs in a CTE whose output is unioned
//! with a `SELECT` on the same unique key, so the caller always receives an
//! id without paying for an upsert. The conflicting row is not locked.

/// Unique index names, paired with their creation statements in
/// [`UNIQUE_INDEXES`]. Bulk load defers creation until after dedup.
pub const INDEX_BLOCKS: &str = "uix_block_hash";
pub const INDEX_TRANSACTIONS: &str = "uix_tx_hashes";
pub const INDEX_VINS: &str = "uix_vin";
pub const INDEX_VOUTS: &str = "uix_vout_txhash_ind";
pub const INDEX_ADDRESSES: &str = "uix_addresses_vinvout";
pub const INDEX_TICKETS: &str = "uix_ticket_hashes_index";
pub const INDEX_VOTES: &str = "uix_votes_hashes_index";
pub const INDEX_MISSES: &str = "uix_misses_hashes_index";
pub const INDEX_AGENDAS: &str = "uix_agendas";

pub const CREATE_BLOCKS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS blocks (
    id SERIAL8 PRIMARY KEY,
    hash TEXT NOT NULL,
    height INT8,
    size INT4,
    is_valid BOOLEAN,
    is_mainchain BOOLEAN,
    version INT4,
    merkle_root TEXT,
    stake_root TEXT,
    numtx INT4,
    num_rtx INT4,
    num_stx INT4,
    time INT8,
    nonce INT8,
    vote_bits INT2,
    voters INT2,
    fresh_stake INT2,
    revocations INT2,
    pool_size INT4,
    pool_value INT8,
    bits INT8,
    sbits INT8,
    difficulty FLOAT8,
    stake_version INT8,
    previous_hash TEXT,
    chainwork TEXT
);
CREATE INDEX IF NOT EXISTS idx_blocks_height ON blocks(height);
CREATE INDEX IF NOT EXISTS idx_blocks_time ON blocks(time);
"#;

pub const CREATE_BLOCK_CHAIN_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS block_chain (
    block_db_id INT8 PRIMARY KEY,
    prev_hash TEXT NOT NULL,
    this_hash TEXT UNIQUE NOT NULL,
    next_hash TEXT
);
"#;

pub const CREATE_TRANSACTIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS transactions (
    id SERIAL8 PRIMARY KEY,
    block_hash TEXT,
    block_height INT8,
    block_time INT8,
    time INT8,
    tx_type INT2,
    version INT4,
    tree INT2,
    tx_hash TEXT,
    block_index INT4,
    lock_time INT8,
    expiry INT8,
    size INT4,
    spent INT8,
    sent INT8,
    fees INT8,
    num_vin INT4,
    vin_db_ids INT8[],
    num_vout INT4,
    vout_db_ids INT8[],
    is_valid BOOLEAN,
    is_mainchain BOOLEAN
);
CREATE INDEX IF NOT EXISTS idx_transactions_block_hash ON transactions(block_hash);
CREATE INDEX IF NOT EXISTS idx_transactions_block_height ON transactions(block_height);
"#;

pub const CREATE_VINS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS vins (
    id SERIAL8 PRIMARY KEY,
    tx_hash TEXT,
    tx_index INT4,
    tx_tree INT2,
    prev_out_hash TEXT,
    prev_out_index INT8,
    prev_out_tree INT2,
    value_in INT8,
    is_valid BOOLEAN,
    is_mainchain BOOLEAN,
    block_time INT8,
    tx_type INT2
);
CREATE INDEX IF NOT EXISTS idx_vins_prev_out ON vins(prev_out_hash, prev_out_index);
"#;

pub const CREATE_VOUTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS vouts (
    id SERIAL8 PRIMARY KEY,
    tx_hash TEXT,
    tx_index INT4,
    tx_tree INT2,
    value INT8,
    version INT2,
    pkscript BYTEA,
    script_req_sigs INT4,
    script_type TEXT,
    script_addresses TEXT[]
);
"#;

pub const CREATE_ADDRESSES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS addresses (
    id SERIAL8 PRIMARY KEY,
    address TEXT,
    matching_tx_hash TEXT,
    tx_hash TEXT,
    tx_vin_vout_index INT4,
    vin_vout_db_id INT8,
    value INT8,
    block_time INT8,
    is_funding BOOLEAN,
    valid_mainchain BOOLEAN,
    tx_type INT2
);
CREATE INDEX IF NOT EXISTS idx_addresses_address ON addresses(address);
CREATE INDEX IF NOT EXISTS idx_addresses_block_time ON addresses(block_time);
CREATE INDEX IF NOT EXISTS idx_addresses_matching_tx ON addresses(matching_tx_hash);
"#;

pub const CREATE_TICKETS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS tickets (
    id SERIAL8 PRIMARY KEY,
    tx_hash TEXT,
    block_hash TEXT,
    block_height INT8,
    purchase_tx_db_id INT8,
    stakesubmission_address TEXT,
    is_multisig BOOLEAN,
    is_split BOOLEAN,
    num_inputs INT2,
    price INT8,
    fee INT8,
    spend_type INT2,
    pool_status INT2,
    is_mainchain BOOLEAN
);
CREATE INDEX IF NOT EXISTS idx_tickets_address ON tickets(stakesubmission_address);
CREATE INDEX IF NOT EXISTS idx_tickets_pool_status ON tickets(pool_status);
"#;

pub const CREATE_VOTES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS votes (
    id SERIAL8 PRIMARY KEY,
    height INT8,
    tx_hash TEXT,
    block_hash TEXT,
    candidate_block_hash TEXT,
    version INT8,
    vote_bits INT2,
    block_valid BOOLEAN,
    ticket_hash TEXT,
    ticket_tx_db_id INT8,
    stakesubmission_amount INT8,
    vote_reward INT8,
    is_mainchain BOOLEAN
);
CREATE INDEX IF NOT EXISTS idx_votes_block_hash ON votes(block_hash);
CREATE INDEX IF NOT EXISTS idx_votes_candidate ON votes(candidate_block_hash);
"#;

pub const CREATE_MISSES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS misses (
    id SERIAL8 PRIMARY KEY,
    height INT8,
    block_hash TEXT,
    candidate_block_hash TEXT,
    ticket_hash TEXT,
    is_mainchain BOOLEAN
);
"#;

pub const CREATE_AGENDAS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS agendas (
    id SERIAL8 PRIMARY KEY,
    agenda_id TEXT,
    choice_index INT4,
    tx_hash TEXT,
    block_height INT8,
    block_time INT8,
    locked_in BOOLEAN,
    activated BOOLEAN,
    hard_forked BOOLEAN
);
CREATE INDEX IF NOT EXISTS idx_agendas_id ON agendas(agenda_id);
"#;

pub const CREATE_TABLES: [&str; 10] = [
    CREATE_BLOCKS_TABLE,
    CREATE_BLOCK_CHAIN_TABLE,
    CREATE_TRANSACTIONS_TABLE,
    CREATE_VINS_TABLE,
    CREATE_VOUTS_TABLE,
    CREATE_ADDRESSES_TABLE,
    CREATE_TICKETS_TABLE,
    CREATE_VOTES_TABLE,
    CREATE_MISSES_TABLE,
    CREATE_AGENDAS_TABLE,
];

/// (index name, creation statement) for every deferred unique index.
pub const UNIQUE_INDEXES: [(&str, &str); 9] = [
    (INDEX_BLOCKS, "CREATE UNIQUE INDEX uix_block_hash ON blocks(hash);"),
    (INDEX_TRANSACTIONS, "CREATE UNIQUE INDEX uix_tx_hashes ON transactions(tx_hash, block_hash);"),
    (INDEX_VINS, "CREATE UNIQUE INDEX uix_vin ON vins(tx_hash, tx_index, tx_tree);"),
    (INDEX_VOUTS, "CREATE UNIQUE INDEX uix_vout_txhash_ind ON vouts(tx_hash, tx_index, tx_tree);"),
    (INDEX_ADDRESSES, "CREATE UNIQUE INDEX uix_addresses_vinvout ON addresses(vin_vout_db_id, address, is_funding);"),
    (INDEX_TICKETS, "CREATE UNIQUE INDEX uix_ticket_hashes_index ON tickets(tx_hash, block_hash);"),
    (INDEX_VOTES, "CREATE UNIQUE INDEX uix_votes_hashes_index ON votes(tx_hash, block_hash);"),
    (INDEX_MISSES, "CREATE UNIQUE INDEX uix_misses_hashes_index ON misses(ticket_hash, block_hash);"),
    (INDEX_AGENDAS, "CREATE UNIQUE INDEX uix_agendas ON agendas(agenda_id, tx_hash);"),
];

pub const INDEX_EXISTS: &str =
    "SELECT EXISTS (SELECT 1 FROM pg_indexes WHERE indexname = $1 AND schemaname = 'public');";

// --- pre-index duplicate scrubbing; keeps the lowest surrogate id ---

macro_rules! delete_duplicates {
    ($table:literal, $cols:literal) => {
        concat!(
            "DELETE FROM ",
            $table,
            " WHERE id IN (SELECT id FROM (SELECT id, ROW_NUMBER() OVER (PARTITION BY ",
            $cols,
            " ORDER BY id) AS rnum FROM ",
            $table,
            ") t WHERE t.rnum > 1);"
        )
    };
}

pub const DELETE_BLOCKS_DUPLICATE_ROWS: &str = delete_duplicates!("blocks", "hash");
pub const DELETE_TX_DUPLICATE_ROWS: &str = delete_duplicates!("transactions", "tx_hash, block_hash");
pub const DELETE_VINS_DUPLICATE_ROWS: &str = delete_duplicates!("vins", "tx_hash, tx_index, tx_tree");
pub const DELETE_VOUT_DUPLICATE_ROWS: &str = delete_duplicates!("vouts", "tx_hash, tx_index, tx_tree");
pub const DELETE_ADDRESSES_DUPLICATE_ROWS: &str =
    delete_duplicates!("addresses", "vin_vout_db_id, address, is_funding");
pub const DELETE_TICKETS_DUPLICATE_ROWS: &str = delete_duplicates!("tickets", "tx_hash, block_hash");
pub const DELETE_VOTES_DUPLICATE_ROWS: &str = delete_duplicates!("votes", "tx_hash, block_hash");
pub const DELETE_MISSES_DUPLICATE_ROWS: &str = delete_duplicates!("misses", "ticket_hash, block_hash");
pub const DELETE_AGENDAS_DUPLICATE_ROWS: &str = delete_duplicates!("agendas", "agenda_id, tx_hash");

// --- insert statement builders ---

const INSERT_BLOCK_ROW: &str = "INSERT INTO blocks (
    hash, height, size, is_valid, is_mainchain, version, merkle_root, stake_root,
    numtx, num_rtx, num_stx, time, nonce, vote_bits, voters, fresh_stake,
    revocations, pool_size, pool_value, bits, sbits, difficulty, stake_version,
    previous_hash, chainwork)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
    $17, $18, $19, $20, $21, $22, $23, $24, $25) ";

const INSERT_TX_ROW: &str = "INSERT INTO transactions (
    block_hash, block_height, block_time, time, tx_type, version, tree, tx_hash,
    block_index, lock_time, expiry, size, spent, sent, fees,
    num_vin, vin_db_ids, num_vout, vout_db_ids, is_valid, is_mainchain)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
    $16, $17, $18, $19, $20, $21) ";

const INSERT_VIN_ROW: &str = "INSERT INTO vins (
    tx_hash, tx_index, tx_tree, prev_out_hash, prev_out_index, prev_out_tree,
    value_in, is_valid, is_mainchain, block_time, tx_type)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) ";

const INSERT_VOUT_ROW: &str = "INSERT INTO vouts (
    tx_hash, tx_index, tx_tree, value, version, pkscript, script_req_sigs,
    script_type, script_addresses)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) ";

const INSERT_ADDRESS_ROW: &str = "INSERT INTO addresses (
    address, matching_tx_hash, tx_hash, tx_vin_vout_index, vin_vout_db_id,
    value, block_time, is_funding, valid_mainchain, tx_type)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) ";

const INSERT_TICKET_ROW: &str = "INSERT INTO tickets (
    tx_hash, block_hash, block_height, purchase_tx_db_id, stakesubmission_address,
    is_multisig, is_split, num_inputs, price, fee, spend_type, pool_status,
    is_mainchain)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) ";

const INSERT_VOTE_ROW: &str = "INSERT INTO votes (
    height, tx_hash, block_hash, candidate_block_hash, version, vote_bits,
    block_valid, ticket_hash, ticket_tx_db_id, stakesubmission_amount,
    vote_reward, is_mainchain)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) ";

const INSERT_MISS_ROW: &str = "INSERT INTO misses (
    height, block_hash, candidate_block_hash, ticket_hash, is_mainchain)
VALUES ($1, $2, $3, $4, $5) ";

const INSERT_AGENDA_ROW: &str = "INSERT INTO agendas (
    agenda_id, choice_index, tx_hash, block_height, block_time, locked_in,
    activated, hard_forked)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8) ";

fn build_insert(
    base: &str,
    table: &str,
    conflict_cols: &str,
    update_set: &str,
    key_predicate: &str,
    checked: bool,
    update_on_conflict: bool,
) -> String {
    if !checked {
        return format!("{base}RETURNING id;");
    }
    if update_on_conflict {
        return format!("{base}ON CONFLICT ({conflict_cols}) DO UPDATE SET {update_set} RETURNING id;");
    }
    format!(
        "WITH ins AS ({base}ON CONFLICT ({conflict_cols}) DO NOTHING RETURNING id) \
         SELECT id FROM ins UNION ALL SELECT id FROM {table} WHERE {key_predicate} LIMIT 1;"
    )
}

pub fn make_block_insert_statement(checked: bool, update_on_conflict: bool) -> String {
    build_insert(
        INSERT_BLOCK_ROW,
        "blocks",
        "hash",
        "is_valid = $4, is_mainchain = $5",
        "hash = $1",
        checked,
        update_on_conflict,
    )
}

pub fn make_tx_insert_statement(checked: bool, update_on_conflict: bool) -> String {
    build_insert(
        INSERT_TX_ROW,
        "transactions",
        "tx_hash, block_hash",
        "is_valid = $20, is_mainchain = $21",
        "tx_hash = $8 AND block_hash = $1",
        checked,
        update_on_conflict,
    )
}

pub fn make_vin_insert_statement(checked: bool, update_on_conflict: bool) -> String {
    build_insert(
        INSERT_VIN_ROW,
        "vins",
        "tx_hash, tx_index, tx_tree",
        "is_valid = $8, is_mainchain = $9",
        "tx_hash = $1 AND tx_index = $2 AND tx_tree = $3",
        checked,
        update_on_conflict,
    )
}

pub fn make_vout_insert_statement(checked: bool, update_on_conflict: bool) -> String {
    build_insert(
        INSERT_VOUT_ROW,
        "vouts",
        "tx_hash, tx_index, tx_tree",
        "version = $5",
        "tx_hash = $1 AND tx_index = $2 AND tx_tree = $3",
        checked,
        update_on_conflict,
    )
}

pub fn make_address_row_insert_statement(checked: bool, update_on_conflict: bool) -> String {
    build_insert(
        INSERT_ADDRESS_ROW,
        "addresses",
        "vin_vout_db_id, address, is_funding",
        "matching_tx_hash = $2, valid_mainchain = $9",
        "vin_vout_db_id = $5 AND address = $1 AND is_funding = $8",
        checked,
        update_on_conflict,
    )
}

pub fn make_ticket_insert_statement(checked: bool, update_on_conflict: bool) -> String {
    build_insert(
        INSERT_TICKET_ROW,
        "tickets",
        "tx_hash, block_hash",
        "spend_type = $11, pool_status = $12, is_mainchain = $13",
        "tx_hash = $1 AND block_hash = $2",
        checked,
        update_on_conflict,
    )
}

pub fn make_vote_insert_statement(checked: bool, update_on_conflict: bool) -> String {
    build_insert(
        INSERT_VOTE_ROW,
        "votes",
        "tx_hash, block_hash",
        "is_mainchain = $12",
        "tx_hash = $2 AND block_hash = $3",
        checked,
        update_on_conflict,
    )
}

pub fn make_miss_insert_statement(checked: bool, update_on_conflict: bool) -> String {
    build_insert(
        INSERT_MISS_ROW,
        "misses",
        "ticket_hash, block_hash",
        "is_mainchain = $5",
        "ticket_hash = $4 AND block_hash = $2",
        checked,
        update_on_conflict,
    )
}

pub fn make_agenda_insert_statement(checked: bool) -> String {
    build_insert(
        INSERT_AGENDA_ROW,
        "agendas",
        "agenda_id, tx_hash",
        "block_height = $4",
        "agenda_id = $1 AND tx_hash = $3",
        checked,
        false,
    )
}

pub const INSERT_BLOCK_CHAIN_ROW: &str = "INSERT INTO block_chain (
    block_db_id, prev_hash, this_hash, next_hash)
VALUES ($1, $2, $3, $4) ON CONFLICT (this_hash) DO NOTHING;";

// --- update statements used at tip connection and during reorgs ---

pub const UPDATE_BLOCK_MAINCHAIN: &str =
    "UPDATE blocks SET is_mainchain = $2 WHERE hash = $1 RETURNING previous_hash;";

pub const UPDATE_BLOCK_VALID: &str = "UPDATE blocks SET is_valid = $2 WHERE hash = $1;";

pub const UPDATE_BLOCK_NEXT_BY_HASH: &str =
    "UPDATE block_chain SET next_hash = $2 WHERE this_hash = $1;";

pub const UPDATE_TXNS_MAINCHAIN_BY_BLOCK: &str =
    "UPDATE transactions SET is_mainchain = $1 WHERE block_hash = $2 RETURNING id;";

pub const UPDATE_REGULAR_TXNS_VALID_BY_BLOCK: &str =
    "UPDATE transactions SET is_valid = $1 WHERE block_hash = $2 AND tree = 0 RETURNING id;";

pub const UPDATE_VOTES_MAINCHAIN_BY_BLOCK: &str =
    "UPDATE votes SET is_mainchain = $1 WHERE block_hash = $2;";

pub const UPDATE_TICKETS_MAINCHAIN_BY_BLOCK: &str =
    "UPDATE tickets SET is_mainchain = $1 WHERE block_hash = $2;";

pub const UPDATE_MISSES_MAINCHAIN_BY_BLOCK: &str =
    "UPDATE misses SET is_mainchain = $1 WHERE block_hash = $2;";

pub const SET_ADDRESS_MAINCHAIN_FOR_VIN_IDS: &str =
    "UPDATE addresses SET valid_mainchain = $1 WHERE vin_vout_db_id = $2 AND is_funding = FALSE;";

pub const SET_ADDRESS_MAINCHAIN_FOR_VOUT_IDS: &str =
    "UPDATE addresses SET valid_mainchain = $1 WHERE vin_vout_db_id = $2 AND is_funding = TRUE;";

pub const SET_ADDRESS_MATCHING_TX_HASH_FOR_OUTPOINT: &str = "UPDATE addresses
    SET matching_tx_hash = $1
    WHERE is_funding = TRUE AND tx_hash = $2 AND tx_vin_vout_index = $3;";

pub const SET_TICKET_SPENDING_BY_HASH: &str =
    "UPDATE tickets SET spend_type = $1, pool_status = $2 WHERE tx_hash = $3;";

pub const SET_TICKET_POOL_STATUS_BY_HASH: &str =
    "UPDATE tickets SET pool_status = $1 WHERE tx_hash = $2;";

/// Immature -> Live at `purchase_height + ticket_maturity`. Bound $1 to the
/// purchase height maturing at the connecting block.
pub const MATURE_TICKETS_AT_HEIGHT: &str = "UPDATE tickets
    SET pool_status = 0
    WHERE pool_status = 4 AND block_height = $1 AND is_mainchain = TRUE;";

/// Live -> Expired for still-unvoted tickets whose expiry window ended at
/// the connecting block. Bound $1 to the expiring purchase height.
pub const EXPIRE_TICKETS_AT_HEIGHT: &str = "UPDATE tickets
    SET pool_status = 2
    WHERE pool_status = 0 AND spend_type = 0 AND block_height = $1 AND is_mainchain = TRUE;";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unchecked_insert_is_plain() {
        let stmt = make_tx_insert_statement(false, false);
        assert!(stmt.ends_with("RETURNING id;"));
        assert!(!stmt.contains("ON CONFLICT"));
    }

    #[test]
    fn checked_no_update_unions_the_key_select() {
        let stmt = make_tx_insert_statement(true, false);
        assert!(stmt.starts_with("WITH ins AS ("));
        assert!(stmt.contains("ON CONFLICT (tx_hash, block_hash) DO NOTHING"));
        assert!(stmt.contains("UNION ALL SELECT id FROM transactions"));
        assert!(stmt.contains("tx_hash = $8 AND block_hash = $1"));
        assert!(stmt.trim_end().ends_with("LIMIT 1;"));
    }

    #[test]
    fn upsert_touches_only_mutable_columns() {
        let stmt = make_tx_insert_statement(true, true);
        assert!(stmt.contains("DO UPDATE SET is_valid = $20, is_mainchain = $21"));
        assert!(stmt.ends_with("RETURNING id;"));

        let addr = make_address_row_insert_statement(true, true);
        assert!(addr.contains("matching_tx_hash = $2, valid_mainchain = $9"));

        let ticket = make_ticket_insert_statement(true, true);
        assert!(ticket.contains("spend_type = $11, pool_status = $12, is_mainchain = $13"));
    }

    #[test]
    fn dedup_keeps_lowest_id() {
        assert!(DELETE_TX_DUPLICATE_ROWS.contains("PARTITION BY tx_hash, block_hash ORDER BY id"));
        assert!(DELETE_TX_DUPLICATE_ROWS.contains("rnum > 1"));
    }

    #[test]
    fn every_unique_index_has_a_name_match() {
        for (name, stmt) in UNIQUE_INDEXES {
            assert!(stmt.contains(name), "index statement does not create {name}");
            assert!(stmt.starts_with("CREATE UNIQUE INDEX"));
        }
    }
}
