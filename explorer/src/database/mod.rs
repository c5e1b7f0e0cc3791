//! The primary store: a PostgreSQL mirror of the chain, with the six-table
//! normalized model, deferred unique indexes, and the per-block atomic
//! insertion protocol.

pub mod queries;
pub mod schema;
pub mod store;

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{debug, info};

use consensus_core::{ChainParams, Hash};

use crate::error::Result;

/// Hot-path cache mapping ticket purchase tx hashes to their transactions
/// row ids, so vote insertion does not pay a lookup per vote.
#[derive(Default)]
pub struct TicketTxnIdCache {
    map: Mutex<HashMap<Hash, i64>>,
}

impl TicketTxnIdCache {
    pub fn get(&self, hash: &Hash) -> Option<i64> {
        self.map.lock().get(hash).copied()
    }

    pub fn insert(&self, hash: Hash, id: i64) {
        self.map.lock().insert(hash, id);
    }

    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.lock().is_empty()
    }
}

/// Handle to the relational mirror. Cloning is cheap; the pool is shared.
///
/// `write_guard` is the single-writer lock of the concurrency model: the
/// sync engine holds it for each block's transaction and the reorg
/// coordinator holds it across a whole reorg. Readers never take it;
/// row-level snapshot isolation keeps reads serviceable throughout.
#[derive(Clone)]
pub struct ChainDb {
    pool: PgPool,
    pub params: ChainParams,
    pub ticket_cache: std::sync::Arc<TicketTxnIdCache>,
    write_guard: std::sync::Arc<tokio::sync::Mutex<()>>,
}

impl ChainDb {
    pub async fn connect(pg_url: &str, params: ChainParams) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .acquire_timeout(Duration::from_secs(30))
            .connect(pg_url)
            .await?;
        Ok(Self {
            pool,
            params,
            ticket_cache: std::sync::Arc::new(TicketTxnIdCache::default()),
            write_guard: std::sync::Arc::new(tokio::sync::Mutex::new(())),
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Acquire the store write guard.
    pub async fn lock_writes(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.write_guard.lock().await
    }

    /// Create all tables and their non-unique indexes. Idempotent.
    pub async fn create_tables(&self) -> Result<()> {
        for ddl in schema::CREATE_TABLES {
            sqlx::raw_sql(ddl).execute(&self.pool).await?;
        }
        info!("relational schema ready");
        Ok(())
    }

    pub async fn index_exists(&self, name: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(schema::INDEX_EXISTS)
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    /// Whether the full set of unique indexes is in place, i.e. whether
    /// writes must use checked inserts.
    pub async fn unique_indexes_exist(&self) -> Result<bool> {
        for (name, _) in schema::UNIQUE_INDEXES {
            if !self.index_exists(name).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Scrub duplicate rows left by unchecked bulk load, keeping the lowest
    /// surrogate id of each unique-key group, then create the unique
    /// indexes. Must run exactly once, after historical backfill completes.
    pub async fn dedup_and_create_unique_indexes(&self) -> Result<()> {
        let dedups: [(&str, &str); 9] = [
            ("blocks", schema::DELETE_BLOCKS_DUPLICATE_ROWS),
            ("transactions", schema::DELETE_TX_DUPLICATE_ROWS),
            ("vins", schema::DELETE_VINS_DUPLICATE_ROWS),
            ("vouts", schema::DELETE_VOUT_DUPLICATE_ROWS),
            ("addresses", schema::DELETE_ADDRESSES_DUPLICATE_ROWS),
            ("tickets", schema::DELETE_TICKETS_DUPLICATE_ROWS),
            ("votes", schema::DELETE_VOTES_DUPLICATE_ROWS),
            ("misses", schema::DELETE_MISSES_DUPLICATE_ROWS),
            ("agendas", schema::DELETE_AGENDAS_DUPLICATE_ROWS),
        ];
        for (table, stmt) in dedups {
            let res = sqlx::query(stmt).execute(&self.pool).await?;
            if res.rows_affected() > 0 {
                info!("deleted {} duplicate {table} rows", res.rows_affected());
            }
        }
        for (name, stmt) in schema::UNIQUE_INDEXES {
            if self.index_exists(name).await? {
                debug!("unique index {name} already exists");
                continue;
            }
            sqlx::query(stmt).execute(&self.pool).await?;
            info!("created unique index {name}");
        }
        Ok(())
    }

    /// Drop the unique indexes ahead of a fresh bulk load.
    pub async fn drop_unique_indexes(&self) -> Result<()> {
        for (name, _) in schema::UNIQUE_INDEXES {
            if self.index_exists(name).await? {
                sqlx::query(&format!("DROP INDEX {name};"))
                    .execute(&self.pool)
                    .await?;
                info!("dropped unique index {name}");
            }
        }
        Ok(())
    }
}
