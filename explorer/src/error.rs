//! Error types for the explorer.
//!
//! Each kind maps to a distinct handling policy: transient RPC failures are
//! retried with back-off by the sync engine; `DbTimeout` is surfaced to
//! query callers so the presentation layer can answer 503; `NotFound` is an
//! expected sentinel and is never logged as an error; `Integrity` and stake
//! DB divergence are fatal and require operator intervention. The query
//! layer never retries; the caller's context governs.

use thiserror::Error;

use rpc_core::RpcError;
use stakedb::StakeDbError;

use crate::rpc_client::ChainWalkError;

#[derive(Error, Debug)]
pub enum ExplorerError {
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("database error: {0}")]
    Db(sqlx::Error),

    #[error("database query exceeded its deadline")]
    DbTimeout,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("integrity violation: {0}")]
    Integrity(String),

    #[error("chain walk failed: {0}")]
    ChainWalk(#[from] ChainWalkError),

    #[error("stake database error: {0}")]
    StakeDb(#[from] StakeDbError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("operation requires the full relational store (running in lite mode)")]
    LiteMode,

    #[error("operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<sqlx::Error> for ExplorerError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ExplorerError::NotFound("row not found".into()),
            sqlx::Error::PoolTimedOut => ExplorerError::DbTimeout,
            other => ExplorerError::Db(other),
        }
    }
}

impl ExplorerError {
    /// Expected-miss lookups check this instead of matching on the enum at
    /// every call site.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ExplorerError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, ExplorerError>;
