use thiserror::Error;

#[derive(Error, Debug)]
pub enum StakeDbError {
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("column family not found: {0}")]
    ColumnFamilyNotFound(String),

    #[error("database is closed")]
    DatabaseClosed,

    #[error("block {got} does not extend the pool tip {tip}")]
    NotTipChild { got: String, tip: String },

    #[error("nothing to disconnect: pool is at genesis")]
    AtGenesis,

    #[error("stake database height {stake} exceeds twice the primary best height {primary}; delete the stake database directory to force a rebuild")]
    Divergence { stake: u32, primary: u32 },
}

impl From<bincode::Error> for StakeDbError {
    fn from(err: bincode::Error) -> Self {
        StakeDbError::Serialization(err.to_string())
    }
}

pub type StakeDbResult<T> = Result<T, StakeDbError>;
