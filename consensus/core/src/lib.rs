//! Chain primitives shared by every Vanta component: hashes, headers,
//! blocks, transactions, stake transaction classification, and per-network
//! consensus parameters.

pub mod block;
pub mod errors;
pub mod header;
pub mod params;
pub mod stake;
pub mod tx;

mod hash;

pub use block::Block;
pub use errors::ChainError;
pub use hash::Hash;
pub use header::BlockHeader;
pub use params::ChainParams;
pub use tx::{Transaction, TransactionInput, TransactionOutput, TxOutpoint, TxTree};

/// Number of atomic units in one coin.
pub const ATOMS_PER_COIN: i64 = 100_000_000;

/// Integer count of atomic units (1e-8 coin). Coin-valued fields are carried
/// in atoms end to end; floating point never touches amounts.
pub type Atoms = i64;
