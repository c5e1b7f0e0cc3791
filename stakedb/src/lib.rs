//! Embedded ticket-pool database.
//!
//! Maintains exactly one live state: the ticket pool and the winning-ticket
//! lottery at the current chain tip. Blocks are applied with
//! [`StakeDatabase::connect_block`] and rewound with
//! [`StakeDatabase::disconnect_block`]; every connect writes an undo entry
//! so rewinds are exact.

pub mod db;
pub mod errors;
pub mod pool;

pub use db::Database;
pub use errors::{StakeDbError, StakeDbResult};
pub use pool::{PoolInfo, PoolTicket, StakeDatabase};
