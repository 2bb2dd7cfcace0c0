mod database;
mod snapshot;
mod tracker;
mod transaction;

pub use database::{Database, DatabaseStatistics};
pub use snapshot::Snapshot;
pub use transaction::{PreparedCommit, Transaction, TxState};
