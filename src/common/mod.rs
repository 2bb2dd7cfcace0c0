pub mod config;
pub mod error;
pub mod types;

pub use config::*;
pub use error::{ObjDbError, Result};
pub use types::{EntryWidth, IndexId, Oid, OidRange, PageId, Position, TxId};
