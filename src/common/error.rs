use thiserror::Error;

use super::types::{EntryWidth, IndexId, Oid, PageId};

/// Database error types
#[derive(Error, Debug)]
pub enum ObjDbError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Short read on page {page_id}: needed {needed} bytes, {available} available")]
    ShortRead {
        page_id: PageId,
        needed: usize,
        available: usize,
    },

    #[error("Page overflow: {needed} bytes exceed available space {available}")]
    PageOverflow { needed: usize, available: usize },

    #[error("Disk scheduler error: {0}")]
    DiskScheduler(String),

    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),

    #[error("Invalid database file: {0}")]
    InvalidDatabaseFile(String),

    #[error("Index corrupted: {0}")]
    IndexCorrupted(String),

    #[error("OID capacity exceeded: cannot issue {requested} more identifiers")]
    CapacityExceeded { requested: u64 },

    #[error("Unique index {index} already maps key {key} to {existing}, rejected {rejected}")]
    ConstraintViolation {
        index: IndexId,
        key: i64,
        existing: Oid,
        rejected: Oid,
    },

    #[error("Value {value} does not fit a {width:?} index entry")]
    ValueOutOfRange { value: i64, width: EntryWidth },

    #[error("Index {0} not found")]
    IndexNotFound(IndexId),

    #[error("No index named {0:?}")]
    IndexNameNotFound(String),

    #[error("Index named {0:?} already exists")]
    IndexAlreadyExists(String),

    #[error("No room in the meta page for index {name:?}: {needed} bytes needed, {available} available")]
    MetaPageFull {
        name: String,
        needed: usize,
        available: usize,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Transaction is no longer active")]
    TransactionClosed,
}

impl ObjDbError {
    /// Returns false for errors the caller may recover from without
    /// abandoning the enclosing transaction.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ObjDbError::ConstraintViolation { .. }
                | ObjDbError::ValueOutOfRange { .. }
                | ObjDbError::IndexNotFound(_)
                | ObjDbError::IndexNameNotFound(_)
                | ObjDbError::IndexAlreadyExists(_)
                | ObjDbError::MetaPageFull { .. }
                | ObjDbError::InvalidConfig(_)
        )
    }

    pub(crate) fn corrupted(msg: impl Into<String>) -> Self {
        ObjDbError::IndexCorrupted(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, ObjDbError>;
