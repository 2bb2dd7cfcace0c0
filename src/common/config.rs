use super::error::{ObjDbError, Result};
use super::types::PageId;

/// Default size of a page in bytes (4 KB)
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Smallest page size accepted at database creation
pub const MIN_PAGE_SIZE: usize = 128;

/// Largest page size accepted at database creation (entry counts are i16)
pub const MAX_PAGE_SIZE: usize = 1 << 16;

/// File format identifier stored at the start of the header page ("ODB1")
pub const FORMAT_ID: i32 = 0x4F44_4231;

pub const VERSION_MAJOR: i16 = 1;
pub const VERSION_MINOR: i16 = 0;

/// Channel page header: page type (1) + transaction id (8)
pub const PAGE_HEADER_SIZE: usize = 9;

/// The file header always lives in page 0
pub const HEADER_PAGE_ID: PageId = PageId(0);

/// Page id 0 doubles as the "no page" marker inside page bodies
pub const NO_PAGE: PageId = PageId(0);

/// First OID handed out by a fresh database
pub const FIRST_OID: u64 = 100;

/// Leaves below min_leaf_n / divisor are merge candidates
pub const DEFAULT_MERGE_DIVISOR: usize = 2;

/// Merge checks only run when the leaf size is a multiple of this
pub const DEFAULT_MERGE_MODULO: usize = 4;

/// Tuning knobs for the paged index. None of these affect correctness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexTuning {
    pub merge_divisor: usize,
    pub merge_modulo: usize,
    /// Split an ascending append by moving only the appended entry.
    pub append_split: bool,
}

impl Default for IndexTuning {
    fn default() -> Self {
        Self {
            merge_divisor: DEFAULT_MERGE_DIVISOR,
            merge_modulo: DEFAULT_MERGE_MODULO,
            append_split: true,
        }
    }
}

impl IndexTuning {
    /// Disables opportunistic leaf merging altogether.
    pub fn without_merge(mut self) -> Self {
        self.merge_divisor = 0;
        self
    }

    pub fn with_merge(mut self, divisor: usize, modulo: usize) -> Self {
        self.merge_divisor = divisor;
        self.merge_modulo = modulo;
        self
    }

    pub fn with_append_split(mut self, enabled: bool) -> Self {
        self.append_split = enabled;
        self
    }
}

/// Database-wide configuration.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Page size, fixed at creation time. Ignored when opening an existing file.
    pub page_size: usize,
    /// Whether commit syncs the file before and after flipping the root slot.
    pub sync_on_commit: bool,
    pub index: IndexTuning,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            sync_on_commit: true,
            index: IndexTuning::default(),
        }
    }
}

impl DatabaseConfig {
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_sync_on_commit(mut self, sync: bool) -> Self {
        self.sync_on_commit = sync;
        self
    }

    pub fn with_index_tuning(mut self, tuning: IndexTuning) -> Self {
        self.index = tuning;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.page_size.is_power_of_two() {
            return Err(ObjDbError::InvalidConfig(format!(
                "page size {} is not a power of two",
                self.page_size
            )));
        }
        if self.page_size < MIN_PAGE_SIZE || self.page_size > MAX_PAGE_SIZE {
            return Err(ObjDbError::InvalidConfig(format!(
                "page size {} outside [{}, {}]",
                self.page_size, MIN_PAGE_SIZE, MAX_PAGE_SIZE
            )));
        }
        if self.index.merge_divisor > 0 && self.index.merge_modulo == 0 {
            return Err(ObjDbError::InvalidConfig(
                "merge modulo must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
