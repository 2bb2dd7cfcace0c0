//! File header (page 0).
//!
//! ```text
//! [page header]
//! [formatId: i32][versionMajor: i16][versionMinor: i16][pageSize: i32]
//! [rootSlotA: i32][rootSlotB: i32][txIdA: i64][txIdB: i64][activeSlot: u8]
//! ```
//!
//! Each root slot names the meta page of one committed snapshot. Commit
//! writes the inactive slot, syncs, then flips `activeSlot`; the slot that
//! was active stays readable until the following commit overwrites it.

use std::path::Path;

use crate::common::{
    ObjDbError, PageId, Result, TxId, FORMAT_ID, HEADER_PAGE_ID, NO_PAGE, PAGE_HEADER_SIZE,
    VERSION_MAJOR, VERSION_MINOR,
};
use crate::storage::disk::DiskManager;

use super::page_io::{PageReader, PageType, PageWriter};

/// Bytes needed to read the page size of an unopened file
const PROBE_SIZE: usize = PAGE_HEADER_SIZE + 12;

/// One of the two alternating commit slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootSlot {
    pub meta_page: PageId,
    pub tx_id: TxId,
}

impl RootSlot {
    pub fn empty() -> Self {
        Self {
            meta_page: NO_PAGE,
            tx_id: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.meta_page == NO_PAGE
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    page_size: usize,
    version_minor: i16,
    slots: [RootSlot; 2],
    active: usize,
}

impl FileHeader {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            version_minor: VERSION_MINOR,
            slots: [RootSlot::empty(), RootSlot::empty()],
            active: 0,
        }
    }

    /// Reads the page size recorded in an existing database file.
    pub fn probe_page_size<P: AsRef<Path>>(path: P) -> Result<usize> {
        let mut prefix = vec![0u8; PROBE_SIZE];
        let read = DiskManager::read_prefix(path, &mut prefix)?;
        if read < PROBE_SIZE {
            return Err(ObjDbError::InvalidDatabaseFile(format!(
                "file too short for a header ({} bytes)",
                read
            )));
        }

        let mut reader = PageReader::new(HEADER_PAGE_ID, prefix)
            .map_err(|e| ObjDbError::InvalidDatabaseFile(e.to_string()))?;
        Self::read_preamble(&mut reader)
    }

    fn read_preamble(reader: &mut PageReader) -> Result<usize> {
        if reader.page_type() != PageType::Header {
            return Err(ObjDbError::InvalidDatabaseFile(format!(
                "page 0 is a {:?} page",
                reader.page_type()
            )));
        }
        let format_id = reader.read_i32()?;
        if format_id != FORMAT_ID {
            return Err(ObjDbError::InvalidDatabaseFile(format!(
                "unknown format id {:#x}",
                format_id
            )));
        }
        let major = reader.read_i16()?;
        if major != VERSION_MAJOR {
            return Err(ObjDbError::InvalidDatabaseFile(format!(
                "unsupported format version {}",
                major
            )));
        }
        let _minor = reader.read_i16()?;
        let page_size = reader.read_i32()?;
        usize::try_from(page_size)
            .map_err(|_| ObjDbError::InvalidDatabaseFile(format!("bad page size {}", page_size)))
    }

    pub fn decode(data: Vec<u8>) -> Result<Self> {
        let mut reader = PageReader::new(HEADER_PAGE_ID, data)?;
        let page_size = Self::read_preamble(&mut reader)?;

        let slot_a = reader.read_page_id()?;
        let slot_b = reader.read_page_id()?;
        let tx_a = reader.read_i64()? as TxId;
        let tx_b = reader.read_i64()? as TxId;
        let active = reader.read_u8()?;
        if active > 1 {
            return Err(ObjDbError::InvalidDatabaseFile(format!(
                "active slot indicator is {}",
                active
            )));
        }

        Ok(Self {
            page_size,
            version_minor: VERSION_MINOR,
            slots: [
                RootSlot {
                    meta_page: slot_a,
                    tx_id: tx_a,
                },
                RootSlot {
                    meta_page: slot_b,
                    tx_id: tx_b,
                },
            ],
            active: active as usize,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut writer = PageWriter::new(self.page_size, PageType::Header, self.active_slot().tx_id);
        writer.write_i32(FORMAT_ID)?;
        writer.write_i16(VERSION_MAJOR)?;
        writer.write_i16(self.version_minor)?;
        writer.write_i32(self.page_size as i32)?;
        writer.write_page_id(self.slots[0].meta_page)?;
        writer.write_page_id(self.slots[1].meta_page)?;
        writer.write_i64(self.slots[0].tx_id as i64)?;
        writer.write_i64(self.slots[1].tx_id as i64)?;
        writer.write_u8(self.active as u8)?;
        Ok(writer.finish())
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn active_index(&self) -> usize {
        self.active
    }

    pub fn active_slot(&self) -> RootSlot {
        self.slots[self.active]
    }

    pub fn inactive_slot(&self) -> RootSlot {
        self.slots[1 - self.active]
    }

    /// Stages a new snapshot in the slot that is not current.
    pub fn set_inactive_slot(&mut self, slot: RootSlot) {
        self.slots[1 - self.active] = slot;
    }

    /// Makes the staged slot current.
    pub fn flip(&mut self) {
        self.active = 1 - self.active;
    }
}
