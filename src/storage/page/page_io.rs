//! Typed page I/O.
//!
//! Every page begins with the channel page header:
//!
//! ```text
//! Offset  Size  Description
//! ------  ----  ---------------------------------------
//! 0       1     page type
//! 1       8     id of the transaction that wrote the page
//! ```
//!
//! All multi-byte values are big-endian.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::common::{ObjDbError, PageId, Result, TxId, PAGE_HEADER_SIZE};

/// Role of a page, recorded in its first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageType {
    Header = 1,
    Meta = 2,
    IndexLeaf = 3,
    IndexInner = 4,
    FreeList = 5,
}

impl PageType {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(PageType::Header),
            2 => Some(PageType::Meta),
            3 => Some(PageType::IndexLeaf),
            4 => Some(PageType::IndexInner),
            5 => Some(PageType::FreeList),
            _ => None,
        }
    }
}

/// Serializes one page. Writes past the page end fail with `PageOverflow`.
pub struct PageWriter {
    buf: BytesMut,
    page_size: usize,
}

impl PageWriter {
    pub fn new(page_size: usize, page_type: PageType, tx_id: TxId) -> Self {
        let mut buf = BytesMut::with_capacity(page_size);
        buf.put_u8(page_type as u8);
        buf.put_u64(tx_id);
        Self { buf, page_size }
    }

    /// Bytes still available in the page.
    pub fn remaining(&self) -> usize {
        self.page_size.saturating_sub(self.buf.len())
    }

    pub fn position(&self) -> usize {
        self.buf.len()
    }

    fn reserve(&self, needed: usize) -> Result<()> {
        if needed > self.remaining() {
            return Err(ObjDbError::PageOverflow {
                needed: self.buf.len() + needed,
                available: self.page_size,
            });
        }
        Ok(())
    }

    pub fn write_i64(&mut self, value: i64) -> Result<()> {
        self.reserve(8)?;
        self.buf.put_i64(value);
        Ok(())
    }

    pub fn write_i32(&mut self, value: i32) -> Result<()> {
        self.reserve(4)?;
        self.buf.put_i32(value);
        Ok(())
    }

    pub fn write_i16(&mut self, value: i16) -> Result<()> {
        self.reserve(2)?;
        self.buf.put_i16(value);
        Ok(())
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.reserve(1)?;
        self.buf.put_u8(value);
        Ok(())
    }

    pub fn write_bool(&mut self, value: bool) -> Result<()> {
        self.write_u8(value as u8)
    }

    pub fn write_page_id(&mut self, page_id: PageId) -> Result<()> {
        self.write_i32(page_id.to_i32())
    }

    /// Length-prefixed (i16) UTF-8 string.
    pub fn write_str(&mut self, value: &str) -> Result<()> {
        let len = i16::try_from(value.len()).map_err(|_| ObjDbError::PageOverflow {
            needed: value.len(),
            available: i16::MAX as usize,
        })?;
        self.reserve(2 + value.len())?;
        self.buf.put_i16(len);
        self.buf.put_slice(value.as_bytes());
        Ok(())
    }

    pub fn write_bytes(&mut self, value: &[u8]) -> Result<()> {
        self.reserve(value.len())?;
        self.buf.put_slice(value);
        Ok(())
    }

    /// Pads the page with zeros and returns the full page image.
    pub fn finish(mut self) -> Vec<u8> {
        self.buf.resize(self.page_size, 0);
        self.buf.to_vec()
    }
}

/// Deserializes one page. Reads past the end fail with `ShortRead`.
pub struct PageReader {
    buf: Bytes,
    page_id: PageId,
    page_type: PageType,
    tx_id: TxId,
}

impl PageReader {
    /// Parses the channel page header of a raw page image.
    pub fn new(page_id: PageId, data: Vec<u8>) -> Result<Self> {
        let mut buf = Bytes::from(data);
        if buf.remaining() < PAGE_HEADER_SIZE {
            return Err(ObjDbError::ShortRead {
                page_id,
                needed: PAGE_HEADER_SIZE,
                available: buf.remaining(),
            });
        }

        let raw_type = buf.get_u8();
        let page_type = PageType::from_u8(raw_type).ok_or_else(|| {
            ObjDbError::corrupted(format!("{} has unknown page type {}", page_id, raw_type))
        })?;
        let tx_id = buf.get_u64();

        Ok(Self {
            buf,
            page_id,
            page_type,
            tx_id,
        })
    }

    /// Fails unless the page carries the expected type.
    pub fn expect_type(&self, expected: PageType) -> Result<()> {
        if self.page_type != expected {
            return Err(ObjDbError::corrupted(format!(
                "{} is a {:?} page, expected {:?}",
                self.page_id, self.page_type, expected
            )));
        }
        Ok(())
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn page_type(&self) -> PageType {
        self.page_type
    }

    pub fn tx_id(&self) -> TxId {
        self.tx_id
    }

    fn ensure(&self, needed: usize) -> Result<()> {
        if self.buf.remaining() < needed {
            return Err(ObjDbError::ShortRead {
                page_id: self.page_id,
                needed,
                available: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        self.ensure(8)?;
        Ok(self.buf.get_i64())
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.ensure(4)?;
        Ok(self.buf.get_i32())
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        self.ensure(2)?;
        Ok(self.buf.get_i16())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_page_id(&mut self) -> Result<PageId> {
        Ok(PageId::from_i32(self.read_i32()?))
    }

    pub fn read_str(&mut self) -> Result<String> {
        let len = self.read_i16()?;
        let len = usize::try_from(len)
            .map_err(|_| ObjDbError::corrupted(format!("negative string length in {}", self.page_id)))?;
        self.ensure(len)?;
        let raw = self.buf.copy_to_bytes(len);
        String::from_utf8(raw.to_vec())
            .map_err(|_| ObjDbError::corrupted(format!("invalid UTF-8 in {}", self.page_id)))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        self.ensure(len)?;
        Ok(self.buf.copy_to_bytes(len).to_vec())
    }
}
