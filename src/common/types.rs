use std::fmt;

/// Page identifier type - uniquely identifies a page in the database file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(pub u32);

impl PageId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// Page ids are stored on disk as signed 32-bit integers.
    pub fn to_i32(&self) -> i32 {
        self.0 as i32
    }

    pub fn from_i32(raw: i32) -> Self {
        Self(raw as u32)
    }

    /// Byte offset of this page in a file with the given page size.
    pub fn file_offset(&self, page_size: usize) -> u64 {
        self.0 as u64 * page_size as u64
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageId({})", self.0)
    }
}

/// Object identifier assigned by the storage engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Oid(pub u64);

impl Oid {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Index key representation. OIDs never exceed `i64::MAX`.
    pub fn as_key(&self) -> i64 {
        self.0 as i64
    }

    pub fn from_key(key: i64) -> Self {
        Self(key as u64)
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Oid({})", self.0)
    }
}

/// File position of a serialized object: a page plus a byte offset inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    pub page_id: PageId,
    pub offset: u32,
}

impl Position {
    pub fn new(page_id: PageId, offset: u32) -> Self {
        Self { page_id, offset }
    }

    /// Packs the position into a single index value: page in the high 32 bits.
    pub fn pack(&self) -> i64 {
        (((self.page_id.as_u32() as u64) << 32) | self.offset as u64) as i64
    }

    pub fn unpack(packed: i64) -> Self {
        let raw = packed as u64;
        Self {
            page_id: PageId::new((raw >> 32) as u32),
            offset: raw as u32,
        }
    }
}

/// Contiguous block of freshly issued OIDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OidRange {
    pub start: Oid,
    pub count: u64,
}

impl OidRange {
    pub fn iter(&self) -> impl Iterator<Item = Oid> {
        let start = self.start.as_u64();
        (start..start + self.count).map(Oid::new)
    }

    pub fn last(&self) -> Option<Oid> {
        if self.count == 0 {
            None
        } else {
            Some(Oid::new(self.start.as_u64() + self.count - 1))
        }
    }
}

/// Transaction identifier, strictly increasing per committed transaction.
pub type TxId = u64;

/// Identifier of an attribute index registered in the meta page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexId(pub u32);

impl IndexId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for IndexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IndexId({})", self.0)
    }
}

/// On-page width of an index key or value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EntryWidth {
    Int = 4,
    Long = 8,
}

impl EntryWidth {
    pub fn bytes(&self) -> usize {
        *self as usize
    }

    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            4 => Some(EntryWidth::Int),
            8 => Some(EntryWidth::Long),
            _ => None,
        }
    }

    /// Whether the value survives being stored at this width.
    pub fn fits(&self, value: i64) -> bool {
        match self {
            EntryWidth::Int => i32::try_from(value).is_ok(),
            EntryWidth::Long => true,
        }
    }
}
