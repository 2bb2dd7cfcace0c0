//! Meta page: the page a root slot points at.
//!
//! ```text
//! [page header]
//! [txId: i64][lastOid: i64][highWaterMark: i32][freeListHead: i32]
//! [oidRoot: i32][nextIndexId: i32][indexCount: i16]
//! indexCount * [indexId: i32][unique: bool][keyWidth: u8][valueWidth: u8][name: string][root: i32]
//! ```

use crate::common::{
    EntryWidth, IndexId, ObjDbError, PageId, Result, TxId, NO_PAGE,
};

use super::page_io::{PageReader, PageType, PageWriter};

/// Registration of one attribute index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDescriptor {
    pub id: IndexId,
    pub name: String,
    pub unique: bool,
    pub key_width: EntryWidth,
    pub value_width: EntryWidth,
    pub root: PageId,
}

/// Everything needed to rehydrate one committed snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaPage {
    pub tx_id: TxId,
    pub last_oid: u64,
    pub high_water_mark: PageId,
    pub free_list_head: PageId,
    pub oid_root: PageId,
    pub next_index_id: u32,
    pub indexes: Vec<IndexDescriptor>,
}

impl MetaPage {
    /// Meta page of a database that has never committed.
    pub fn empty(last_oid: u64) -> Self {
        Self {
            tx_id: 0,
            last_oid,
            high_water_mark: NO_PAGE,
            free_list_head: NO_PAGE,
            oid_root: NO_PAGE,
            next_index_id: 1,
            indexes: Vec::new(),
        }
    }

    pub fn encode(&self, page_size: usize) -> Result<Vec<u8>> {
        let mut writer = PageWriter::new(page_size, PageType::Meta, self.tx_id);
        writer.write_i64(self.tx_id as i64)?;
        writer.write_i64(self.last_oid as i64)?;
        writer.write_page_id(self.high_water_mark)?;
        writer.write_page_id(self.free_list_head)?;
        writer.write_page_id(self.oid_root)?;
        writer.write_i32(self.next_index_id as i32)?;

        let count = i16::try_from(self.indexes.len()).map_err(|_| ObjDbError::PageOverflow {
            needed: self.indexes.len(),
            available: i16::MAX as usize,
        })?;
        writer.write_i16(count)?;

        for index in &self.indexes {
            writer.write_i32(index.id.as_u32() as i32)?;
            writer.write_bool(index.unique)?;
            writer.write_u8(index.key_width as u8)?;
            writer.write_u8(index.value_width as u8)?;
            writer.write_str(&index.name)?;
            writer.write_page_id(index.root)?;
        }

        Ok(writer.finish())
    }

    pub fn decode(page_id: PageId, data: Vec<u8>) -> Result<Self> {
        let mut reader = PageReader::new(page_id, data)?;
        reader.expect_type(PageType::Meta)?;

        let tx_id = reader.read_i64()? as TxId;
        let last_oid = reader.read_i64()? as u64;
        let high_water_mark = reader.read_page_id()?;
        let free_list_head = reader.read_page_id()?;
        let oid_root = reader.read_page_id()?;
        let next_index_id = reader.read_i32()? as u32;
        let count = reader.read_i16()?;
        if count < 0 {
            return Err(ObjDbError::corrupted(format!(
                "meta {} has negative index count",
                page_id
            )));
        }

        let mut indexes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let id = IndexId::new(reader.read_i32()? as u32);
            let unique = reader.read_bool()?;
            let key_width = Self::read_width(&mut reader)?;
            let value_width = Self::read_width(&mut reader)?;
            let name = reader.read_str()?;
            let root = reader.read_page_id()?;
            indexes.push(IndexDescriptor {
                id,
                name,
                unique,
                key_width,
                value_width,
                root,
            });
        }

        Ok(Self {
            tx_id,
            last_oid,
            high_water_mark,
            free_list_head,
            oid_root,
            next_index_id,
            indexes,
        })
    }

    fn read_width(reader: &mut PageReader) -> Result<EntryWidth> {
        let raw = reader.read_u8()?;
        EntryWidth::from_u8(raw).ok_or_else(|| {
            ObjDbError::corrupted(format!("{} has entry width {}", reader.page_id(), raw))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_page_with_indexes() {
        let meta = MetaPage {
            tx_id: 12,
            last_oid: 4000,
            high_water_mark: PageId::new(77),
            free_list_head: PageId::new(70),
            oid_root: PageId::new(71),
            next_index_id: 3,
            indexes: vec![
                IndexDescriptor {
                    id: IndexId::new(1),
                    name: "person.email".to_string(),
                    unique: true,
                    key_width: EntryWidth::Long,
                    value_width: EntryWidth::Long,
                    root: PageId::new(72),
                },
                IndexDescriptor {
                    id: IndexId::new(2),
                    name: "person.age".to_string(),
                    unique: false,
                    key_width: EntryWidth::Int,
                    value_width: EntryWidth::Long,
                    root: PageId::new(73),
                },
            ],
        };

        let decoded = MetaPage::decode(PageId::new(5), meta.encode(256).unwrap()).unwrap();
        assert_eq!(decoded, meta);
    }

    #[test]
    fn test_meta_page_rejects_other_page_types() {
        let writer = PageWriter::new(128, PageType::FreeList, 0);
        assert!(matches!(
            MetaPage::decode(PageId::new(1), writer.finish()),
            Err(ObjDbError::IndexCorrupted(_))
        ));
    }
}
