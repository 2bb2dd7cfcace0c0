use tracing::debug;

use crate::common::{EntryWidth, ObjDbError, Oid, OidRange, PageId, Position, Result};

use super::index_iterator::IndexIterator;
use super::paged_index::{IndexStatistics, PagedIndex};

/// Maps object ids to the file position of their serialized state, and
/// issues new object ids.
pub struct OidIndex {
    index: PagedIndex,
    /// Highest id ever issued
    last_oid: u64,
}

impl OidIndex {
    pub fn new(index: PagedIndex, last_oid: u64) -> Self {
        Self { index, last_oid }
    }

    pub fn add_oid(&mut self, oid: Oid, position: Position) -> Result<()> {
        let key = Self::key(oid)?;
        self.index.insert(key, position.pack())?;
        Ok(())
    }

    /// Removes an object id, returning its last position.
    pub fn remove_oid(&mut self, oid: Oid) -> Result<Option<Position>> {
        // ids past i64::MAX are never issued
        let Ok(key) = Self::key(oid) else {
            return Ok(None);
        };
        Ok(self.index.remove(key)?.map(Position::unpack))
    }

    pub fn find_oid(&mut self, oid: Oid) -> Result<Option<Position>> {
        let Ok(key) = Self::key(oid) else {
            return Ok(None);
        };
        Ok(self.index.find(key)?.map(Position::unpack))
    }

    /// Issues `count` consecutive ids. On failure the counter is unchanged.
    pub fn allocate_oids(&mut self, count: u64) -> Result<OidRange> {
        let last = self
            .last_oid
            .checked_add(count)
            .filter(|last| *last <= i64::MAX as u64)
            .ok_or(ObjDbError::CapacityExceeded { requested: count })?;

        let range = OidRange {
            start: Oid::new(self.last_oid + 1),
            count,
        };
        self.last_oid = last;
        debug!(start = %range.start, count, "allocated oids");
        Ok(range)
    }

    /// Entries with ids in `[min, max]`, ascending.
    pub fn iter_oids(&mut self, min: Oid, max: Oid) -> Result<OidIterator<'_>> {
        let min = Self::key(min)?;
        let max = max.as_u64().min(i64::MAX as u64) as i64;
        Ok(OidIterator {
            inner: self.index.iter(min, max)?,
        })
    }

    pub fn last_oid(&self) -> u64 {
        self.last_oid
    }

    pub fn statistics(&mut self) -> Result<IndexStatistics> {
        self.index.statistics()
    }

    /// Drops uncommitted changes and restores a committed state.
    pub fn reload(&mut self, root: PageId, last_oid: u64) -> Result<()> {
        self.last_oid = last_oid;
        self.index.reload(root)
    }

    pub fn index(&self) -> &PagedIndex {
        &self.index
    }

    pub fn index_mut(&mut self) -> &mut PagedIndex {
        &mut self.index
    }

    fn key(oid: Oid) -> Result<i64> {
        i64::try_from(oid.as_u64()).map_err(|_| ObjDbError::ValueOutOfRange {
            value: oid.as_u64() as i64,
            width: EntryWidth::Long,
        })
    }
}

/// Iterator returned by [`OidIndex::iter_oids`].
pub struct OidIterator<'a> {
    inner: IndexIterator<'a>,
}

impl Iterator for OidIterator<'_> {
    type Item = Result<(Oid, Position)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|entry| {
            entry.map(|(key, packed)| (Oid::from_key(key), Position::unpack(packed)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{IndexTuning, FIRST_OID};
    use crate::index::node::IndexLayout;
    use crate::storage::disk::DiskManager;
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    fn setup(last_oid: u64) -> (NamedTempFile, OidIndex) {
        let temp_file = NamedTempFile::new().unwrap();
        let disk = Arc::new(DiskManager::new(temp_file.path(), 256).unwrap());
        let index = PagedIndex::create(disk, IndexLayout::long(256, true), IndexTuning::default());
        (temp_file, OidIndex::new(index, last_oid))
    }

    #[test]
    fn test_allocation_is_contiguous() {
        let (_file, mut oids) = setup(FIRST_OID - 1);
        let first = oids.allocate_oids(3).unwrap();
        let second = oids.allocate_oids(2).unwrap();

        assert_eq!(first.start, Oid::new(FIRST_OID));
        assert_eq!(first.last(), Some(Oid::new(FIRST_OID + 2)));
        assert_eq!(second.start, Oid::new(FIRST_OID + 3));
        assert_eq!(oids.last_oid(), FIRST_OID + 4);
    }

    #[test]
    fn test_allocation_overflow_leaves_counter() {
        let (_file, mut oids) = setup(i64::MAX as u64 - 2);
        assert!(oids.allocate_oids(2).is_ok());
        assert!(matches!(
            oids.allocate_oids(1),
            Err(ObjDbError::CapacityExceeded { requested: 1 })
        ));
        assert_eq!(oids.last_oid(), i64::MAX as u64);
        assert!(oids.allocate_oids(u64::MAX).unwrap_err().is_fatal());
    }

    #[test]
    fn test_add_find_remove() {
        let (_file, mut oids) = setup(FIRST_OID - 1);
        let range = oids.allocate_oids(50).unwrap();
        for (i, oid) in range.iter().enumerate() {
            oids.add_oid(oid, Position::new(PageId::new(i as u32 + 1), 16))
                .unwrap();
        }

        let oid = Oid::new(FIRST_OID + 10);
        assert_eq!(
            oids.find_oid(oid).unwrap(),
            Some(Position::new(PageId::new(11), 16))
        );
        assert_eq!(
            oids.remove_oid(oid).unwrap(),
            Some(Position::new(PageId::new(11), 16))
        );
        assert_eq!(oids.find_oid(oid).unwrap(), None);
        assert_eq!(oids.remove_oid(oid).unwrap(), None);

        // ids that could never have been issued are simply absent
        let unissued = Oid::new(u64::MAX);
        assert_eq!(oids.find_oid(unissued).unwrap(), None);
        assert_eq!(oids.remove_oid(unissued).unwrap(), None);
        assert!(matches!(
            oids.add_oid(unissued, Position::new(PageId::new(1), 0)),
            Err(ObjDbError::ValueOutOfRange { .. })
        ));

        let listed: Vec<Oid> = oids
            .iter_oids(Oid::new(FIRST_OID + 8), Oid::new(FIRST_OID + 12))
            .unwrap()
            .map(|entry| entry.unwrap().0)
            .collect();
        assert_eq!(
            listed,
            [8, 9, 11, 12]
                .iter()
                .map(|i| Oid::new(FIRST_OID + i))
                .collect::<Vec<_>>()
        );
    }
}
