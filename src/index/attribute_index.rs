use crate::common::{IndexId, ObjDbError, Oid, PageId, Result};
use crate::storage::page::IndexDescriptor;

use super::index_iterator::IndexIterator;
use super::key_encoding::SortableKey;
use super::paged_index::{IndexStatistics, PagedIndex};

/// Index from an encoded field value to the objects holding it.
///
/// A unique index maps each key to one object and rejects a second one.
/// A non-unique index keeps one entry per `(key, oid)` pair, in insertion
/// order per key.
pub struct AttributeIndex {
    id: IndexId,
    name: String,
    index: PagedIndex,
}

impl AttributeIndex {
    pub fn new(id: IndexId, name: impl Into<String>, index: PagedIndex) -> Self {
        Self {
            id,
            name: name.into(),
            index,
        }
    }

    pub fn id(&self) -> IndexId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_unique(&self) -> bool {
        self.index.layout().unique
    }

    pub fn insert<K: SortableKey + ?Sized>(&mut self, key: &K, oid: Oid) -> Result<()> {
        self.insert_key(key.to_key(), oid)
    }

    /// Inserts an already encoded key.
    pub fn insert_key(&mut self, key: i64, oid: Oid) -> Result<()> {
        if self.is_unique() {
            if let Some(existing) = self.index.find(key)? {
                if existing != oid.as_key() {
                    return Err(ObjDbError::ConstraintViolation {
                        index: self.id,
                        key,
                        existing: Oid::from_key(existing),
                        rejected: oid,
                    });
                }
                return Ok(());
            }
        }

        self.index.insert(key, oid.as_key())?;
        Ok(())
    }

    /// Removes the entry linking `key` to `oid`. Returns false if absent.
    pub fn remove<K: SortableKey + ?Sized>(&mut self, key: &K, oid: Oid) -> Result<bool> {
        self.index.remove_entry(key.to_key(), oid.as_key())
    }

    /// Objects stored under `key`. At most one for a unique index.
    pub fn lookup<K: SortableKey + ?Sized>(&mut self, key: &K) -> Result<Vec<Oid>> {
        let key = key.to_key();
        let oids = if self.is_unique() {
            self.index.find(key)?.into_iter().collect()
        } else {
            self.index.find_all(key)?
        };
        Ok(oids.into_iter().map(Oid::from_key).collect())
    }

    /// Entries with keys in `[min, max]`, ascending by key.
    pub fn range<K: SortableKey + ?Sized>(&mut self, min: &K, max: &K) -> Result<AttributeIterator<'_>> {
        Ok(AttributeIterator {
            inner: self.index.iter(min.to_key(), max.to_key())?,
        })
    }

    pub fn statistics(&mut self) -> Result<IndexStatistics> {
        self.index.statistics()
    }

    /// Registration record pointing at `root`.
    pub fn descriptor(&self, root: PageId) -> IndexDescriptor {
        let layout = self.index.layout();
        IndexDescriptor {
            id: self.id,
            name: self.name.clone(),
            unique: layout.unique,
            key_width: layout.key_width,
            value_width: layout.value_width,
            root,
        }
    }

    pub fn index(&self) -> &PagedIndex {
        &self.index
    }

    pub fn index_mut(&mut self) -> &mut PagedIndex {
        &mut self.index
    }

    pub fn into_paged(self) -> PagedIndex {
        self.index
    }
}

/// Iterator returned by [`AttributeIndex::range`].
pub struct AttributeIterator<'a> {
    inner: IndexIterator<'a>,
}

impl Iterator for AttributeIterator<'_> {
    type Item = Result<(i64, Oid)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .next()
            .map(|entry| entry.map(|(key, oid)| (key, Oid::from_key(oid))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::IndexTuning;
    use crate::index::node::IndexLayout;
    use crate::storage::disk::DiskManager;
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    fn setup(unique: bool) -> (NamedTempFile, AttributeIndex) {
        let temp_file = NamedTempFile::new().unwrap();
        let disk = Arc::new(DiskManager::new(temp_file.path(), 128).unwrap());
        let index = PagedIndex::create(disk, IndexLayout::long(128, unique), IndexTuning::default());
        (temp_file, AttributeIndex::new(IndexId::new(4), "person.email", index))
    }

    #[test]
    fn test_unique_rejects_second_object() {
        let (_file, mut index) = setup(true);
        index.insert("ann@example.org", Oid::new(100)).unwrap();
        index.insert("ann@example.org", Oid::new(100)).unwrap();

        let err = index.insert("ann@example.org", Oid::new(101)).unwrap_err();
        assert!(!err.is_fatal());
        match err {
            ObjDbError::ConstraintViolation {
                index: id,
                existing,
                rejected,
                ..
            } => {
                assert_eq!(id, IndexId::new(4));
                assert_eq!(existing, Oid::new(100));
                assert_eq!(rejected, Oid::new(101));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(index.lookup("ann@example.org").unwrap(), vec![Oid::new(100)]);
    }

    #[test]
    fn test_non_unique_lookup_and_remove() {
        let (_file, mut index) = setup(false);
        for oid in [105, 101, 103] {
            index.insert(&42i32, Oid::new(oid)).unwrap();
        }
        index.insert(&41i32, Oid::new(200)).unwrap();

        assert_eq!(
            index.lookup(&42i32).unwrap(),
            vec![Oid::new(105), Oid::new(101), Oid::new(103)]
        );
        assert!(index.remove(&42i32, Oid::new(101)).unwrap());
        assert!(!index.remove(&42i32, Oid::new(101)).unwrap());
        assert_eq!(index.lookup(&42i32).unwrap().len(), 2);
        assert!(index.lookup(&7i32).unwrap().is_empty());
    }

    #[test]
    fn test_range_over_doubles() {
        let (_file, mut index) = setup(true);
        let prices = [-3.5, 0.0, 2.25, 9.0, 120.0];
        for (i, price) in prices.iter().enumerate() {
            index.insert(price, Oid::new(100 + i as u64)).unwrap();
        }

        let hits: Vec<Oid> = index
            .range(&0.0, &10.0)
            .unwrap()
            .map(|entry| entry.unwrap().1)
            .collect();
        assert_eq!(hits, vec![Oid::new(101), Oid::new(102), Oid::new(103)]);
    }
}
