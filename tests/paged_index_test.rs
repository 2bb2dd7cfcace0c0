use std::sync::Arc;

use objdb::common::{IndexTuning, PageId};
use objdb::index::{IndexLayout, InsertOutcome, PagedIndex};
use objdb::storage::disk::{DiskManager, DiskScheduler, FreeSpaceManager};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tempfile::NamedTempFile;

const PAGE: usize = 128;

struct Fixture {
    _temp: NamedTempFile,
    disk: Arc<DiskManager>,
    scheduler: DiskScheduler,
    fsm: FreeSpaceManager,
    tx_id: u64,
}

impl Fixture {
    fn new() -> Self {
        let temp = NamedTempFile::new().unwrap();
        let disk = Arc::new(DiskManager::new(temp.path(), PAGE).unwrap());
        let scheduler = DiskScheduler::new(disk.clone());
        Self {
            _temp: temp,
            disk,
            scheduler,
            fsm: FreeSpaceManager::new(),
            tx_id: 0,
        }
    }

    fn index(&self, unique: bool, tuning: IndexTuning) -> PagedIndex {
        PagedIndex::create(self.disk.clone(), IndexLayout::long(PAGE, unique), tuning)
    }

    fn open(&self, root: PageId, unique: bool) -> PagedIndex {
        PagedIndex::open(
            self.disk.clone(),
            IndexLayout::long(PAGE, unique),
            IndexTuning::default(),
            root,
        )
        .unwrap()
    }

    /// Persists the index and completes the commit.
    fn persist(&mut self, index: &mut PagedIndex) -> PageId {
        self.tx_id += 1;
        let root = index.persist(&mut self.fsm, &self.scheduler, self.tx_id).unwrap();
        self.scheduler.flush().unwrap();
        self.fsm.commit(self.tx_id);
        self.fsm.release(None);
        root
    }
}

fn assert_all_found(index: &mut PagedIndex, keys: &[i64]) {
    for &key in keys {
        assert_eq!(index.find(key).unwrap(), Some(key * 7), "Failed to find key {}", key);
    }
}

#[test]
fn test_insert_and_find() {
    let fx = Fixture::new();
    let mut index = fx.index(true, IndexTuning::default());

    index.insert(10, 100).unwrap();
    index.insert(20, 200).unwrap();
    index.insert(30, 300).unwrap();

    assert_eq!(index.find(10).unwrap(), Some(100));
    assert_eq!(index.find(20).unwrap(), Some(200));
    assert_eq!(index.find(30).unwrap(), Some(300));
    assert_eq!(index.find(40).unwrap(), None);

    assert_eq!(index.remove(20).unwrap(), Some(200));
    assert_eq!(index.find(20).unwrap(), None);
}

#[test]
fn test_insert_many_ascending() {
    let fx = Fixture::new();
    let mut index = fx.index(true, IndexTuning::default());
    let keys: Vec<i64> = (0..1000).collect();

    for &key in &keys {
        index.insert(key, key * 7).unwrap();
    }

    assert_all_found(&mut index, &keys);
    index.verify().unwrap();
}

#[test]
fn test_insert_many_shuffled() {
    let fx = Fixture::new();
    let mut index = fx.index(true, IndexTuning::default());
    let mut keys: Vec<i64> = (-500..500).map(|k| k * 3).collect();
    keys.shuffle(&mut StdRng::seed_from_u64(42));

    for &key in &keys {
        assert_eq!(index.insert(key, key * 7).unwrap(), InsertOutcome::Inserted);
    }

    assert_all_found(&mut index, &keys);
    assert_eq!(index.find(1).unwrap(), None);
    index.verify().unwrap();
}

#[test]
fn test_split_on_one_extra_key() {
    for append_split in [true, false] {
        let fx = Fixture::new();
        let tuning = IndexTuning::default().with_append_split(append_split);
        let mut index = fx.index(true, tuning);
        let max = index.layout().max_leaf_n as i64;
        let keys: Vec<i64> = (1..=max + 1).collect();

        for &key in &keys {
            index.insert(key, key * 7).unwrap();
        }

        let stats = index.statistics().unwrap();
        assert_eq!(stats.leaf_pages, 2, "append_split = {}", append_split);
        assert_eq!(stats.inner_pages, 1);
        assert_eq!(stats.entries, keys.len());
        assert_all_found(&mut index, &keys);
    }
}

#[test]
fn test_append_split_packs_leaves() {
    let fx = Fixture::new();
    let mut packed = fx.index(true, IndexTuning::default());
    let mut halved = fx.index(true, IndexTuning::default().with_append_split(false));

    for key in 0..700 {
        packed.insert(key, key).unwrap();
        halved.insert(key, key).unwrap();
    }

    let packed_leaves = packed.statistics().unwrap().leaf_pages;
    let halved_leaves = halved.statistics().unwrap().leaf_pages;
    assert_eq!(packed_leaves, 100);
    assert!(halved_leaves > packed_leaves, "{} vs {}", halved_leaves, packed_leaves);
}

#[test]
fn test_out_of_order_block_after_high_key() {
    let fx = Fixture::new();
    let mut index = fx.index(true, IndexTuning::default());
    let mut inserted = Vec::new();

    let pattern = (101..=109)
        .chain([1, 128])
        .chain(2..=5)
        .chain(110..=127)
        .chain(6..=40);
    for key in pattern {
        index.insert(key, key * 7).unwrap();
        inserted.push(key);
        assert_all_found(&mut index, &inserted);
    }

    index.verify().unwrap();
    let listed: Vec<i64> = index
        .iter(i64::MIN, i64::MAX)
        .unwrap()
        .map(|entry| entry.unwrap().0)
        .collect();
    inserted.sort_unstable();
    assert_eq!(listed, inserted);
}

#[test]
fn test_range_iteration() {
    let fx = Fixture::new();
    let mut index = fx.index(true, IndexTuning::default());
    let mut keys: Vec<i64> = (0..300).map(|k| k * 2).collect();
    keys.shuffle(&mut StdRng::seed_from_u64(3));
    for &key in &keys {
        index.insert(key, -key).unwrap();
    }

    let range: Vec<(i64, i64)> = index
        .iter(101, 201)
        .unwrap()
        .map(|entry| entry.unwrap())
        .collect();
    let expected: Vec<(i64, i64)> = (51..=100).map(|k| (k * 2, -k * 2)).collect();
    assert_eq!(range, expected);

    assert_eq!(index.iter(1000, 2000).unwrap().count(), 0);
    assert_eq!(index.iter(10, 5).unwrap().count(), 0);
    assert_eq!(index.iter(i64::MIN, i64::MAX).unwrap().count(), 300);
}

#[test]
fn test_iterator_stays_exhausted() {
    let fx = Fixture::new();
    let mut index = fx.index(true, IndexTuning::default());
    for key in 0..20 {
        index.insert(key, key).unwrap();
    }

    let mut iter = index.iter(0, 2).unwrap();
    assert_eq!(iter.next().unwrap().unwrap(), (0, 0));
    assert_eq!(iter.next().unwrap().unwrap(), (1, 1));
    assert_eq!(iter.next().unwrap().unwrap(), (2, 2));
    assert!(iter.next().is_none());
    assert!(iter.next().is_none());
}

#[test]
fn test_reinsert_same_value_is_noop() {
    let fx = Fixture::new();
    let mut index = fx.index(true, IndexTuning::default());
    for key in 0..50 {
        index.insert(key, key * 7).unwrap();
    }
    let before = index.statistics().unwrap();

    for key in 0..50 {
        assert_eq!(index.insert(key, key * 7).unwrap(), InsertOutcome::Unchanged);
    }
    assert_eq!(index.statistics().unwrap(), before);
}

#[test]
fn test_merge_with_previous_leaf() {
    let fx = Fixture::new();
    let tuning = IndexTuning::default().with_merge(1, 1);
    let mut index = fx.index(true, tuning);
    for key in 0..200 {
        index.insert(key, key * 7).unwrap();
    }
    let leaves_before = index.statistics().unwrap().leaf_pages;

    let removed: Vec<i64> = (0..200).filter(|k| k % 4 != 0).collect();
    for &key in &removed {
        assert_eq!(index.remove(key).unwrap(), Some(key * 7));
    }

    let stats = index.statistics().unwrap();
    assert!(stats.leaf_pages < leaves_before / 2, "{} leaves left", stats.leaf_pages);
    assert_eq!(stats.entries, 50);
    index.verify().unwrap();

    let kept: Vec<i64> = (0..200).filter(|k| k % 4 == 0).collect();
    assert_all_found(&mut index, &kept);
}

#[test]
fn test_merge_disabled_keeps_correctness() {
    let fx = Fixture::new();
    let mut index = fx.index(true, IndexTuning::default().without_merge());
    let mut keys: Vec<i64> = (0..400).collect();
    keys.shuffle(&mut StdRng::seed_from_u64(11));
    for &key in &keys {
        index.insert(key, key * 7).unwrap();
    }
    for &key in keys.iter().take(300) {
        index.remove(key).unwrap();
    }

    index.verify().unwrap();
    assert_all_found(&mut index, &keys[300..]);
    for &key in &keys[..300] {
        assert_eq!(index.find(key).unwrap(), None, "key {} should be gone", key);
    }
}

#[test]
fn test_non_unique_duplicates_span_leaves() {
    let fx = Fixture::new();
    let mut index = fx.index(false, IndexTuning::default());
    for key in 0..10 {
        for value in 0..25 {
            index.insert(key, value * 100 + key).unwrap();
        }
    }
    index.verify().unwrap();

    for key in 0..10 {
        let expected: Vec<i64> = (0..25).map(|v| v * 100 + key).collect();
        assert_eq!(index.find_all(key).unwrap(), expected, "key {}", key);
        assert_eq!(index.find(key).unwrap(), Some(key));
    }

    for value in 0..25 {
        assert!(index.remove_entry(5, value * 100 + 5).unwrap());
    }
    assert!(index.find_all(5).unwrap().is_empty());
    assert_eq!(index.find_all(6).unwrap().len(), 25);
    index.verify().unwrap();
}

#[test]
fn test_persist_and_reopen() {
    let mut fx = Fixture::new();
    let mut index = fx.index(true, IndexTuning::default());
    let mut keys: Vec<i64> = (0..500).collect();
    keys.shuffle(&mut StdRng::seed_from_u64(5));
    for &key in &keys {
        index.insert(key, key * 7).unwrap();
    }
    let root = fx.persist(&mut index);
    assert!(!index.is_modified());
    assert_eq!(index.root_page_id(), Some(root));

    let mut reopened = fx.open(root, true);
    assert_eq!(reopened.cached_pages(), 1);
    assert_all_found(&mut reopened, &keys);
    assert_eq!(reopened.statistics().unwrap(), index.statistics().unwrap());
}

#[test]
fn test_persist_is_copy_on_write() {
    let mut fx = Fixture::new();
    let mut index = fx.index(true, IndexTuning::default());
    for key in 0..100 {
        index.insert(key, key * 7).unwrap();
    }
    let old_root = fx.persist(&mut index);
    let pages_before = fx.fsm.high_water_mark();

    index.insert(50, -1).unwrap();
    index.insert(1000, 1000 * 7).unwrap();
    assert!(index.is_modified());

    fx.tx_id += 1;
    let new_root = index.persist(&mut fx.fsm, &fx.scheduler, fx.tx_id).unwrap();
    fx.scheduler.flush().unwrap();
    assert_ne!(new_root, old_root);
    assert!(fx.fsm.is_pending(old_root));
    // superseded pages are not reused before the commit completes
    assert!(fx.fsm.high_water_mark() > pages_before);

    let mut old = fx.open(old_root, true);
    assert_eq!(old.find(50).unwrap(), Some(50 * 7));
    assert_eq!(old.find(1000).unwrap(), None);

    let mut new = fx.open(new_root, true);
    assert_eq!(new.find(50).unwrap(), Some(-1));
    assert_eq!(new.find(1000).unwrap(), Some(1000 * 7));
}

#[test]
fn test_unchanged_index_persists_to_same_root() {
    let mut fx = Fixture::new();
    let mut index = fx.index(true, IndexTuning::default());
    for key in 0..100 {
        index.insert(key, key).unwrap();
    }
    let root = fx.persist(&mut index);

    assert_eq!(index.find(42).unwrap(), Some(42));
    assert_eq!(fx.persist(&mut index), root);
    assert_eq!(fx.fsm.eligible_count(), 0);
}

#[test]
fn test_reload_discards_changes() {
    let mut fx = Fixture::new();
    let mut index = fx.index(true, IndexTuning::default());
    for key in 0..60 {
        index.insert(key, key * 7).unwrap();
    }
    let root = fx.persist(&mut index);

    for key in 0..30 {
        index.remove(key).unwrap();
    }
    index.insert(99, 0).unwrap();
    index.reload(root).unwrap();

    assert!(!index.is_modified());
    let keys: Vec<i64> = (0..60).collect();
    assert_all_found(&mut index, &keys);
    assert_eq!(index.find(99).unwrap(), None);
}

#[test]
fn test_clear_retires_every_page() {
    let mut fx = Fixture::new();
    let mut index = fx.index(true, IndexTuning::default());
    for key in 0..200 {
        index.insert(key, key).unwrap();
    }
    fx.persist(&mut index);
    let stats = index.statistics().unwrap();
    let pages = stats.leaf_pages + stats.inner_pages;

    index.clear().unwrap();
    assert!(index.is_empty());
    fx.persist(&mut index);

    // the new empty root went to a fresh page
    assert_eq!(fx.fsm.eligible_count(), pages);
}
