use std::collections::BTreeMap;
use std::sync::Arc;

use crate::common::{IndexId, ObjDbError, Oid, Position, Result, TxId};
use crate::index::{AttributeIndex, AttributeIterator, OidIndex, OidIterator, SortableKey};

use super::tracker::SnapshotTracker;

/// Read-only view of one committed state.
///
/// A snapshot loads its pages lazily from the file and shares no pages with
/// the writer. While it is alive, commits do not reuse the pages it may
/// reach; dropping it lets them be reused.
pub struct Snapshot {
    tx_id: TxId,
    oid_index: OidIndex,
    indexes: BTreeMap<IndexId, AttributeIndex>,
    tracker: Arc<SnapshotTracker>,
}

impl Snapshot {
    /// Registers the snapshot with `tracker`; it unregisters on drop.
    pub(crate) fn new(
        tx_id: TxId,
        oid_index: OidIndex,
        indexes: BTreeMap<IndexId, AttributeIndex>,
        tracker: Arc<SnapshotTracker>,
    ) -> Self {
        tracker.register(tx_id);
        Self {
            tx_id,
            oid_index,
            indexes,
            tracker,
        }
    }

    /// Transaction that produced this state.
    pub fn tx_id(&self) -> TxId {
        self.tx_id
    }

    pub fn last_oid(&self) -> u64 {
        self.oid_index.last_oid()
    }

    pub fn find_oid(&mut self, oid: Oid) -> Result<Option<Position>> {
        self.oid_index.find_oid(oid)
    }

    pub fn iter_oids(&mut self, min: Oid, max: Oid) -> Result<OidIterator<'_>> {
        self.oid_index.iter_oids(min, max)
    }

    pub fn lookup<K: SortableKey + ?Sized>(&mut self, name: &str, key: &K) -> Result<Vec<Oid>> {
        self.index(name)?.lookup(key)
    }

    pub fn range<K: SortableKey + ?Sized>(
        &mut self,
        name: &str,
        min: &K,
        max: &K,
    ) -> Result<AttributeIterator<'_>> {
        self.index(name)?.range(min, max)
    }

    fn index(&mut self, name: &str) -> Result<&mut AttributeIndex> {
        self.indexes
            .values_mut()
            .find(|index| index.name() == name)
            .ok_or_else(|| ObjDbError::IndexNameNotFound(name.to_string()))
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        self.tracker.unregister(self.tx_id);
    }
}
