use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::common::TxId;

/// Counts the live snapshots of each committed transaction.
///
/// Shared between a [`Database`](super::Database) and its snapshots so that
/// commit can tell which freed pages a reader may still reach.
#[derive(Debug, Default)]
pub(crate) struct SnapshotTracker {
    live: Mutex<BTreeMap<TxId, u64>>,
}

impl SnapshotTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, tx_id: TxId) {
        *self.live.lock().entry(tx_id).or_insert(0) += 1;
    }

    pub(crate) fn unregister(&self, tx_id: TxId) {
        let mut live = self.live.lock();
        if let Some(count) = live.get_mut(&tx_id) {
            *count -= 1;
            if *count == 0 {
                live.remove(&tx_id);
            }
        }
    }

    /// Oldest transaction with a live snapshot.
    pub(crate) fn oldest(&self) -> Option<TxId> {
        self.live.lock().keys().next().copied()
    }
}
