use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::common::{PageId, TxId, HEADER_PAGE_ID};

/// Tracks which page ids may be handed out again, and when.
///
/// Ids reported free by the running transaction stay *pending* until that
/// transaction has durably committed: the previous snapshot, still named by
/// the alternate root slot, may reference them. `commit()` then *holds* them
/// under the freeing transaction, and `release()` makes them eligible once
/// no live snapshot older than that transaction remains.
#[derive(Debug, Clone)]
pub struct FreeSpaceManager {
    /// Ids that `allocate()` may return
    eligible: BTreeSet<PageId>,
    /// Ids freed by the running transaction
    pending: BTreeSet<PageId>,
    /// Ids freed by committed transactions, keyed by the freeing transaction
    held: BTreeMap<TxId, BTreeSet<PageId>>,
    /// Largest page id ever handed out
    high_water_mark: PageId,
    /// Allocations since the last commit
    allocated: u32,
}

impl FreeSpaceManager {
    /// Creates the free space manager of an empty file holding only the header page.
    pub fn new() -> Self {
        Self::from_persisted(HEADER_PAGE_ID, Vec::new())
    }

    /// Restores the state recorded in a committed snapshot. Every persisted
    /// id is eligible: the transaction that freed it has committed.
    pub fn from_persisted(high_water_mark: PageId, free_pages: Vec<PageId>) -> Self {
        Self {
            eligible: free_pages.into_iter().collect(),
            pending: BTreeSet::new(),
            held: BTreeMap::new(),
            high_water_mark,
            allocated: 0,
        }
    }

    /// Returns the lowest eligible free id, or grows the file by one page.
    pub fn allocate(&mut self) -> PageId {
        self.allocated += 1;

        if let Some(page_id) = self.eligible.pop_first() {
            return page_id;
        }

        self.high_water_mark = PageId::new(self.high_water_mark.as_u32() + 1);
        self.high_water_mark
    }

    /// Marks a page as no longer referenced by the running transaction.
    pub fn report_free(&mut self, page_id: PageId) {
        if page_id == HEADER_PAGE_ID || page_id > self.high_water_mark {
            warn!(%page_id, high_water_mark = %self.high_water_mark, "ignoring free of unallocated page");
            return;
        }
        if self.eligible.contains(&page_id)
            || self.held.values().any(|ids| ids.contains(&page_id))
            || !self.pending.insert(page_id)
        {
            warn!(%page_id, "ignoring double free");
            return;
        }
        debug!(%page_id, "page freed, pending until commit");
    }

    /// Holds the pending ids under `tx_id` once that transaction is durable.
    pub fn commit(&mut self, tx_id: TxId) {
        let freed = self.pending.len();
        if freed > 0 {
            self.held
                .entry(tx_id)
                .or_default()
                .append(&mut self.pending);
        }
        self.allocated = 0;
        debug!(tx_id, freed, held = self.held_count(), "free space committed");
    }

    /// Makes held ids eligible when no snapshot can reach them any more.
    ///
    /// Ids freed by transaction `t` belong to snapshots older than `t`, so
    /// they are released once `oldest_snapshot >= t`. `None` means no
    /// snapshot is alive and releases everything.
    pub fn release(&mut self, oldest_snapshot: Option<TxId>) {
        let freeable: Vec<TxId> = match oldest_snapshot {
            Some(oldest) => self.held.range(..=oldest).map(|(tx_id, _)| *tx_id).collect(),
            None => self.held.keys().copied().collect(),
        };

        for tx_id in freeable {
            if let Some(mut ids) = self.held.remove(&tx_id) {
                self.eligible.append(&mut ids);
            }
        }
    }

    /// All ids that are free once the running transaction commits, sorted.
    /// After a restart no snapshot is alive, so held ids are included.
    pub fn persisted_ids(&self) -> Vec<PageId> {
        let mut ids: BTreeSet<PageId> = self.eligible.union(&self.pending).copied().collect();
        for held in self.held.values() {
            ids.extend(held.iter().copied());
        }
        ids.into_iter().collect()
    }

    pub fn high_water_mark(&self) -> PageId {
        self.high_water_mark
    }

    pub fn eligible_count(&self) -> usize {
        self.eligible.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Ids waiting for older snapshots to go away.
    pub fn held_count(&self) -> usize {
        self.held.values().map(|ids| ids.len()).sum()
    }

    pub fn is_pending(&self, page_id: PageId) -> bool {
        self.pending.contains(&page_id)
    }

    /// Number of pages allocated since the last commit.
    pub fn allocated_since_commit(&self) -> u32 {
        self.allocated
    }
}

impl Default for FreeSpaceManager {
    fn default() -> Self {
        Self::new()
    }
}
