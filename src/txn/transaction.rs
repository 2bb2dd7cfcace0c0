use tracing::{debug, error};

use crate::common::{EntryWidth, IndexId, ObjDbError, Oid, OidRange, Position, Result, TxId};
use crate::index::{AttributeIndex, SortableKey};

use super::database::{Database, StagedCommit};

/// Lifecycle of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Active,
    Committing,
    Committed,
    Aborted,
}

/// The single writer of a [`Database`].
///
/// Dropping a transaction that has not committed rolls it back. A fatal
/// error from any operation aborts the transaction at once; later calls
/// return [`ObjDbError::TransactionClosed`].
pub struct Transaction<'db> {
    db: &'db mut Database,
    state: TxState,
}

impl<'db> Transaction<'db> {
    pub(crate) fn new(db: &'db mut Database) -> Self {
        Self {
            db,
            state: TxState::Active,
        }
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    pub fn allocate_oids(&mut self, count: u64) -> Result<OidRange> {
        self.ensure_active()?;
        let result = self.db.oid_index.allocate_oids(count);
        self.check(result)
    }

    pub fn add_oid(&mut self, oid: Oid, position: Position) -> Result<()> {
        self.ensure_active()?;
        let result = self.db.oid_index.add_oid(oid, position);
        self.check(result)
    }

    pub fn remove_oid(&mut self, oid: Oid) -> Result<Option<Position>> {
        self.ensure_active()?;
        let result = self.db.oid_index.remove_oid(oid);
        self.check(result)
    }

    pub fn find_oid(&mut self, oid: Oid) -> Result<Option<Position>> {
        self.ensure_active()?;
        let result = self.db.oid_index.find_oid(oid);
        self.check(result)
    }

    /// Entries with ids in `[min, max]`, ascending.
    pub fn iter_oids(&mut self, min: Oid, max: Oid) -> Result<Vec<(Oid, Position)>> {
        self.ensure_active()?;
        let result = self
            .db
            .oid_index
            .iter_oids(min, max)
            .and_then(|entries| entries.collect());
        self.check(result)
    }

    /// Registers a new, empty attribute index.
    pub fn create_index(&mut self, name: &str, unique: bool, key_width: EntryWidth) -> Result<IndexId> {
        self.ensure_active()?;
        let result = self.db.create_index(name, unique, key_width);
        self.check(result)
    }

    /// Removes an attribute index and frees its pages.
    pub fn drop_index(&mut self, name: &str) -> Result<()> {
        self.ensure_active()?;
        let id = self.index_id(name)?;
        let result = self.db.drop_index(id);
        self.check(result)
    }

    pub fn index_id(&self, name: &str) -> Result<IndexId> {
        self.ensure_active()?;
        self.db
            .find_index_id(name)
            .ok_or_else(|| ObjDbError::IndexNameNotFound(name.to_string()))
    }

    fn index(&mut self, id: IndexId) -> Result<&mut AttributeIndex> {
        self.ensure_active()?;
        self.db
            .indexes
            .get_mut(&id)
            .ok_or(ObjDbError::IndexNotFound(id))
    }

    pub fn index_insert<K: SortableKey + ?Sized>(&mut self, id: IndexId, key: &K, oid: Oid) -> Result<()> {
        let result = self.index(id)?.insert(key, oid);
        self.check(result)
    }

    pub fn index_remove<K: SortableKey + ?Sized>(&mut self, id: IndexId, key: &K, oid: Oid) -> Result<bool> {
        let result = self.index(id)?.remove(key, oid);
        self.check(result)
    }

    pub fn index_lookup<K: SortableKey + ?Sized>(&mut self, id: IndexId, key: &K) -> Result<Vec<Oid>> {
        let result = self.index(id)?.lookup(key);
        self.check(result)
    }

    /// `(key, oid)` entries with keys in `[min, max]`, ascending.
    pub fn index_range<K: SortableKey + ?Sized>(
        &mut self,
        id: IndexId,
        min: &K,
        max: &K,
    ) -> Result<Vec<(i64, Oid)>> {
        let result = self
            .index(id)?
            .range(min, max)
            .and_then(|entries| entries.collect());
        self.check(result)
    }

    /// Writes and publishes every change of this transaction.
    pub fn commit(self) -> Result<TxId> {
        self.prepare_commit()?.publish()
    }

    /// Writes and syncs all pages of the commit without publishing it. The
    /// previous snapshot stays current until [`PreparedCommit::publish`].
    pub fn prepare_commit(mut self) -> Result<PreparedCommit<'db>> {
        self.ensure_active()?;
        self.state = TxState::Committing;

        match self.db.stage_commit() {
            Ok(staged) => Ok(PreparedCommit { tx: self, staged }),
            Err(e) => {
                error!(error = %e, "commit failed");
                self.abort();
                Err(e)
            }
        }
    }

    /// Discards every change of this transaction.
    pub fn rollback(mut self) {
        self.abort();
    }

    fn ensure_active(&self) -> Result<()> {
        if self.state == TxState::Active {
            Ok(())
        } else {
            Err(ObjDbError::TransactionClosed)
        }
    }

    /// Aborts on fatal errors.
    fn check<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_fatal() {
                error!(error = %e, "fatal error, aborting transaction");
                self.abort();
            }
        }
        result
    }

    fn abort(&mut self) {
        if let Err(e) = self.db.restore_committed() {
            error!(error = %e, "failed to restore committed state");
        }
        self.state = TxState::Aborted;
        debug!("transaction rolled back");
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if matches!(self.state, TxState::Active | TxState::Committing) {
            self.abort();
        }
    }
}

/// A commit whose pages are durable but not yet reachable from the header.
/// Dropping it abandons the commit.
pub struct PreparedCommit<'db> {
    tx: Transaction<'db>,
    staged: StagedCommit,
}

impl PreparedCommit<'_> {
    pub fn tx_id(&self) -> TxId {
        self.staged.tx_id()
    }

    /// Flips the root slot, making the commit current.
    pub fn publish(self) -> Result<TxId> {
        let PreparedCommit { mut tx, staged } = self;
        match tx.db.publish(staged) {
            Ok(tx_id) => {
                tx.state = TxState::Committed;
                Ok(tx_id)
            }
            Err(e) => {
                error!(error = %e, "publishing commit failed");
                tx.abort();
                Err(e)
            }
        }
    }
}
