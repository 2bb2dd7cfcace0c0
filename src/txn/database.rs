use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::common::{
    DatabaseConfig, EntryWidth, IndexId, ObjDbError, PageId, Result, TxId, FIRST_OID,
    HEADER_PAGE_ID, NO_PAGE,
};
use crate::index::{AttributeIndex, IndexLayout, IndexStatistics, OidIndex, PagedIndex};
use crate::storage::disk::{DiskManager, DiskScheduler, FreeSpaceManager};
use crate::storage::page::free_list_page;
use crate::storage::page::{FileHeader, MetaPage, RootSlot};

use super::snapshot::Snapshot;
use super::tracker::SnapshotTracker;
use super::transaction::Transaction;

/// The last durable state, restored on rollback.
#[derive(Debug, Clone)]
struct Committed {
    meta: MetaPage,
    meta_page: PageId,
    free_chain: Vec<PageId>,
    fsm: FreeSpaceManager,
}

/// Pages of a commit that are written and synced but not yet published.
#[derive(Debug)]
pub(crate) struct StagedCommit {
    meta: MetaPage,
    meta_page: PageId,
    free_chain: Vec<PageId>,
}

impl StagedCommit {
    pub(crate) fn tx_id(&self) -> TxId {
        self.meta.tx_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseStatistics {
    pub tx_id: TxId,
    pub page_size: usize,
    pub high_water_mark: PageId,
    pub free_pages: usize,
    pub last_oid: u64,
    pub oid_index: IndexStatistics,
    pub attribute_indexes: Vec<(String, IndexStatistics)>,
}

/// An open database file.
///
/// Holds the in-memory state of the single writer. Changes are made through
/// a [`Transaction`] obtained from [`begin`](Self::begin); read-only views of
/// the last commit come from [`snapshot`](Self::snapshot).
pub struct Database {
    disk: Arc<DiskManager>,
    scheduler: DiskScheduler,
    config: DatabaseConfig,
    header: FileHeader,
    committed: Committed,
    tracker: Arc<SnapshotTracker>,
    pub(crate) fsm: FreeSpaceManager,
    pub(crate) oid_index: OidIndex,
    pub(crate) indexes: BTreeMap<IndexId, AttributeIndex>,
    pub(crate) next_index_id: u32,
}

impl Database {
    /// Creates a new database in an empty (or missing) file and commits an
    /// empty snapshot.
    pub fn create<P: AsRef<Path>>(path: P, config: DatabaseConfig) -> Result<Self> {
        config.validate()?;
        let page_size = config.page_size;
        let disk = Arc::new(DiskManager::new(path.as_ref(), page_size)?);
        if disk.num_pages() > 0 {
            return Err(ObjDbError::InvalidDatabaseFile(format!(
                "{} is not empty",
                disk.db_path()
            )));
        }

        let header = FileHeader::new(page_size);
        disk.write_page(HEADER_PAGE_ID, &header.encode()?)?;

        let meta = MetaPage::empty(FIRST_OID - 1);
        let fsm = FreeSpaceManager::new();
        let mut db = Self::assemble(disk, config, header, meta, NO_PAGE, Vec::new(), fsm)?;

        let staged = db.stage_commit()?;
        db.publish(staged)?;
        info!(path = %db.disk.db_path(), page_size, "database created");
        Ok(db)
    }

    /// Opens an existing database. The page size comes from the file header.
    pub fn open<P: AsRef<Path>>(path: P, config: DatabaseConfig) -> Result<Self> {
        config.validate()?;
        let page_size = FileHeader::probe_page_size(path.as_ref())?;
        let disk = Arc::new(DiskManager::new(path.as_ref(), page_size)?);

        let mut data = vec![0u8; page_size];
        disk.read_page(HEADER_PAGE_ID, &mut data)?;
        let mut header = FileHeader::decode(data)?;

        let (meta, meta_page) = match Self::read_meta(&disk, header.active_slot()) {
            Ok(meta) => (meta, header.active_slot().meta_page),
            Err(e) => {
                let fallback = header.inactive_slot();
                warn!(error = %e, meta_page = %fallback.meta_page, "active root slot unreadable, trying the other slot");
                let meta = Self::read_meta(&disk, fallback)?;
                header.flip();
                (meta, fallback.meta_page)
            }
        };

        let (free_ids, free_chain) = free_list_page::read_chain(&disk, meta.free_list_head)?;
        let fsm = FreeSpaceManager::from_persisted(meta.high_water_mark, free_ids);

        info!(
            path = %disk.db_path(),
            page_size,
            tx_id = meta.tx_id,
            slot = header.active_index(),
            "database opened"
        );
        Self::assemble(disk, config, header, meta, meta_page, free_chain, fsm)
    }

    fn read_meta(disk: &DiskManager, slot: RootSlot) -> Result<MetaPage> {
        if slot.is_empty() {
            return Err(ObjDbError::InvalidDatabaseFile(
                "root slot is empty".to_string(),
            ));
        }
        let mut data = vec![0u8; disk.page_size()];
        disk.read_page(slot.meta_page, &mut data)?;
        let meta = MetaPage::decode(slot.meta_page, data)?;
        if meta.tx_id != slot.tx_id {
            return Err(ObjDbError::corrupted(format!(
                "meta page {} belongs to tx {}, slot expects {}",
                slot.meta_page, meta.tx_id, slot.tx_id
            )));
        }
        Ok(meta)
    }

    fn assemble(
        disk: Arc<DiskManager>,
        config: DatabaseConfig,
        header: FileHeader,
        meta: MetaPage,
        meta_page: PageId,
        free_chain: Vec<PageId>,
        fsm: FreeSpaceManager,
    ) -> Result<Self> {
        let scheduler = DiskScheduler::new(Arc::clone(&disk));
        let oid_index = Self::open_oid_index(&disk, &config, &meta)?;
        let indexes = Self::open_attribute_indexes(&disk, &config, &meta)?;

        Ok(Self {
            scheduler,
            header,
            next_index_id: meta.next_index_id,
            committed: Committed {
                meta,
                meta_page,
                free_chain,
                fsm: fsm.clone(),
            },
            tracker: Arc::new(SnapshotTracker::new()),
            fsm,
            oid_index,
            indexes,
            config,
            disk,
        })
    }

    fn open_oid_index(
        disk: &Arc<DiskManager>,
        config: &DatabaseConfig,
        meta: &MetaPage,
    ) -> Result<OidIndex> {
        let layout = IndexLayout::long(disk.page_size(), true);
        let index = PagedIndex::open(Arc::clone(disk), layout, config.index, meta.oid_root)?;
        Ok(OidIndex::new(index, meta.last_oid))
    }

    fn open_attribute_indexes(
        disk: &Arc<DiskManager>,
        config: &DatabaseConfig,
        meta: &MetaPage,
    ) -> Result<BTreeMap<IndexId, AttributeIndex>> {
        let mut indexes = BTreeMap::new();
        for descriptor in &meta.indexes {
            let layout = IndexLayout::new(
                disk.page_size(),
                descriptor.key_width,
                descriptor.value_width,
                descriptor.unique,
            );
            let index = PagedIndex::open(Arc::clone(disk), layout, config.index, descriptor.root)?;
            indexes.insert(
                descriptor.id,
                AttributeIndex::new(descriptor.id, descriptor.name.clone(), index),
            );
        }
        Ok(indexes)
    }

    /// Starts the single writing transaction.
    pub fn begin(&mut self) -> Transaction<'_> {
        debug!(tx_id = self.last_tx_id() + 1, "transaction started");
        Transaction::new(self)
    }

    /// Read-only view of the last committed state. Pages the snapshot may
    /// reach are not reused while it is alive.
    pub fn snapshot(&self) -> Result<Snapshot> {
        let meta = &self.committed.meta;
        let oid_index = Self::open_oid_index(&self.disk, &self.config, meta)?;
        let indexes = Self::open_attribute_indexes(&self.disk, &self.config, meta)?;
        Ok(Snapshot::new(
            meta.tx_id,
            oid_index,
            indexes,
            Arc::clone(&self.tracker),
        ))
    }

    /// Id of the last committed transaction.
    pub fn last_tx_id(&self) -> TxId {
        self.committed.meta.tx_id
    }

    pub fn page_size(&self) -> usize {
        self.disk.page_size()
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn free_space(&self) -> &FreeSpaceManager {
        &self.fsm
    }

    pub fn disk(&self) -> &Arc<DiskManager> {
        &self.disk
    }

    /// Names of the registered attribute indexes.
    pub fn index_names(&self) -> Vec<String> {
        self.indexes
            .values()
            .map(|index| index.name().to_string())
            .collect()
    }

    /// Walks every tree. Loads all pages of every index into memory.
    pub fn statistics(&mut self) -> Result<DatabaseStatistics> {
        let oid_index = self.oid_index.statistics()?;
        let mut attribute_indexes = Vec::with_capacity(self.indexes.len());
        for index in self.indexes.values_mut() {
            attribute_indexes.push((index.name().to_string(), index.statistics()?));
        }

        Ok(DatabaseStatistics {
            tx_id: self.last_tx_id(),
            page_size: self.page_size(),
            high_water_mark: self.fsm.high_water_mark(),
            free_pages: self.fsm.eligible_count()
                + self.fsm.pending_count()
                + self.fsm.held_count(),
            last_oid: self.oid_index.last_oid(),
            oid_index,
            attribute_indexes,
        })
    }

    pub(crate) fn find_index_id(&self, name: &str) -> Option<IndexId> {
        self.indexes
            .values()
            .find(|index| index.name() == name)
            .map(|index| index.id())
    }

    pub(crate) fn create_index(
        &mut self,
        name: &str,
        unique: bool,
        key_width: EntryWidth,
    ) -> Result<IndexId> {
        if self.find_index_id(name).is_some() {
            return Err(ObjDbError::IndexAlreadyExists(name.to_string()));
        }

        let id = IndexId::new(self.next_index_id);
        let layout = IndexLayout::new(self.page_size(), key_width, EntryWidth::Long, unique);
        let index = PagedIndex::create(Arc::clone(&self.disk), layout, self.config.index);
        let index = AttributeIndex::new(id, name, index);
        self.check_meta_capacity(&index)?;

        self.next_index_id += 1;
        self.indexes.insert(id, index);
        debug!(%id, name, unique, "attribute index created");
        Ok(id)
    }

    /// Every registered index must fit the single meta page, or no later
    /// commit could be written.
    fn check_meta_capacity(&self, added: &AttributeIndex) -> Result<()> {
        let indexes = self
            .indexes
            .values()
            .chain(std::iter::once(added))
            .map(|index| index.descriptor(NO_PAGE))
            .collect();
        let meta = MetaPage {
            indexes,
            ..self.committed.meta.clone()
        };

        match meta.encode(self.page_size()) {
            Ok(_) => Ok(()),
            Err(ObjDbError::PageOverflow { needed, available }) => Err(ObjDbError::MetaPageFull {
                name: added.name().to_string(),
                needed,
                available,
            }),
            Err(e) => Err(e),
        }
    }

    pub(crate) fn drop_index(&mut self, id: IndexId) -> Result<()> {
        let index = self.indexes.remove(&id).ok_or(ObjDbError::IndexNotFound(id))?;
        let name = index.name().to_string();

        let pages = index.into_paged().destroy()?;
        for page_id in &pages {
            self.fsm.report_free(*page_id);
        }
        debug!(%id, name, pages = pages.len(), "attribute index dropped");
        Ok(())
    }

    /// Writes every changed page, the free list and a new meta page, and
    /// syncs them. The header is left untouched.
    pub(crate) fn stage_commit(&mut self) -> Result<StagedCommit> {
        let tx_id = self.last_tx_id() + 1;
        let page_size = self.page_size();

        // snapshots dropped since the last commit give their pages back
        self.fsm.release(self.tracker.oldest());

        let oid_root = self
            .oid_index
            .index_mut()
            .persist(&mut self.fsm, &self.scheduler, tx_id)?;

        let mut descriptors = Vec::with_capacity(self.indexes.len());
        for index in self.indexes.values_mut() {
            let root = index
                .index_mut()
                .persist(&mut self.fsm, &self.scheduler, tx_id)?;
            descriptors.push(index.descriptor(root));
        }

        // the previous meta page and free list are superseded
        for page_id in &self.committed.free_chain {
            self.fsm.report_free(*page_id);
        }
        if self.committed.meta_page != NO_PAGE {
            self.fsm.report_free(self.committed.meta_page);
        }

        let meta_page = self.fsm.allocate();
        let mut free_chain = Vec::new();
        while free_chain.len() < free_list_page::pages_needed(self.fsm.persisted_ids().len(), page_size) {
            free_chain.push(self.fsm.allocate());
        }
        let free_ids = self.fsm.persisted_ids();

        let meta = MetaPage {
            tx_id,
            last_oid: self.oid_index.last_oid(),
            high_water_mark: self.fsm.high_water_mark(),
            free_list_head: free_chain.first().copied().unwrap_or(NO_PAGE),
            oid_root,
            next_index_id: self.next_index_id,
            indexes: descriptors,
        };

        for (page_id, data) in free_list_page::encode_chain(&free_ids, &free_chain, page_size, tx_id)? {
            self.scheduler.schedule_write(page_id, data)?;
        }
        self.scheduler.schedule_write(meta_page, meta.encode(page_size)?)?;
        self.scheduler.flush()?;
        if self.config.sync_on_commit {
            self.disk.sync()?;
        }

        debug!(
            tx_id,
            %meta_page,
            free_pages = free_ids.len(),
            high_water_mark = %meta.high_water_mark,
            "commit staged"
        );
        Ok(StagedCommit {
            meta,
            meta_page,
            free_chain,
        })
    }

    /// Points the inactive root slot at the staged meta page and flips it.
    pub(crate) fn publish(&mut self, staged: StagedCommit) -> Result<TxId> {
        let tx_id = staged.tx_id();
        let mut header = self.header.clone();

        header.set_inactive_slot(RootSlot {
            meta_page: staged.meta_page,
            tx_id,
        });
        self.write_header(&header)?;

        header.flip();
        self.write_header(&header)?;

        self.header = header;
        self.fsm.commit(tx_id);
        self.fsm.release(self.tracker.oldest());
        self.next_index_id = staged.meta.next_index_id;
        self.committed = Committed {
            meta: staged.meta,
            meta_page: staged.meta_page,
            free_chain: staged.free_chain,
            fsm: self.fsm.clone(),
        };

        debug!(tx_id, slot = self.header.active_index(), "commit published");
        Ok(tx_id)
    }

    fn write_header(&self, header: &FileHeader) -> Result<()> {
        self.disk.write_page(HEADER_PAGE_ID, &header.encode()?)?;
        if self.config.sync_on_commit {
            self.disk.sync()?;
        }
        Ok(())
    }

    /// Discards every uncommitted change.
    pub(crate) fn restore_committed(&mut self) -> Result<()> {
        let meta = &self.committed.meta;
        self.fsm = self.committed.fsm.clone();
        self.next_index_id = meta.next_index_id;
        self.oid_index.reload(meta.oid_root, meta.last_oid)?;
        self.indexes = Self::open_attribute_indexes(&self.disk, &self.config, meta)?;
        debug!(tx_id = meta.tx_id, "restored committed state");
        Ok(())
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.disk.db_path())
            .field("page_size", &self.page_size())
            .field("tx_id", &self.last_tx_id())
            .field("indexes", &self.indexes.len())
            .finish()
    }
}
