use std::sync::Arc;

use tracing::debug;

use crate::common::{IndexTuning, ObjDbError, PageId, Result, TxId, NO_PAGE};
use crate::storage::disk::{DiskManager, DiskScheduler, FreeSpaceManager};

use super::index_iterator::{Cursor, IndexIterator};
use super::node::{
    decode_node, encode_inner, encode_leaf, Arena, ChildRef, Descent, IndexLayout, InnerEntries,
    LeafEntries, Node, NodeBody, NodeIdx, PageState,
};

/// Result of [`PagedIndex::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Unique index only: the key existed with another value
    Replaced { previous: i64 },
    /// The exact entry was already present
    Unchanged,
}

/// Shape of a tree, computed by walking every page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStatistics {
    pub leaf_pages: usize,
    pub inner_pages: usize,
    pub depth: usize,
    pub entries: usize,
}

/// Ordered map from 64-bit keys to 64-bit values stored as a paged B+Tree.
///
/// Pages are loaded lazily into an arena and never modified on disk: every
/// changed page is written to a fresh page id by [`persist`](Self::persist),
/// and the ids it replaces are handed to the free space manager.
pub struct PagedIndex {
    disk: Arc<DiskManager>,
    layout: IndexLayout,
    tuning: IndexTuning,
    arena: Arena,
    pub(crate) root: NodeIdx,
    /// Durable pages dropped from the tree since the last persist
    retired: Vec<PageId>,
}

impl PagedIndex {
    /// Creates an empty index consisting of a single new leaf.
    pub fn create(disk: Arc<DiskManager>, layout: IndexLayout, tuning: IndexTuning) -> Self {
        let mut arena = Arena::default();
        let root = arena.alloc(Node::new_leaf(LeafEntries::default(), None));

        Self {
            disk,
            layout,
            tuning,
            arena,
            root,
            retired: Vec::new(),
        }
    }

    /// Rehydrates an index from a stored root page. `NO_PAGE` yields an empty index.
    pub fn open(
        disk: Arc<DiskManager>,
        layout: IndexLayout,
        tuning: IndexTuning,
        root: PageId,
    ) -> Result<Self> {
        let mut index = Self::create(disk, layout, tuning);
        index.reload(root)?;
        Ok(index)
    }

    /// Drops all in-memory state and starts over from `root`.
    pub fn reload(&mut self, root: PageId) -> Result<()> {
        self.arena.clear();
        self.retired.clear();

        self.root = if root == NO_PAGE {
            self.arena
                .alloc(Node::new_leaf(LeafEntries::default(), None))
        } else {
            self.load_node(root, None)?
        };
        Ok(())
    }

    pub fn layout(&self) -> &IndexLayout {
        &self.layout
    }

    /// Page of the root in the last persisted state, if any.
    pub fn root_page_id(&self) -> Option<PageId> {
        let root = &self.arena[self.root];
        match root.state {
            PageState::Clean => root.page_id,
            _ => None,
        }
    }

    /// Whether anything changed since the index was loaded or last persisted.
    pub fn is_modified(&self) -> bool {
        self.arena[self.root].state != PageState::Clean || !self.retired.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        matches!(&self.arena[self.root].body, NodeBody::Leaf(entries) if entries.is_empty())
    }

    /// Number of pages currently held in memory.
    pub fn cached_pages(&self) -> usize {
        self.arena.live_count()
    }

    pub fn find(&mut self, key: i64) -> Result<Option<i64>> {
        Ok(match self.locate(key, None)? {
            Some((leaf, pos)) => Some(self.leaf(leaf)?.values[pos]),
            None => None,
        })
    }

    /// Every value stored under `key`, in insertion order.
    pub fn find_all(&mut self, key: i64) -> Result<Vec<i64>> {
        let mut cursor = Cursor::seek(self, key, Descent::Lower)?;
        let mut values = Vec::new();
        while let Some((k, v)) = cursor.peek(self)? {
            if k != key {
                break;
            }
            values.push(v);
            cursor.advance();
        }
        Ok(values)
    }

    pub fn contains(&mut self, key: i64, value: i64) -> Result<bool> {
        Ok(self.locate(key, Some(value))?.is_some())
    }

    pub fn insert(&mut self, key: i64, value: i64) -> Result<InsertOutcome> {
        self.check_range(key, value)?;

        if !self.layout.unique && self.locate(key, Some(value))?.is_some() {
            return Ok(InsertOutcome::Unchanged);
        }

        let leaf = self.find_leaf(key, Descent::Upper)?;
        let unique = self.layout.unique;
        let entries = self.leaf_mut(leaf)?;

        if unique {
            let pos = entries.lower_bound(key);
            if pos < entries.len() && entries.keys[pos] == key {
                let previous = entries.values[pos];
                if previous == value {
                    return Ok(InsertOutcome::Unchanged);
                }
                entries.values[pos] = value;
                self.mark_dirty(leaf);
                return Ok(InsertOutcome::Replaced { previous });
            }
        }

        let pos = entries.upper_bound(key);
        entries.insert_at(pos, key, value);
        let len = entries.len();
        self.mark_dirty(leaf);

        if len > self.layout.max_leaf_n {
            self.split_leaf(leaf, pos == len - 1)?;
        }
        Ok(InsertOutcome::Inserted)
    }

    /// Removes the first entry stored under `key`.
    pub fn remove(&mut self, key: i64) -> Result<Option<i64>> {
        match self.locate(key, None)? {
            Some((leaf, pos)) => Ok(Some(self.remove_at(leaf, pos)?.1)),
            None => Ok(None),
        }
    }

    /// Removes the exact `(key, value)` entry.
    pub fn remove_entry(&mut self, key: i64, value: i64) -> Result<bool> {
        match self.locate(key, Some(value))? {
            Some((leaf, pos)) => {
                self.remove_at(leaf, pos)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Ascending cursor over entries with keys in `[min, max]`.
    pub fn iter(&mut self, min: i64, max: i64) -> Result<IndexIterator<'_>> {
        let cursor = Cursor::seek(self, min, Descent::Lower)?;
        Ok(IndexIterator::new(self, cursor, max))
    }

    /// Drops every entry. All durable pages of the tree are retired.
    pub fn clear(&mut self) -> Result<()> {
        let mut pages = Vec::new();
        self.collect_pages(self.root, &mut pages)?;
        debug!(pages = pages.len(), "clearing index");

        self.retired.extend(pages);
        self.arena.clear();
        self.root = self
            .arena
            .alloc(Node::new_leaf(LeafEntries::default(), None));
        Ok(())
    }

    /// Consumes the index, returning every durable page it still owned.
    pub fn destroy(mut self) -> Result<Vec<PageId>> {
        self.clear()?;
        Ok(self.retired)
    }

    pub fn statistics(&mut self) -> Result<IndexStatistics> {
        let mut stats = IndexStatistics::default();
        self.walk(self.root, 1, &mut stats)?;
        Ok(stats)
    }

    /// Writes every changed page to a newly allocated page id and returns
    /// the new root page. Superseded and retired pages are reported free.
    pub fn persist(
        &mut self,
        fsm: &mut FreeSpaceManager,
        scheduler: &DiskScheduler,
        tx_id: TxId,
    ) -> Result<PageId> {
        for page_id in self.retired.drain(..) {
            fsm.report_free(page_id);
        }
        self.persist_node(self.root, fsm, scheduler, tx_id)
    }

    /// Checks ordering, separator bounds, leaf depth and parent links of
    /// the whole tree.
    pub fn verify(&mut self) -> Result<()> {
        let mut leaf_depth = None;
        self.verify_node(self.root, None, None, 1, &mut leaf_depth)
    }

    fn check_range(&self, key: i64, value: i64) -> Result<()> {
        if !self.layout.key_width.fits(key) {
            return Err(ObjDbError::ValueOutOfRange {
                value: key,
                width: self.layout.key_width,
            });
        }
        if !self.layout.value_width.fits(value) {
            return Err(ObjDbError::ValueOutOfRange {
                value,
                width: self.layout.value_width,
            });
        }
        Ok(())
    }

    fn load_node(&mut self, page_id: PageId, parent: Option<NodeIdx>) -> Result<NodeIdx> {
        if page_id == NO_PAGE {
            return Err(ObjDbError::corrupted("child reference to page 0"));
        }
        let mut data = vec![0u8; self.layout.page_size];
        self.disk.read_page(page_id, &mut data)?;
        let body = decode_node(&self.layout, page_id, data)?;
        Ok(self.arena.alloc(Node::loaded(page_id, body, parent)))
    }

    /// Resolves child `slot` of an inner node, loading it if needed.
    pub(crate) fn child(&mut self, parent: NodeIdx, slot: usize) -> Result<NodeIdx> {
        let child_ref = self
            .inner(parent)?
            .children
            .get(slot)
            .copied()
            .ok_or_else(|| ObjDbError::corrupted(format!("missing child slot {}", slot)))?;

        match child_ref {
            ChildRef::Loaded(idx) => Ok(idx),
            ChildRef::OnDisk(page_id) => {
                let idx = self.load_node(page_id, Some(parent))?;
                self.inner_mut(parent)?.children[slot] = ChildRef::Loaded(idx);
                Ok(idx)
            }
        }
    }

    pub(crate) fn node(&self, idx: NodeIdx) -> &Node {
        &self.arena[idx]
    }

    pub(crate) fn leaf(&self, idx: NodeIdx) -> Result<&LeafEntries> {
        match &self.arena[idx].body {
            NodeBody::Leaf(entries) => Ok(entries),
            _ => Err(ObjDbError::corrupted("expected a leaf page")),
        }
    }

    fn leaf_mut(&mut self, idx: NodeIdx) -> Result<&mut LeafEntries> {
        match &mut self.arena[idx].body {
            NodeBody::Leaf(entries) => Ok(entries),
            _ => Err(ObjDbError::corrupted("expected a leaf page")),
        }
    }

    pub(crate) fn inner(&self, idx: NodeIdx) -> Result<&InnerEntries> {
        match &self.arena[idx].body {
            NodeBody::Inner(entries) => Ok(entries),
            _ => Err(ObjDbError::corrupted("expected an inner page")),
        }
    }

    fn inner_mut(&mut self, idx: NodeIdx) -> Result<&mut InnerEntries> {
        match &mut self.arena[idx].body {
            NodeBody::Inner(entries) => Ok(entries),
            _ => Err(ObjDbError::corrupted("expected an inner page")),
        }
    }

    fn find_leaf(&mut self, key: i64, descent: Descent) -> Result<NodeIdx> {
        let mut current = self.root;
        loop {
            let slot = match &self.arena[current].body {
                NodeBody::Leaf(_) => return Ok(current),
                NodeBody::Inner(inner) => inner.child_slot(key, descent),
                NodeBody::Vacant => return Err(ObjDbError::corrupted("descended into a released page")),
            };
            current = self.child(current, slot)?;
        }
    }

    /// Leaf and position of the first entry matching `key` (and `value`, if given).
    fn locate(&mut self, key: i64, value: Option<i64>) -> Result<Option<(NodeIdx, usize)>> {
        let descent = if self.layout.unique {
            Descent::Upper
        } else {
            Descent::Lower
        };

        let mut cursor = Cursor::seek(self, key, descent)?;
        while let Some((k, v)) = cursor.peek(self)? {
            if k != key {
                return Ok(None);
            }
            if value.map_or(true, |expected| expected == v) {
                return Ok(cursor.position());
            }
            cursor.advance();
        }
        Ok(None)
    }

    /// Marks a node and its ancestors as changed. Ancestors of a Dirty or
    /// New node are already marked.
    fn mark_dirty(&mut self, idx: NodeIdx) {
        let mut current = Some(idx);
        while let Some(idx) = current {
            let node = &mut self.arena[idx];
            if node.state != PageState::Clean {
                break;
            }
            node.state = PageState::Dirty;
            current = node.parent;
        }
    }

    fn retire(&mut self, idx: NodeIdx) {
        if let Some(page_id) = self.arena[idx].page_id {
            self.retired.push(page_id);
        }
        self.arena.release(idx);
    }

    fn split_leaf(&mut self, leaf: NodeIdx, appended: bool) -> Result<()> {
        let at = if self.tuning.append_split && appended {
            self.layout.max_leaf_n
        } else {
            self.layout.min_leaf_n
        };

        let right_entries = self.leaf_mut(leaf)?.split_off(at);
        let separator = right_entries.keys[0];
        let parent = self.arena[leaf].parent;
        let right = self.arena.alloc(Node::new_leaf(right_entries, parent));

        debug!(separator, appended, "leaf split");
        self.insert_into_parent(leaf, separator, right)
    }

    fn split_inner(&mut self, node: NodeIdx) -> Result<()> {
        let at = self.layout.min_inner_n;
        let (separator, right_entries) = self.inner_mut(node)?.split_off(at);

        let moved: Vec<NodeIdx> = right_entries
            .children
            .iter()
            .filter_map(|child| match child {
                ChildRef::Loaded(idx) => Some(*idx),
                ChildRef::OnDisk(_) => None,
            })
            .collect();

        let parent = self.arena[node].parent;
        let right = self.arena.alloc(Node::new_inner(right_entries, parent));
        for child in moved {
            self.arena[child].parent = Some(right);
        }

        debug!(separator, "inner split");
        self.insert_into_parent(node, separator, right)
    }

    /// Links `right` into the tree directly after `left`.
    fn insert_into_parent(&mut self, left: NodeIdx, separator: i64, right: NodeIdx) -> Result<()> {
        let parent = match self.arena[left].parent {
            Some(parent) => parent,
            None => {
                let root = self.arena.alloc(Node::new_inner(
                    InnerEntries {
                        keys: vec![separator],
                        children: vec![ChildRef::Loaded(left), ChildRef::Loaded(right)],
                    },
                    None,
                ));
                self.arena[left].parent = Some(root);
                self.arena[right].parent = Some(root);
                self.root = root;
                debug!("new root");
                return Ok(());
            }
        };

        let inner = self.inner_mut(parent)?;
        let pos = inner
            .position_of(left)
            .ok_or_else(|| ObjDbError::corrupted("split page not found in its parent"))?;
        inner.insert_after(pos, separator, ChildRef::Loaded(right));
        let len = inner.keys.len();

        self.arena[right].parent = Some(parent);
        self.mark_dirty(parent);

        if len > self.layout.max_inner_n {
            self.split_inner(parent)?;
        }
        Ok(())
    }

    fn remove_at(&mut self, leaf: NodeIdx, pos: usize) -> Result<(i64, i64)> {
        let removed = self.leaf_mut(leaf)?.remove_at(pos);
        self.mark_dirty(leaf);

        let len = self.leaf(leaf)?.len();
        let parent = match self.arena[leaf].parent {
            Some(parent) => parent,
            // a root leaf may become empty
            None => return Ok(removed),
        };

        if len == 0 {
            self.detach(leaf)?;
        } else if self.should_merge(len) {
            self.merge_with_previous(leaf, parent)?;
        }
        Ok(removed)
    }

    fn should_merge(&self, len: usize) -> bool {
        let tuning = &self.tuning;
        tuning.merge_divisor > 0
            && tuning.merge_modulo > 0
            && len < self.layout.min_leaf_n / tuning.merge_divisor
            && len % tuning.merge_modulo == 0
    }

    /// Moves the entries of `leaf` into its left sibling when they fit one page.
    fn merge_with_previous(&mut self, leaf: NodeIdx, parent: NodeIdx) -> Result<()> {
        let pos = self
            .inner(parent)?
            .position_of(leaf)
            .ok_or_else(|| ObjDbError::corrupted("leaf not found in its parent"))?;
        if pos == 0 {
            return Ok(());
        }

        let previous = self.child(parent, pos - 1)?;
        let combined = self.leaf(previous)?.len() + self.leaf(leaf)?.len();
        if combined > self.layout.max_leaf_n {
            return Ok(());
        }

        let mut moved = std::mem::take(self.leaf_mut(leaf)?);
        self.leaf_mut(previous)?.append(&mut moved);
        self.mark_dirty(previous);

        self.inner_mut(parent)?.remove_child(pos);
        self.retire(leaf);
        self.mark_dirty(parent);

        debug!(combined, "leaf merged into predecessor");
        self.rebalance_inner(parent)
    }

    /// Unlinks an empty page from its parent, collapsing emptied ancestors.
    fn detach(&mut self, idx: NodeIdx) -> Result<()> {
        let parent = self.arena[idx]
            .parent
            .ok_or_else(|| ObjDbError::corrupted("cannot detach the root"))?;

        let inner = self.inner_mut(parent)?;
        let pos = inner
            .position_of(idx)
            .ok_or_else(|| ObjDbError::corrupted("detached page not found in its parent"))?;
        inner.remove_child(pos);

        self.retire(idx);
        self.mark_dirty(parent);
        self.rebalance_inner(parent)
    }

    fn rebalance_inner(&mut self, idx: NodeIdx) -> Result<()> {
        if self.arena[idx].parent.is_none() {
            return self.collapse_root();
        }
        if self.inner(idx)?.children.is_empty() {
            return self.detach(idx);
        }
        Ok(())
    }

    /// Replaces an inner root holding fewer than two children.
    fn collapse_root(&mut self) -> Result<()> {
        loop {
            let count = match &self.arena[self.root].body {
                NodeBody::Inner(inner) => inner.children.len(),
                _ => return Ok(()),
            };

            let old_root = self.root;
            match count {
                0 => {
                    self.retire(old_root);
                    self.root = self
                        .arena
                        .alloc(Node::new_leaf(LeafEntries::default(), None));
                    debug!("root collapsed to an empty leaf");
                    return Ok(());
                }
                1 => {
                    let child = self.child(old_root, 0)?;
                    self.retire(old_root);
                    self.arena[child].parent = None;
                    self.root = child;
                    debug!("root collapsed into its only child");
                }
                _ => return Ok(()),
            }
        }
    }

    fn persist_node(
        &mut self,
        idx: NodeIdx,
        fsm: &mut FreeSpaceManager,
        scheduler: &DiskScheduler,
        tx_id: TxId,
    ) -> Result<PageId> {
        let node = &self.arena[idx];
        if node.state == PageState::Clean {
            return node
                .page_id
                .ok_or_else(|| ObjDbError::corrupted("clean page without a page id"));
        }

        let data = match &node.body {
            NodeBody::Leaf(entries) => encode_leaf(&self.layout, entries, tx_id)?,
            NodeBody::Inner(inner) => {
                let keys = inner.keys.clone();
                let children = inner.children.clone();
                let mut child_ids = Vec::with_capacity(children.len());
                for child in children {
                    child_ids.push(match child {
                        ChildRef::OnDisk(page_id) => page_id,
                        ChildRef::Loaded(child) => self.persist_node(child, fsm, scheduler, tx_id)?,
                    });
                }
                encode_inner(&self.layout, &keys, &child_ids, tx_id)?
            }
            NodeBody::Vacant => return Err(ObjDbError::corrupted("released page is still linked")),
        };

        if let Some(old) = self.arena[idx].page_id {
            fsm.report_free(old);
        }
        let page_id = fsm.allocate();
        scheduler.schedule_write(page_id, data)?;

        let node = &mut self.arena[idx];
        node.page_id = Some(page_id);
        node.state = PageState::Clean;
        Ok(page_id)
    }

    fn child_count(&self, idx: NodeIdx) -> usize {
        match &self.arena[idx].body {
            NodeBody::Inner(inner) => inner.children.len(),
            _ => 0,
        }
    }

    fn collect_pages(&mut self, idx: NodeIdx, pages: &mut Vec<PageId>) -> Result<()> {
        for slot in 0..self.child_count(idx) {
            let child = self.child(idx, slot)?;
            self.collect_pages(child, pages)?;
        }
        if let Some(page_id) = self.arena[idx].page_id {
            pages.push(page_id);
        }
        Ok(())
    }

    fn walk(&mut self, idx: NodeIdx, depth: usize, stats: &mut IndexStatistics) -> Result<()> {
        stats.depth = stats.depth.max(depth);
        match &self.arena[idx].body {
            NodeBody::Leaf(entries) => {
                stats.leaf_pages += 1;
                stats.entries += entries.len();
                Ok(())
            }
            NodeBody::Inner(_) => {
                stats.inner_pages += 1;
                for slot in 0..self.child_count(idx) {
                    let child = self.child(idx, slot)?;
                    self.walk(child, depth + 1, stats)?;
                }
                Ok(())
            }
            NodeBody::Vacant => Err(ObjDbError::corrupted("released page is still linked")),
        }
    }

    fn verify_node(
        &mut self,
        idx: NodeIdx,
        low: Option<i64>,
        high: Option<i64>,
        depth: usize,
        leaf_depth: &mut Option<usize>,
    ) -> Result<()> {
        let unique = self.layout.unique;
        let in_bounds = |key: i64| {
            low.map_or(true, |low| key >= low)
                && high.map_or(true, |high| if unique { key < high } else { key <= high })
        };

        match &self.arena[idx].body {
            NodeBody::Leaf(entries) => {
                if entries.is_empty() && idx != self.root {
                    return Err(ObjDbError::corrupted("empty leaf below the root"));
                }
                if entries.len() > self.layout.max_leaf_n {
                    return Err(ObjDbError::corrupted("overfull leaf"));
                }
                let ordered = entries.keys.windows(2).all(|pair| {
                    if unique {
                        pair[0] < pair[1]
                    } else {
                        pair[0] <= pair[1]
                    }
                });
                if !ordered {
                    return Err(ObjDbError::corrupted("leaf keys out of order"));
                }
                if let Some(key) = entries.keys.iter().copied().find(|k| !in_bounds(*k)) {
                    return Err(ObjDbError::corrupted(format!(
                        "leaf key {} outside its separators",
                        key
                    )));
                }
                match *leaf_depth {
                    Some(expected) if expected != depth => {
                        Err(ObjDbError::corrupted("leaves at different depths"))
                    }
                    _ => {
                        *leaf_depth = Some(depth);
                        Ok(())
                    }
                }
            }
            NodeBody::Inner(inner) => {
                let keys = inner.keys.clone();
                if inner.children.len() != keys.len() + 1 {
                    return Err(ObjDbError::corrupted("inner page child count mismatch"));
                }
                if !keys.windows(2).all(|pair| pair[0] <= pair[1]) {
                    return Err(ObjDbError::corrupted("separators out of order"));
                }
                for slot in 0..=keys.len() {
                    let child = self.child(idx, slot)?;
                    if self.arena[child].parent != Some(idx) {
                        return Err(ObjDbError::corrupted("child with a stale parent link"));
                    }
                    let child_low = if slot == 0 { low } else { Some(keys[slot - 1]) };
                    let child_high = keys.get(slot).copied().or(high);
                    self.verify_node(child, child_low, child_high, depth + 1, leaf_depth)?;
                }
                Ok(())
            }
            NodeBody::Vacant => Err(ObjDbError::corrupted("released page is still linked")),
        }
    }
}
