//! In-memory index pages and their on-disk encoding.
//!
//! Pages of one index live in an [`Arena`] and refer to each other by
//! [`NodeIdx`]. A child slot of an inner page is either a resolved arena
//! index or a page id that has not been loaded yet.
//!
//! Leaf page body:  `[entryCount: i16][key, value] * entryCount`
//! Inner page body: `[entryCount: i16][key] * entryCount [childPageId: i32] * (entryCount + 1)`

use std::ops::{Index, IndexMut};

use crate::common::{
    EntryWidth, ObjDbError, PageId, Result, TxId, PAGE_HEADER_SIZE,
};
use crate::storage::page::{PageReader, PageType, PageWriter};

/// Bytes preceding the entries of an index page
const INDEX_PAGE_OVERHEAD: usize = PAGE_HEADER_SIZE + 2;

const CHILD_SIZE: usize = 4;

/// Page geometry and key policy of one index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexLayout {
    pub page_size: usize,
    pub key_width: EntryWidth,
    pub value_width: EntryWidth,
    pub unique: bool,
    pub max_leaf_n: usize,
    pub min_leaf_n: usize,
    pub max_inner_n: usize,
    pub min_inner_n: usize,
}

impl IndexLayout {
    pub fn new(page_size: usize, key_width: EntryWidth, value_width: EntryWidth, unique: bool) -> Self {
        let entry_size = key_width.bytes() + value_width.bytes();
        let max_leaf_n = (page_size - INDEX_PAGE_OVERHEAD) / entry_size;
        let max_inner_n = (page_size - INDEX_PAGE_OVERHEAD - CHILD_SIZE) / (key_width.bytes() + CHILD_SIZE);

        Self {
            page_size,
            key_width,
            value_width,
            unique,
            max_leaf_n,
            min_leaf_n: max_leaf_n / 2,
            max_inner_n,
            min_inner_n: max_inner_n / 2,
        }
    }

    /// 8-byte keys and values.
    pub fn long(page_size: usize, unique: bool) -> Self {
        Self::new(page_size, EntryWidth::Long, EntryWidth::Long, unique)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeIdx(pub(crate) usize);

/// Reference from an inner page to one of its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildRef {
    Loaded(NodeIdx),
    OnDisk(PageId),
}

/// Write state of a page relative to the last durable snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    /// Identical to its page on disk
    Clean,
    /// Loaded from disk and modified since
    Dirty,
    /// Never written
    New,
}

/// How to pick a child when a separator equals the search key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Descent {
    /// Leftmost child that may hold the key
    Lower,
    /// Rightmost child that may hold the key
    Upper,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeafEntries {
    pub keys: Vec<i64>,
    pub values: Vec<i64>,
}

impl LeafEntries {
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// First position whose key is >= `key`.
    pub fn lower_bound(&self, key: i64) -> usize {
        self.keys.partition_point(|&k| k < key)
    }

    /// First position whose key is > `key`.
    pub fn upper_bound(&self, key: i64) -> usize {
        self.keys.partition_point(|&k| k <= key)
    }

    pub fn insert_at(&mut self, pos: usize, key: i64, value: i64) {
        self.keys.insert(pos, key);
        self.values.insert(pos, value);
    }

    pub fn remove_at(&mut self, pos: usize) -> (i64, i64) {
        (self.keys.remove(pos), self.values.remove(pos))
    }

    /// Moves entries at `at..` into a new leaf.
    pub fn split_off(&mut self, at: usize) -> LeafEntries {
        LeafEntries {
            keys: self.keys.split_off(at),
            values: self.values.split_off(at),
        }
    }

    pub fn append(&mut self, other: &mut LeafEntries) {
        self.keys.append(&mut other.keys);
        self.values.append(&mut other.values);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InnerEntries {
    pub keys: Vec<i64>,
    pub children: Vec<ChildRef>,
}

impl InnerEntries {
    /// Child slot to follow for `key`. Child i holds keys below `keys[i]`,
    /// child i + 1 holds keys from `keys[i]` upwards.
    pub fn child_slot(&self, key: i64, descent: Descent) -> usize {
        match descent {
            Descent::Lower => self.keys.partition_point(|&k| k < key),
            Descent::Upper => self.keys.partition_point(|&k| k <= key),
        }
    }

    pub fn position_of(&self, child: NodeIdx) -> Option<usize> {
        self.children
            .iter()
            .position(|c| *c == ChildRef::Loaded(child))
    }

    /// Inserts `child` right after slot `pos` with `key` as their separator.
    pub fn insert_after(&mut self, pos: usize, key: i64, child: ChildRef) {
        self.keys.insert(pos, key);
        self.children.insert(pos + 1, child);
    }

    /// Removes child slot `pos` together with the separator bounding it.
    pub fn remove_child(&mut self, pos: usize) -> ChildRef {
        if !self.keys.is_empty() {
            self.keys.remove(pos.saturating_sub(1));
        }
        self.children.remove(pos)
    }

    /// Splits an overfull inner page around `keys[at]`, which moves up.
    pub fn split_off(&mut self, at: usize) -> (i64, InnerEntries) {
        let right_keys = self.keys.split_off(at + 1);
        let right_children = self.children.split_off(at + 1);
        // keys[at] is now the last key on the left
        let separator = self.keys.pop().unwrap_or_default();
        (
            separator,
            InnerEntries {
                keys: right_keys,
                children: right_children,
            },
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeBody {
    Leaf(LeafEntries),
    Inner(InnerEntries),
    /// Slot released back to the arena
    Vacant,
}

#[derive(Debug, Clone)]
pub struct Node {
    /// Page holding this node in the last durable snapshot
    pub page_id: Option<PageId>,
    pub state: PageState,
    pub parent: Option<NodeIdx>,
    pub body: NodeBody,
}

impl Node {
    pub fn new_leaf(entries: LeafEntries, parent: Option<NodeIdx>) -> Self {
        Self {
            page_id: None,
            state: PageState::New,
            parent,
            body: NodeBody::Leaf(entries),
        }
    }

    pub fn new_inner(entries: InnerEntries, parent: Option<NodeIdx>) -> Self {
        Self {
            page_id: None,
            state: PageState::New,
            parent,
            body: NodeBody::Inner(entries),
        }
    }

    pub fn loaded(page_id: PageId, body: NodeBody, parent: Option<NodeIdx>) -> Self {
        Self {
            page_id: Some(page_id),
            state: PageState::Clean,
            parent,
            body,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.body, NodeBody::Leaf(_))
    }
}

/// Pages of one index, addressed by `NodeIdx`. Released slots are reused.
#[derive(Debug, Default)]
pub struct Arena {
    nodes: Vec<Node>,
    vacant: Vec<NodeIdx>,
}

impl Arena {
    pub fn alloc(&mut self, node: Node) -> NodeIdx {
        if let Some(idx) = self.vacant.pop() {
            self.nodes[idx.0] = node;
            idx
        } else {
            self.nodes.push(node);
            NodeIdx(self.nodes.len() - 1)
        }
    }

    pub fn release(&mut self, idx: NodeIdx) {
        let node = &mut self.nodes[idx.0];
        node.body = NodeBody::Vacant;
        node.parent = None;
        node.page_id = None;
        self.vacant.push(idx);
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.vacant.clear();
    }

    /// Number of pages currently held in memory.
    pub fn live_count(&self) -> usize {
        self.nodes.len() - self.vacant.len()
    }
}

impl Index<NodeIdx> for Arena {
    type Output = Node;

    fn index(&self, idx: NodeIdx) -> &Node {
        &self.nodes[idx.0]
    }
}

impl IndexMut<NodeIdx> for Arena {
    fn index_mut(&mut self, idx: NodeIdx) -> &mut Node {
        &mut self.nodes[idx.0]
    }
}

fn write_entry(writer: &mut PageWriter, width: EntryWidth, value: i64) -> Result<()> {
    match width {
        EntryWidth::Int => writer.write_i32(value as i32),
        EntryWidth::Long => writer.write_i64(value),
    }
}

fn read_entry(reader: &mut PageReader, width: EntryWidth) -> Result<i64> {
    match width {
        EntryWidth::Int => Ok(reader.read_i32()? as i64),
        EntryWidth::Long => reader.read_i64(),
    }
}

fn entry_count(len: usize) -> Result<i16> {
    i16::try_from(len).map_err(|_| ObjDbError::PageOverflow {
        needed: len,
        available: i16::MAX as usize,
    })
}

pub fn encode_leaf(layout: &IndexLayout, entries: &LeafEntries, tx_id: TxId) -> Result<Vec<u8>> {
    let mut writer = PageWriter::new(layout.page_size, PageType::IndexLeaf, tx_id);
    writer.write_i16(entry_count(entries.len())?)?;
    for (key, value) in entries.keys.iter().zip(&entries.values) {
        write_entry(&mut writer, layout.key_width, *key)?;
        write_entry(&mut writer, layout.value_width, *value)?;
    }
    Ok(writer.finish())
}

pub fn encode_inner(
    layout: &IndexLayout,
    keys: &[i64],
    children: &[PageId],
    tx_id: TxId,
) -> Result<Vec<u8>> {
    if children.len() != keys.len() + 1 {
        return Err(ObjDbError::corrupted(format!(
            "inner page with {} keys has {} children",
            keys.len(),
            children.len()
        )));
    }

    let mut writer = PageWriter::new(layout.page_size, PageType::IndexInner, tx_id);
    writer.write_i16(entry_count(keys.len())?)?;
    for key in keys {
        write_entry(&mut writer, layout.key_width, *key)?;
    }
    for child in children {
        writer.write_page_id(*child)?;
    }
    Ok(writer.finish())
}

/// Decodes an index page; children come back unresolved.
pub fn decode_node(layout: &IndexLayout, page_id: PageId, data: Vec<u8>) -> Result<NodeBody> {
    let mut reader = PageReader::new(page_id, data)?;
    let count = reader.read_i16()?;
    let count = usize::try_from(count)
        .map_err(|_| ObjDbError::corrupted(format!("{} has negative entry count", page_id)))?;

    match reader.page_type() {
        PageType::IndexLeaf => {
            if count > layout.max_leaf_n {
                return Err(ObjDbError::corrupted(format!(
                    "leaf {} holds {} entries, capacity {}",
                    page_id, count, layout.max_leaf_n
                )));
            }
            let mut entries = LeafEntries {
                keys: Vec::with_capacity(count + 1),
                values: Vec::with_capacity(count + 1),
            };
            for _ in 0..count {
                entries.keys.push(read_entry(&mut reader, layout.key_width)?);
                entries.values.push(read_entry(&mut reader, layout.value_width)?);
            }
            Ok(NodeBody::Leaf(entries))
        }
        PageType::IndexInner => {
            if count > layout.max_inner_n {
                return Err(ObjDbError::corrupted(format!(
                    "inner page {} holds {} keys, capacity {}",
                    page_id, count, layout.max_inner_n
                )));
            }
            let mut entries = InnerEntries {
                keys: Vec::with_capacity(count + 1),
                children: Vec::with_capacity(count + 2),
            };
            for _ in 0..count {
                entries.keys.push(read_entry(&mut reader, layout.key_width)?);
            }
            for _ in 0..=count {
                entries.children.push(ChildRef::OnDisk(reader.read_page_id()?));
            }
            Ok(NodeBody::Inner(entries))
        }
        other => Err(ObjDbError::corrupted(format!(
            "{} is a {:?} page, expected an index page",
            page_id, other
        ))),
    }
}
