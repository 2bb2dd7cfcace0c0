use crate::common::{ObjDbError, Result};

use super::node::{Descent, NodeBody, NodeIdx};
use super::paged_index::PagedIndex;

/// Position inside a tree plus the inner pages visited to reach it.
///
/// The stack holds `(inner page, child slot taken)` from the root down, so
/// moving to the next leaf never needs sibling links.
#[derive(Debug, Clone)]
pub(crate) struct Cursor {
    stack: Vec<(NodeIdx, usize)>,
    leaf: Option<NodeIdx>,
    pos: usize,
}

impl Cursor {
    /// Positions the cursor on the first entry whose key is >= `key`.
    pub(crate) fn seek(index: &mut PagedIndex, key: i64, descent: Descent) -> Result<Self> {
        let mut stack = Vec::new();
        let mut current = index.root;

        loop {
            let slot = match &index.node(current).body {
                NodeBody::Leaf(entries) => {
                    let pos = entries.lower_bound(key);
                    return Ok(Self {
                        stack,
                        leaf: Some(current),
                        pos,
                    });
                }
                NodeBody::Inner(inner) => inner.child_slot(key, descent),
                NodeBody::Vacant => {
                    return Err(ObjDbError::corrupted("cursor reached a released page"))
                }
            };
            stack.push((current, slot));
            current = index.child(current, slot)?;
        }
    }

    /// Entry under the cursor, stepping over exhausted leaves.
    pub(crate) fn peek(&mut self, index: &mut PagedIndex) -> Result<Option<(i64, i64)>> {
        while let Some(leaf) = self.leaf {
            let entries = index.leaf(leaf)?;
            if self.pos < entries.len() {
                return Ok(Some((entries.keys[self.pos], entries.values[self.pos])));
            }
            self.next_leaf(index)?;
        }
        Ok(None)
    }

    pub(crate) fn advance(&mut self) {
        self.pos += 1;
    }

    pub(crate) fn position(&self) -> Option<(NodeIdx, usize)> {
        self.leaf.map(|leaf| (leaf, self.pos))
    }

    fn next_leaf(&mut self, index: &mut PagedIndex) -> Result<()> {
        while let Some((inner, slot)) = self.stack.pop() {
            if slot + 1 >= index.inner(inner)?.children.len() {
                continue;
            }

            self.stack.push((inner, slot + 1));
            let mut current = index.child(inner, slot + 1)?;
            while !index.node(current).is_leaf() {
                self.stack.push((current, 0));
                current = index.child(current, 0)?;
            }

            self.leaf = Some(current);
            self.pos = 0;
            return Ok(());
        }

        self.leaf = None;
        Ok(())
    }
}

/// Forward-only iterator over `(key, value)` entries up to an inclusive
/// upper key. Once exhausted it stays exhausted.
pub struct IndexIterator<'a> {
    index: &'a mut PagedIndex,
    cursor: Cursor,
    max: i64,
    done: bool,
}

impl<'a> IndexIterator<'a> {
    pub(crate) fn new(index: &'a mut PagedIndex, cursor: Cursor, max: i64) -> Self {
        Self {
            index,
            cursor,
            max,
            done: false,
        }
    }

    fn next_entry(&mut self) -> Result<Option<(i64, i64)>> {
        if self.done {
            return Ok(None);
        }

        match self.cursor.peek(self.index)? {
            Some((key, value)) if key <= self.max => {
                self.cursor.advance();
                Ok(Some((key, value)))
            }
            _ => {
                self.done = true;
                Ok(None)
            }
        }
    }
}

impl Iterator for IndexIterator<'_> {
    type Item = Result<(i64, i64)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
