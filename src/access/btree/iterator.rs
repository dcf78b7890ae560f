use super::load_leaf;
use crate::access::RowId;
use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::btree_page::BTreeNodePage;
use crate::storage::page::{BTreeLeafPage, Page, PageId};
use anyhow::Result;

/// Forward cursor over the leaf chain.
///
/// The cursor keeps an unpinned copy of its current leaf and fetches the next
/// one when it runs off the end. It assumes the tree does not change shape
/// while it is alive. All exhausted cursors compare equal.
pub struct IndexIterator {
    buffer_pool: BufferPoolManager,
    leaf: Option<BTreeLeafPage>,
    index: usize,
}

impl IndexIterator {
    pub(crate) fn new(buffer_pool: BufferPoolManager, leaf: BTreeLeafPage, index: usize) -> Result<Self> {
        let mut iter = Self {
            buffer_pool,
            leaf: Some(leaf),
            index,
        };
        iter.skip_exhausted_leaves()?;
        Ok(iter)
    }

    pub(crate) fn end(buffer_pool: BufferPoolManager) -> Self {
        Self {
            buffer_pool,
            leaf: None,
            index: 0,
        }
    }

    pub fn is_end(&self) -> bool {
        self.leaf.is_none()
    }

    /// Leaf the cursor points into.
    pub fn page_id(&self) -> Option<PageId> {
        self.leaf.as_ref().map(|leaf| leaf.page_id())
    }

    pub fn key(&self) -> Option<&[u8]> {
        self.leaf.as_ref().map(|leaf| leaf.key_at(self.index))
    }

    pub fn entry(&self) -> Option<(Vec<u8>, RowId)> {
        self.leaf
            .as_ref()
            .map(|leaf| (leaf.key_at(self.index).to_vec(), leaf.value_at(self.index)))
    }

    /// Step to the next entry, following the sibling link at a leaf's end.
    pub fn advance(&mut self) -> Result<()> {
        if self.leaf.is_some() {
            self.index += 1;
            self.skip_exhausted_leaves()?;
        }
        Ok(())
    }

    fn skip_exhausted_leaves(&mut self) -> Result<()> {
        while let Some(leaf) = &self.leaf {
            if self.index < leaf.size() {
                return Ok(());
            }
            self.leaf = match leaf.next_page_id() {
                Some(next) => Some(load_leaf(&self.buffer_pool, next)?),
                None => None,
            };
            self.index = 0;
        }
        Ok(())
    }
}

impl PartialEq for IndexIterator {
    fn eq(&self, other: &Self) -> bool {
        self.page_id() == other.page_id() && self.index == other.index
    }
}

impl Iterator for IndexIterator {
    type Item = Result<(Vec<u8>, RowId)>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.entry()?;
        if let Err(e) = self.advance() {
            self.leaf = None;
            return Some(Err(e));
        }
        Some(Ok(entry))
    }
}
