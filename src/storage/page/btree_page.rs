//! Header shared by B+Tree internal and leaf pages.
//!
//! Layout (little-endian, 24 bytes):
//!
//! | offset | size | field            |
//! |--------|------|------------------|
//! | 0      | 4    | node kind        |
//! | 4      | 4    | key size         |
//! | 8      | 4    | current size     |
//! | 12     | 4    | max size         |
//! | 16     | 4    | this page's id   |
//! | 20     | 4    | parent page id   |
//!
//! Leaf pages append a 4-byte next-sibling page id.

use crate::access::RowId;
use crate::storage::page::{Page, PageId};
use crate::storage::PAGE_SIZE;
use byteorder::{ByteOrder, LittleEndian};
use std::cmp::Ordering;

pub const BTREE_HEADER_SIZE: usize = 24;

const KIND_OFFSET: usize = 0;
const KEY_SIZE_OFFSET: usize = 4;
const SIZE_OFFSET: usize = 8;
const MAX_SIZE_OFFSET: usize = 12;
const PAGE_ID_OFFSET: usize = 16;
const PARENT_OFFSET: usize = 20;

/// Ordering used for every key comparison inside a tree.
pub type KeyComparator = fn(&[u8], &[u8]) -> Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Leaf = 1,
    Internal = 2,
}

impl NodeKind {
    /// Kind stored in a raw page image, `None` if the page is not a tree node.
    pub fn of(data: &[u8]) -> Option<NodeKind> {
        match read_u32(data, KIND_OFFSET) {
            1 => Some(NodeKind::Leaf),
            2 => Some(NodeKind::Internal),
            _ => None,
        }
    }
}

/// Smallest capacity a tree accepts. At this size a split leaves two entries
/// on each side, so a non-root internal node always keeps two children and an
/// underfull node always has a sibling in its parent.
pub const MIN_NODE_CAPACITY: usize = 4;

/// Node capacity for a given key width. Both node kinds use the same value.
/// Widths past `MAX_KEY_SIZE` yield less than `MIN_NODE_CAPACITY`.
pub fn node_capacity(key_size: usize) -> usize {
    let usable = PAGE_SIZE - BTREE_HEADER_SIZE - 4;
    (usable / (key_size + RowId::SIZE)).saturating_sub(1)
}

pub(crate) fn read_u32(data: &[u8], offset: usize) -> u32 {
    LittleEndian::read_u32(&data[offset..offset + 4])
}

pub(crate) fn write_u32(data: &mut [u8], offset: usize, val: u32) {
    LittleEndian::write_u32(&mut data[offset..offset + 4], val);
}

/// Rewrite the parent link of a node in place, whatever its kind.
pub fn set_parent_in_place(data: &mut [u8], parent: Option<PageId>) {
    write_u32(data, PARENT_OFFSET, PageId::encode(parent));
}

pub(crate) fn init_header(
    data: &mut [u8; PAGE_SIZE],
    kind: NodeKind,
    page_id: PageId,
    parent: Option<PageId>,
    key_size: usize,
    max_size: usize,
) {
    write_u32(data, KIND_OFFSET, kind as u32);
    write_u32(data, KEY_SIZE_OFFSET, key_size as u32);
    write_u32(data, SIZE_OFFSET, 0);
    write_u32(data, MAX_SIZE_OFFSET, max_size as u32);
    write_u32(data, PAGE_ID_OFFSET, page_id.0);
    write_u32(data, PARENT_OFFSET, PageId::encode(parent));
}

pub(crate) fn header_page_id(data: &[u8; PAGE_SIZE]) -> PageId {
    PageId(read_u32(data, PAGE_ID_OFFSET))
}

/// Header accessors common to both node kinds.
pub trait BTreeNodePage: Page {
    fn kind(&self) -> Option<NodeKind> {
        NodeKind::of(self.data())
    }

    fn key_size(&self) -> usize {
        read_u32(self.data(), KEY_SIZE_OFFSET) as usize
    }

    fn size(&self) -> usize {
        read_u32(self.data(), SIZE_OFFSET) as usize
    }

    fn set_size(&mut self, size: usize) {
        write_u32(self.data_mut(), SIZE_OFFSET, size as u32);
    }

    fn max_size(&self) -> usize {
        read_u32(self.data(), MAX_SIZE_OFFSET) as usize
    }

    fn min_size(&self) -> usize {
        self.max_size() / 2
    }

    fn parent_page_id(&self) -> Option<PageId> {
        PageId::decode(read_u32(self.data(), PARENT_OFFSET))
    }

    fn set_parent_page_id(&mut self, parent: Option<PageId>) {
        set_parent_in_place(self.data_mut(), parent);
    }

    fn is_root(&self) -> bool {
        self.parent_page_id().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_capacity() {
        // (4096 - 28) / (8 + 8) - 1
        assert_eq!(node_capacity(8), 253);
        assert_eq!(node_capacity(805), MIN_NODE_CAPACITY);
        assert_eq!(node_capacity(806), MIN_NODE_CAPACITY - 1);
        assert_eq!(node_capacity(4096), 0);
    }

    #[test]
    fn test_node_kind_of_zeroed_page() {
        let data = [0u8; PAGE_SIZE];
        assert_eq!(NodeKind::of(&data), None);
    }

    #[test]
    fn test_set_parent_in_place() {
        let mut data = [0u8; PAGE_SIZE];
        init_header(&mut data, NodeKind::Leaf, PageId(4), None, 8, 10);
        set_parent_in_place(&mut data, Some(PageId(9)));
        assert_eq!(read_u32(&data, PARENT_OFFSET), 9);
        assert_eq!(header_page_id(&data), PageId(4));
        assert_eq!(NodeKind::of(&data), Some(NodeKind::Leaf));
    }
}
