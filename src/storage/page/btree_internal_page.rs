use crate::storage::page::btree_page::{
    self, init_header, read_u32, write_u32, BTreeNodePage, KeyComparator, NodeKind,
    BTREE_HEADER_SIZE,
};
use crate::storage::page::{Page, PageId};
use crate::storage::PAGE_SIZE;
use std::cmp::Ordering;

const CHILD_ID_SIZE: usize = 4;

/// Internal node image: `(separator key, child page id)` pairs.
///
/// The key in slot 0 is never compared; every key under child 0 sorts below
/// the key in slot 1.
pub struct BTreeInternalPage {
    data: [u8; PAGE_SIZE],
}

impl Page for BTreeInternalPage {
    fn page_id(&self) -> PageId {
        btree_page::header_page_id(&self.data)
    }

    fn data(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    fn data_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        &mut self.data
    }
}

impl BTreeNodePage for BTreeInternalPage {}

impl BTreeInternalPage {
    pub fn new(page_id: PageId, parent: Option<PageId>, key_size: usize, max_size: usize) -> Self {
        let mut data = [0u8; PAGE_SIZE];
        init_header(&mut data, NodeKind::Internal, page_id, parent, key_size, max_size);
        Self { data }
    }

    pub fn from_data(data: [u8; PAGE_SIZE]) -> Self {
        Self { data }
    }

    fn pair_size(&self) -> usize {
        self.key_size() + CHILD_ID_SIZE
    }

    fn pair_offset(&self, index: usize) -> usize {
        BTREE_HEADER_SIZE + index * self.pair_size()
    }

    pub fn key_at(&self, index: usize) -> &[u8] {
        let offset = self.pair_offset(index);
        &self.data[offset..offset + self.key_size()]
    }

    pub fn set_key_at(&mut self, index: usize, key: &[u8]) {
        let offset = self.pair_offset(index);
        let key_size = self.key_size();
        self.data[offset..offset + key_size].copy_from_slice(key);
    }

    pub fn value_at(&self, index: usize) -> PageId {
        PageId(read_u32(&self.data, self.pair_offset(index) + self.key_size()))
    }

    fn set_value_at(&mut self, index: usize, child: PageId) {
        let offset = self.pair_offset(index) + self.key_size();
        write_u32(&mut self.data, offset, child.0);
    }

    /// Slot holding `child`, if any.
    pub fn value_index(&self, child: PageId) -> Option<usize> {
        (0..self.size()).find(|&i| self.value_at(i) == child)
    }

    pub fn children(&self) -> Vec<PageId> {
        (0..self.size()).map(|i| self.value_at(i)).collect()
    }

    fn shift_pairs(&mut self, from: usize, to: usize, count: usize) {
        if count == 0 {
            return;
        }
        let src = self.pair_offset(from);
        let len = count * self.pair_size();
        let dst = self.pair_offset(to);
        self.data.copy_within(src..src + len, dst);
    }

    /// Child whose subtree may contain `key`: the last slot whose separator is
    /// not greater than `key`, falling back to child 0.
    pub fn lookup(&self, key: &[u8], cmp: KeyComparator) -> PageId {
        let (mut lo, mut hi) = (1, self.size());
        while lo < hi {
            let mid = (lo + hi) / 2;
            match cmp(self.key_at(mid), key) {
                Ordering::Greater => hi = mid,
                _ => lo = mid + 1,
            }
        }
        self.value_at(lo - 1)
    }

    /// Fill a fresh root after its only child split in two.
    pub fn populate_new_root(&mut self, old_child: PageId, key: &[u8], new_child: PageId) {
        self.set_value_at(0, old_child);
        self.set_key_at(1, key);
        self.set_value_at(1, new_child);
        self.set_size(2);
    }

    /// Insert `(key, new_child)` right after the slot pointing at `old_child`.
    /// Returns the size after insertion.
    pub fn insert_node_after(&mut self, old_child: PageId, key: &[u8], new_child: PageId) -> usize {
        let size = self.size();
        let index = self.value_index(old_child).map(|i| i + 1).unwrap_or(size);
        self.shift_pairs(index, index + 1, size - index);
        self.set_key_at(index, key);
        self.set_value_at(index, new_child);
        self.set_size(size + 1);
        size + 1
    }

    pub fn remove(&mut self, index: usize) {
        let size = self.size();
        if index >= size {
            return;
        }
        self.shift_pairs(index + 1, index, size - index - 1);
        self.set_size(size - 1);
    }

    /// Empty a single-child root and hand back that child.
    pub fn remove_and_return_only_child(&mut self) -> PageId {
        debug_assert_eq!(self.size(), 1);
        let child = self.value_at(0);
        self.set_size(0);
        child
    }

    /// Append `count` pairs copied from `src` starting at `from`. Returns the
    /// children now owned by this page; their parent links must be rewritten.
    fn copy_n_from(&mut self, src: &BTreeInternalPage, from: usize, count: usize) -> Vec<PageId> {
        let size = self.size();
        let pair_size = self.pair_size();
        let src_start = src.pair_offset(from);
        let dst_start = self.pair_offset(size);
        self.data[dst_start..dst_start + count * pair_size]
            .copy_from_slice(&src.data[src_start..src_start + count * pair_size]);
        self.set_size(size + count);
        (size..size + count).map(|i| self.value_at(i)).collect()
    }

    /// Split: move the upper half of the pairs to an empty `recipient`. The key
    /// left in the recipient's slot 0 is the separator to push up.
    pub fn move_half_to(&mut self, recipient: &mut BTreeInternalPage) -> Vec<PageId> {
        let size = self.size();
        let moved = size / 2;
        let adopted = recipient.copy_n_from(self, size - moved, moved);
        self.set_size(size - moved);
        adopted
    }

    /// Merge into the left neighbour. `middle_key` is the parent's separator for
    /// this page; it becomes the key of the first moved child.
    pub fn move_all_to(&mut self, recipient: &mut BTreeInternalPage, middle_key: &[u8]) -> Vec<PageId> {
        self.set_key_at(0, middle_key);
        let adopted = recipient.copy_n_from(self, 0, self.size());
        self.set_size(0);
        adopted
    }

    /// Rotate the first child into the end of the left neighbour.
    pub fn move_first_to_end_of(&mut self, recipient: &mut BTreeInternalPage, middle_key: &[u8]) -> PageId {
        self.set_key_at(0, middle_key);
        recipient.copy_n_from(self, 0, 1);
        let child = self.value_at(0);
        self.remove(0);
        child
    }

    /// Rotate the last child into the front of the right neighbour.
    pub fn move_last_to_front_of(&mut self, recipient: &mut BTreeInternalPage, middle_key: &[u8]) -> PageId {
        let size = self.size();
        let child = self.value_at(size - 1);
        let last_key = self.key_at(size - 1).to_vec();

        recipient.set_key_at(0, middle_key);
        let recipient_size = recipient.size();
        recipient.shift_pairs(0, 1, recipient_size);
        recipient.set_value_at(0, child);
        recipient.set_key_at(0, &last_key);
        recipient.set_size(recipient_size + 1);

        self.set_size(size - 1);
        child
    }
}
