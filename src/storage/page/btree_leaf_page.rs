use crate::access::RowId;
use crate::storage::page::btree_page::{
    self, init_header, read_u32, write_u32, BTreeNodePage, KeyComparator, NodeKind,
    BTREE_HEADER_SIZE,
};
use crate::storage::page::{Page, PageId};
use crate::storage::PAGE_SIZE;
use std::cmp::Ordering;

const NEXT_PAGE_OFFSET: usize = BTREE_HEADER_SIZE;
const BTREE_LEAF_HEADER_SIZE: usize = BTREE_HEADER_SIZE + 4;

/// Leaf node image: sorted `(key, row id)` pairs plus a link to the next leaf.
pub struct BTreeLeafPage {
    data: [u8; PAGE_SIZE],
}

impl Page for BTreeLeafPage {
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

impl BTreeNodePage for BTreeLeafPage {}

impl BTreeLeafPage {
    pub fn new(page_id: PageId, parent: Option<PageId>, key_size: usize, max_size: usize) -> Self {
        let mut data = [0u8; PAGE_SIZE];
        init_header(&mut data, NodeKind::Leaf, page_id, parent, key_size, max_size);
        let mut page = Self { data };
        page.set_next_page_id(None);
        page
    }

    pub fn from_data(data: [u8; PAGE_SIZE]) -> Self {
        Self { data }
    }

    pub fn next_page_id(&self) -> Option<PageId> {
        PageId::decode(read_u32(&self.data, NEXT_PAGE_OFFSET))
    }

    pub fn set_next_page_id(&mut self, next: Option<PageId>) {
        write_u32(&mut self.data, NEXT_PAGE_OFFSET, PageId::encode(next));
    }

    fn pair_size(&self) -> usize {
        self.key_size() + RowId::SIZE
    }

    fn pair_offset(&self, index: usize) -> usize {
        BTREE_LEAF_HEADER_SIZE + index * self.pair_size()
    }

    pub fn key_at(&self, index: usize) -> &[u8] {
        let offset = self.pair_offset(index);
        &self.data[offset..offset + self.key_size()]
    }

    fn set_key_at(&mut self, index: usize, key: &[u8]) {
        let offset = self.pair_offset(index);
        let key_size = self.key_size();
        self.data[offset..offset + key_size].copy_from_slice(key);
    }

    pub fn value_at(&self, index: usize) -> RowId {
        let offset = self.pair_offset(index) + self.key_size();
        RowId::from_bytes(&self.data[offset..offset + RowId::SIZE])
    }

    fn set_value_at(&mut self, index: usize, value: RowId) {
        let offset = self.pair_offset(index) + self.key_size();
        self.data[offset..offset + RowId::SIZE].copy_from_slice(&value.to_bytes());
    }

    pub fn item(&self, index: usize) -> (&[u8], RowId) {
        (self.key_at(index), self.value_at(index))
    }

    /// Move `count` pairs starting at `from` so they start at `to`.
    fn shift_pairs(&mut self, from: usize, to: usize, count: usize) {
        if count == 0 {
            return;
        }
        let src = self.pair_offset(from);
        let len = count * self.pair_size();
        let dst = self.pair_offset(to);
        self.data.copy_within(src..src + len, dst);
    }

    /// First index whose key is not less than `key` (`size()` if there is none).
    pub fn key_index(&self, key: &[u8], cmp: KeyComparator) -> usize {
        let (mut lo, mut hi) = (0, self.size());
        while lo < hi {
            let mid = (lo + hi) / 2;
            match cmp(self.key_at(mid), key) {
                Ordering::Less => lo = mid + 1,
                _ => hi = mid,
            }
        }
        lo
    }

    pub fn lookup(&self, key: &[u8], cmp: KeyComparator) -> Option<RowId> {
        let index = self.key_index(key, cmp);
        if index < self.size() && cmp(self.key_at(index), key) == Ordering::Equal {
            Some(self.value_at(index))
        } else {
            None
        }
    }

    /// Insert keeping keys sorted. Returns the size after insertion.
    pub fn insert(&mut self, key: &[u8], value: RowId, cmp: KeyComparator) -> usize {
        let size = self.size();
        let index = self.key_index(key, cmp);
        self.shift_pairs(index, index + 1, size - index);
        self.set_key_at(index, key);
        self.set_value_at(index, value);
        self.set_size(size + 1);
        size + 1
    }

    /// Delete `key` if present. Returns the size after the call.
    pub fn remove_and_delete_record(&mut self, key: &[u8], cmp: KeyComparator) -> usize {
        let size = self.size();
        let index = self.key_index(key, cmp);
        if index < size && cmp(self.key_at(index), key) == Ordering::Equal {
            self.shift_pairs(index + 1, index, size - index - 1);
            self.set_size(size - 1);
            return size - 1;
        }
        size
    }

    /// Append `count` pairs copied from `src` starting at `from`.
    fn copy_n_from(&mut self, src: &BTreeLeafPage, from: usize, count: usize) {
        let size = self.size();
        let pair_size = self.pair_size();
        let src_start = src.pair_offset(from);
        let dst_start = self.pair_offset(size);
        self.data[dst_start..dst_start + count * pair_size]
            .copy_from_slice(&src.data[src_start..src_start + count * pair_size]);
        self.set_size(size + count);
    }

    /// Split: move the upper half of the pairs to an empty `recipient`.
    pub fn move_half_to(&mut self, recipient: &mut BTreeLeafPage) {
        let size = self.size();
        let moved = size / 2;
        recipient.copy_n_from(self, size - moved, moved);
        self.set_size(size - moved);
    }

    /// Merge: append every pair to `recipient`, which must be the left neighbour.
    pub fn move_all_to(&mut self, recipient: &mut BTreeLeafPage) {
        recipient.copy_n_from(self, 0, self.size());
        self.set_size(0);
    }

    pub fn move_first_to_end_of(&mut self, recipient: &mut BTreeLeafPage) {
        let size = self.size();
        if size == 0 {
            return;
        }
        recipient.copy_n_from(self, 0, 1);
        self.shift_pairs(1, 0, size - 1);
        self.set_size(size - 1);
    }

    pub fn move_last_to_front_of(&mut self, recipient: &mut BTreeLeafPage) {
        let size = self.size();
        if size == 0 {
            return;
        }
        let (key, value) = (self.key_at(size - 1).to_vec(), self.value_at(size - 1));
        recipient.copy_first_from(&key, value);
        self.set_size(size - 1);
    }

    fn copy_first_from(&mut self, key: &[u8], value: RowId) {
        let size = self.size();
        self.shift_pairs(0, 1, size);
        self.set_key_at(0, key);
        self.set_value_at(0, value);
        self.set_size(size + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::btree::key::{bytewise, IndexKey};

    fn rid(n: u32) -> RowId {
        RowId::new(PageId(n), n)
    }

    fn leaf_with(page_id: u32, keys: &[i64]) -> BTreeLeafPage {
        let mut leaf = BTreeLeafPage::new(PageId(page_id), None, 8, 6);
        for &k in keys {
            leaf.insert(&IndexKey::from_i64(k), rid(k as u32), bytewise);
        }
        leaf
    }

    fn keys_of(leaf: &BTreeLeafPage) -> Vec<i64> {
        (0..leaf.size())
            .map(|i| IndexKey::to_i64(leaf.key_at(i)))
            .collect()
    }

    #[test]
    fn test_new_leaf_header() {
        let leaf = BTreeLeafPage::new(PageId(3), Some(PageId(2)), 8, 6);
        assert_eq!(leaf.page_id(), PageId(3));
        assert_eq!(leaf.parent_page_id(), Some(PageId(2)));
        assert_eq!(leaf.kind(), Some(NodeKind::Leaf));
        assert_eq!(leaf.size(), 0);
        assert_eq!(leaf.max_size(), 6);
        assert_eq!(leaf.min_size(), 3);
        assert_eq!(leaf.next_page_id(), None);
        assert!(!leaf.is_root());
    }

    #[test]
    fn test_insert_keeps_order() {
        let leaf = leaf_with(1, &[5, 1, 4, -2, 3]);
        assert_eq!(keys_of(&leaf), vec![-2, 1, 3, 4, 5]);
        assert_eq!(leaf.value_at(1), rid(1));
    }

    #[test]
    fn test_lookup_and_key_index() {
        let leaf = leaf_with(1, &[10, 20, 30]);
        assert_eq!(leaf.lookup(&IndexKey::from_i64(20), bytewise), Some(rid(20)));
        assert_eq!(leaf.lookup(&IndexKey::from_i64(25), bytewise), None);
        assert_eq!(leaf.key_index(&IndexKey::from_i64(25), bytewise), 2);
        assert_eq!(leaf.key_index(&IndexKey::from_i64(5), bytewise), 0);
        assert_eq!(leaf.key_index(&IndexKey::from_i64(35), bytewise), 3);
    }

    #[test]
    fn test_remove() {
        let mut leaf = leaf_with(1, &[1, 2, 3]);
        assert_eq!(leaf.remove_and_delete_record(&IndexKey::from_i64(2), bytewise), 2);
        assert_eq!(keys_of(&leaf), vec![1, 3]);
        // Absent key leaves the page untouched
        assert_eq!(leaf.remove_and_delete_record(&IndexKey::from_i64(9), bytewise), 2);
    }

    #[test]
    fn test_move_half_to() {
        let mut left = leaf_with(1, &[1, 2, 3, 4, 5]);
        let mut right = BTreeLeafPage::new(PageId(2), None, 8, 6);
        left.move_half_to(&mut right);
        assert_eq!(keys_of(&left), vec![1, 2, 3]);
        assert_eq!(keys_of(&right), vec![4, 5]);
        assert_eq!(right.value_at(0), rid(4));
    }

    #[test]
    fn test_move_all_to() {
        let mut left = leaf_with(1, &[1, 2]);
        let mut right = leaf_with(2, &[7, 8]);
        right.move_all_to(&mut left);
        assert_eq!(keys_of(&left), vec![1, 2, 7, 8]);
        assert_eq!(right.size(), 0);
    }

    #[test]
    fn test_redistribute_moves() {
        let mut left = leaf_with(1, &[1, 2, 3]);
        let mut right = leaf_with(2, &[7, 8]);

        left.move_last_to_front_of(&mut right);
        assert_eq!(keys_of(&left), vec![1, 2]);
        assert_eq!(keys_of(&right), vec![3, 7, 8]);

        right.move_first_to_end_of(&mut left);
        assert_eq!(keys_of(&left), vec![1, 2, 3]);
        assert_eq!(keys_of(&right), vec![7, 8]);
        assert_eq!(left.value_at(2), rid(3));
    }

    #[test]
    fn test_next_page_link() {
        let mut leaf = leaf_with(1, &[1]);
        leaf.set_next_page_id(Some(PageId(0)));
        assert_eq!(leaf.next_page_id(), Some(PageId(0)));
        leaf.set_next_page_id(None);
        assert_eq!(leaf.next_page_id(), None);
    }
}
