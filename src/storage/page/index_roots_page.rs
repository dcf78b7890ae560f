//! Registry mapping index ids to their current root page.
//!
//! Layout (little-endian): record count (u32), then `(index id, root page id)`
//! u32 pairs. An empty tree keeps its record with the invalid page id.

use crate::storage::page::btree_page::{read_u32, write_u32};
use crate::storage::page::{Page, PageId, INDEX_ROOTS_PAGE_ID};
use crate::storage::PAGE_SIZE;

const COUNT_OFFSET: usize = 0;
const RECORDS_OFFSET: usize = 4;
const RECORD_SIZE: usize = 8;

pub const MAX_INDEX_RECORDS: usize = (PAGE_SIZE - RECORDS_OFFSET) / RECORD_SIZE;

pub struct IndexRootsPage {
    data: [u8; PAGE_SIZE],
}

impl Page for IndexRootsPage {
    fn page_id(&self) -> PageId {
        INDEX_ROOTS_PAGE_ID
    }

    fn data(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    fn data_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        &mut self.data
    }
}

impl Default for IndexRootsPage {
    fn default() -> Self {
        Self::from_data([0; PAGE_SIZE])
    }
}

impl IndexRootsPage {
    pub fn from_data(data: [u8; PAGE_SIZE]) -> Self {
        Self { data }
    }

    pub fn count(&self) -> usize {
        read_u32(&self.data, COUNT_OFFSET) as usize
    }

    fn set_count(&mut self, count: usize) {
        write_u32(&mut self.data, COUNT_OFFSET, count as u32);
    }

    fn record_offset(index: usize) -> usize {
        RECORDS_OFFSET + index * RECORD_SIZE
    }

    fn record(&self, index: usize) -> (u32, u32) {
        let offset = Self::record_offset(index);
        (read_u32(&self.data, offset), read_u32(&self.data, offset + 4))
    }

    fn set_record(&mut self, index: usize, index_id: u32, root: u32) {
        let offset = Self::record_offset(index);
        write_u32(&mut self.data, offset, index_id);
        write_u32(&mut self.data, offset + 4, root);
    }

    fn position(&self, index_id: u32) -> Option<usize> {
        (0..self.count()).find(|&i| self.record(i).0 == index_id)
    }

    pub fn contains(&self, index_id: u32) -> bool {
        self.position(index_id).is_some()
    }

    /// Root of `index_id`. The outer `None` means the index is unknown, the
    /// inner one that the tree is empty.
    pub fn get(&self, index_id: u32) -> Option<Option<PageId>> {
        self.position(index_id)
            .map(|i| PageId::decode(self.record(i).1))
    }

    /// Root of `index_id`, treating an unknown index as an empty tree.
    pub fn root_id(&self, index_id: u32) -> Option<PageId> {
        self.get(index_id).flatten()
    }

    /// Add a new record. Fails if the id exists or the page is full.
    pub fn insert(&mut self, index_id: u32, root: Option<PageId>) -> bool {
        let count = self.count();
        if self.contains(index_id) || count >= MAX_INDEX_RECORDS {
            return false;
        }
        self.set_record(count, index_id, PageId::encode(root));
        self.set_count(count + 1);
        true
    }

    /// Change the root of an existing record.
    pub fn update(&mut self, index_id: u32, root: Option<PageId>) -> bool {
        match self.position(index_id) {
            Some(i) => {
                self.set_record(i, index_id, PageId::encode(root));
                true
            }
            None => false,
        }
    }

    pub fn upsert(&mut self, index_id: u32, root: Option<PageId>) -> bool {
        self.update(index_id, root) || self.insert(index_id, root)
    }

    /// Drop a record, keeping the remaining ones packed.
    pub fn delete(&mut self, index_id: u32) -> bool {
        let Some(i) = self.position(index_id) else {
            return false;
        };
        let count = self.count();
        let start = Self::record_offset(i + 1);
        let end = Self::record_offset(count);
        self.data.copy_within(start..end, Self::record_offset(i));
        self.set_count(count - 1);
        true
    }

    pub fn index_ids(&self) -> Vec<u32> {
        (0..self.count()).map(|i| self.record(i).0).collect()
    }
}
