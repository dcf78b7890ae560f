//! Global allocation counters stored at physical slot 0.
//!
//! Layout (little-endian): allocated page count (u32), used extent count (u32),
//! then one u32 per extent holding how many of its slots are in use.

use crate::storage::PAGE_SIZE;
use byteorder::{ByteOrder, LittleEndian};

const ALLOCATED_PAGES_OFFSET: usize = 0;
const USED_EXTENTS_OFFSET: usize = 4;
const EXTENT_TABLE_OFFSET: usize = 8;

/// Number of extents whose usage fits in the meta page.
pub const META_MAX_EXTENTS: u32 = ((PAGE_SIZE - EXTENT_TABLE_OFFSET) / 4) as u32;

pub struct DiskMetaPage {
    data: [u8; PAGE_SIZE],
}

impl Default for DiskMetaPage {
    fn default() -> Self {
        Self::from_data([0; PAGE_SIZE])
    }
}

impl DiskMetaPage {
    pub fn from_data(data: [u8; PAGE_SIZE]) -> Self {
        Self { data }
    }

    pub fn data(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    pub fn allocated_pages(&self) -> u32 {
        LittleEndian::read_u32(&self.data[ALLOCATED_PAGES_OFFSET..])
    }

    pub fn used_extents(&self) -> u32 {
        LittleEndian::read_u32(&self.data[USED_EXTENTS_OFFSET..])
    }

    pub fn extent_used_pages(&self, extent: u32) -> u32 {
        let offset = Self::extent_offset(extent);
        LittleEndian::read_u32(&self.data[offset..offset + 4])
    }

    /// Account for one page claimed in `extent`.
    pub fn record_allocation(&mut self, extent: u32) {
        let used = self.extent_used_pages(extent);
        if used == 0 {
            self.set_used_extents(self.used_extents() + 1);
        }
        self.set_extent_used_pages(extent, used + 1);
        self.set_allocated_pages(self.allocated_pages() + 1);
    }

    /// Account for one page released in `extent`.
    pub fn record_deallocation(&mut self, extent: u32) {
        let used = self.extent_used_pages(extent).saturating_sub(1);
        self.set_extent_used_pages(extent, used);
        self.set_allocated_pages(self.allocated_pages().saturating_sub(1));
        if used == 0 {
            self.set_used_extents(self.used_extents().saturating_sub(1));
        }
    }

    fn set_allocated_pages(&mut self, count: u32) {
        LittleEndian::write_u32(&mut self.data[ALLOCATED_PAGES_OFFSET..], count);
    }

    fn set_used_extents(&mut self, count: u32) {
        LittleEndian::write_u32(&mut self.data[USED_EXTENTS_OFFSET..], count);
    }

    fn set_extent_used_pages(&mut self, extent: u32, count: u32) {
        let offset = Self::extent_offset(extent);
        LittleEndian::write_u32(&mut self.data[offset..offset + 4], count);
    }

    fn extent_offset(extent: u32) -> usize {
        debug_assert!(extent < META_MAX_EXTENTS);
        EXTENT_TABLE_OFFSET + extent as usize * 4
    }
}
