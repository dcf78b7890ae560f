//! Allocation bitmap covering one extent.
//!
//! Layout (little-endian):
//!
//! | offset | size | field                                   |
//! |--------|------|-----------------------------------------|
//! | 0      | 4    | number of allocated slots               |
//! | 4      | 4    | hint: offset of the next free slot      |
//! | 8      | ..   | one bit per slot, 1 = allocated         |

use crate::storage::PAGE_SIZE;
use byteorder::{ByteOrder, LittleEndian};

const ALLOCATED_OFFSET: usize = 0;
const NEXT_FREE_OFFSET: usize = 4;
const BITMAP_HEADER_SIZE: usize = 8;

/// Bytes available for the bitmap itself.
pub const BITMAP_BYTES: usize = PAGE_SIZE - BITMAP_HEADER_SIZE;

/// Number of data slots one bitmap page can track.
pub const BITMAP_CAPACITY: u32 = (BITMAP_BYTES * 8) as u32;

pub struct BitmapPage {
    data: [u8; PAGE_SIZE],
}

impl Default for BitmapPage {
    fn default() -> Self {
        Self::new()
    }
}

impl BitmapPage {
    pub fn new() -> Self {
        Self {
            data: [0; PAGE_SIZE],
        }
    }

    pub fn from_data(data: [u8; PAGE_SIZE]) -> Self {
        Self { data }
    }

    pub fn data(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    pub fn allocated_count(&self) -> u32 {
        LittleEndian::read_u32(&self.data[ALLOCATED_OFFSET..ALLOCATED_OFFSET + 4])
    }

    fn set_allocated_count(&mut self, count: u32) {
        LittleEndian::write_u32(
            &mut self.data[ALLOCATED_OFFSET..ALLOCATED_OFFSET + 4],
            count,
        );
    }

    pub fn next_free_hint(&self) -> u32 {
        LittleEndian::read_u32(&self.data[NEXT_FREE_OFFSET..NEXT_FREE_OFFSET + 4])
    }

    fn set_next_free_hint(&mut self, offset: u32) {
        LittleEndian::write_u32(&mut self.data[NEXT_FREE_OFFSET..NEXT_FREE_OFFSET + 4], offset);
    }

    fn byte(&self, index: usize) -> u8 {
        self.data[BITMAP_HEADER_SIZE + index]
    }

    fn byte_mut(&mut self, index: usize) -> &mut u8 {
        &mut self.data[BITMAP_HEADER_SIZE + index]
    }

    pub fn is_full(&self) -> bool {
        self.allocated_count() >= BITMAP_CAPACITY
    }

    /// Claim the slot under the free hint. Returns `None` when every slot is taken.
    pub fn allocate(&mut self) -> Option<u32> {
        if self.is_full() {
            return None;
        }

        // The hint can be stale only if the page was written by something else.
        if !self.is_free(self.next_free_hint()) {
            self.advance_next_free();
        }

        let offset = self.next_free_hint();
        *self.byte_mut(offset as usize / 8) |= 1 << (offset % 8);
        self.set_allocated_count(self.allocated_count() + 1);
        self.advance_next_free();
        Some(offset)
    }

    /// Release a slot. Returns `false` if it was already free.
    pub fn deallocate(&mut self, offset: u32) -> bool {
        if offset >= BITMAP_CAPACITY || self.is_free(offset) {
            return false;
        }

        *self.byte_mut(offset as usize / 8) &= !(1 << (offset % 8));
        self.set_allocated_count(self.allocated_count() - 1);
        self.set_next_free_hint(offset);
        true
    }

    pub fn is_free(&self, offset: u32) -> bool {
        if offset >= BITMAP_CAPACITY {
            return false;
        }
        self.byte(offset as usize / 8) & (1 << (offset % 8)) == 0
    }

    /// Move the hint forward to the next clear bit, skipping whole bytes that are
    /// fully allocated and wrapping at the end of the bitmap.
    fn advance_next_free(&mut self) {
        if self.is_full() {
            return;
        }

        let mut slot = self.next_free_hint();
        while !self.is_free(slot) {
            slot += 1;
            if slot % 8 == 0 {
                let mut index = (slot as usize / 8) % BITMAP_BYTES;
                while self.byte(index) == 0xFF {
                    index = (index + 1) % BITMAP_BYTES;
                }
                slot = (index * 8) as u32;
            }
        }
        self.set_next_free_hint(slot);
    }
}
