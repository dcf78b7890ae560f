use crate::storage::page::PageId;
use byteorder::{ByteOrder, LittleEndian};
use std::fmt;

/// Locator of a stored record. The index stores and compares it but never
/// interprets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowId {
    pub page_id: PageId,
    pub slot_num: u32,
}

impl RowId {
    /// Encoded width inside a leaf page.
    pub const SIZE: usize = 8;

    pub fn new(page_id: PageId, slot_num: u32) -> Self {
        Self { page_id, slot_num }
    }

    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        LittleEndian::write_u32(&mut buf[0..4], self.page_id.0);
        LittleEndian::write_u32(&mut buf[4..8], self.slot_num);
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            page_id: PageId(LittleEndian::read_u32(&bytes[0..4])),
            slot_num: LittleEndian::read_u32(&bytes[4..8]),
        }
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.page_id, self.slot_num)
    }
}
