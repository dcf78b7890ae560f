pub mod bitmap_page;
pub mod btree_internal_page;
pub mod btree_leaf_page;
pub mod btree_page;
pub mod disk_meta_page;
pub mod index_roots_page;

use crate::storage::PAGE_SIZE;
use std::fmt;

/// Logical page id. Physical placement is decided by the disk manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(pub u32);

/// On-disk encoding of "no page".
pub const INVALID_PAGE_ID: u32 = u32::MAX;

/// Reserved for catalog metadata; opaque to the storage core.
pub const CATALOG_META_PAGE_ID: PageId = PageId(0);

/// Holds the index id -> root page id registry.
pub const INDEX_ROOTS_PAGE_ID: PageId = PageId(1);

impl PageId {
    pub(crate) fn encode(page_id: Option<PageId>) -> u32 {
        page_id.map(|p| p.0).unwrap_or(INVALID_PAGE_ID)
    }

    pub(crate) fn decode(raw: u32) -> Option<PageId> {
        if raw == INVALID_PAGE_ID {
            None
        } else {
            Some(PageId(raw))
        }
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A typed page image that can be written back through the buffer pool.
pub trait Page {
    fn page_id(&self) -> PageId;
    fn data(&self) -> &[u8; PAGE_SIZE];
    fn data_mut(&mut self) -> &mut [u8; PAGE_SIZE];
}

pub use bitmap_page::BitmapPage;
pub use btree_internal_page::BTreeInternalPage;
pub use btree_leaf_page::BTreeLeafPage;
pub use btree_page::NodeKind;
pub use disk_meta_page::DiskMetaPage;
pub use index_roots_page::IndexRootsPage;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_id_sentinel_encoding() {
        assert_eq!(PageId::encode(None), INVALID_PAGE_ID);
        assert_eq!(PageId::encode(Some(PageId(7))), 7);
        assert_eq!(PageId::decode(INVALID_PAGE_ID), None);
        assert_eq!(PageId::decode(0), Some(PageId(0)));
    }
}
