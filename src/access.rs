//! Access layer over the buffer pool.
//!
//! - **BPlusTree**: unique-key index mapping fixed-width keys to row ids
//! - **IndexIterator**: forward cursor over the leaf chain
//! - **RowId**: opaque `(page id, slot)` locator stored as index values
//!
//! The tree never touches the disk manager; every node is read and written
//! through page guards.

pub mod btree;
pub mod row_id;

pub use btree::{BPlusTree, BTreeStatistics};
pub use row_id::RowId;
