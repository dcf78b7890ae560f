//! Disk access: fixed-size block I/O and bitmap-based page allocation.

pub mod disk_manager;

pub use disk_manager::{DiskManager, EXTENT_CAPACITY, MAX_EXTENTS};

/// Size of every page, on disk and in a buffer frame.
pub const PAGE_SIZE: usize = 4096;
