//! Storage layer implementation for emberdb.
//!
//! This module provides the foundation for persistent data storage using a page-based
//! architecture. Key components:
//!
//! - **Page**: Fixed-size (4KB) blocks of data, the basic unit of I/O
//! - **DiskManager**: Reads/writes pages against the backing file and tracks free
//!   slots with one bitmap page per extent
//! - **BufferPoolManager**: In-memory cache of pages with a pluggable eviction policy
//! - **B+Tree pages**: Fixed-slot node layouts used by the index layer
//!
//! There is no write-ahead log: every page write is synced on its own and a crash
//! between two dependent writes can leave the file inconsistent.

pub mod buffer;
pub mod disk;
pub mod error;
pub mod page;

pub use buffer::{BufferPoolManager, PageReadGuard, PageWriteGuard};
pub use disk::{DiskManager, PAGE_SIZE};
pub use error::{StorageError, StorageResult};
pub use page::{Page, PageId};
