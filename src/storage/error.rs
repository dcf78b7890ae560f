//! Storage layer error types.

use crate::storage::page::PageId;
use thiserror::Error;

/// Errors that can occur in the storage layer.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Buffer pool is full: every frame is pinned")]
    BufferPoolFull,

    #[error("No free page in extent {extent}")]
    NoFreePage { extent: u32 },

    #[error("Page {0} is locked by a writer")]
    PageBusy(PageId),

    #[error("Invalid page id: {0}")]
    InvalidPageId(PageId),

    #[error("Corrupted page {page_id}: {reason}")]
    Corrupted { page_id: PageId, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
