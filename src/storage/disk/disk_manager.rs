use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::bitmap_page::{BitmapPage, BITMAP_CAPACITY};
use crate::storage::page::disk_meta_page::{DiskMetaPage, META_MAX_EXTENTS};
use crate::storage::page::PageId;
use crate::storage::PAGE_SIZE;
use log::{debug, warn};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Data slots governed by one bitmap page.
pub const EXTENT_CAPACITY: u32 = BITMAP_CAPACITY;

/// Extents addressable through the meta page.
pub const MAX_EXTENTS: u32 = META_MAX_EXTENTS;

const META_PHYSICAL_PAGE: u64 = 0;

/// Fixed-size block I/O over a single backing file.
///
/// Physical slot 0 holds the meta page. After it the file is a sequence of
/// extents, each one bitmap page followed by `EXTENT_CAPACITY` data pages.
/// Callers only ever see logical page ids.
pub struct DiskManager {
    file: File,
    path: PathBuf,
    meta: DiskMetaPage,
    next_free_extent: u32,
}

impl DiskManager {
    /// Create a fresh, empty database file, truncating any existing one.
    pub fn create(path: &Path) -> StorageResult<Self> {
        Self::ensure_parent_dir(path)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        Self::from_file(file, path)
    }

    /// Open a database file, creating it (and its directory) if missing.
    pub fn open(path: &Path) -> StorageResult<Self> {
        Self::ensure_parent_dir(path)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        Self::from_file(file, path)
    }

    fn ensure_parent_dir(path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }

    fn from_file(file: File, path: &Path) -> StorageResult<Self> {
        let mut manager = Self {
            file,
            path: path.to_path_buf(),
            meta: DiskMetaPage::default(),
            next_free_extent: 0,
        };

        let mut buf = [0u8; PAGE_SIZE];
        manager.read_physical_page(META_PHYSICAL_PAGE, &mut buf)?;
        manager.meta = DiskMetaPage::from_data(buf);
        manager.advance_free_extent();

        debug!(
            "Opened {:?}: {} pages allocated in {} extents, next free extent {}",
            manager.path,
            manager.meta.allocated_pages(),
            manager.meta.used_extents(),
            manager.next_free_extent
        );
        Ok(manager)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn meta(&self) -> &DiskMetaPage {
        &self.meta
    }

    pub fn next_free_extent(&self) -> u32 {
        self.next_free_extent
    }

    pub fn num_physical_pages(&self) -> StorageResult<u64> {
        Ok(self.file.metadata()?.len() / PAGE_SIZE as u64)
    }

    pub fn read_page(&mut self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> StorageResult<()> {
        let physical = Self::physical_page(page_id)?;
        self.read_physical_page(physical, buf)
    }

    pub fn write_page(&mut self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> StorageResult<()> {
        let physical = Self::physical_page(page_id)?;
        self.write_physical_page(physical, data)
    }

    /// Claim a free slot in the current free extent.
    ///
    /// Only the cursor extent is probed. If its bitmap is full the call fails
    /// even when a later extent still has room.
    pub fn allocate_page(&mut self) -> StorageResult<PageId> {
        let extent = self.next_free_extent;
        let mut bitmap = self.read_bitmap(extent)?;

        let Some(offset) = bitmap.allocate() else {
            warn!("Allocation failed: extent {} has no free slot", extent);
            return Err(StorageError::NoFreePage { extent });
        };

        self.write_physical_page(Self::bitmap_physical_page(extent), bitmap.data())?;
        self.meta.record_allocation(extent);
        self.advance_free_extent();

        let page_id = PageId(extent * EXTENT_CAPACITY + offset);
        debug!(
            "Allocated page {} (extent {}, offset {}), {} pages in use, next free extent {}",
            page_id,
            extent,
            offset,
            self.meta.allocated_pages(),
            self.next_free_extent
        );
        Ok(page_id)
    }

    /// Release a page. Returns `false` (and leaves all counters alone) if it was
    /// already free.
    pub fn deallocate_page(&mut self, page_id: PageId) -> StorageResult<bool> {
        let (extent, offset) = Self::split_page_id(page_id)?;
        let mut bitmap = self.read_bitmap(extent)?;

        if !bitmap.deallocate(offset) {
            warn!("Deallocation of page {} ignored: already free", page_id);
            return Ok(false);
        }

        self.write_physical_page(Self::bitmap_physical_page(extent), bitmap.data())?;
        self.meta.record_deallocation(extent);
        self.next_free_extent = extent;

        debug!(
            "Deallocated page {}, {} pages in use",
            page_id,
            self.meta.allocated_pages()
        );
        Ok(true)
    }

    pub fn is_page_free(&mut self, page_id: PageId) -> StorageResult<bool> {
        let (extent, offset) = Self::split_page_id(page_id)?;
        Ok(self.read_bitmap(extent)?.is_free(offset))
    }

    /// Persist the meta page.
    pub fn flush_meta(&mut self) -> StorageResult<()> {
        let data = *self.meta.data();
        self.write_physical_page(META_PHYSICAL_PAGE, &data)
    }

    /// Persist the meta page. The manager stays usable and every call writes
    /// the current counters, so allocations after a close are not lost.
    pub fn close(&mut self) -> StorageResult<()> {
        self.flush_meta()
    }

    /// Physical slot holding a logical page.
    pub fn physical_page(page_id: PageId) -> StorageResult<u64> {
        let (extent, offset) = Self::split_page_id(page_id)?;
        Ok(Self::bitmap_physical_page(extent) + 1 + offset as u64)
    }

    fn bitmap_physical_page(extent: u32) -> u64 {
        1 + extent as u64 * (EXTENT_CAPACITY as u64 + 1)
    }

    fn split_page_id(page_id: PageId) -> StorageResult<(u32, u32)> {
        let extent = page_id.0 / EXTENT_CAPACITY;
        if extent >= MAX_EXTENTS {
            return Err(StorageError::InvalidPageId(page_id));
        }
        Ok((extent, page_id.0 % EXTENT_CAPACITY))
    }

    fn read_bitmap(&mut self, extent: u32) -> StorageResult<BitmapPage> {
        let mut buf = [0u8; PAGE_SIZE];
        self.read_physical_page(Self::bitmap_physical_page(extent), &mut buf)?;
        Ok(BitmapPage::from_data(buf))
    }

    fn advance_free_extent(&mut self) {
        for _ in 0..MAX_EXTENTS {
            if self.meta.extent_used_pages(self.next_free_extent) < EXTENT_CAPACITY {
                return;
            }
            self.next_free_extent = (self.next_free_extent + 1) % MAX_EXTENTS;
        }
    }

    /// Reads past the end of the file yield a zero-filled page.
    fn read_physical_page(&mut self, physical: u64, buf: &mut [u8; PAGE_SIZE]) -> StorageResult<()> {
        let offset = physical * PAGE_SIZE as u64;
        let file_size = self.file.metadata()?.len();

        if offset >= file_size {
            buf.fill(0);
            return Ok(());
        }

        self.file.seek(SeekFrom::Start(offset))?;
        let mut filled = 0;
        while filled < PAGE_SIZE {
            let n = self.file.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf[filled..].fill(0);

        Ok(())
    }

    fn write_physical_page(&mut self, physical: u64, data: &[u8; PAGE_SIZE]) -> StorageResult<()> {
        let offset = physical * PAGE_SIZE as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        self.file.sync_all()?;
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to persist disk meta page for {:?}: {}", self.path, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::tempdir;

    #[test]
    fn test_physical_mapping() -> Result<()> {
        assert_eq!(DiskManager::physical_page(PageId(0))?, 2);
        assert_eq!(DiskManager::physical_page(PageId(5))?, 7);
        // First page of the second extent sits after the second bitmap page
        assert_eq!(
            DiskManager::physical_page(PageId(EXTENT_CAPACITY))?,
            EXTENT_CAPACITY as u64 + 3
        );
        assert!(DiskManager::physical_page(PageId(MAX_EXTENTS * EXTENT_CAPACITY)).is_err());
        Ok(())
    }

    #[test]
    fn test_allocate_sequential() -> Result<()> {
        let dir = tempdir()?;
        let mut dm = DiskManager::create(&dir.path().join("test.db"))?;

        for expected in 0..5 {
            assert_eq!(dm.allocate_page()?, PageId(expected));
        }
        assert_eq!(dm.meta().allocated_pages(), 5);
        assert_eq!(dm.meta().used_extents(), 1);
        assert_eq!(dm.meta().extent_used_pages(0), 5);
        assert!(!dm.is_page_free(PageId(4))?);
        assert!(dm.is_page_free(PageId(5))?);

        Ok(())
    }

    #[test]
    fn test_write_and_read_page() -> Result<()> {
        let dir = tempdir()?;
        let mut dm = DiskManager::create(&dir.path().join("test.db"))?;

        let page_id = dm.allocate_page()?;
        let mut data = [0u8; PAGE_SIZE];
        data[0] = 42;
        data[PAGE_SIZE - 1] = 24;
        dm.write_page(page_id, &data)?;

        let mut buf = [0u8; PAGE_SIZE];
        dm.read_page(page_id, &mut buf)?;
        assert_eq!(buf, data);

        Ok(())
    }

    #[test]
    fn test_read_beyond_file_is_zeroed() -> Result<()> {
        let dir = tempdir()?;
        let mut dm = DiskManager::create(&dir.path().join("test.db"))?;

        let mut buf = [7u8; PAGE_SIZE];
        dm.read_page(PageId(100), &mut buf)?;
        assert!(buf.iter().all(|&b| b == 0));

        Ok(())
    }

    #[test]
    fn test_deallocate_and_reuse() -> Result<()> {
        let dir = tempdir()?;
        let mut dm = DiskManager::create(&dir.path().join("test.db"))?;

        for _ in 0..4 {
            let page_id = dm.allocate_page()?;
            dm.write_page(page_id, &[1u8; PAGE_SIZE])?;
        }
        let file_pages = dm.num_physical_pages()?;

        assert!(dm.deallocate_page(PageId(1))?);
        assert!(dm.is_page_free(PageId(1))?);
        assert_eq!(dm.meta().allocated_pages(), 3);

        // The freed slot is reused before the file grows
        let page_id = dm.allocate_page()?;
        assert_eq!(page_id, PageId(1));
        dm.write_page(page_id, &[2u8; PAGE_SIZE])?;
        assert_eq!(dm.num_physical_pages()?, file_pages);

        Ok(())
    }

    #[test]
    fn test_deallocate_free_page_is_noop() -> Result<()> {
        let dir = tempdir()?;
        let mut dm = DiskManager::create(&dir.path().join("test.db"))?;

        dm.allocate_page()?;
        assert!(!dm.deallocate_page(PageId(3))?);
        assert_eq!(dm.meta().allocated_pages(), 1);
        assert_eq!(dm.meta().extent_used_pages(0), 1);

        Ok(())
    }

    #[test]
    fn test_meta_survives_reopen() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.db");

        {
            let mut dm = DiskManager::create(&path)?;
            dm.allocate_page()?;
            dm.allocate_page()?;
            dm.allocate_page()?;
            dm.deallocate_page(PageId(0))?;
            dm.close()?;
        }

        let mut dm = DiskManager::open(&path)?;
        assert_eq!(dm.meta().allocated_pages(), 2);
        assert!(dm.is_page_free(PageId(0))?);
        assert_eq!(dm.allocate_page()?, PageId(0));

        Ok(())
    }

    #[test]
    fn test_allocations_after_close_are_persisted() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.db");

        {
            let mut dm = DiskManager::create(&path)?;
            dm.allocate_page()?;
            dm.allocate_page()?;
            dm.close()?;
            for _ in 0..5 {
                dm.allocate_page()?;
            }
        }

        let mut dm = DiskManager::open(&path)?;
        assert_eq!(dm.meta().allocated_pages(), 7);
        assert_eq!(dm.meta().extent_used_pages(0), 7);
        assert_eq!(dm.allocate_page()?, PageId(7));

        Ok(())
    }

    #[test]
    fn test_open_creates_missing_file() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("nested").join("fresh.db");

        let dm = DiskManager::open(&path)?;
        assert!(path.exists());
        assert_eq!(dm.meta().allocated_pages(), 0);

        Ok(())
    }

    #[test]
    fn test_cursor_skips_full_extent_on_open() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.db");

        {
            let mut dm = DiskManager::create(&path)?;
            let mut bitmap = BitmapPage::new();
            while bitmap.allocate().is_some() {
                dm.meta.record_allocation(0);
            }
            dm.write_physical_page(DiskManager::bitmap_physical_page(0), bitmap.data())?;
            dm.close()?;
        }

        let mut dm = DiskManager::open(&path)?;
        assert_eq!(dm.next_free_extent(), 1);
        assert_eq!(dm.allocate_page()?, PageId(EXTENT_CAPACITY));

        Ok(())
    }

    #[test]
    fn test_allocate_only_probes_cursor_extent() -> Result<()> {
        let dir = tempdir()?;
        let mut dm = DiskManager::create(&dir.path().join("test.db"))?;

        // Meta still believes extent 0 has room, but its bitmap is full. The
        // allocator does not go looking in extent 1.
        let mut bitmap = BitmapPage::new();
        while bitmap.allocate().is_some() {}
        dm.write_physical_page(DiskManager::bitmap_physical_page(0), bitmap.data())?;

        match dm.allocate_page() {
            Err(StorageError::NoFreePage { extent }) => assert_eq!(extent, 0),
            other => panic!("expected NoFreePage, got {:?}", other.map(|p| p.0)),
        }

        Ok(())
    }
}
