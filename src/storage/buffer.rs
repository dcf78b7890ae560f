pub mod clock;
pub mod lru;
pub mod replacer;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::{DiskManager, PageId, PAGE_SIZE};
use log::{debug, warn};
use parking_lot::{ArcRwLockReadGuard, ArcRwLockWriteGuard, Mutex, RawRwLock, RwLock};
use replacer::{FrameId, Replacer};
use std::collections::{HashMap, VecDeque};
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

type FrameData = [u8; PAGE_SIZE];

#[derive(Debug, Default, Clone, Copy)]
struct FrameMeta {
    page_id: Option<PageId>,
    pin_count: u32,
    is_dirty: bool,
}

struct PoolState {
    metas: Vec<FrameMeta>,
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    replacer: Box<dyn Replacer>,
    disk: DiskManager,
}

/// Page cache over a `DiskManager`.
///
/// Bookkeeping (page table, pin counts, free list, replacer, disk) lives behind
/// one mutex. Each frame's bytes sit behind their own lock, held by the page
/// guards for as long as they live. A thread must not hold two guards on the
/// same page when one of them is a write guard.
#[derive(Clone)]
pub struct BufferPoolManager {
    inner: Arc<BufferPoolInner>,
}

struct BufferPoolInner {
    state: Mutex<PoolState>,
    frames: Vec<Arc<RwLock<FrameData>>>,
}

impl BufferPoolManager {
    pub fn new(disk: DiskManager, replacer: Box<dyn Replacer>, pool_size: usize) -> Self {
        let frames = (0..pool_size)
            .map(|_| Arc::new(RwLock::new([0u8; PAGE_SIZE])))
            .collect();
        Self {
            inner: Arc::new(BufferPoolInner {
                state: Mutex::new(PoolState {
                    metas: vec![FrameMeta::default(); pool_size],
                    page_table: HashMap::with_capacity(pool_size),
                    free_list: (0..pool_size).collect(),
                    replacer,
                    disk,
                }),
                frames,
            }),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.inner.frames.len()
    }

    /// Pin a page for reading, loading it from disk on a miss.
    pub fn fetch_page(&self, page_id: PageId) -> StorageResult<PageReadGuard> {
        let frame_id = self.inner.pin_frame(page_id)?;
        Ok(PageReadGuard {
            pool: self.inner.clone(),
            page_id,
            data: ManuallyDrop::new(RwLock::read_arc(&self.inner.frames[frame_id])),
        })
    }

    /// Pin a page for writing. The page is marked dirty once it is mutated.
    pub fn fetch_page_write(&self, page_id: PageId) -> StorageResult<PageWriteGuard> {
        let frame_id = self.inner.pin_frame(page_id)?;
        Ok(PageWriteGuard {
            pool: self.inner.clone(),
            page_id,
            is_dirty: false,
            data: ManuallyDrop::new(RwLock::write_arc(&self.inner.frames[frame_id])),
        })
    }

    /// Allocate a page on disk and pin a zero-filled frame for it.
    pub fn new_page(&self) -> StorageResult<(PageId, PageWriteGuard)> {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        let frame_id = self.inner.acquire_frame(state)?;

        let page_id = match state.disk.allocate_page() {
            Ok(page_id) => page_id,
            Err(e) => {
                state.free_list.push_back(frame_id);
                return Err(e);
            }
        };

        let mut data = RwLock::write_arc(&self.inner.frames[frame_id]);
        data.fill(0);
        state.metas[frame_id] = FrameMeta {
            page_id: Some(page_id),
            pin_count: 1,
            is_dirty: true,
        };
        state.page_table.insert(page_id, frame_id);
        state.replacer.pin(frame_id);
        drop(guard);

        Ok((
            page_id,
            PageWriteGuard {
                pool: self.inner.clone(),
                page_id,
                is_dirty: true,
                data: ManuallyDrop::new(data),
            },
        ))
    }

    /// Drop one pin. Returns `false` if the page is not resident or not pinned.
    #[cfg(test)]
    pub(crate) fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        self.inner.unpin_page(page_id, is_dirty)
    }

    /// Write a resident page to disk whether or not it is dirty. Fails with
    /// `PageBusy` while a write guard on the page is alive.
    pub fn flush_page(&self, page_id: PageId) -> StorageResult<bool> {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return Ok(false);
        };
        let Some(data) = self.inner.frames[frame_id].try_read() else {
            return Err(StorageError::PageBusy(page_id));
        };
        state.disk.write_page(page_id, &data)?;
        state.metas[frame_id].is_dirty = false;
        Ok(true)
    }

    /// Write back every dirty page. Pages held by a write guard are skipped
    /// and stay dirty.
    pub fn flush_all(&self) -> StorageResult<()> {
        let mut state = self.inner.state.lock();
        BufferPoolInner::flush_frames(&mut state, &self.inner.frames)
    }

    /// Remove a page from the pool and release it on disk. Fails with `false`
    /// while the page is pinned.
    pub fn delete_page(&self, page_id: PageId) -> StorageResult<bool> {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let meta = state.metas[frame_id];
            if meta.pin_count > 0 {
                debug!("Refusing to delete page {}: pin count {}", page_id, meta.pin_count);
                return Ok(false);
            }
            if meta.is_dirty {
                let data = self.inner.frames[frame_id]
                    .try_read()
                    .ok_or(StorageError::PageBusy(page_id))?;
                state.disk.write_page(page_id, &data)?;
            }
            state.page_table.remove(&page_id);
            state.metas[frame_id] = FrameMeta::default();
            state.replacer.pin(frame_id);
            state.free_list.push_back(frame_id);
        }

        state.disk.deallocate_page(page_id)?;
        debug!("Deleted page {}", page_id);
        Ok(true)
    }

    pub fn is_page_free(&self, page_id: PageId) -> StorageResult<bool> {
        self.inner.state.lock().disk.is_page_free(page_id)
    }

    /// Flush every page and persist the disk meta page.
    pub fn close(&self) -> StorageResult<()> {
        let mut state = self.inner.state.lock();
        BufferPoolInner::flush_frames(&mut state, &self.inner.frames)?;
        state.disk.close()
    }

    /// Pin count of a resident page.
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let state = self.inner.state.lock();
        state
            .page_table
            .get(&page_id)
            .map(|&frame_id| state.metas[frame_id].pin_count)
    }

    pub fn replacer_size(&self) -> usize {
        self.inner.state.lock().replacer.size()
    }

    /// Pages the disk allocator currently counts as in use.
    pub fn allocated_pages(&self) -> u32 {
        self.inner.state.lock().disk.meta().allocated_pages()
    }

    pub fn free_frames(&self) -> usize {
        self.inner.state.lock().free_list.len()
    }

    /// `true` if no resident page is pinned. Pinned pages are logged.
    pub fn check_all_unpinned(&self) -> bool {
        let state = self.inner.state.lock();
        let mut all_unpinned = true;
        for meta in state.metas.iter() {
            if let Some(page_id) = meta.page_id.filter(|_| meta.pin_count > 0) {
                warn!("Page {} still pinned ({} pins)", page_id, meta.pin_count);
                all_unpinned = false;
            }
        }
        all_unpinned
    }
}

impl BufferPoolInner {
    /// Find or load the frame for `page_id` and add one pin to it.
    fn pin_frame(&self, page_id: PageId) -> StorageResult<FrameId> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            state.metas[frame_id].pin_count += 1;
            state.replacer.pin(frame_id);
            return Ok(frame_id);
        }

        let frame_id = self.acquire_frame(state)?;
        {
            let mut data = self.frames[frame_id].write();
            if let Err(e) = state.disk.read_page(page_id, &mut data) {
                state.free_list.push_back(frame_id);
                return Err(e);
            }
        }
        state.metas[frame_id] = FrameMeta {
            page_id: Some(page_id),
            pin_count: 1,
            is_dirty: false,
        };
        state.page_table.insert(page_id, frame_id);
        state.replacer.pin(frame_id);
        Ok(frame_id)
    }

    /// Take a frame from the free list, or evict the replacer's victim,
    /// writing it back first if dirty.
    fn acquire_frame(&self, state: &mut PoolState) -> StorageResult<FrameId> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(frame_id);
        }

        let Some(frame_id) = state.replacer.victim() else {
            warn!("Buffer pool exhausted: all {} frames pinned", self.frames.len());
            return Err(StorageError::BufferPoolFull);
        };

        let meta = state.metas[frame_id];
        if let Some(old_page_id) = meta.page_id {
            if meta.is_dirty {
                let written = match self.frames[frame_id].try_read() {
                    Some(data) => state.disk.write_page(old_page_id, &data),
                    None => Err(StorageError::PageBusy(old_page_id)),
                };
                if let Err(e) = written {
                    state.replacer.unpin(frame_id);
                    return Err(e);
                }
            }
            state.page_table.remove(&old_page_id);
            debug!("Evicted page {} from frame {}", old_page_id, frame_id);
        }
        state.metas[frame_id] = FrameMeta::default();
        Ok(frame_id)
    }

    fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return false;
        };

        let meta = &mut state.metas[frame_id];
        if meta.pin_count == 0 {
            warn!("Unpin of page {} with zero pin count", page_id);
            return false;
        }
        meta.is_dirty |= is_dirty;
        meta.pin_count -= 1;
        if meta.pin_count == 0 {
            state.replacer.unpin(frame_id);
        }
        true
    }

    fn flush_frames(state: &mut PoolState, frames: &[Arc<RwLock<FrameData>>]) -> StorageResult<()> {
        for (frame_id, meta) in state.metas.iter_mut().enumerate() {
            if let (Some(page_id), true) = (meta.page_id, meta.is_dirty) {
                let Some(data) = frames[frame_id].try_read() else {
                    debug!("Skipping flush of page {}: held by a writer", page_id);
                    continue;
                };
                state.disk.write_page(page_id, &data)?;
                meta.is_dirty = false;
            }
        }
        Ok(())
    }
}

impl Drop for BufferPoolInner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Err(e) = Self::flush_frames(state, &self.frames) {
            warn!("Failed to flush buffer pool on shutdown: {}", e);
        }
    }
}

/// Shared access to a pinned page. Unpins on drop.
pub struct PageReadGuard {
    pool: Arc<BufferPoolInner>,
    page_id: PageId,
    data: ManuallyDrop<ArcRwLockReadGuard<RawRwLock, FrameData>>,
}

impl PageReadGuard {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }
}

impl Deref for PageReadGuard {
    type Target = FrameData;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl Drop for PageReadGuard {
    fn drop(&mut self) {
        // SAFETY: `data` is never touched again after this point.
        unsafe { ManuallyDrop::drop(&mut self.data) };
        self.pool.unpin_page(self.page_id, false);
    }
}

/// Exclusive access to a pinned page. Unpins on drop, passing the dirty flag
/// set by any mutable access or `mark_dirty`.
pub struct PageWriteGuard {
    pool: Arc<BufferPoolInner>,
    page_id: PageId,
    is_dirty: bool,
    data: ManuallyDrop<ArcRwLockWriteGuard<RawRwLock, FrameData>>,
}

impl PageWriteGuard {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn mark_dirty(&mut self) {
        self.is_dirty = true;
    }
}

impl Deref for PageWriteGuard {
    type Target = FrameData;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl DerefMut for PageWriteGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.is_dirty = true;
        &mut self.data
    }
}

impl Drop for PageWriteGuard {
    fn drop(&mut self) {
        // The frame lock goes first so a frame with no pins is never locked.
        // SAFETY: `data` is never touched again after this point.
        unsafe { ManuallyDrop::drop(&mut self.data) };
        self.pool.unpin_page(self.page_id, self.is_dirty);
    }
}
