//! L2: fixed-size pool of in-memory frames backed by the disk manager, with LRU-K
//! eviction (SPEC_FULL.md §4.2).
//!
//! Fetching a page goes through one of three paths: the page is already resident
//! (hit), a free frame is available (miss, no eviction needed), or every frame is in
//! use and a victim must be chosen — flushing it first if dirty (miss, with
//! eviction). All three are folded into [`Inner::checked_fetch`]; callers reach it
//! through [`BufferPoolManager::checked_read_page`]/[`checked_write_page`] or the
//! infallible [`BufferPoolManager::read_page`]/[`write_page`] wrappers that abort the
//! process on [`BufferPoolError::OutOfMemory`], matching the course-project origin's
//! treatment of pool exhaustion as unrecoverable.

pub mod frame;
pub mod guard;
pub mod replacer;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::{BUFFER_POOL_SIZE, LRUK_REPLACER_K};
use crate::error::BufferPoolError;
use crate::storage::disk_manager::DiskManager;
use crate::storage::page::{new_page_data, PageData, PageId, INVALID_PAGE_ID};

use frame::{Frame, FrameId};
use guard::{ReadPageGuard, WritePageGuard};
use replacer::LruKReplacer;

struct Bookkeeping {
    free_list: VecDeque<FrameId>,
    page_table: HashMap<PageId, FrameId>,
    replacer: LruKReplacer,
}

pub(super) struct Inner {
    frames: Vec<Arc<Frame>>,
    bookkeeping: Mutex<Bookkeeping>,
    disk_manager: DiskManager,
    next_page_id: AtomicI32,
}

pub(super) type PoolHandle = Arc<Inner>;

impl Inner {
    /// Called from guard drops: decrements the pin and, once it reaches zero, tells
    /// the replacer the frame is eligible for eviction again.
    pub(super) fn unpin_frame(&self, frame: &Arc<Frame>) {
        if frame.unpin() == 0 {
            let mut bk = self.bookkeeping.lock();
            bk.replacer
                .set_evictable(frame.id(), true)
                .expect("pinned frame must be registered with the replacer");
        }
    }

    fn checked_fetch(
        self: &Arc<Self>,
        page_id: PageId,
    ) -> Result<Arc<Frame>, BufferPoolError> {
        let mut bk = self.bookkeeping.lock();

        // Case 1: hit.
        if let Some(&frame_id) = bk.page_table.get(&page_id) {
            let frame = self.frames[frame_id].clone();
            frame.pin();
            bk.replacer
                .record_access(frame_id)
                .expect("frame id is always within range");
            bk.replacer
                .set_evictable(frame_id, false)
                .expect("frame id is always within range");
            return Ok(frame);
        }

        // Case 2 / 3: miss. Prefer a frame that was never used over evicting one.
        let frame_id = match bk.free_list.pop_front() {
            Some(fid) => fid,
            None => bk
                .replacer
                .evict()
                .ok_or(BufferPoolError::OutOfMemory(page_id))?,
        };
        let frame = self.frames[frame_id].clone();

        let old_page_id = frame.page_id();
        if old_page_id != INVALID_PAGE_ID {
            bk.page_table.remove(&old_page_id);
            if frame.is_dirty() {
                let snapshot = *frame.data().write_arc();
                self.disk_manager.write_page(old_page_id, &snapshot);
            }
        }

        let mut buf = new_page_data();
        self.disk_manager.read_page(page_id, &mut buf);
        frame.reset(page_id);
        *frame.data().write_arc() = buf;
        frame.pin();

        bk.page_table.insert(page_id, frame_id);
        bk.replacer
            .record_access(frame_id)
            .expect("frame id is always within range");
        bk.replacer
            .set_evictable(frame_id, false)
            .expect("frame id is always within range");

        Ok(frame)
    }

    fn flush_frame(&self, frame: &Arc<Frame>) -> bool {
        if frame.page_id() == INVALID_PAGE_ID || !frame.is_dirty() {
            return false;
        }
        let snapshot = *frame.data().read_arc();
        self.disk_manager.write_page(frame.page_id(), &snapshot);
        frame.mark_clean();
        true
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        for frame in &self.frames {
            self.flush_frame(frame);
        }
    }
}

/// Handle to a fixed-size pool of buffer frames. Cheap to clone — clones share the
/// same underlying frames, bookkeeping, and disk manager.
#[derive(Clone)]
pub struct BufferPoolManager {
    inner: PoolHandle,
}

impl BufferPoolManager {
    pub fn new(disk_manager: DiskManager, pool_size: usize) -> Self {
        let frames = (0..pool_size).map(Frame::new).map(Arc::new).collect();
        let free_list = (0..pool_size).collect();
        Self {
            inner: Arc::new(Inner {
                frames,
                bookkeeping: Mutex::new(Bookkeeping {
                    free_list,
                    page_table: HashMap::with_capacity(pool_size),
                    replacer: LruKReplacer::new(pool_size, LRUK_REPLACER_K),
                }),
                disk_manager,
                next_page_id: AtomicI32::new(0),
            }),
        }
    }

    pub fn with_default_size(disk_manager: DiskManager) -> Self {
        Self::new(disk_manager, BUFFER_POOL_SIZE)
    }

    pub fn pool_size(&self) -> usize {
        self.inner.frames.len()
    }

    /// Reserves a fresh page id. The page is materialised on disk lazily, the first
    /// time it is fetched or flushed — reads of a never-written page already come
    /// back zeroed (SPEC_FULL.md §4.1), so there is nothing to do here but hand out
    /// the id.
    pub fn new_page(&self) -> PageId {
        self.inner.next_page_id.fetch_add(1, Ordering::AcqRel)
    }

    /// Reads the next id that would be handed out, without consuming it.
    pub fn peek_next_page_id(&self) -> PageId {
        self.inner.next_page_id.load(Ordering::Acquire)
    }

    /// Resumes allocation from `page_id`, used when reopening a database whose
    /// highest allocated id was persisted in an index header page.
    pub fn set_next_page_id(&self, page_id: PageId) {
        self.inner.next_page_id.store(page_id, Ordering::Release);
    }

    /// Removes `page_id` from the pool, freeing its frame for reuse. Fails if the
    /// page is still pinned by a live guard.
    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut bk = self.inner.bookkeeping.lock();
        let Some(&frame_id) = bk.page_table.get(&page_id) else {
            self.inner.disk_manager.delete_page(page_id);
            return Ok(());
        };
        let frame = self.inner.frames[frame_id].clone();
        if frame.pin_count() > 0 {
            return Err(BufferPoolError::Pinned(page_id));
        }
        bk.page_table.remove(&page_id);
        bk.replacer.remove(frame_id)?;
        frame.reset(INVALID_PAGE_ID);
        bk.free_list.push_back(frame_id);
        drop(bk);
        self.inner.disk_manager.delete_page(page_id);
        Ok(())
    }

    pub fn checked_read_page(&self, page_id: PageId) -> Result<ReadPageGuard, BufferPoolError> {
        let frame = self.inner.checked_fetch(page_id)?;
        let data = frame.data().read_arc();
        Ok(ReadPageGuard::new(page_id, frame, self.inner.clone(), data))
    }

    pub fn checked_write_page(&self, page_id: PageId) -> Result<WritePageGuard, BufferPoolError> {
        let frame = self.inner.checked_fetch(page_id)?;
        let data = frame.data().write_arc();
        Ok(WritePageGuard::new(page_id, frame, self.inner.clone(), data))
    }

    /// Infallible wrapper: the pool being out of memory is treated as fatal, matching
    /// the course-project origin (`BUSTUB_ASSERT` on a null fetch).
    pub fn read_page(&self, page_id: PageId) -> ReadPageGuard {
        self.checked_read_page(page_id)
            .expect("buffer pool exhausted: no evictable frame available")
    }

    pub fn write_page(&self, page_id: PageId) -> WritePageGuard {
        self.checked_write_page(page_id)
            .expect("buffer pool exhausted: no evictable frame available")
    }

    pub fn flush_page(&self, page_id: PageId) -> bool {
        let bk = self.inner.bookkeeping.lock();
        let Some(&frame_id) = bk.page_table.get(&page_id) else {
            return false;
        };
        let frame = self.inner.frames[frame_id].clone();
        drop(bk);
        self.inner.flush_frame(&frame)
    }

    pub fn flush_all_pages(&self) {
        for frame in &self.inner.frames {
            self.inner.flush_frame(frame);
        }
    }

    pub fn disk_manager(&self) -> &DiskManager {
        &self.inner.disk_manager
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::disk_manager::test_path;

    fn fresh_pool(size: usize) -> BufferPoolManager {
        let dm = DiskManager::new(test_path());
        BufferPoolManager::new(dm, size)
    }

    #[test]
    fn new_page_ids_are_distinct_and_monotonic() {
        let pool = fresh_pool(4);
        let a = pool.new_page();
        let b = pool.new_page();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn write_then_read_round_trips_through_pool() {
        let pool = fresh_pool(4);
        let page_id = pool.new_page();
        {
            let mut guard = pool.write_page(page_id);
            guard[0] = 42;
        }
        let guard = pool.read_page(page_id);
        assert_eq!(guard[0], 42);
    }

    #[test]
    fn eviction_flushes_dirty_pages_to_disk() {
        let pool = fresh_pool(1);
        let a = pool.new_page();
        {
            let mut guard = pool.write_page(a);
            guard[0] = 9;
        }
        let b = pool.new_page();
        // only one frame: fetching b must evict a, flushing it first
        let _guard_b = pool.write_page(b);
        drop(_guard_b);
        let guard_a = pool.read_page(a);
        assert_eq!(guard_a[0], 9);
    }

    #[test]
    fn out_of_memory_when_every_frame_pinned() {
        let pool = fresh_pool(1);
        let a = pool.new_page();
        let b = pool.new_page();
        let _guard = pool.read_page(a);
        assert_eq!(
            pool.checked_read_page(b).unwrap_err(),
            BufferPoolError::OutOfMemory(b)
        );
    }

    #[test]
    fn delete_fails_while_pinned_then_succeeds() {
        let pool = fresh_pool(2);
        let a = pool.new_page();
        let guard = pool.read_page(a);
        assert_eq!(pool.delete_page(a), Err(BufferPoolError::Pinned(a)));
        drop(guard);
        assert_eq!(pool.delete_page(a), Ok(()));
    }

    #[test]
    fn flush_page_reports_whether_it_was_dirty() {
        let pool = fresh_pool(2);
        let a = pool.new_page();
        assert!(!pool.flush_page(a));
        {
            let mut guard = pool.write_page(a);
            guard[0] = 1;
        }
        assert!(pool.flush_page(a));
        assert!(!pool.flush_page(a));
    }
}
