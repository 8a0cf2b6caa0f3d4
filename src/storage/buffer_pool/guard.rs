//! RAII page guards.
//!
//! A guard owns one pin on its frame and, for the write variant, a dirty flag set on
//! first write. Dropping it unpins the frame and — once the pin count reaches zero —
//! tells the replacer the frame is eligible for eviction again. Guards are move-only;
//! there is no way to clone or duplicate a pin outside of acquiring a fresh one
//! through the pool.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::RawRwLock;

use crate::storage::page::{PageData, PageId};

use super::frame::Frame;
use super::PoolHandle;

/// A read-only view of a page's bytes, pinned in the buffer pool for its lifetime.
pub struct ReadPageGuard {
    page_id: PageId,
    frame: Arc<Frame>,
    pool: PoolHandle,
    data: Option<ArcRwLockReadGuard<RawRwLock, PageData>>,
}

impl ReadPageGuard {
    pub(super) fn new(
        page_id: PageId,
        frame: Arc<Frame>,
        pool: PoolHandle,
        data: ArcRwLockReadGuard<RawRwLock, PageData>,
    ) -> Self {
        Self {
            page_id,
            frame,
            pool,
            data: Some(data),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }
}

impl Deref for ReadPageGuard {
    type Target = PageData;
    fn deref(&self) -> &PageData {
        self.data.as_ref().expect("guard dropped twice")
    }
}

impl Drop for ReadPageGuard {
    fn drop(&mut self) {
        self.data.take();
        self.pool.unpin_frame(&self.frame);
    }
}

/// A read-write view of a page's bytes. Any dereference through `DerefMut` marks the
/// page dirty; a plain read through `Deref` does not.
pub struct WritePageGuard {
    page_id: PageId,
    frame: Arc<Frame>,
    pool: PoolHandle,
    data: Option<ArcRwLockWriteGuard<RawRwLock, PageData>>,
}

impl WritePageGuard {
    pub(super) fn new(
        page_id: PageId,
        frame: Arc<Frame>,
        pool: PoolHandle,
        data: ArcRwLockWriteGuard<RawRwLock, PageData>,
    ) -> Self {
        Self {
            page_id,
            frame,
            pool,
            data: Some(data),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }
}

impl Deref for WritePageGuard {
    type Target = PageData;
    fn deref(&self) -> &PageData {
        self.data.as_ref().expect("guard dropped twice")
    }
}

impl DerefMut for WritePageGuard {
    fn deref_mut(&mut self) -> &mut PageData {
        self.frame.mark_dirty();
        self.data.as_mut().expect("guard dropped twice")
    }
}

impl Drop for WritePageGuard {
    fn drop(&mut self) {
        self.data.take();
        self.pool.unpin_frame(&self.frame);
    }
}
