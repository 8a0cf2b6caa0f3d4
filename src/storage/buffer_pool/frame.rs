//! A frame holds one page's bytes plus the bookkeeping the pool needs to decide
//! whether it can be reused.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::storage::page::{new_page_data, PageData, PageId, INVALID_PAGE_ID};

pub type FrameId = usize;

/// Owns a `PageData` buffer behind its own latch, independent of whatever bookkeeping
/// mutex the pool uses to look the frame up. This is the piece that lets
/// [`super::guard::ReadPageGuard`]/[`super::guard::WritePageGuard`] outlive the
/// pool-wide lock they were handed out under: the latch is reached through an `Arc`,
/// so an owned `ArcRwLockReadGuard`/`ArcRwLockWriteGuard` can be held by a guard value
/// that has no borrow back into the pool at all.
#[derive(Debug)]
pub struct Frame {
    id: FrameId,
    page_id: AtomicI32,
    pin_count: AtomicU32,
    dirty: AtomicBool,
    data: Arc<RwLock<PageData>>,
}

impl Frame {
    pub fn new(id: FrameId) -> Self {
        Self {
            id,
            page_id: AtomicI32::new(INVALID_PAGE_ID),
            pin_count: AtomicU32::new(0),
            dirty: AtomicBool::new(false),
            data: Arc::new(RwLock::new(new_page_data())),
        }
    }

    pub fn id(&self) -> FrameId {
        self.id
    }

    pub fn page_id(&self) -> PageId {
        self.page_id.load(Ordering::Acquire)
    }

    pub fn set_page_id(&self, page_id: PageId) {
        self.page_id.store(page_id, Ordering::Release);
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    pub fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Returns the pin count after decrementing. Saturates at zero; unpinning an
    /// already-unpinned frame is a caller bug but not one we panic over here.
    pub fn unpin(&self) -> u32 {
        let prev = self.pin_count.fetch_update(Ordering::AcqRel, Ordering::Acquire, |p| {
            Some(p.saturating_sub(1))
        });
        prev.unwrap_or(0).saturating_sub(1)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    pub fn mark_clean(&self) {
        self.dirty.store(false, Ordering::Release);
    }

    pub fn data(&self) -> &Arc<RwLock<PageData>> {
        &self.data
    }

    /// Reinitialises the frame to hold a different (or no) page. Caller must already
    /// hold the write side of `data` or otherwise know no one else can observe this.
    pub fn reset(&self, page_id: PageId) {
        self.set_page_id(page_id);
        self.pin_count.store(0, Ordering::Release);
        self.dirty.store(false, Ordering::Release);
        *self.data.write() = new_page_data();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_frame_is_unpinned_and_clean() {
        let f = Frame::new(0);
        assert_eq!(f.page_id(), INVALID_PAGE_ID);
        assert_eq!(f.pin_count(), 0);
        assert!(!f.is_dirty());
    }

    #[test]
    fn pin_unpin_round_trips() {
        let f = Frame::new(1);
        assert_eq!(f.pin(), 1);
        assert_eq!(f.pin(), 2);
        assert_eq!(f.unpin(), 1);
        assert_eq!(f.unpin(), 0);
    }

    #[test]
    fn reset_clears_dirty_and_pin() {
        let f = Frame::new(2);
        f.pin();
        f.mark_dirty();
        f.reset(5);
        assert_eq!(f.page_id(), 5);
        assert_eq!(f.pin_count(), 0);
        assert!(!f.is_dirty());
    }
}
