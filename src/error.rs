//! Typed error taxonomy for the storage substrate (see SPEC_FULL.md §7).
//!
//! Library code returns these through `anyhow::Result` at call sites, same as the
//! rest of the crate, but the concrete variants let callers match on the kind of
//! failure instead of string-sniffing an opaque error.

use thiserror::Error;

use crate::storage::page::PageId;

/// Errors raised by the [`crate::storage::buffer_pool::replacer`] policy.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum ReplacerError {
    /// `frame_id` fell outside `[0, replacer_size)`.
    #[error("frame id {0} is out of the replacer's range")]
    InvalidFrame(usize),
    /// `remove` was called on a frame that is not currently evictable.
    #[error("frame {0} cannot be removed while it is non-evictable")]
    NonEvictableFrame(usize),
}

/// Errors raised by the buffer pool.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum BufferPoolError {
    /// Every frame is pinned; there is no victim to evict.
    #[error("buffer pool is out of memory: no evictable frame for page {0}")]
    OutOfMemory(PageId),
    /// `delete_page` was called on a page that is still pinned.
    #[error("page {0} cannot be deleted while pinned")]
    Pinned(PageId),
    #[error(transparent)]
    Replacer(#[from] ReplacerError),
}
