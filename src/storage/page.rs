//! The fixed-size unit of storage the rest of the substrate moves around.

use crate::config::PAGE_SIZE;

/// Identifies a page within a disk file. Negative values (only `INVALID_PAGE_ID` in
/// practice) never name a real page.
pub type PageId = i32;

/// Sentinel for "no page" — the root of an empty tree, the tail of a leaf chain, etc.
pub const INVALID_PAGE_ID: PageId = -1;

/// Raw bytes backing one page. Frames own one of these; the disk manager reads and
/// writes them whole.
pub type PageData = [u8; PAGE_SIZE];

pub fn new_page_data() -> PageData {
    [0u8; PAGE_SIZE]
}
