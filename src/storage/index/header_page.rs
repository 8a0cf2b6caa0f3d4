//! The header page pins a B+ tree's identity: it never moves, so indexes can be
//! found by a single well-known page id regardless of how the tree's root churns
//! during splits and merges.

use crate::config::{HEADER_NEXT_PAGE_ID_OFFSET, HEADER_ROOT_PAGE_ID_OFFSET};
use crate::storage::page::PageId;

pub struct HeaderView<'a> {
    buf: &'a mut [u8],
}

impl<'a> HeaderView<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf }
    }

    pub fn root_page_id(&self) -> PageId {
        PageId::from_le_bytes(
            self.buf[HEADER_ROOT_PAGE_ID_OFFSET..HEADER_ROOT_PAGE_ID_OFFSET + 4]
                .try_into()
                .unwrap(),
        )
    }

    pub fn set_root_page_id(&mut self, page_id: PageId) {
        self.buf[HEADER_ROOT_PAGE_ID_OFFSET..HEADER_ROOT_PAGE_ID_OFFSET + 4]
            .copy_from_slice(&page_id.to_le_bytes());
    }

    pub fn next_page_id(&self) -> PageId {
        PageId::from_le_bytes(
            self.buf[HEADER_NEXT_PAGE_ID_OFFSET..HEADER_NEXT_PAGE_ID_OFFSET + 4]
                .try_into()
                .unwrap(),
        )
    }

    pub fn set_next_page_id(&mut self, page_id: PageId) {
        self.buf[HEADER_NEXT_PAGE_ID_OFFSET..HEADER_NEXT_PAGE_ID_OFFSET + 4]
            .copy_from_slice(&page_id.to_le_bytes());
    }
}
