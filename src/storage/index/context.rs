//! Guard bookkeeping for a single tree traversal.
//!
//! Every mutating operation latches the header page plus every internal/leaf page
//! it visits on the way down, and holds all of them until the operation is fully
//! resolved — splits and merges can propagate arbitrarily far back up the path, so
//! nothing on it can be safely released early. `get_all_value` does the same with
//! read guards since it may have to keep walking right-sibling links after reaching
//! a leaf.

use crate::storage::buffer_pool::guard::{ReadPageGuard, WritePageGuard};

#[derive(Default)]
pub(super) struct WriteContext {
    pub header: Option<WritePageGuard>,
    pub path: Vec<WritePageGuard>,
}

#[derive(Default)]
pub(super) struct ReadContext {
    pub path: Vec<ReadPageGuard>,
}
