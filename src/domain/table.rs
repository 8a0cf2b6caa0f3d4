//! Opens a named B+ tree index over its own disk file, sizing leaf/internal fan-out
//! to whatever fits a page for the table's key/value widths (SPEC_FULL.md §6: "the
//! domain tables pick concrete fan-outs sized to their key/value byte widths").

use std::path::Path;

use crate::storage::buffer_pool::BufferPoolManager;
use crate::storage::disk_manager::DiskManager;
use crate::storage::index::node::{internal_capacity, leaf_capacity};
use crate::storage::index::{BPlusTree, IndexKey, IndexValue, KeyComparator};

pub fn open_tree<K, V, C, D>(
    dir: &Path,
    name: &str,
    comparator: C,
    degraded_comparator: D,
) -> BPlusTree<K, V, C, D>
where
    K: IndexKey,
    V: IndexValue,
    C: KeyComparator<K>,
    D: KeyComparator<K>,
{
    let path = dir.join(format!("{name}.db"));
    let disk_manager = DiskManager::new(path);
    let pool = BufferPoolManager::with_default_size(disk_manager);
    let header_page_id = pool.new_page();
    debug_assert_eq!(header_page_id, 0, "a table's header page must be page 0 of its own file");

    let leaf_max = leaf_capacity(K::ENCODED_SIZE, V::ENCODED_SIZE) as i32;
    let internal_max = internal_capacity(K::ENCODED_SIZE) as i32;
    log::debug!(
        "opened table {name:?}: leaf_max={leaf_max} internal_max={internal_max}"
    );

    BPlusTree::new(pool, header_page_id, comparator, degraded_comparator, leaf_max, internal_max)
}
