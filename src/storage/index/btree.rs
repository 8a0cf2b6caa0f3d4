//! A disk-backed B+ tree index, generic over fixed-width key/value types and two
//! comparators (SPEC_FULL.md §4.3, §9).
//!
//! Every mutating traversal latches the header page plus the full root-to-leaf path
//! before doing anything, exactly like a lookup that happens to also carry write
//! guards — this repo does not attempt optimistic/lock-coupling crabbing, matching
//! the course-project origin this generalises (`b_plus_tree.cpp`). Splits and merges
//! propagate up the held path in memory; nothing touches disk until the guards for
//! the affected pages are dropped.

use std::cmp::Ordering;
use std::marker::PhantomData;

use crate::storage::buffer_pool::BufferPoolManager;
use crate::storage::page::{PageId, INVALID_PAGE_ID};

use super::comparator::KeyComparator;
use super::context::{ReadContext, WriteContext};
use super::header_page::HeaderView;
use super::node::{
    internal_capacity, leaf_capacity, page_kind, IndexKey, IndexValue, InternalAccess,
    InternalReader, InternalView, LeafReader, LeafView, PageKind,
};

pub struct BPlusTree<K, V, C, D>
where
    K: IndexKey,
    V: IndexValue,
    C: KeyComparator<K>,
    D: KeyComparator<K>,
{
    pool: BufferPoolManager,
    header_page_id: PageId,
    comparator: C,
    degraded_comparator: D,
    leaf_max_size: i32,
    internal_max_size: i32,
    leaf_capacity: usize,
    internal_capacity: usize,
    _marker: PhantomData<(K, V)>,
}

impl<K, V, C, D> BPlusTree<K, V, C, D>
where
    K: IndexKey,
    V: IndexValue,
    C: KeyComparator<K>,
    D: KeyComparator<K>,
{
    /// Opens (or, for a never-written header page, initializes) the tree rooted at
    /// `header_page_id`. `leaf_max_size`/`internal_max_size` must not exceed the
    /// physical slot capacity for `K`/`V` on a single page.
    pub fn new(
        pool: BufferPoolManager,
        header_page_id: PageId,
        comparator: C,
        degraded_comparator: D,
        leaf_max_size: i32,
        internal_max_size: i32,
    ) -> Self {
        let leaf_cap = leaf_capacity(K::ENCODED_SIZE, V::ENCODED_SIZE);
        let internal_cap = internal_capacity(K::ENCODED_SIZE);
        assert!(leaf_max_size as usize <= leaf_cap, "leaf_max_size too large for page size");
        assert!(
            internal_max_size as usize <= internal_cap,
            "internal_max_size too large for page size"
        );

        let mut guard = pool.write_page(header_page_id);
        let mut header = HeaderView::new(&mut guard[..]);
        if header.root_page_id() == 0 && header.next_page_id() == 0 {
            header.set_root_page_id(INVALID_PAGE_ID);
        } else {
            pool.set_next_page_id(header.next_page_id());
        }
        drop(guard);

        Self {
            pool,
            header_page_id,
            comparator,
            degraded_comparator,
            leaf_max_size,
            internal_max_size,
            leaf_capacity: leaf_cap,
            internal_capacity: internal_cap,
            _marker: PhantomData,
        }
    }

    pub fn root_page_id(&self) -> PageId {
        let guard = self.pool.read_page(self.header_page_id);
        HeaderView::new(&mut guard_copy(&guard)).root_page_id()
    }

    pub fn is_empty(&self) -> bool {
        self.root_page_id() == INVALID_PAGE_ID
    }

    fn find_child_slot(&self, view: &impl InternalAccess<K>, key: &K) -> usize {
        let size = view.size() as usize;
        let mut slot = size - 1;
        for i in 1..size {
            if self.comparator.compare(&view.key_at(i), key) != Ordering::Less {
                slot = i;
                break;
            }
        }
        if self.comparator.compare(key, &view.key_at(slot)) == Ordering::Less {
            slot -= 1;
        }
        slot
    }

    fn find_child_slot_degraded(&self, view: &impl InternalAccess<K>, key: &K) -> usize {
        let size = view.size() as usize;
        let mut slot = size - 1;
        for i in 1..size {
            if self.degraded_comparator.compare(&view.key_at(i), key) != Ordering::Less {
                slot = i;
                break;
            }
        }
        if self.degraded_comparator.compare(key, &view.key_at(slot)) == Ordering::Less {
            slot -= 1;
        }
        slot
    }

    /// Point lookup: at most one value, since keys are unique.
    pub fn get_value(&self, key: &K) -> Option<V> {
        let head_guard = self.pool.read_page(self.header_page_id);
        let root_id = HeaderView::new(&mut guard_copy(&head_guard)).root_page_id();
        if root_id == INVALID_PAGE_ID {
            return None;
        }
        drop(head_guard);

        let mut cur_guard = self.pool.read_page(root_id);
        loop {
            let kind = page_kind(&cur_guard[..]);
            if kind == PageKind::Leaf {
                break;
            }
            let view = InternalReader::<K>::new(&cur_guard[..]);
            let slot = self.find_child_slot(&view, key);
            let child = view.value_at(slot, self.internal_capacity);
            cur_guard = self.pool.read_page(child);
        }

        let leaf = LeafReader::<K, V>::new(&cur_guard[..]);
        let size = leaf.size() as usize;
        for i in 0..size {
            if self.comparator.compare(key, &leaf.key_at(i)) == Ordering::Equal {
                return Some(leaf.value_at(i, self.leaf_capacity));
            }
        }
        None
    }

    /// Range scan: every value whose key shares the prefix `key` orders equal to
    /// under the degraded comparator, walking right-sibling links past leaf
    /// boundaries as needed.
    pub fn get_all_value(&self, key: &K) -> Vec<V> {
        let mut result = Vec::new();
        let mut ctx = ReadContext::default();

        let head_guard = self.pool.read_page(self.header_page_id);
        let root_id = HeaderView::new(&mut guard_copy(&head_guard)).root_page_id();
        if root_id == INVALID_PAGE_ID {
            return result;
        }
        drop(head_guard);

        ctx.path.push(self.pool.read_page(root_id));
        loop {
            let kind = page_kind(&ctx.path.last().unwrap()[..]);
            if kind == PageKind::Leaf {
                break;
            }
            let child = {
                let view = InternalReader::<K>::new(&ctx.path.last().unwrap()[..]);
                let slot = self.find_child_slot_degraded(&view, key);
                view.value_at(slot, self.internal_capacity)
            };
            ctx.path.push(self.pool.read_page(child));
        }

        let leaf = LeafReader::<K, V>::new(&ctx.path.last().unwrap()[..]);
        let size = leaf.size() as usize;
        for i in 0..size {
            let cmp = self.degraded_comparator.compare(key, &leaf.key_at(i));
            if cmp == Ordering::Less {
                return result;
            }
            if cmp == Ordering::Equal {
                result.push(leaf.value_at(i, self.leaf_capacity));
            }
        }
        let mut next_page_id = leaf.next_page_id();
        drop(ctx);

        while next_page_id != INVALID_PAGE_ID {
            let next_guard = self.pool.read_page(next_page_id);
            let next_leaf = LeafReader::<K, V>::new(&next_guard[..]);
            let size = next_leaf.size() as usize;
            let mut done = false;
            for i in 0..size {
                let cmp = self.degraded_comparator.compare(key, &next_leaf.key_at(i));
                if cmp == Ordering::Less {
                    done = true;
                    break;
                }
                if cmp == Ordering::Equal {
                    result.push(next_leaf.value_at(i, self.leaf_capacity));
                }
            }
            if done {
                return result;
            }
            next_page_id = next_leaf.next_page_id();
        }
        result
    }

    fn alloc_page(&self, header: &mut HeaderView<'_>) -> PageId {
        let id = self.pool.new_page();
        header.set_next_page_id(self.pool.peek_next_page_id());
        id
    }

    /// Inserts `(key, value)`. Returns `false` without modifying the tree if `key`
    /// is already present.
    pub fn insert(&self, key: K, value: V) -> bool {
        let mut ctx = WriteContext::default();
        let mut header_guard = self.pool.write_page(self.header_page_id);
        let root_id = HeaderView::new(&mut header_guard[..]).root_page_id();

        if root_id == INVALID_PAGE_ID {
            let mut header = HeaderView::new(&mut header_guard[..]);
            let new_root_id = self.alloc_page(&mut header);
            header.set_root_page_id(new_root_id);
            let mut leaf_guard = self.pool.write_page(new_root_id);
            let mut leaf = LeafView::<K, V>::new(&mut leaf_guard[..]);
            leaf.init(self.leaf_max_size);
            leaf.set_size(1);
            leaf.set_key_at(0, &key);
            leaf.set_value_at(0, &value, self.leaf_capacity);
            return true;
        }

        ctx.header = Some(header_guard);
        ctx.path.push(self.pool.write_page(root_id));

        loop {
            let kind = page_kind(&ctx.path.last().unwrap()[..]);
            if kind == PageKind::Leaf {
                break;
            }
            let child = {
                let view = InternalView::<K>::new(&mut ctx.path.last_mut().unwrap()[..]);
                let slot = self.find_child_slot(&view, &key);
                view.value_at(slot, self.internal_capacity)
            };
            ctx.path.push(self.pool.write_page(child));
        }

        {
            let mut leaf = LeafView::<K, V>::new(&mut ctx.path.last_mut().unwrap()[..]);
            let size = leaf.size() as usize;
            if size < self.leaf_max_size as usize {
                let mut insert_at = size;
                for i in (0..size).rev() {
                    if self.comparator.compare(&key, &leaf.key_at(i)) != Ordering::Less {
                        if self.comparator.compare(&leaf.key_at(i), &key) == Ordering::Equal {
                            return false;
                        }
                        insert_at = i + 1;
                        break;
                    }
                    insert_at = i;
                }
                for i in (insert_at..size).rev() {
                    let k = leaf.key_at(i);
                    let v = leaf.value_at(i, self.leaf_capacity);
                    leaf.set_key_at(i + 1, &k);
                    leaf.set_value_at(i + 1, &v, self.leaf_capacity);
                }
                leaf.set_size(size as i32 + 1);
                leaf.set_key_at(insert_at, &key);
                leaf.set_value_at(insert_at, &value, self.leaf_capacity);
                return true;
            }
        }

        // Leaf is full: gather, check for a duplicate, split.
        let leaf_max = self.leaf_max_size as usize;
        let (mut keys, mut values): (Vec<K>, Vec<V>) = {
            let leaf = LeafView::<K, V>::new(&mut ctx.path.last_mut().unwrap()[..]);
            let mut keys = Vec::with_capacity(leaf_max + 1);
            let mut values = Vec::with_capacity(leaf_max + 1);
            for i in 0..leaf_max {
                keys.push(leaf.key_at(i));
                values.push(leaf.value_at(i, self.leaf_capacity));
            }
            (keys, values)
        };
        let mut insert_at = leaf_max;
        for i in (0..leaf_max).rev() {
            if self.comparator.compare(&key, &keys[i]) != Ordering::Less {
                if self.comparator.compare(&keys[i], &key) == Ordering::Equal {
                    return false;
                }
                insert_at = i + 1;
                break;
            }
            insert_at = i;
        }
        keys.insert(insert_at, key);
        values.insert(insert_at, value);

        let new_leaf_size = (leaf_max + 1) / 2;
        let remain_leaf_size = leaf_max + 1 - new_leaf_size;

        let new_leaf_page_id = self.pool.new_page();
        {
            let mut header = HeaderView::new(&mut ctx.header.as_mut().unwrap()[..]);
            header.set_next_page_id(self.pool.peek_next_page_id());
        }
        let old_next = {
            let leaf = LeafView::<K, V>::new(&mut ctx.path.last_mut().unwrap()[..]);
            leaf.next_page_id()
        };
        {
            let mut new_leaf_guard = self.pool.write_page(new_leaf_page_id);
            let mut new_leaf = LeafView::<K, V>::new(&mut new_leaf_guard[..]);
            new_leaf.init(self.leaf_max_size);
            new_leaf.set_next_page_id(old_next);
            new_leaf.set_size(new_leaf_size as i32);
            for i in 0..new_leaf_size {
                new_leaf.set_key_at(i, &keys[remain_leaf_size + i]);
                new_leaf.set_value_at(i, &values[remain_leaf_size + i], self.leaf_capacity);
            }
        }
        {
            let mut leaf = LeafView::<K, V>::new(&mut ctx.path.last_mut().unwrap()[..]);
            leaf.set_next_page_id(new_leaf_page_id);
            leaf.set_size(remain_leaf_size as i32);
            for i in 0..remain_leaf_size {
                leaf.set_key_at(i, &keys[i]);
                leaf.set_value_at(i, &values[i], self.leaf_capacity);
            }
        }

        let mut page_id_to_insert = new_leaf_page_id;
        let mut key_to_insert = keys[remain_leaf_size];
        let mut remain_page_id = ctx.path.last().unwrap().page_id();
        ctx.path.pop();

        let internal_max = self.internal_max_size as usize;
        while let Some(mut cur_guard) = ctx.path.pop() {
            let position_to_insert = InternalView::<K>::new(&mut cur_guard[..])
                .value_index(remain_page_id, self.internal_capacity)
                .expect("child page id must be present in its parent");
            let cur_size = InternalView::<K>::new(&mut cur_guard[..]).size() as usize;

            if cur_size < internal_max {
                let mut view = InternalView::<K>::new(&mut cur_guard[..]);
                for i in (position_to_insert + 1..cur_size).rev() {
                    let k = view.key_at(i);
                    let v = view.value_at(i, self.internal_capacity);
                    view.set_key_at(i + 1, &k);
                    view.set_value_at(i + 1, v, self.internal_capacity);
                }
                view.set_size(cur_size as i32 + 1);
                view.set_key_at(position_to_insert + 1, &key_to_insert);
                view.set_value_at(position_to_insert + 1, page_id_to_insert, self.internal_capacity);
                return true;
            }

            let (mut ikeys, mut ivalues): (Vec<K>, Vec<PageId>) = {
                let view = InternalView::<K>::new(&mut cur_guard[..]);
                let mut ikeys = Vec::with_capacity(internal_max + 1);
                let mut ivalues = Vec::with_capacity(internal_max + 1);
                for i in 0..internal_max {
                    ikeys.push(view.key_at(i));
                    ivalues.push(view.value_at(i, self.internal_capacity));
                }
                (ikeys, ivalues)
            };
            ikeys.insert(position_to_insert + 1, key_to_insert);
            ivalues.insert(position_to_insert + 1, page_id_to_insert);

            let new_internal_size = (internal_max + 1) / 2;
            let remain_internal_size = (internal_max + 1) - new_internal_size;

            let new_internal_page_id = self.pool.new_page();
            {
                let mut header = HeaderView::new(&mut ctx.header.as_mut().unwrap()[..]);
                header.set_next_page_id(self.pool.peek_next_page_id());
            }
            {
                let mut new_internal_guard = self.pool.write_page(new_internal_page_id);
                let mut new_internal = InternalView::<K>::new(&mut new_internal_guard[..]);
                new_internal.init(self.internal_max_size);
                new_internal.set_size(new_internal_size as i32);
                for i in 0..new_internal_size {
                    new_internal.set_key_at(i, &ikeys[remain_internal_size + i]);
                    new_internal.set_value_at(
                        i,
                        ivalues[remain_internal_size + i],
                        self.internal_capacity,
                    );
                }
            }
            {
                let mut view = InternalView::<K>::new(&mut cur_guard[..]);
                view.set_size(remain_internal_size as i32);
                for i in 0..remain_internal_size {
                    view.set_key_at(i, &ikeys[i]);
                    view.set_value_at(i, ivalues[i], self.internal_capacity);
                }
            }

            page_id_to_insert = new_internal_page_id;
            key_to_insert = ikeys[remain_internal_size];
            remain_page_id = cur_guard.page_id();
        }

        // Every ancestor was full all the way to the root: grow the tree by one level.
        let mut header = HeaderView::new(&mut ctx.header.as_mut().unwrap()[..]);
        let new_root_id = self.alloc_page(&mut header);
        let mut new_root_guard = self.pool.write_page(new_root_id);
        let mut new_root = InternalView::<K>::new(&mut new_root_guard[..]);
        new_root.init(self.internal_max_size);
        new_root.set_size(2);
        new_root.set_key_at(1, &key_to_insert);
        new_root.set_value_at(0, remain_page_id, self.internal_capacity);
        new_root.set_value_at(1, page_id_to_insert, self.internal_capacity);
        header.set_root_page_id(new_root_id);
        true
    }

    /// Removes the entry for `key`, rebalancing via sibling borrow or coalesce as
    /// needed. A no-op if `key` is absent.
    pub fn remove(&self, key: &K) {
        let root_id = self.root_page_id();
        if root_id == INVALID_PAGE_ID {
            return;
        }
        let mut ctx = WriteContext::default();
        ctx.header = Some(self.pool.write_page(self.header_page_id));
        ctx.path.push(self.pool.write_page(root_id));

        loop {
            let kind = page_kind(&ctx.path.last().unwrap()[..]);
            if kind == PageKind::Leaf {
                break;
            }
            let child = {
                let view = InternalView::<K>::new(&mut ctx.path.last_mut().unwrap()[..]);
                let slot = self.find_child_slot(&view, key);
                view.value_at(slot, self.internal_capacity)
            };
            ctx.path.push(self.pool.write_page(child));
        }

        let position = {
            let leaf = LeafView::<K, V>::new(&mut ctx.path.last_mut().unwrap()[..]);
            (0..leaf.size() as usize).find(|&i| self.comparator.compare(key, &leaf.key_at(i)) == Ordering::Equal)
        };
        let Some(position) = position else {
            return;
        };

        let mut leaf_size = {
            let mut leaf = LeafView::<K, V>::new(&mut ctx.path.last_mut().unwrap()[..]);
            let size = leaf.size() as usize;
            for i in position..size - 1 {
                let k = leaf.key_at(i + 1);
                let v = leaf.value_at(i + 1, self.leaf_capacity);
                leaf.set_key_at(i, &k);
                leaf.set_value_at(i, &v, self.leaf_capacity);
            }
            leaf.set_size(size as i32 - 1);
            size - 1
        };

        let leaf_page_id = ctx.path.last().unwrap().page_id();
        if root_id == leaf_page_id {
            if leaf_size == 0 {
                ctx.path.pop();
                self.pool.delete_page(root_id).expect("root page cannot be pinned here");
                HeaderView::new(&mut ctx.header.as_mut().unwrap()[..]).set_root_page_id(INVALID_PAGE_ID);
            }
            return;
        }

        let leaf_min_size = {
            let leaf = LeafView::<K, V>::new(&mut ctx.path.last_mut().unwrap()[..]);
            leaf.min_size() as usize
        };
        if leaf_size >= leaf_min_size {
            return;
        }

        let leaf_position = {
            let parent = ctx.path[ctx.path.len() - 2].page_id();
            let _ = parent;
            let view = InternalView::<K>::new(&mut ctx.path[ctx.path.len() - 2][..]);
            view.value_index(leaf_page_id, self.internal_capacity)
                .expect("leaf page id must be present in its parent")
        };

        // Borrow from the left sibling.
        if leaf_position > 0 {
            let parent_left_child = {
                let view = InternalView::<K>::new(&mut ctx.path[ctx.path.len() - 2][..]);
                view.value_at(leaf_position - 1, self.internal_capacity)
            };
            let mut left_sib_guard = self.pool.write_page(parent_left_child);
            let left_size = LeafView::<K, V>::new(&mut left_sib_guard[..]).size() as usize;
            let left_min = LeafView::<K, V>::new(&mut left_sib_guard[..]).min_size() as usize;
            if left_size > left_min {
                let (borrowed_key, borrowed_value) = {
                    let mut left_sib = LeafView::<K, V>::new(&mut left_sib_guard[..]);
                    let bk = left_sib.key_at(left_size - 1);
                    let bv = left_sib.value_at(left_size - 1, self.leaf_capacity);
                    left_sib.set_size(left_size as i32 - 1);
                    (bk, bv)
                };
                let mut leaf = LeafView::<K, V>::new(&mut ctx.path.last_mut().unwrap()[..]);
                for i in (0..leaf_size).rev() {
                    let k = leaf.key_at(i);
                    let v = leaf.value_at(i, self.leaf_capacity);
                    leaf.set_key_at(i + 1, &k);
                    leaf.set_value_at(i + 1, &v, self.leaf_capacity);
                }
                leaf.set_size(leaf_size as i32 + 1);
                leaf.set_key_at(0, &borrowed_key);
                leaf.set_value_at(0, &borrowed_value, self.leaf_capacity);
                let mut parent = InternalView::<K>::new(&mut ctx.path[ctx.path.len() - 2][..]);
                parent.set_key_at(leaf_position, &borrowed_key);
                return;
            }
        }

        // Borrow from the right sibling.
        let parent_size = {
            InternalView::<K>::new(&mut ctx.path[ctx.path.len() - 2][..]).size() as usize
        };
        if leaf_position < parent_size - 1 {
            let parent_right_child = {
                let view = InternalView::<K>::new(&mut ctx.path[ctx.path.len() - 2][..]);
                view.value_at(leaf_position + 1, self.internal_capacity)
            };
            let mut right_sib_guard = self.pool.write_page(parent_right_child);
            let right_size = LeafView::<K, V>::new(&mut right_sib_guard[..]).size() as usize;
            let right_min = LeafView::<K, V>::new(&mut right_sib_guard[..]).min_size() as usize;
            if right_size > right_min {
                let (borrowed_key, borrowed_value, new_first_key) = {
                    let mut right_sib = LeafView::<K, V>::new(&mut right_sib_guard[..]);
                    let bk = right_sib.key_at(0);
                    let bv = right_sib.value_at(0, self.leaf_capacity);
                    for i in 0..right_size - 1 {
                        let k = right_sib.key_at(i + 1);
                        let v = right_sib.value_at(i + 1, self.leaf_capacity);
                        right_sib.set_key_at(i, &k);
                        right_sib.set_value_at(i, &v, self.leaf_capacity);
                    }
                    right_sib.set_size(right_size as i32 - 1);
                    let new_first = right_sib.key_at(0);
                    (bk, bv, new_first)
                };
                let mut leaf = LeafView::<K, V>::new(&mut ctx.path.last_mut().unwrap()[..]);
                leaf.set_size(leaf_size as i32 + 1);
                leaf.set_key_at(leaf_size, &borrowed_key);
                leaf.set_value_at(leaf_size, &borrowed_value, self.leaf_capacity);
                let mut parent = InternalView::<K>::new(&mut ctx.path[ctx.path.len() - 2][..]);
                parent.set_key_at(leaf_position + 1, &new_first_key);
                return;
            }
        }

        // Coalesce with a sibling.
        let mut position_to_delete = leaf_position;
        if leaf_position > 0 {
            let parent_left_child = {
                let view = InternalView::<K>::new(&mut ctx.path[ctx.path.len() - 2][..]);
                view.value_at(leaf_position - 1, self.internal_capacity)
            };
            let mut left_sib_guard = self.pool.write_page(parent_left_child);
            let left_size = LeafView::<K, V>::new(&mut left_sib_guard[..]).size() as usize;
            let left_max = LeafView::<K, V>::new(&mut left_sib_guard[..]).max_size() as usize;
            if left_size + leaf_size <= left_max {
                let mut keys = Vec::with_capacity(left_size + leaf_size);
                let mut values = Vec::with_capacity(left_size + leaf_size);
                {
                    let left_sib = LeafView::<K, V>::new(&mut left_sib_guard[..]);
                    for i in 0..left_size {
                        keys.push(left_sib.key_at(i));
                        values.push(left_sib.value_at(i, self.leaf_capacity));
                    }
                }
                {
                    let leaf = LeafView::<K, V>::new(&mut ctx.path.last_mut().unwrap()[..]);
                    for i in 0..leaf_size {
                        keys.push(leaf.key_at(i));
                        values.push(leaf.value_at(i, self.leaf_capacity));
                    }
                }
                let new_size = left_size + leaf_size;
                let mut left_sib = LeafView::<K, V>::new(&mut left_sib_guard[..]);
                left_sib.set_size(new_size as i32);
                for i in 0..new_size {
                    left_sib.set_key_at(i, &keys[i]);
                    left_sib.set_value_at(i, &values[i], self.leaf_capacity);
                }
            }
            let next = LeafView::<K, V>::new(&mut ctx.path.last_mut().unwrap()[..]).next_page_id();
            LeafView::<K, V>::new(&mut left_sib_guard[..]).set_next_page_id(next);
            drop(left_sib_guard);
            self.pool
                .delete_page(leaf_page_id)
                .expect("leaf being coalesced away must not be pinned");
        } else {
            position_to_delete = leaf_position + 1;
            let parent_right_child = {
                let view = InternalView::<K>::new(&mut ctx.path[ctx.path.len() - 2][..]);
                view.value_at(leaf_position + 1, self.internal_capacity)
            };
            let mut right_sib_guard = self.pool.write_page(parent_right_child);
            let right_size = LeafView::<K, V>::new(&mut right_sib_guard[..]).size() as usize;
            let mut keys = Vec::with_capacity(leaf_size + right_size);
            let mut values = Vec::with_capacity(leaf_size + right_size);
            {
                let leaf = LeafView::<K, V>::new(&mut ctx.path.last_mut().unwrap()[..]);
                for i in 0..leaf_size {
                    keys.push(leaf.key_at(i));
                    values.push(leaf.value_at(i, self.leaf_capacity));
                }
            }
            let right_next = {
                let right_sib = LeafView::<K, V>::new(&mut right_sib_guard[..]);
                for i in 0..right_size {
                    keys.push(right_sib.key_at(i));
                    values.push(right_sib.value_at(i, self.leaf_capacity));
                }
                right_sib.next_page_id()
            };
            leaf_size += right_size;
            let mut leaf = LeafView::<K, V>::new(&mut ctx.path.last_mut().unwrap()[..]);
            leaf.set_size(leaf_size as i32);
            for i in 0..leaf_size {
                leaf.set_key_at(i, &keys[i]);
                leaf.set_value_at(i, &values[i], self.leaf_capacity);
            }
            leaf.set_next_page_id(right_next);
            drop(right_sib_guard);
            self.pool
                .delete_page(parent_right_child)
                .expect("sibling being coalesced away must not be pinned");
        }
        ctx.path.pop();

        self.rebalance_internal_ancestors(&mut ctx, position_to_delete);
    }

    /// Shared tail of `remove`: deletes the stale separator key in each ancestor on
    /// the held path and borrows/coalesces on the way back up as needed.
    fn rebalance_internal_ancestors(&self, ctx: &mut WriteContext, mut position_to_delete: usize) {
        let root_id = {
            HeaderView::new(&mut ctx.header.as_mut().unwrap()[..]).root_page_id()
        };
        let internal_max = self.internal_max_size as usize;

        while let Some(mut cur_guard) = ctx.path.pop() {
            let cur_page_id = cur_guard.page_id();
            let mut cur_size = {
                let mut view = InternalView::<K>::new(&mut cur_guard[..]);
                let size = view.size() as usize;
                for i in position_to_delete..size - 1 {
                    let k = view.key_at(i + 1);
                    let v = view.value_at(i + 1, self.internal_capacity);
                    view.set_key_at(i, &k);
                    view.set_value_at(i, v, self.internal_capacity);
                }
                view.set_size(size as i32 - 1);
                size - 1
            };

            if cur_page_id == root_id {
                if cur_size == 1 {
                    let only_child = InternalView::<K>::new(&mut cur_guard[..]).value_at(0, self.internal_capacity);
                    self.pool
                        .delete_page(root_id)
                        .expect("old root cannot be pinned here");
                    HeaderView::new(&mut ctx.header.as_mut().unwrap()[..]).set_root_page_id(only_child);
                }
                return;
            }

            let min_size = InternalView::<K>::new(&mut cur_guard[..]).min_size() as usize;
            if cur_size >= min_size {
                return;
            }

            let Some(parent_guard) = ctx.path.last_mut() else {
                return;
            };
            let cur_position = InternalView::<K>::new(&mut parent_guard[..])
                .value_index(cur_page_id, self.internal_capacity)
                .expect("child page id must be present in its parent");

            // Borrow from the left sibling.
            if cur_position > 0 {
                let left_child = InternalView::<K>::new(&mut parent_guard[..])
                    .value_at(cur_position - 1, self.internal_capacity);
                let mut left_guard = self.pool.write_page(left_child);
                let left_size = InternalView::<K>::new(&mut left_guard[..]).size() as usize;
                let left_min = InternalView::<K>::new(&mut left_guard[..]).min_size() as usize;
                if left_size > left_min {
                    let update_key = InternalView::<K>::new(&mut left_guard[..]).key_at(left_size - 1);
                    let borrowed_key = InternalView::<K>::new(&mut parent_guard[..]).key_at(cur_position);
                    let borrowed_value = InternalView::<K>::new(&mut left_guard[..])
                        .value_at(left_size - 1, self.internal_capacity);
                    InternalView::<K>::new(&mut left_guard[..]).set_size(left_size as i32 - 1);

                    let mut cur_view = InternalView::<K>::new(&mut cur_guard[..]);
                    for i in (0..cur_size).rev() {
                        let k = cur_view.key_at(i);
                        let v = cur_view.value_at(i, self.internal_capacity);
                        cur_view.set_key_at(i + 1, &k);
                        cur_view.set_value_at(i + 1, v, self.internal_capacity);
                    }
                    cur_view.set_size(cur_size as i32 + 1);
                    cur_view.set_key_at(1, &borrowed_key);
                    cur_view.set_value_at(0, borrowed_value, self.internal_capacity);
                    InternalView::<K>::new(&mut parent_guard[..]).set_key_at(cur_position, &update_key);
                    return;
                }
            }

            // Borrow from the right sibling.
            let parent_size = InternalView::<K>::new(&mut parent_guard[..]).size() as usize;
            if cur_position < parent_size - 1 {
                let right_child = InternalView::<K>::new(&mut parent_guard[..])
                    .value_at(cur_position + 1, self.internal_capacity);
                let mut right_guard = self.pool.write_page(right_child);
                let right_size = InternalView::<K>::new(&mut right_guard[..]).size() as usize;
                let right_min = InternalView::<K>::new(&mut right_guard[..]).min_size() as usize;
                if right_size > right_min {
                    let update_key = InternalView::<K>::new(&mut right_guard[..]).key_at(1);
                    let borrowed_key =
                        InternalView::<K>::new(&mut parent_guard[..]).key_at(cur_position + 1);
                    let borrowed_value =
                        InternalView::<K>::new(&mut right_guard[..]).value_at(0, self.internal_capacity);
                    {
                        let mut right_view = InternalView::<K>::new(&mut right_guard[..]);
                        for i in 0..right_size - 1 {
                            let k = right_view.key_at(i + 1);
                            let v = right_view.value_at(i + 1, self.internal_capacity);
                            right_view.set_key_at(i, &k);
                            right_view.set_value_at(i, v, self.internal_capacity);
                        }
                        right_view.set_size(right_size as i32 - 1);
                    }
                    let mut cur_view = InternalView::<K>::new(&mut cur_guard[..]);
                    cur_view.set_size(cur_size as i32 + 1);
                    cur_view.set_key_at(cur_size, &borrowed_key);
                    cur_view.set_value_at(cur_size, borrowed_value, self.internal_capacity);
                    InternalView::<K>::new(&mut parent_guard[..]).set_key_at(cur_position + 1, &update_key);
                    return;
                }
            }

            // Coalesce with a sibling.
            if cur_position > 0 {
                position_to_delete = cur_position;
                let left_child = InternalView::<K>::new(&mut parent_guard[..])
                    .value_at(cur_position - 1, self.internal_capacity);
                let mut left_guard = self.pool.write_page(left_child);
                let left_size = InternalView::<K>::new(&mut left_guard[..]).size() as usize;
                let left_max = InternalView::<K>::new(&mut left_guard[..]).max_size() as usize;
                if left_size + cur_size <= left_max {
                    let separator = InternalView::<K>::new(&mut parent_guard[..]).key_at(cur_position);
                    let mut keys = Vec::with_capacity(left_size + cur_size);
                    let mut values = Vec::with_capacity(left_size + cur_size);
                    {
                        let left_view = InternalView::<K>::new(&mut left_guard[..]);
                        for i in 0..left_size {
                            keys.push(left_view.key_at(i));
                            values.push(left_view.value_at(i, self.internal_capacity));
                        }
                    }
                    {
                        let cur_view = InternalView::<K>::new(&mut cur_guard[..]);
                        keys.push(separator);
                        values.push(cur_view.value_at(0, self.internal_capacity));
                        for i in 1..cur_size {
                            keys.push(cur_view.key_at(i));
                            values.push(cur_view.value_at(i, self.internal_capacity));
                        }
                    }
                    let new_size = left_size + cur_size;
                    let mut left_view = InternalView::<K>::new(&mut left_guard[..]);
                    left_view.set_size(new_size as i32);
                    for i in 0..new_size {
                        left_view.set_key_at(i, &keys[i]);
                        left_view.set_value_at(i, values[i], self.internal_capacity);
                    }
                }
                drop(left_guard);
                self.pool
                    .delete_page(cur_page_id)
                    .expect("internal page being coalesced away must not be pinned");
            } else {
                position_to_delete = cur_position + 1;
                let right_child = InternalView::<K>::new(&mut parent_guard[..])
                    .value_at(cur_position + 1, self.internal_capacity);
                let mut right_guard = self.pool.write_page(right_child);
                let right_size = InternalView::<K>::new(&mut right_guard[..]).size() as usize;
                let separator = InternalView::<K>::new(&mut parent_guard[..]).key_at(cur_position + 1);
                let mut keys = Vec::with_capacity(cur_size + right_size);
                let mut values = Vec::with_capacity(cur_size + right_size);
                {
                    let cur_view = InternalView::<K>::new(&mut cur_guard[..]);
                    for i in 0..cur_size {
                        keys.push(cur_view.key_at(i));
                        values.push(cur_view.value_at(i, self.internal_capacity));
                    }
                }
                {
                    let right_view = InternalView::<K>::new(&mut right_guard[..]);
                    keys.push(separator);
                    values.push(right_view.value_at(0, self.internal_capacity));
                    for i in 1..right_size {
                        keys.push(right_view.key_at(i));
                        values.push(right_view.value_at(i, self.internal_capacity));
                    }
                }
                cur_size += right_size;
                let mut cur_view = InternalView::<K>::new(&mut cur_guard[..]);
                cur_view.set_size(cur_size as i32);
                for i in 0..cur_size {
                    cur_view.set_key_at(i, &keys[i]);
                    cur_view.set_value_at(i, values[i], self.internal_capacity);
                }
                drop(right_guard);
                self.pool
                    .delete_page(right_child)
                    .expect("internal sibling being coalesced away must not be pinned");
            }
        }
    }
}

/// Copies a guard's bytes out so a `HeaderView` (which needs `&mut [u8]` for its
/// uniform accessor API) can read a page we only hold a read guard for.
fn guard_copy(guard: &crate::storage::buffer_pool::guard::ReadPageGuard) -> crate::storage::page::PageData {
    **guard
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::disk_manager::{test_path, DiskManager};
    use crate::storage::index::comparator::NaturalOrdComparator;

    impl IndexKey for i64 {
        const ENCODED_SIZE: usize = 8;
        fn encode(&self, out: &mut [u8]) {
            out[..8].copy_from_slice(&self.to_le_bytes());
        }
        fn decode(bytes: &[u8]) -> Self {
            i64::from_le_bytes(bytes[..8].try_into().unwrap())
        }
    }
    impl IndexValue for i64 {
        const ENCODED_SIZE: usize = 8;
        fn encode(&self, out: &mut [u8]) {
            out[..8].copy_from_slice(&self.to_le_bytes());
        }
        fn decode(bytes: &[u8]) -> Self {
            i64::from_le_bytes(bytes[..8].try_into().unwrap())
        }
    }

    type TestTree = BPlusTree<i64, i64, NaturalOrdComparator<i64>, NaturalOrdComparator<i64>>;

    fn fresh_tree(leaf_max: i32, internal_max: i32) -> TestTree {
        let dm = DiskManager::new(test_path());
        let pool = BufferPoolManager::new(dm, 64);
        let header_page_id = pool.new_page();
        BPlusTree::new(
            pool,
            header_page_id,
            NaturalOrdComparator::new(),
            NaturalOrdComparator::new(),
            leaf_max,
            internal_max,
        )
    }

    #[test]
    fn empty_tree_has_no_values() {
        let tree = fresh_tree(4, 4);
        assert!(tree.is_empty());
        assert_eq!(tree.get_value(&1), None);
    }

    #[test]
    fn insert_then_get_single_key() {
        let tree = fresh_tree(4, 4);
        assert!(tree.insert(10, 100));
        assert!(!tree.is_empty());
        assert_eq!(tree.get_value(&10), Some(100));
        assert_eq!(tree.get_value(&11), None);
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let tree = fresh_tree(4, 4);
        assert!(tree.insert(1, 1));
        assert!(!tree.insert(1, 2));
        assert_eq!(tree.get_value(&1), Some(1));
    }

    #[test]
    fn inserts_beyond_leaf_capacity_trigger_splits_and_stay_findable() {
        let tree = fresh_tree(4, 4);
        for i in 0..50 {
            assert!(tree.insert(i, i * 10));
        }
        for i in 0..50 {
            assert_eq!(tree.get_value(&i), Some(i * 10));
        }
    }

    #[test]
    fn remove_merges_back_down_to_an_empty_tree() {
        let tree = fresh_tree(4, 4);
        for i in 0..30 {
            tree.insert(i, i);
        }
        for i in 0..30 {
            tree.remove(&i);
        }
        assert!(tree.is_empty());
        for i in 0..30 {
            assert_eq!(tree.get_value(&i), None);
        }
    }

    #[test]
    fn remove_absent_key_is_a_no_op() {
        let tree = fresh_tree(4, 4);
        tree.insert(1, 1);
        tree.remove(&999);
        assert_eq!(tree.get_value(&1), Some(1));
    }

    #[test]
    fn shuffled_inserts_and_removes_keep_every_remaining_key_findable() {
        use rand::seq::SliceRandom;
        use rand::thread_rng;

        let tree = fresh_tree(4, 4);
        let mut rng = thread_rng();

        let mut keys: Vec<i64> = (0..300).collect();
        keys.shuffle(&mut rng);
        for &k in &keys {
            assert!(tree.insert(k, k * 2));
        }

        let mut to_remove = keys.clone();
        to_remove.shuffle(&mut rng);
        let (removed, kept) = to_remove.split_at(150);
        for &k in removed {
            tree.remove(&k);
        }

        for &k in removed {
            assert_eq!(tree.get_value(&k), None);
        }
        for &k in kept {
            assert_eq!(tree.get_value(&k), Some(k * 2));
        }
    }

    #[test]
    fn get_all_value_walks_leaf_chain_for_shared_prefix() {
        // i64's degraded comparator here is the same total order, so every key is
        // its own singleton prefix group; this still exercises the leaf-chain walk.
        let tree = fresh_tree(4, 4);
        for i in 0..20 {
            tree.insert(i, i);
        }
        assert_eq!(tree.get_all_value(&5), vec![5]);
        assert_eq!(tree.get_all_value(&999), Vec::<i64>::new());
    }
}
