//! Three-way key comparators.
//!
//! The tree is parameterized over two comparators (SPEC_FULL.md §4.3, §9): `C`, a
//! total order used for point lookups, unique-key inserts, and removes, and `D`, a
//! "degraded" comparator used for range scans that only orders by a key prefix so
//! `get_all_value` can walk every entry sharing that prefix across leaf boundaries.
//! For a tree whose key type has no meaningful prefix, `C` and `D` can be the same
//! comparator.

use std::cmp::Ordering;
use std::marker::PhantomData;

/// Orders two keys of type `K`. Implementors should be cheap to clone (typically a
/// zero-sized marker) since the tree clones its comparators freely.
pub trait KeyComparator<K>: Clone + Send + Sync + 'static {
    fn compare(&self, a: &K, b: &K) -> Ordering;
}

/// The obvious comparator for any `K: Ord`, usable as both the total-order and the
/// degraded comparator when a key type has no separate prefix notion.
#[derive(Debug, Clone, Copy, Default)]
pub struct NaturalOrdComparator<K>(PhantomData<K>);

impl<K> NaturalOrdComparator<K> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<K: Ord + Clone + Send + Sync + 'static> KeyComparator<K> for NaturalOrdComparator<K> {
    fn compare(&self, a: &K, b: &K) -> Ordering {
        a.cmp(b)
    }
}
