//! Shared operator vocabulary: key extraction and key ordering.
//!
//! Keyed operators (merger, reducer, sorter, join) never require `Ord` on
//! items. They extract a key per item and order keys with a comparator, so
//! the same item type can be merged by different keys.

use std::cmp::Ordering;
use std::rc::Rc;

/// Extracts the ordering key of an item.
pub type KeyFn<I, K> = Rc<dyn Fn(&I) -> K>;

/// Total order over keys.
pub type Comparator<K> = Rc<dyn Fn(&K, &K) -> Ordering>;

pub fn key_fn<I, K>(f: impl Fn(&I) -> K + 'static) -> KeyFn<I, K> {
    Rc::new(f)
}

pub fn comparator<K>(f: impl Fn(&K, &K) -> Ordering + 'static) -> Comparator<K> {
    Rc::new(f)
}

/// `Ord::cmp` as a comparator.
pub fn natural_order<K: Ord + 'static>() -> Comparator<K> {
    Rc::new(|a: &K, b: &K| a.cmp(b))
}

/// Descending `Ord::cmp`.
pub fn reverse_order<K: Ord + 'static>() -> Comparator<K> {
    Rc::new(|a: &K, b: &K| b.cmp(a))
}

/// The item is its own key.
pub fn identity<T: Clone + 'static>() -> KeyFn<T, T> {
    Rc::new(|item: &T| item.clone())
}
