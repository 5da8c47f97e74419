//! In-memory run accumulation for the external sort.

use crate::traits::{Comparator, KeyFn};

/// Buffers items up to a threshold and hands them out as a sorted run.
///
/// Keys are extracted once per item. Sorting is stable, so items with equal
/// keys keep their arrival order.
pub(crate) struct RunBuffer<K, T> {
    items: Vec<(K, T)>,
    threshold: usize,
    key_fn: KeyFn<T, K>,
    cmp: Comparator<K>,
}

impl<K, T> RunBuffer<K, T> {
    pub(crate) fn new(key_fn: KeyFn<T, K>, cmp: Comparator<K>, threshold: usize) -> Self {
        Self {
            items: Vec::new(),
            threshold: threshold.max(1),
            key_fn,
            cmp,
        }
    }

    pub(crate) fn push(&mut self, item: T) {
        let key = (self.key_fn)(&item);
        self.items.push((key, item));
    }

    /// The threshold is reached; the next item must go to a fresh run.
    pub(crate) fn is_full(&self) -> bool {
        self.items.len() >= self.threshold
    }

    pub(crate) fn clear(&mut self) {
        self.items.clear();
    }

    pub(crate) fn take_sorted(&mut self) -> Vec<T> {
        let mut items = std::mem::take(&mut self.items);
        let cmp = &self.cmp;
        items.sort_by(|a, b| cmp(&a.0, &b.0));
        items.into_iter().map(|(_, item)| item).collect()
    }
}
