//! Building blocks shared by the fan-in operators.
//!
//! [`BufferedInput`] is an input port with a small bounded queue: it suspends
//! its producer when the queue is full and resumes it once an item is taken.
//! [`HeadQueue`] keeps one heap entry per input whose queue is non-empty and
//! counts the open inputs that have not presented a head yet. Selection is
//! only allowed while that count is zero, which is what keeps fan-in output
//! ordered across inputs that arrive at different speeds.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::rc::Rc;

use datastream_core::port::InputPort;
use datastream_core::protocol::StreamConsumer;
use datastream_core::status::StreamStatus;

use crate::traits::{Comparator, KeyFn};

pub(crate) struct BufferedInput<T: 'static> {
    pub(crate) port: Rc<InputPort<T>>,
    queue: RefCell<VecDeque<T>>,
    capacity: Cell<usize>,
    ended: Cell<bool>,
}

impl<T: 'static> BufferedInput<T> {
    pub(crate) fn new(port: Rc<InputPort<T>>, capacity: usize) -> Self {
        Self {
            port,
            queue: RefCell::new(VecDeque::new()),
            capacity: Cell::new(capacity.max(1)),
            ended: Cell::new(false),
        }
    }

    /// Queue an item; returns whether it became the head.
    pub(crate) fn push(&self, item: T) -> bool {
        let (was_empty, full) = {
            let mut queue = self.queue.borrow_mut();
            let was_empty = queue.is_empty();
            queue.push_back(item);
            (was_empty, queue.len() >= self.capacity.get())
        };
        if full {
            self.port.suspend();
        }
        was_empty
    }

    pub(crate) fn pop(&self) -> Option<T> {
        let item = self.queue.borrow_mut().pop_front();
        let below_capacity = self.queue.borrow().len() < self.capacity.get();
        if item.is_some()
            && below_capacity
            && !self.ended.get()
            && self.port.status() == StreamStatus::Suspended
        {
            self.port.resume();
        }
        item
    }

    pub(crate) fn set_capacity(&self, capacity: usize) {
        self.capacity.set(capacity.max(1));
    }

    pub(crate) fn head_key<K>(&self, key_fn: &KeyFn<T, K>) -> Option<K> {
        self.queue.borrow().front().map(|item| key_fn(item))
    }

    /// Borrow the head without taking it.
    pub(crate) fn with_head<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.queue.borrow().front().map(f)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }

    pub(crate) fn mark_ended(&self) {
        self.ended.set(true);
    }

    pub(crate) fn is_ended(&self) -> bool {
        self.ended.get()
    }

    pub(crate) fn clear(&self) {
        self.queue.borrow_mut().clear();
    }
}

/// Entry in the head heap.
///
/// Ordered by key (reversed for min-heap behavior); equal keys go to the
/// lowest input index first.
struct HeadEntry<K> {
    key: K,
    index: usize,
    cmp: Comparator<K>,
}

impl<K> PartialEq for HeadEntry<K> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<K> Eq for HeadEntry<K> {}

impl<K> PartialOrd for HeadEntry<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K> Ord for HeadEntry<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.cmp)(&other.key, &self.key).then_with(|| other.index.cmp(&self.index))
    }
}

pub(crate) struct HeadQueue<K> {
    heap: RefCell<BinaryHeap<HeadEntry<K>>>,
    cmp: Comparator<K>,
    waiting: Cell<usize>,
}

impl<K> HeadQueue<K> {
    pub(crate) fn new(cmp: Comparator<K>) -> Self {
        Self {
            heap: RefCell::new(BinaryHeap::new()),
            cmp,
            waiting: Cell::new(0),
        }
    }

    pub(crate) fn comparator(&self) -> &Comparator<K> {
        &self.cmp
    }

    /// A new, still empty, input joined.
    pub(crate) fn add_source(&self) {
        self.waiting.set(self.waiting.get() + 1);
    }

    /// An empty input received its first queued item.
    pub(crate) fn head_arrived(&self, key: K, index: usize) {
        self.waiting.set(self.waiting.get().saturating_sub(1));
        self.push(key, index);
    }

    /// An input ended with an empty queue.
    pub(crate) fn source_ended_empty(&self) {
        self.waiting.set(self.waiting.get().saturating_sub(1));
    }

    /// After taking the head of `index`: register its next head, or start
    /// waiting for one if the input is still open.
    pub(crate) fn head_consumed(&self, next: Option<K>, index: usize, ended: bool) {
        match next {
            Some(key) => self.push(key, index),
            None if !ended => self.waiting.set(self.waiting.get() + 1),
            None => {}
        }
    }

    /// Every open input presents a head.
    pub(crate) fn ready(&self) -> bool {
        self.waiting.get() == 0
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.heap.borrow().is_empty()
    }

    /// Compare `key` against the minimal head.
    pub(crate) fn cmp_min(&self, key: &K) -> Option<Ordering> {
        self.heap.borrow().peek().map(|e| (self.cmp)(&e.key, key))
    }

    pub(crate) fn pop(&self) -> Option<(K, usize)> {
        self.heap.borrow_mut().pop().map(|e| (e.key, e.index))
    }

    fn push(&self, key: K, index: usize) {
        self.heap.borrow_mut().push(HeadEntry {
            key,
            index,
            cmp: Rc::clone(&self.cmp),
        });
    }
}
