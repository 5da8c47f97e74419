//! Keyed reduction over several sorted inputs of different item types.
//!
//! Heads are selected like in the merger. All items sharing the current
//! minimal key, across every input, are folded into one accumulator; once no
//! head carries that key any more, the reducer of the input that contributed
//! last completes the key. Reducers may emit any number of output items at
//! every step; those are queued and sent while the output has demand, and no
//! further head is taken while the queue is non-empty and the output is not
//! ready.

pub mod reducers;

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::rc::Rc;

use datastream_core::error::StreamError;
use datastream_core::eventloop::post;
use datastream_core::port::{InputHooks, InputPort, OutputHooks, OutputPort};
use datastream_core::protocol::{StreamConsumer, StreamProducer};
use tracing::debug;

use crate::fanin::{BufferedInput, HeadQueue};
use crate::traits::{natural_order, Comparator, KeyFn};

pub use reducers::{
    accumulator_to_accumulator, accumulator_to_output, fold, input_to_accumulator,
    input_to_output, merge_distinct, merge_sort, AccumulatorToAccumulator, AccumulatorToOutput,
    Fold, InputToAccumulator, InputToOutput, MergeDistinct, MergeSort, ReducerToResult,
};

/// Collects the output items a [`Reducer`] emits.
pub struct Emitter<'a, O> {
    items: &'a mut VecDeque<O>,
}

impl<'a, O> Emitter<'a, O> {
    pub(crate) fn new(items: &'a mut VecDeque<O>) -> Self {
        Self { items }
    }

    pub fn emit(&mut self, item: O) {
        self.items.push_back(item);
    }
}

/// Per-input folding logic: `I` items of one key become an `A` accumulator.
/// Every step may emit zero or more `O` items.
pub trait Reducer<K, I, O, A> {
    fn on_first_item(&self, out: &mut Emitter<'_, O>, key: &K, item: I) -> A;

    fn on_next_item(&self, out: &mut Emitter<'_, O>, key: &K, item: I, accumulator: A) -> A;

    fn on_complete(&self, out: &mut Emitter<'_, O>, key: K, accumulator: A);
}

/// Type-erased view of one input and its reducer.
trait ReducerSlot<K, O, A> {
    fn head_key(&self) -> Option<K>;

    fn is_empty(&self) -> bool;

    fn is_ended(&self) -> bool;

    fn mark_ended(&self);

    /// Take the head and open an accumulator with it.
    fn start(&self, out: &mut Emitter<'_, O>, key: &K) -> Option<A>;

    /// Take the head and fold it into `accumulator`.
    fn fold(&self, out: &mut Emitter<'_, O>, key: &K, accumulator: A) -> A;

    fn complete(&self, out: &mut Emitter<'_, O>, key: K, accumulator: A);

    fn close(&self, error: &StreamError);
}

struct Slot<K, I: 'static, O, A> {
    input: BufferedInput<I>,
    key_fn: KeyFn<I, K>,
    reducer: Box<dyn Reducer<K, I, O, A>>,
}

impl<K, I: 'static, O, A> ReducerSlot<K, O, A> for Slot<K, I, O, A> {
    fn head_key(&self) -> Option<K> {
        self.input.head_key(&self.key_fn)
    }

    fn is_empty(&self) -> bool {
        self.input.is_empty()
    }

    fn is_ended(&self) -> bool {
        self.input.is_ended()
    }

    fn mark_ended(&self) {
        self.input.mark_ended();
    }

    fn start(&self, out: &mut Emitter<'_, O>, key: &K) -> Option<A> {
        let item = self.input.pop()?;
        Some(self.reducer.on_first_item(out, key, item))
    }

    fn fold(&self, out: &mut Emitter<'_, O>, key: &K, accumulator: A) -> A {
        match self.input.pop() {
            Some(item) => self.reducer.on_next_item(out, key, item, accumulator),
            None => accumulator,
        }
    }

    fn complete(&self, out: &mut Emitter<'_, O>, key: K, accumulator: A) {
        self.reducer.on_complete(out, key, accumulator);
    }

    fn close(&self, error: &StreamError) {
        self.input.clear();
        self.input.port.close_with_error(error.clone());
    }
}

/// The key being reduced, its accumulator and the input that contributed last.
struct Current<K, A> {
    key: K,
    accumulator: A,
    last: usize,
}

pub struct StreamReducer<K: 'static, O: 'static, A: 'static> {
    state: Rc<ReducerState<K, O, A>>,
}

struct ReducerState<K: 'static, O: 'static, A: 'static> {
    slots: RefCell<Vec<Rc<dyn ReducerSlot<K, O, A>>>>,
    output: Rc<OutputPort<O>>,
    heads: HeadQueue<K>,
    current: RefCell<Option<Current<K, A>>>,
    /// Emitted items not yet sent.
    pending: RefCell<VecDeque<O>>,
    buffer_size: Cell<usize>,
    scheduled: Cell<bool>,
    closed: Cell<bool>,
}

impl<K: 'static, O: 'static, A: 'static> StreamReducer<K, O, A> {
    pub fn with_comparator(cmp: Comparator<K>) -> Self {
        let output = OutputPort::new("reducer.out");
        let state = Rc::new(ReducerState {
            slots: RefCell::new(Vec::new()),
            output: Rc::clone(&output),
            heads: HeadQueue::new(cmp),
            current: RefCell::new(None),
            pending: RefCell::new(VecDeque::new()),
            buffer_size: Cell::new(1),
            scheduled: Cell::new(false),
            closed: Cell::new(false),
        });
        let (on_bound, on_resume, on_error) =
            (Rc::clone(&state), Rc::clone(&state), Rc::clone(&state));
        output.install(
            OutputHooks::new()
                .on_bound(move || on_bound.produce())
                .on_resume(move || on_resume.produce())
                .on_error(move |e| on_error.abort(e)),
        );
        Self { state }
    }

    pub fn with_buffer_size(self, buffer_size: usize) -> Self {
        self.state.buffer_size.set(buffer_size.max(1));
        self
    }

    /// Add an input of `I` items keyed by `key_fn` and folded by `reducer`.
    ///
    /// Inputs may be added until the output is connected; after that the
    /// returned port is already closed with a protocol violation.
    pub fn new_input<I: 'static>(
        &self,
        key_fn: impl Fn(&I) -> K + 'static,
        reducer: impl Reducer<K, I, O, A> + 'static,
    ) -> Rc<InputPort<I>> {
        let state = &self.state;
        let index = state.slots.borrow().len();
        let port = InputPort::new(format!("reducer.in[{index}]"));
        if state.output.is_bound() || state.output.status().is_terminal() {
            port.close_with_error(StreamError::ProtocolViolation(
                "reducer: input added after the output was connected".into(),
            ));
            return port;
        }

        let slot = Rc::new(Slot {
            input: BufferedInput::new(Rc::clone(&port), state.buffer_size.get()),
            key_fn: Rc::new(key_fn) as KeyFn<I, K>,
            reducer: Box::new(reducer),
        });
        state.heads.add_source();

        let (item_slot, on_item) = (Rc::clone(&slot), Rc::clone(state));
        let (on_end, on_error) = (Rc::clone(state), Rc::clone(state));
        port.install(
            InputHooks::new(move |item: I| {
                if item_slot.input.push(item) {
                    if let Some(key) = item_slot.head_key() {
                        on_item.heads.head_arrived(key, index);
                    }
                    on_item.schedule();
                }
            })
            .on_end_of_stream(move || on_end.input_ended(index))
            .on_error(move |e| on_error.abort(e)),
        );
        state.slots.borrow_mut().push(slot);
        port
    }

    pub fn output(&self) -> Rc<OutputPort<O>> {
        Rc::clone(&self.state.output)
    }

    pub fn input_count(&self) -> usize {
        self.state.slots.borrow().len()
    }
}

impl<K: Ord + 'static, O: 'static, A: 'static> StreamReducer<K, O, A> {
    /// Reduce by the natural order of the key.
    pub fn new() -> Self {
        Self::with_comparator(natural_order())
    }
}

impl<K: Ord + 'static, O: 'static, A: 'static> Default for StreamReducer<K, O, A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: 'static, O: 'static, A: 'static> ReducerState<K, O, A> {
    fn slot(&self, index: usize) -> Option<Rc<dyn ReducerSlot<K, O, A>>> {
        self.slots.borrow().get(index).cloned()
    }

    fn input_ended(self: &Rc<Self>, index: usize) {
        let Some(slot) = self.slot(index) else {
            return;
        };
        slot.mark_ended();
        if slot.is_empty() {
            self.heads.source_ended_empty();
        }
        self.schedule();
    }

    fn schedule(self: &Rc<Self>) {
        if self.scheduled.replace(true) {
            return;
        }
        let this = Rc::clone(self);
        post(move || {
            this.scheduled.set(false);
            this.produce();
        });
    }

    fn produce(&self) {
        if self.closed.get() || self.output.status().is_terminal() || !self.output.is_bound() {
            return;
        }
        loop {
            if !self.flush() || !self.heads.ready() {
                return;
            }
            let current = self.current.borrow_mut().take();
            match current {
                Some(current) => {
                    if self.heads.cmp_min(&current.key) == Some(Ordering::Equal) {
                        let next = self.fold_head(current);
                        *self.current.borrow_mut() = Some(next);
                        continue;
                    }
                    let Some(slot) = self.slot(current.last) else {
                        return;
                    };
                    self.emit(|out| slot.complete(out, current.key, current.accumulator));
                }
                None => {
                    if self.heads.is_empty() {
                        debug!(inputs = self.slots.borrow().len(), "reducer drained");
                        self.output.end_of_stream();
                        return;
                    }
                    let Some((key, index)) = self.heads.pop() else {
                        return;
                    };
                    let Some(slot) = self.slot(index) else {
                        continue;
                    };
                    let Some(accumulator) = self.emit(|out| slot.start(out, &key)) else {
                        continue;
                    };
                    self.heads.head_consumed(slot.head_key(), index, slot.is_ended());
                    *self.current.borrow_mut() = Some(Current {
                        key,
                        accumulator,
                        last: index,
                    });
                }
            }
        }
    }

    /// Send queued items while the output has demand; true once none is left.
    fn flush(&self) -> bool {
        loop {
            if self.closed.get() {
                return false;
            }
            if !self.output.is_ready() {
                return self.pending.borrow().is_empty();
            }
            let item = self.pending.borrow_mut().pop_front();
            match item {
                Some(item) => self.output.send(item),
                None => return true,
            }
        }
    }

    fn emit<R>(&self, f: impl FnOnce(&mut Emitter<'_, O>) -> R) -> R {
        let mut pending = self.pending.borrow_mut();
        f(&mut Emitter::new(&mut pending))
    }

    /// Fold the minimal head, whose key equals the current one.
    fn fold_head(&self, current: Current<K, A>) -> Current<K, A> {
        let Some((_, index)) = self.heads.pop() else {
            return current;
        };
        let Some(slot) = self.slot(index) else {
            return current;
        };
        let accumulator = self.emit(|out| slot.fold(out, &current.key, current.accumulator));
        self.heads.head_consumed(slot.head_key(), index, slot.is_ended());
        Current {
            key: current.key,
            accumulator,
            last: index,
        }
    }

    fn abort(&self, error: &StreamError) {
        if self.closed.replace(true) {
            return;
        }
        debug!(%error, "reducer aborted");
        self.current.borrow_mut().take();
        self.pending.borrow_mut().clear();
        self.output.close_with_error(error.clone());
        let slots = self.slots.borrow().clone();
        for slot in slots {
            slot.close(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datastream_core::eventloop::run_local;
    use datastream_core::protocol::connect;
    use datastream_core::sink::{SuspendPolicy, ToList};
    use datastream_core::supplier::{of_iter, of_iter_then_error};

    #[test]
    fn merge_distinct_over_eight_inputs() {
        let inputs: Vec<Vec<i32>> = vec![
            vec![1, 2, 3],
            vec![3, 4, 5],
            vec![],
            vec![1, 1, 7],
            vec![2, 6],
            vec![5],
            vec![4, 4, 4],
            vec![1, 2, 3, 4, 5, 6, 7],
        ];
        let out = run_local(async move {
            let reducer = StreamReducer::<i32, i32, i32>::new();
            for items in inputs {
                connect(&of_iter(items), &reducer.new_input(|x: &i32| *x, merge_distinct()));
            }
            let sink = ToList::with_policy(SuspendPolicy::EveryItem);
            connect(&reducer.output(), &sink.input());
            sink.completion().await.unwrap();
            sink.take()
        })
        .unwrap();
        assert_eq!(out, vec![1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn merge_sort_keeps_duplicates_under_backpressure() {
        let out = run_local(async {
            let reducer = StreamReducer::<u8, (u8, char), ()>::new();
            for (tag, keys) in [('a', vec![1, 1, 3]), ('b', vec![1, 2, 3, 3])] {
                let items: Vec<(u8, char)> = keys.into_iter().map(|k| (k, tag)).collect();
                connect(&of_iter(items), &reducer.new_input(|x: &(u8, char)| x.0, merge_sort()));
            }
            let sink = ToList::with_policy(SuspendPolicy::EveryItem);
            connect(&reducer.output(), &sink.input());
            sink.completion().await.unwrap();
            sink.take()
        })
        .unwrap();
        assert_eq!(
            out,
            vec![(1, 'a'), (1, 'a'), (1, 'b'), (2, 'b'), (3, 'a'), (3, 'b'), (3, 'b')]
        );
    }

    /// Total amount per account, computed as partial sums then combined.
    struct TotalPerAccount;

    impl ReducerToResult<u32> for TotalPerAccount {
        type Input = (u32, u64);
        type Output = String;
        type Accumulator = (u32, u64);

        fn create_accumulator(&self, key: &u32) -> (u32, u64) {
            (*key, 0)
        }

        fn accumulate(&self, acc: (u32, u64), item: (u32, u64)) -> (u32, u64) {
            (acc.0, acc.1 + item.1)
        }

        fn combine(&self, acc: (u32, u64), other: (u32, u64)) -> (u32, u64) {
            (acc.0, acc.1 + other.1)
        }

        fn produce_result(&self, acc: (u32, u64)) -> String {
            format!("{}={}", acc.0, acc.1)
        }
    }

    #[test]
    fn two_stage_reduction_through_chained_reducers() {
        let out = run_local(async {
            let partial = StreamReducer::<u32, (u32, u64), (u32, u64)>::new();
            connect(
                &of_iter(vec![(1, 5), (1, 5), (2, 1)]),
                &partial.new_input(|x: &(u32, u64)| x.0, input_to_accumulator(TotalPerAccount)),
            );

            let total = StreamReducer::<u32, String, (u32, u64)>::new();
            let partials = total.new_input(|x: &(u32, u64)| x.0, accumulator_to_output(TotalPerAccount));
            let shard = total.new_input(|x: &(u32, u64)| x.0, accumulator_to_output(TotalPerAccount));
            connect(&partial.output(), &partials);
            connect(&of_iter(vec![(1, 30), (3, 7)]), &shard);

            let sink = ToList::with_policy(SuspendPolicy::EveryItem);
            connect(&total.output(), &sink.input());
            sink.completion().await.unwrap();
            sink.take()
        })
        .unwrap();
        assert_eq!(out, vec!["1=40", "2=1", "3=7"]);
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Order {
        customer: u32,
        amount: u64,
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Refund {
        customer: u32,
        amount: u64,
    }

    #[derive(Debug, Clone, PartialEq, Default)]
    struct Balance {
        customer: u32,
        orders: u64,
        refunds: u64,
    }

    #[test]
    fn heterogeneous_inputs_share_one_accumulator() {
        let out = run_local(async {
            let reducer = StreamReducer::<u32, Balance, Balance>::new();
            let orders = reducer.new_input(
                |o: &Order| o.customer,
                fold(
                    |k: &u32, o: Order| Balance { customer: *k, orders: o.amount, refunds: 0 },
                    |_, mut acc: Balance, o: Order| {
                        acc.orders += o.amount;
                        acc
                    },
                    |_, acc| acc,
                ),
            );
            let refunds = reducer.new_input(
                |r: &Refund| r.customer,
                fold(
                    |k: &u32, r: Refund| Balance { customer: *k, orders: 0, refunds: r.amount },
                    |_, mut acc: Balance, r: Refund| {
                        acc.refunds += r.amount;
                        acc
                    },
                    |_, acc| acc,
                ),
            );
            connect(
                &of_iter(vec![
                    Order { customer: 1, amount: 10 },
                    Order { customer: 1, amount: 5 },
                    Order { customer: 3, amount: 7 },
                ]),
                &orders,
            );
            connect(
                &of_iter(vec![
                    Refund { customer: 1, amount: 2 },
                    Refund { customer: 2, amount: 4 },
                ]),
                &refunds,
            );
            let sink = ToList::new();
            connect(&reducer.output(), &sink.input());
            sink.completion().await.unwrap();
            sink.take()
        })
        .unwrap();

        assert_eq!(
            out,
            vec![
                Balance { customer: 1, orders: 15, refunds: 2 },
                Balance { customer: 2, orders: 0, refunds: 4 },
                Balance { customer: 3, orders: 7, refunds: 0 },
            ]
        );
    }

    #[test]
    fn zero_inputs_end_with_no_items() {
        run_local(async {
            let reducer = StreamReducer::<i32, i32, i32>::new();
            let sink = ToList::new();
            connect(&reducer.output(), &sink.input());
            assert_eq!(sink.completion().await, Ok(()));
            assert!(sink.is_empty());
        })
        .unwrap();
    }

    #[test]
    fn input_after_completion_is_a_violation() {
        run_local(async {
            let reducer = StreamReducer::<i32, i32, i32>::new();
            let sink = ToList::new();
            connect(&reducer.output(), &sink.input());
            sink.completion().await.unwrap();

            let late = reducer.new_input(|x: &i32| *x, merge_distinct());
            assert!(matches!(
                late.completion().await,
                Err(StreamError::ProtocolViolation(_))
            ));
        })
        .unwrap();
    }

    #[test]
    fn inputs_join_until_the_output_is_connected() {
        let out = run_local(async {
            let reducer = StreamReducer::<i32, i32, i32>::new();
            connect(&of_iter(vec![1, 3]), &reducer.new_input(|x: &i32| *x, merge_distinct()));
            connect(&of_iter(Vec::new()), &reducer.new_input(|x: &i32| *x, merge_distinct()));
            for _ in 0..8 {
                tokio::task::yield_now().await;
            }

            let joined = reducer.new_input(|x: &i32| *x, merge_distinct());
            assert!(joined.status().is_open());
            connect(&of_iter(vec![2, 3, 5]), &joined);
            let sink = ToList::new();
            connect(&reducer.output(), &sink.input());
            sink.completion().await.unwrap();
            sink.take()
        })
        .unwrap();
        assert_eq!(out, vec![1, 2, 3, 5]);
    }

    #[test]
    fn failing_input_closes_siblings_and_output() {
        run_local(async {
            let reducer = StreamReducer::<i32, i32, i32>::new();
            let healthy = of_iter(0..100);
            connect(&healthy, &reducer.new_input(|x: &i32| *x, merge_distinct()));
            connect(
                &of_iter_then_error(vec![0, 1], StreamError::upstream("lost input")),
                &reducer.new_input(|x: &i32| *x, merge_distinct()),
            );
            let sink = ToList::new();
            connect(&reducer.output(), &sink.input());

            let err = Err(StreamError::upstream("lost input"));
            assert_eq!(sink.completion().await, err);
            assert_eq!(healthy.completion().await, err);
        })
        .unwrap();
    }
}
