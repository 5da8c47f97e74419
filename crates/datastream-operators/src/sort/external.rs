//! External merge sort.
//!
//! Items are collected into a bounded in-memory run. A full run is sorted and
//! written to a new partition of the storage when the next item arrives,
//! with the input suspended until the write completes. The run that is
//! current at end-of-stream never touches storage: it is merged from memory
//! together with the partitions, in write order, by a [`Merger`] with the
//! same key order and deduplication. An input that fits one run is sorted
//! without any storage round trip.
//!
//! Once the output is terminal the sorter releases its own partitions; the
//! outcome is reported through [`Sorter::finished`].

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use datastream_core::completion::{Completion, CompletionCell};
use datastream_core::error::{Result, StreamError};
use datastream_core::eventloop::post_future;
use datastream_core::id::PartitionId;
use datastream_core::port::{InputHooks, InputPort, OutputPort};
use datastream_core::protocol::{connect, StreamConsumer, StreamProducer};
use datastream_core::storage::SorterStorage;
use datastream_core::supplier::of_iter;
use tracing::{debug, warn};

use super::run::RunBuffer;
use crate::forwarder::passthrough;
use crate::merge::Merger;
use crate::traits::{key_fn, natural_order, Comparator, KeyFn};

pub struct Sorter<K: 'static, T: 'static> {
    state: Rc<SorterState<K, T>>,
}

struct SorterState<K: 'static, T: 'static> {
    input: Rc<InputPort<T>>,
    /// Receives the merged stream and forwards it to `output`.
    merged: Rc<InputPort<T>>,
    output: Rc<OutputPort<T>>,
    storage: Rc<dyn SorterStorage<T>>,
    key_fn: KeyFn<T, K>,
    cmp: Comparator<K>,
    deduplicate: bool,
    buffer_size: Cell<usize>,
    run: RefCell<RunBuffer<K, T>>,
    partitions: RefCell<Vec<PartitionId>>,
    writing: RefCell<Option<Completion>>,
    input_ended: Cell<bool>,
    merging: Cell<bool>,
    closed: Cell<bool>,
    released: Cell<bool>,
    finished: CompletionCell,
}

impl<K: 'static, T: 'static> Sorter<K, T> {
    pub fn new(
        storage: Rc<dyn SorterStorage<T>>,
        key_fn: KeyFn<T, K>,
        cmp: Comparator<K>,
        deduplicate: bool,
        items_in_memory_threshold: usize,
    ) -> Self {
        let input = InputPort::new("sorter.in");
        let merged = InputPort::new("sorter.merged");
        let output = OutputPort::new("sorter.out");
        let state = Rc::new(SorterState {
            input: Rc::clone(&input),
            merged: Rc::clone(&merged),
            output: Rc::clone(&output),
            storage,
            run: RefCell::new(RunBuffer::new(
                Rc::clone(&key_fn),
                Rc::clone(&cmp),
                items_in_memory_threshold,
            )),
            key_fn,
            cmp,
            deduplicate,
            buffer_size: Cell::new(1),
            partitions: RefCell::new(Vec::new()),
            writing: RefCell::new(None),
            input_ended: Cell::new(false),
            merging: Cell::new(false),
            closed: Cell::new(false),
            released: Cell::new(false),
            finished: CompletionCell::new(),
        });

        let (on_item, on_end, on_error) = (Rc::clone(&state), Rc::clone(&state), Rc::clone(&state));
        input.install(
            InputHooks::new(move |item: T| on_item.accept(item))
                .on_end_of_stream(move || on_end.collected())
                .on_error(move |e| on_error.abort(e)),
        );

        let (on_drained, on_failed) = (Rc::clone(&state), Rc::clone(&state));
        passthrough(
            &merged,
            &output,
            |item, output| output.send(item),
            move |output| {
                output.end_of_stream();
                on_drained.release(Ok(()));
            },
            move |e| on_failed.abort(e),
        );

        Self { state }
    }

    /// Per-input buffer of the final merge.
    pub fn with_buffer_size(self, buffer_size: usize) -> Self {
        self.state.buffer_size.set(buffer_size.max(1));
        self
    }

    pub fn input(&self) -> Rc<InputPort<T>> {
        Rc::clone(&self.state.input)
    }

    pub fn output(&self) -> Rc<OutputPort<T>> {
        Rc::clone(&self.state.output)
    }

    /// Resolves after the output is terminal and the sorter's partitions have
    /// been released, with the output's outcome.
    pub fn finished(&self) -> Completion {
        self.state.finished.completion()
    }

    /// Partitions written so far, in write order.
    pub fn partitions(&self) -> Vec<PartitionId> {
        self.state.partitions.borrow().clone()
    }
}

impl<K: Ord + 'static, T: 'static> Sorter<K, T> {
    /// Sort by the natural order of an extracted key.
    pub fn by_key(
        storage: Rc<dyn SorterStorage<T>>,
        f: impl Fn(&T) -> K + 'static,
        deduplicate: bool,
        items_in_memory_threshold: usize,
    ) -> Self {
        Self::new(
            storage,
            key_fn(f),
            natural_order(),
            deduplicate,
            items_in_memory_threshold,
        )
    }
}

impl<K: 'static, T: 'static> SorterState<K, T> {
    fn accept(self: &Rc<Self>, item: T) {
        let full = self.run.borrow().is_full();
        if full {
            if let Err(e) = self.spill() {
                self.abort(&e);
                return;
            }
        }
        self.run.borrow_mut().push(item);
    }

    /// Write the current run to a new partition, input suspended meanwhile.
    fn spill(self: &Rc<Self>) -> Result<()> {
        self.input.suspend();
        let items = self.run.borrow_mut().take_sorted();
        let partition = self.storage.allocate_partition()?;
        self.partitions.borrow_mut().push(partition);
        let writer = self.storage.writer(partition)?;
        debug!(%partition, items = items.len(), "writing sorted partition");

        let done = writer.completion();
        *self.writing.borrow_mut() = Some(done.clone());
        connect(&of_iter(items), &writer);

        let this = Rc::clone(self);
        post_future(async move {
            let outcome = done.await;
            this.writing.borrow_mut().take();
            match outcome {
                Ok(()) if this.closed.get() => {}
                Ok(()) if this.input_ended.get() => this.start_merge(),
                Ok(()) => this.input.resume(),
                Err(e) => this.abort(&e),
            }
        });
        Ok(())
    }

    fn collected(self: &Rc<Self>) {
        self.input_ended.set(true);
        if self.writing.borrow().is_none() {
            self.start_merge();
        }
    }

    fn start_merge(self: &Rc<Self>) {
        if self.closed.get() || self.merging.replace(true) {
            return;
        }
        let partitions = self.partitions.borrow().clone();
        let last_run = self.run.borrow_mut().take_sorted();
        debug!(
            partitions = partitions.len(),
            in_memory = last_run.len(),
            "merging sorted runs"
        );

        let merger = Merger::new(Rc::clone(&self.key_fn), Rc::clone(&self.cmp), self.deduplicate)
            .with_buffer_size(self.buffer_size.get());
        for partition in partitions {
            let input = merger.new_input();
            match self.storage.reader(partition) {
                Ok(reader) => connect(&reader, &input),
                Err(e) => {
                    merger.output().close_with_error(e.clone());
                    self.abort(&e);
                    return;
                }
            }
        }
        connect(&of_iter(last_run), &merger.new_input());
        connect(&merger.output(), &self.merged);
    }

    fn abort(self: &Rc<Self>, error: &StreamError) {
        if self.closed.replace(true) {
            return;
        }
        debug!(%error, "sorter aborted");
        self.run.borrow_mut().clear();
        self.input.close_with_error(error.clone());
        self.merged.close_with_error(error.clone());
        self.output.close_with_error(error.clone());
        self.release(Err(error.clone()));
    }

    /// Drop this sorter's partitions once any in-flight write has settled.
    fn release(self: &Rc<Self>, outcome: Result<()>) {
        if self.released.replace(true) {
            return;
        }
        let this = Rc::clone(self);
        post_future(async move {
            let in_flight = this.writing.borrow().clone();
            if let Some(write) = in_flight {
                let _ = write.await;
            }
            let partitions = this.partitions.borrow().clone();
            if !partitions.is_empty() {
                match this.storage.cleanup(&partitions).await {
                    Ok(()) => debug!(partitions = partitions.len(), "released sorted partitions"),
                    Err(error) => warn!(%error, "failed to release sorted partitions"),
                }
            }
            this.finished.complete(outcome);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use datastream_core::eventloop::run_local;
    use datastream_core::sink::{SuspendPolicy, ToList};
    use datastream_core::status::StreamStatus;
    use datastream_core::supplier::of_iter_then_error;
    use futures::future::{self, FutureExt, LocalBoxFuture};

    /// Partitions kept in memory; `fail_after` makes allocation fail once that
    /// many partitions exist.
    #[derive(Default)]
    struct MemoryRuns {
        runs: Rc<RefCell<BTreeMap<PartitionId, Vec<i32>>>>,
        next: Cell<u64>,
        fail_after: Option<usize>,
        fail_reads: bool,
    }

    impl SorterStorage<i32> for MemoryRuns {
        fn allocate_partition(&self) -> Result<PartitionId> {
            if self.fail_after == Some(self.runs.borrow().len()) {
                return Err(StreamError::storage("no space left"));
            }
            let id = PartitionId::new(self.next.get());
            self.next.set(id.get() + 1);
            self.runs.borrow_mut().insert(id, Vec::new());
            Ok(id)
        }

        fn writer(&self, partition: PartitionId) -> Result<Rc<dyn StreamConsumer<i32>>> {
            let runs = Rc::clone(&self.runs);
            let port = InputPort::new("memory-run.writer");
            port.install(InputHooks::new(move |item: i32| {
                if let Some(run) = runs.borrow_mut().get_mut(&partition) {
                    run.push(item);
                }
            }));
            Ok(port)
        }

        fn reader(&self, partition: PartitionId) -> Result<Rc<dyn StreamProducer<i32>>> {
            if self.fail_reads {
                return Err(StreamError::storage("partition unreadable"));
            }
            let items = self.runs.borrow().get(&partition).cloned().unwrap_or_default();
            Ok(of_iter(items))
        }

        fn cleanup(&self, partitions: &[PartitionId]) -> LocalBoxFuture<'static, Result<()>> {
            for p in partitions {
                self.runs.borrow_mut().remove(p);
            }
            future::ready(Ok(())).boxed_local()
        }

        fn cleanup_all(&self) -> LocalBoxFuture<'static, Result<()>> {
            self.runs.borrow_mut().clear();
            future::ready(Ok(())).boxed_local()
        }
    }

    fn shared(storage: &Rc<MemoryRuns>) -> Rc<dyn SorterStorage<i32>> {
        storage.clone()
    }

    const INPUT: [i32; 9] = [3, 1, 3, 2, 5, 1, 4, 3, 2];

    fn sort(items: Vec<i32>, deduplicate: bool, threshold: usize) -> (Vec<i32>, usize) {
        run_local(async move {
            let storage = Rc::new(MemoryRuns::default());
            let sorter = Sorter::by_key(shared(&storage), |x: &i32| *x, deduplicate, threshold);
            connect(&of_iter(items), &sorter.input());
            let sink = ToList::with_policy(SuspendPolicy::EveryItem);
            connect(&sorter.output(), &sink.input());
            sink.completion().await.unwrap();
            sorter.finished().await.unwrap();
            assert!(storage.runs.borrow().is_empty());
            (sink.take(), sorter.partitions().len())
        })
        .unwrap()
    }

    #[test]
    fn sorts_through_partitions() {
        let (out, partitions) = sort(INPUT.to_vec(), false, 2);
        assert_eq!(out, vec![1, 1, 2, 2, 3, 3, 3, 4, 5]);
        assert_eq!(partitions, 4);
    }

    #[test]
    fn sorts_with_dedup() {
        let (out, _) = sort(INPUT.to_vec(), true, 2);
        assert_eq!(out, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn sorted_input_is_unchanged() {
        let input: Vec<i32> = (0..100).collect();
        assert_eq!(sort(input.clone(), false, 7).0, input);
    }

    #[test]
    fn small_input_stays_in_memory() {
        let (out, partitions) = sort(vec![2, 1], false, 100);
        assert_eq!(out, vec![1, 2]);
        assert_eq!(partitions, 0);
    }

    #[test]
    fn single_full_run_is_not_spilled() {
        let (out, partitions) = sort(vec![3, 1, 2], false, 3);
        assert_eq!(out, vec![1, 2, 3]);
        assert_eq!(partitions, 0);
    }

    #[test]
    fn last_run_is_merged_from_memory() {
        let (out, partitions) = sort(vec![6, 5, 4, 3, 2, 1], false, 3);
        assert_eq!(out, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(partitions, 1);

        let (_, partitions) = sort(vec![7, 6, 5, 4, 3, 2, 1], false, 3);
        assert_eq!(partitions, 2);
    }

    #[test]
    fn empty_input_ends_empty() {
        assert!(sort(Vec::new(), false, 2).0.is_empty());
    }

    #[test]
    fn allocation_failure_closes_input_and_output() {
        run_local(async {
            let storage = Rc::new(MemoryRuns {
                fail_after: Some(1),
                ..Default::default()
            });
            let sorter = Sorter::by_key(shared(&storage), |x: &i32| *x, false, 2);
            let source = of_iter(INPUT.to_vec());
            connect(&source, &sorter.input());
            let sink = ToList::new();
            connect(&sorter.output(), &sink.input());

            let err = Err(StreamError::storage("no space left"));
            assert_eq!(sink.completion().await, err);
            assert_eq!(source.completion().await, err);
            assert_eq!(sorter.finished().await, err);
            assert!(sink.is_empty());
            assert!(storage.runs.borrow().is_empty());
        })
        .unwrap();
    }

    #[test]
    fn upstream_error_never_merges() {
        run_local(async {
            let storage = Rc::new(MemoryRuns::default());
            let sorter = Sorter::by_key(shared(&storage), |x: &i32| *x, false, 2);
            connect(
                &of_iter_then_error(INPUT.to_vec(), StreamError::upstream("reader died")),
                &sorter.input(),
            );
            let sink = ToList::new();
            connect(&sorter.output(), &sink.input());

            let err = Err(StreamError::upstream("reader died"));
            assert_eq!(sink.completion().await, err);
            assert_eq!(sorter.finished().await, err);
            assert!(sink.is_empty());
            assert!(storage.runs.borrow().is_empty());
        })
        .unwrap();
    }

    #[test]
    fn read_failure_closes_output_only() {
        run_local(async {
            let storage = Rc::new(MemoryRuns {
                fail_reads: true,
                ..Default::default()
            });
            let sorter = Sorter::by_key(shared(&storage), |x: &i32| *x, false, 2);
            let source = of_iter(INPUT.to_vec());
            connect(&source, &sorter.input());
            let sink = ToList::new();
            connect(&sorter.output(), &sink.input());

            let err = Err(StreamError::storage("partition unreadable"));
            assert_eq!(sink.completion().await, err);
            assert_eq!(source.completion().await, Ok(()));
            assert_eq!(sorter.input().status(), StreamStatus::EndOfStream);
            assert_eq!(sorter.finished().await, err);
        })
        .unwrap();
    }

    #[test]
    fn downstream_error_closes_input() {
        run_local(async {
            let storage = Rc::new(MemoryRuns::default());
            let sorter = Sorter::by_key(shared(&storage), |x: &i32| *x, false, 2);
            let source = of_iter(0..1_000);
            connect(&source, &sorter.input());
            let sink = ToList::new();
            connect(&sorter.output(), &sink.input());
            sink.input().close_with_error(StreamError::downstream("consumer gone"));

            let err = Err(StreamError::downstream("consumer gone"));
            assert_eq!(source.completion().await, err);
            assert_eq!(sorter.finished().await, err);
        })
        .unwrap();
    }
}
