//! Ready-made [`Reducer`]s.
//!
//! Besides the single-stage reducers, [`ReducerToResult`] describes an
//! aggregation that can run in two stages: inputs are first folded into
//! accumulators ([`input_to_accumulator`]), partial accumulators of the same
//! key are then combined ([`accumulator_to_accumulator`]) and finally turned
//! into results ([`accumulator_to_output`]). [`input_to_output`] does the
//! whole aggregation in one pass.

use super::{Emitter, Reducer};

/// Keeps the first item of every key.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeDistinct;

pub fn merge_distinct() -> MergeDistinct {
    MergeDistinct
}

impl<K, T> Reducer<K, T, T, T> for MergeDistinct {
    fn on_first_item(&self, _out: &mut Emitter<'_, T>, _key: &K, item: T) -> T {
        item
    }

    fn on_next_item(&self, _out: &mut Emitter<'_, T>, _key: &K, _item: T, accumulator: T) -> T {
        accumulator
    }

    fn on_complete(&self, out: &mut Emitter<'_, T>, _key: K, accumulator: T) {
        out.emit(accumulator);
    }
}

/// Emits every item as it is taken, so equal keys keep all their items.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeSort;

pub fn merge_sort() -> MergeSort {
    MergeSort
}

impl<K, T> Reducer<K, T, T, ()> for MergeSort {
    fn on_first_item(&self, out: &mut Emitter<'_, T>, _key: &K, item: T) {
        out.emit(item);
    }

    fn on_next_item(&self, out: &mut Emitter<'_, T>, _key: &K, item: T, _accumulator: ()) {
        out.emit(item);
    }

    fn on_complete(&self, _out: &mut Emitter<'_, T>, _key: K, _accumulator: ()) {}
}

/// A reducer assembled from closures.
pub struct Fold<C, F, X> {
    create: C,
    accumulate: F,
    finish: X,
}

/// `create` opens the accumulator from the first item, `accumulate` folds
/// every further item, `finish` produces the output item.
pub fn fold<K, I, O, A, C, F, X>(create: C, accumulate: F, finish: X) -> Fold<C, F, X>
where
    C: Fn(&K, I) -> A,
    F: Fn(&K, A, I) -> A,
    X: Fn(K, A) -> O,
{
    Fold {
        create,
        accumulate,
        finish,
    }
}

impl<K, I, O, A, C, F, X> Reducer<K, I, O, A> for Fold<C, F, X>
where
    C: Fn(&K, I) -> A,
    F: Fn(&K, A, I) -> A,
    X: Fn(K, A) -> O,
{
    fn on_first_item(&self, _out: &mut Emitter<'_, O>, key: &K, item: I) -> A {
        (self.create)(key, item)
    }

    fn on_next_item(&self, _out: &mut Emitter<'_, O>, key: &K, item: I, accumulator: A) -> A {
        (self.accumulate)(key, accumulator, item)
    }

    fn on_complete(&self, out: &mut Emitter<'_, O>, key: K, accumulator: A) {
        out.emit((self.finish)(key, accumulator));
    }
}

/// An aggregation of `Input` items into `Output` results per key, through a
/// combinable `Accumulator`.
pub trait ReducerToResult<K> {
    type Input;
    type Output;
    type Accumulator;

    fn create_accumulator(&self, key: &K) -> Self::Accumulator;

    fn accumulate(&self, accumulator: Self::Accumulator, item: Self::Input) -> Self::Accumulator;

    /// Merge two partial accumulators of the same key.
    fn combine(&self, accumulator: Self::Accumulator, other: Self::Accumulator)
        -> Self::Accumulator;

    fn produce_result(&self, accumulator: Self::Accumulator) -> Self::Output;
}

/// First stage: inputs to one partial accumulator per key.
#[derive(Debug, Clone, Copy)]
pub struct InputToAccumulator<R>(pub R);

/// Intermediate stage: partial accumulators combined per key.
#[derive(Debug, Clone, Copy)]
pub struct AccumulatorToAccumulator<R>(pub R);

/// Final stage: partial accumulators combined and turned into results.
#[derive(Debug, Clone, Copy)]
pub struct AccumulatorToOutput<R>(pub R);

/// Inputs straight to results.
#[derive(Debug, Clone, Copy)]
pub struct InputToOutput<R>(pub R);

pub fn input_to_accumulator<R>(reducer: R) -> InputToAccumulator<R> {
    InputToAccumulator(reducer)
}

pub fn accumulator_to_accumulator<R>(reducer: R) -> AccumulatorToAccumulator<R> {
    AccumulatorToAccumulator(reducer)
}

pub fn accumulator_to_output<R>(reducer: R) -> AccumulatorToOutput<R> {
    AccumulatorToOutput(reducer)
}

pub fn input_to_output<R>(reducer: R) -> InputToOutput<R> {
    InputToOutput(reducer)
}

impl<K, R: ReducerToResult<K>> Reducer<K, R::Input, R::Accumulator, R::Accumulator>
    for InputToAccumulator<R>
{
    fn on_first_item(
        &self,
        _out: &mut Emitter<'_, R::Accumulator>,
        key: &K,
        item: R::Input,
    ) -> R::Accumulator {
        self.0.accumulate(self.0.create_accumulator(key), item)
    }

    fn on_next_item(
        &self,
        _out: &mut Emitter<'_, R::Accumulator>,
        _key: &K,
        item: R::Input,
        accumulator: R::Accumulator,
    ) -> R::Accumulator {
        self.0.accumulate(accumulator, item)
    }

    fn on_complete(&self, out: &mut Emitter<'_, R::Accumulator>, _key: K, accumulator: R::Accumulator) {
        out.emit(accumulator);
    }
}

impl<K, R: ReducerToResult<K>> Reducer<K, R::Accumulator, R::Accumulator, R::Accumulator>
    for AccumulatorToAccumulator<R>
{
    fn on_first_item(
        &self,
        _out: &mut Emitter<'_, R::Accumulator>,
        _key: &K,
        item: R::Accumulator,
    ) -> R::Accumulator {
        item
    }

    fn on_next_item(
        &self,
        _out: &mut Emitter<'_, R::Accumulator>,
        _key: &K,
        item: R::Accumulator,
        accumulator: R::Accumulator,
    ) -> R::Accumulator {
        self.0.combine(accumulator, item)
    }

    fn on_complete(&self, out: &mut Emitter<'_, R::Accumulator>, _key: K, accumulator: R::Accumulator) {
        out.emit(accumulator);
    }
}

impl<K, R: ReducerToResult<K>> Reducer<K, R::Accumulator, R::Output, R::Accumulator>
    for AccumulatorToOutput<R>
{
    fn on_first_item(
        &self,
        _out: &mut Emitter<'_, R::Output>,
        _key: &K,
        item: R::Accumulator,
    ) -> R::Accumulator {
        item
    }

    fn on_next_item(
        &self,
        _out: &mut Emitter<'_, R::Output>,
        _key: &K,
        item: R::Accumulator,
        accumulator: R::Accumulator,
    ) -> R::Accumulator {
        self.0.combine(accumulator, item)
    }

    fn on_complete(&self, out: &mut Emitter<'_, R::Output>, _key: K, accumulator: R::Accumulator) {
        out.emit(self.0.produce_result(accumulator));
    }
}

impl<K, R: ReducerToResult<K>> Reducer<K, R::Input, R::Output, R::Accumulator>
    for InputToOutput<R>
{
    fn on_first_item(
        &self,
        _out: &mut Emitter<'_, R::Output>,
        key: &K,
        item: R::Input,
    ) -> R::Accumulator {
        self.0.accumulate(self.0.create_accumulator(key), item)
    }

    fn on_next_item(
        &self,
        _out: &mut Emitter<'_, R::Output>,
        _key: &K,
        item: R::Input,
        accumulator: R::Accumulator,
    ) -> R::Accumulator {
        self.0.accumulate(accumulator, item)
    }

    fn on_complete(&self, out: &mut Emitter<'_, R::Output>, _key: K, accumulator: R::Accumulator) {
        out.emit(self.0.produce_result(accumulator));
    }
}
