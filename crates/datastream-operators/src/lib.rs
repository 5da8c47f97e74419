#![forbid(unsafe_code)]
//! datastream-operators: wiring, ordering and fan-in operators over the
//! push protocol of `datastream-core`.
//!
//! - Wiring: [`Forwarder`], [`Decorator`], [`Splitter`], [`Union`].
//! - Ordered fan-in: [`Merger`], [`StreamReducer`], [`Join`].
//! - [`Sorter`]: external merge sort over a `SorterStorage`.
//!
//! Keyed operators take a key extractor and a comparator (see [`traits`]);
//! their inputs must already be sorted by that order.

pub mod decorator;
mod fanin;
pub mod forwarder;
pub mod join;
pub mod merge;
pub mod reduce;
pub mod sort;
pub mod splitter;
pub mod traits;
pub mod union;

pub use decorator::{Decorator, DecoratorBuilder, DecoratorContext};
pub use forwarder::Forwarder;
pub use join::{joiner, Join, ValueJoiner};
pub use merge::Merger;
pub use reduce::{
    accumulator_to_accumulator, accumulator_to_output, fold, input_to_accumulator, input_to_output,
    merge_distinct, merge_sort, Emitter, Reducer, ReducerToResult, StreamReducer,
};
pub use sort::Sorter;
pub use splitter::Splitter;
pub use traits::{comparator, identity, key_fn, natural_order, reverse_order, Comparator, KeyFn};
pub use union::Union;
