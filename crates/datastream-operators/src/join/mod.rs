//! Sort-merge join of two key-sorted inputs.

pub mod merge;

pub use merge::{joiner, FnJoiner, Join, ValueJoiner};
