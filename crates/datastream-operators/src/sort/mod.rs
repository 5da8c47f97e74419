//! Sorting of unbounded input through external storage.

pub mod external;
pub(crate) mod run;

pub use external::Sorter;
