#![forbid(unsafe_code)]
//! datastream-spill: partition storage for the external sorter.
//!
//! `spill` defines the blocking byte-level `Storage` trait (implemented by
//! `datastream-io`) and the checksummed block format. `partition` turns a
//! byte store into a `SorterStorage<T>`: partitions are written and read as
//! streams, with the blocking calls moved onto the runtime's blocking pool.

pub mod error;
pub mod partition;
pub mod spill;

pub use error::{Error, Result};
pub use partition::{PartitionReader, PartitionWriter, SpillStorage};
pub use spill::{Codec, Storage};
