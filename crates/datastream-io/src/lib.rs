#![forbid(unsafe_code)]
//! datastream-io: concrete implementations of `datastream_spill::Storage`.
//!
//! - `FsStorage`: local filesystem.
//! - `MemoryStorage`: process-local map, for `memory://` URIs and tests.
//! - `build_storage_from_config`: picks one from the configured spill URI.

pub mod error;
pub mod memory_storage;
pub mod storage;

pub use error::{Error, Result};
pub use memory_storage::MemoryStorage;
pub use storage::{build_storage_from_config, FsStorage};
