//! Storage adapters implementing `datastream_spill::Storage`.
//!
//! Also exposes a helper that chooses the appropriate storage based on the
//! configured spill URI (e.g. `file:///tmp/spill`, `memory://`).

mod fs;
pub use fs::FsStorage;

use std::sync::Arc;

use datastream_core::config::StorageConfig;
use datastream_spill::Storage;
use tracing::debug;

use crate::error::{Error, Result};
use crate::memory_storage::MemoryStorage;

/// Build the correct storage backend using the provided configuration.
pub fn build_storage_from_config(cfg: &StorageConfig) -> Result<Arc<dyn Storage>> {
    match cfg.scheme() {
        Some("file") | None => {
            // Default to filesystem (treat URI as file:// or bare path).
            debug!(root = %cfg.root, "using filesystem spill storage");
            Ok(Arc::new(FsStorage::new()))
        }
        Some("memory") | Some("mem") => {
            debug!("using in-memory spill storage");
            Ok(Arc::new(MemoryStorage::new()))
        }
        Some(other) => Err(Error::Config(format!("unsupported spill scheme '{other}'"))),
    }
}
