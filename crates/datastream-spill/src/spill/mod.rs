//! Byte-level spill storage and the block format written to it.

pub mod block;
pub mod codec;

use crate::error::Result;

pub use block::{decode_block, encode_block, read_block, BlockHeader, CHECKSUM_LEN, HEADER_LEN};
pub use codec::Codec;

/// Abstract storage interface for partition files.
///
/// Implemented by `datastream-io::FsStorage` for the local filesystem and by
/// `datastream-io::MemoryStorage` for tests. Calls block; the engine only
/// invokes them from the runtime's blocking pool.
pub trait Storage: Send + Sync {
    /// Write bytes to a path, replacing it. Creates parent directories if needed.
    fn write(&self, path: &str, bytes: &[u8]) -> Result<()>;

    /// Append bytes to a path, creating it if missing.
    fn append(&self, path: &str, bytes: &[u8]) -> Result<()>;

    /// Read a byte range from a path. Returns at most `len` bytes.
    fn read_range(&self, path: &str, offset: u64, len: usize) -> Result<Vec<u8>>;

    /// Delete a path. Idempotent (no error if path doesn't exist).
    fn delete(&self, path: &str) -> Result<()>;

    /// List all paths under a prefix.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Get size of a path in bytes.
    fn size(&self, path: &str) -> Result<u64>;
}
