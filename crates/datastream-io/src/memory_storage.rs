//! In-memory storage backend.
//!
//! Provides a HashMap-based storage that implements the Storage trait.
//! Used for the `memory://` URI scheme and in tests to avoid file I/O.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use datastream_spill::error::{Error as SpillError, Result as SpillResult};
use datastream_spill::Storage;

/// Thread-safe in-memory storage using a HashMap.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    data: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn data(&self) -> MutexGuard<'_, HashMap<String, Vec<u8>>> {
        // Every critical section leaves the map consistent, so a poisoned
        // lock is still safe to use.
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check if a path exists
    pub fn contains(&self, path: &str) -> bool {
        self.data().contains_key(path)
    }

    /// Get the number of stored objects
    pub fn len(&self) -> usize {
        self.data().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data().is_empty()
    }

    /// Clear all stored data
    pub fn clear(&self) {
        self.data().clear();
    }
}

impl Storage for MemoryStorage {
    fn write(&self, path: &str, bytes: &[u8]) -> SpillResult<()> {
        self.data().insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    fn append(&self, path: &str, bytes: &[u8]) -> SpillResult<()> {
        self.data()
            .entry(path.to_string())
            .or_default()
            .extend_from_slice(bytes);
        Ok(())
    }

    fn read_range(&self, path: &str, offset: u64, len: usize) -> SpillResult<Vec<u8>> {
        let data = self.data();
        let bytes = data
            .get(path)
            .ok_or_else(|| SpillError::Storage(format!("path not found: {}", path)))?;

        let start = offset as usize;
        if start > bytes.len() {
            return Err(SpillError::Storage(format!(
                "offset {} exceeds size {}",
                offset,
                bytes.len()
            )));
        }
        let end = start.saturating_add(len).min(bytes.len());
        Ok(bytes[start..end].to_vec())
    }

    fn delete(&self, path: &str) -> SpillResult<()> {
        self.data().remove(path);
        Ok(())
    }

    fn list(&self, prefix: &str) -> SpillResult<Vec<String>> {
        let mut result: Vec<String> = self
            .data()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        result.sort();
        Ok(result)
    }

    fn size(&self, path: &str) -> SpillResult<u64> {
        let data = self.data();
        let bytes = data
            .get(path)
            .ok_or_else(|| SpillError::Storage(format!("path not found: {}", path)))?;
        Ok(bytes.len() as u64)
    }
}
