use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use datastream_spill::error::{Error as SpillError, Result as SpillResult};
use datastream_spill::Storage;

/// Local filesystem storage (rooted at the host filesystem).
#[derive(Debug, Clone, Default)]
pub struct FsStorage;

impl FsStorage {
    pub fn new() -> Self {
        Self
    }
}

fn ensure_parent(p: &Path) -> SpillResult<()> {
    if let Some(parent) = p.parent() {
        fs::create_dir_all(parent).map_err(|e| SpillError::Storage(format!("mkparent: {e}")))?;
    }
    Ok(())
}

impl Storage for FsStorage {
    fn write(&self, path: &str, bytes: &[u8]) -> SpillResult<()> {
        let p = Path::new(path);
        ensure_parent(p)?;
        let mut f = File::create(p).map_err(|e| SpillError::Storage(format!("create: {e}")))?;
        f.write_all(bytes)
            .map_err(|e| SpillError::Storage(format!("write: {e}")))?;
        f.flush()
            .map_err(|e| SpillError::Storage(format!("flush: {e}")))?;
        Ok(())
    }

    fn append(&self, path: &str, bytes: &[u8]) -> SpillResult<()> {
        let p = Path::new(path);
        ensure_parent(p)?;
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(p)
            .map_err(|e| SpillError::Storage(format!("open for append: {e}")))?;
        f.write_all(bytes)
            .map_err(|e| SpillError::Storage(format!("append: {e}")))?;
        f.flush()
            .map_err(|e| SpillError::Storage(format!("flush: {e}")))?;
        Ok(())
    }

    fn read_range(&self, path: &str, offset: u64, len: usize) -> SpillResult<Vec<u8>> {
        let mut f =
            File::open(Path::new(path)).map_err(|e| SpillError::Storage(format!("open: {e}")))?;
        f.seek(SeekFrom::Start(offset))
            .map_err(|e| SpillError::Storage(format!("seek: {e}")))?;
        // A single read may return short; keep reading until `len` or EOF.
        let mut buf = Vec::with_capacity(len);
        f.take(len as u64)
            .read_to_end(&mut buf)
            .map_err(|e| SpillError::Storage(format!("read: {e}")))?;
        Ok(buf)
    }

    fn delete(&self, path: &str) -> SpillResult<()> {
        let p = Path::new(path);
        if p.exists() {
            fs::remove_file(p).map_err(|e| SpillError::Storage(format!("delete: {e}")))?;
        }
        Ok(())
    }

    fn list(&self, prefix: &str) -> SpillResult<Vec<String>> {
        let prefix_path = Path::new(prefix);
        let mut results = Vec::new();

        if !prefix_path.exists() {
            return Ok(results);
        }

        if prefix_path.is_file() {
            if let Some(s) = prefix_path.to_str() {
                results.push(s.to_string());
            }
            return Ok(results);
        }

        fn visit_dirs(dir: &Path, results: &mut Vec<String>) -> std::io::Result<()> {
            if dir.is_dir() {
                for entry in fs::read_dir(dir)? {
                    let path = entry?.path();
                    if path.is_dir() {
                        visit_dirs(&path, results)?;
                    } else if let Some(s) = path.to_str() {
                        results.push(s.to_string());
                    }
                }
            }
            Ok(())
        }

        visit_dirs(prefix_path, &mut results)
            .map_err(|e| SpillError::Storage(format!("list: {e}")))?;
        results.sort();

        Ok(results)
    }

    fn size(&self, path: &str) -> SpillResult<u64> {
        let meta = fs::metadata(Path::new(path))
            .map_err(|e| SpillError::Storage(format!("size: {e}")))?;
        Ok(meta.len())
    }
}
