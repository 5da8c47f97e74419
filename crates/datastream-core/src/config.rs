//! Engine configuration that downstream crates can serialize/deserialize.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StreamError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Items a sorter buffers before it writes a sorted partition.
    pub items_in_memory_threshold: usize,

    /// Items buffered per input of a merger, reducer or join.
    pub buffer_size: usize,

    /// Directory for spill files (legacy local-path configuration).
    pub spill_dir: String,

    /// Optional fully-qualified spill URI (`file:///tmp/spill`, `memory://`).
    pub spill_uri: Option<String>,

    /// Block compression: `none`, `zstd` or `lz4`.
    pub spill_codec: String,

    /// Items per spill block.
    pub spill_block_items: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            items_in_memory_threshold: 65_536,
            buffer_size: 1,
            spill_dir: "/tmp/datastream-spill".to_string(),
            spill_uri: None,
            spill_codec: "none".to_string(),
            spill_block_items: 1_024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub uri: Option<String>,
    pub root: String,
}

impl StorageConfig {
    pub fn scheme(&self) -> Option<&str> {
        self.uri.as_deref().and_then(uri_scheme)
    }
}

fn uri_scheme(uri: &str) -> Option<&str> {
    let (scheme, _) = uri.split_once("://")?;
    let scheme = scheme.trim();
    (!scheme.is_empty()).then_some(scheme)
}

impl EngineConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `DATASTREAM_ITEMS_IN_MEMORY`: sorter in-memory threshold
    /// - `DATASTREAM_BUFFER_SIZE`: per-input buffer of fan-in operators
    /// - `DATASTREAM_SPILL_DIR`: spill directory
    /// - `DATASTREAM_SPILL_URI`: spill URI (overrides the directory)
    /// - `DATASTREAM_SPILL_CODEC`: block codec
    /// - `DATASTREAM_SPILL_BLOCK_ITEMS`: items per spill block
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(s) = std::env::var("DATASTREAM_ITEMS_IN_MEMORY") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.items_in_memory_threshold = v;
            }
        }

        if let Ok(s) = std::env::var("DATASTREAM_BUFFER_SIZE") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.buffer_size = v;
            }
        }

        if let Ok(s) = std::env::var("DATASTREAM_SPILL_DIR") {
            cfg.spill_dir = s;
        }

        if let Ok(s) = std::env::var("DATASTREAM_SPILL_URI") {
            cfg.spill_uri = Some(s);
        }

        if let Ok(s) = std::env::var("DATASTREAM_SPILL_CODEC") {
            cfg.spill_codec = s;
        }

        if let Ok(s) = std::env::var("DATASTREAM_SPILL_BLOCK_ITEMS") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.spill_block_items = v;
            }
        }

        cfg
    }

    /// Reject values no operator can run with.
    pub fn validate(&self) -> Result<()> {
        if self.items_in_memory_threshold == 0 {
            return Err(StreamError::Config(
                "items_in_memory_threshold must be at least 1".into(),
            ));
        }
        if self.buffer_size == 0 {
            return Err(StreamError::Config("buffer_size must be at least 1".into()));
        }
        if self.spill_block_items == 0 {
            return Err(StreamError::Config(
                "spill_block_items must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Produce a storage configuration snapshot used by the IO layer.
    pub fn storage_config(&self) -> StorageConfig {
        let root = match (self.spill_uri.as_deref().and_then(uri_scheme), &self.spill_uri) {
            (Some("file"), Some(uri)) => {
                file_uri_to_path(uri).unwrap_or_else(|| self.spill_dir.clone())
            }
            (Some("memory"), _) => "datastream-spill".to_string(),
            (Some(_), Some(uri)) => uri.trim_end_matches('/').to_string(),
            _ => self.spill_dir.clone(),
        };

        StorageConfig {
            uri: self.spill_uri.clone(),
            root,
        }
    }
}

fn file_uri_to_path(uri: &str) -> Option<String> {
    let stripped = uri.strip_prefix("file://")?;
    if stripped.starts_with('/') {
        Some(stripped.to_string())
    } else {
        Some(format!("/{}", stripped))
    }
}
