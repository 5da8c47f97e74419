//! Engine: owns the configuration and the spill byte store, builds
//! preconfigured operators and drives pipelines to completion.

use std::future::Future;
use std::rc::Rc;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use datastream_core::config::EngineConfig;
use datastream_core::error::StreamError;
use datastream_core::eventloop::run_local;
use datastream_core::storage::SorterStorage;
use datastream_io::build_storage_from_config;
use datastream_operators::{
    key_fn, natural_order, Comparator, Join, KeyFn, Merger, Sorter, StreamReducer, ValueJoiner,
};
use datastream_spill::{Codec, SpillStorage, Storage};

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("config: {0}")]
    Config(String),

    #[error("runtime: {0}")]
    Runtime(#[from] std::io::Error),

    #[error(transparent)]
    Stream(#[from] StreamError),
}

impl From<datastream_io::Error> for ExecError {
    fn from(e: datastream_io::Error) -> Self {
        ExecError::Config(e.to_string())
    }
}

impl From<datastream_spill::Error> for ExecError {
    fn from(e: datastream_spill::Error) -> Self {
        ExecError::Config(e.to_string())
    }
}

pub struct Engine {
    cfg: EngineConfig,
    storage: Arc<dyn Storage>,
    root: String,
    codec: Codec,
}

impl Engine {
    /// Validate `cfg` and select spill storage and codec from it.
    pub fn new(cfg: EngineConfig) -> Result<Self, ExecError> {
        cfg.validate()?;
        let storage_cfg = cfg.storage_config();
        let storage = build_storage_from_config(&storage_cfg)?;
        let codec: Codec = cfg.spill_codec.parse()?;
        if !codec.is_available() {
            return Err(ExecError::Config(format!(
                "spill codec '{codec}' is not compiled in"
            )));
        }
        info!(
            root = %storage_cfg.root,
            %codec,
            threshold = cfg.items_in_memory_threshold,
            buffer_size = cfg.buffer_size,
            "engine configured"
        );
        Ok(Self {
            root: storage_cfg.root,
            cfg,
            storage,
            codec,
        })
    }

    /// An engine configured from `DATASTREAM_*` environment variables.
    pub fn from_env() -> Result<Self, ExecError> {
        Self::new(EngineConfig::from_env())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    pub fn storage(&self) -> Arc<dyn Storage> {
        Arc::clone(&self.storage)
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// Drive `fut` on a fresh current-thread runtime inside a `LocalSet`.
    pub fn run<F: Future>(&self, fut: F) -> Result<F::Output, ExecError> {
        Ok(run_local(fut)?)
    }

    /// A new partition store over the engine's byte store. Each call gets its
    /// own file prefix.
    pub fn spill_storage<T>(&self) -> Rc<SpillStorage<T>>
    where
        T: Serialize + DeserializeOwned + 'static,
    {
        Rc::new(
            SpillStorage::new(self.storage(), self.root.clone())
                .with_codec(self.codec)
                .with_block_items(self.cfg.spill_block_items),
        )
    }

    /// A sorter over `storage` with the configured threshold and buffer size.
    pub fn sorter<K, T>(
        &self,
        storage: Rc<dyn SorterStorage<T>>,
        key_fn: KeyFn<T, K>,
        cmp: Comparator<K>,
        deduplicate: bool,
    ) -> Sorter<K, T>
    where
        K: 'static,
        T: 'static,
    {
        Sorter::new(
            storage,
            key_fn,
            cmp,
            deduplicate,
            self.cfg.items_in_memory_threshold,
        )
        .with_buffer_size(self.cfg.buffer_size)
    }

    /// A sorter by the natural order of `f`, spilling to a fresh
    /// [`SpillStorage`].
    pub fn sorter_by_key<K, T>(
        &self,
        f: impl Fn(&T) -> K + 'static,
        deduplicate: bool,
    ) -> Sorter<K, T>
    where
        K: Ord + 'static,
        T: Serialize + DeserializeOwned + 'static,
    {
        let storage: Rc<dyn SorterStorage<T>> = self.spill_storage::<T>();
        self.sorter(storage, key_fn(f), natural_order(), deduplicate)
    }

    pub fn merger<K: 'static, T: 'static>(
        &self,
        key_fn: KeyFn<T, K>,
        cmp: Comparator<K>,
        deduplicate: bool,
    ) -> Merger<K, T> {
        Merger::new(key_fn, cmp, deduplicate).with_buffer_size(self.cfg.buffer_size)
    }

    pub fn reducer<K: 'static, O: 'static, A: 'static>(
        &self,
        cmp: Comparator<K>,
    ) -> StreamReducer<K, O, A> {
        StreamReducer::with_comparator(cmp).with_buffer_size(self.cfg.buffer_size)
    }

    pub fn join<K, L, R, O>(
        &self,
        left_key: KeyFn<L, K>,
        right_key: KeyFn<R, K>,
        cmp: Comparator<K>,
        joiner: impl ValueJoiner<K, L, R, O> + 'static,
    ) -> Join<K, L, R, O>
    where
        K: 'static,
        L: 'static,
        R: 'static,
        O: 'static,
    {
        Join::with_comparator(left_key, right_key, cmp, joiner)
            .with_buffer_size(self.cfg.buffer_size)
    }
}
