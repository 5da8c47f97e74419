//! Sorter partitions backed by a byte [`Storage`].
//!
//! Each partition is one file of checksummed blocks named
//! `{root}/part-{instance}-{id}.seg`. The instance prefix keeps several
//! `SpillStorage`s sharing one directory apart; ids are unique per instance.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, VecDeque};
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{FutureExt, LocalBoxFuture};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use datastream_core::completion::{Completion, CompletionCell};
use datastream_core::error::{Result as StreamResult, StreamError};
use datastream_core::eventloop::{blocking, post_future};
use datastream_core::id::PartitionId;
use datastream_core::port::{InputHooks, InputPort, OutputHooks, OutputPort};
use datastream_core::protocol::{StreamConsumer, StreamProducer};
use datastream_core::status::StreamStatus;
use datastream_core::storage::SorterStorage;

use crate::error::Error;
use crate::spill::{decode_block, encode_block, read_block, Codec, Storage};

pub const DEFAULT_BLOCK_ITEMS: usize = 1_024;

/// [`SorterStorage`] over a byte store.
pub struct SpillStorage<T> {
    storage: Arc<dyn Storage>,
    root: String,
    codec: Codec,
    block_items: usize,
    instance: Uuid,
    next_partition: AtomicU64,
    created: RefCell<BTreeSet<PartitionId>>,
    _items: PhantomData<fn(T) -> T>,
}

impl<T> SpillStorage<T> {
    pub fn new(storage: Arc<dyn Storage>, root: impl Into<String>) -> Self {
        Self {
            storage,
            root: root.into(),
            codec: Codec::None,
            block_items: DEFAULT_BLOCK_ITEMS,
            instance: Uuid::new_v4(),
            next_partition: AtomicU64::new(0),
            created: RefCell::new(BTreeSet::new()),
            _items: PhantomData,
        }
    }

    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_block_items(mut self, block_items: usize) -> Self {
        self.block_items = block_items.max(1);
        self
    }

    pub fn instance(&self) -> Uuid {
        self.instance
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn partition_path(&self, partition: PartitionId) -> String {
        format!(
            "{}/part-{}-{}.seg",
            self.root.trim_end_matches('/'),
            self.instance.simple(),
            partition.get()
        )
    }

    /// Partitions allocated and not yet cleaned up.
    pub fn partitions(&self) -> Vec<PartitionId> {
        self.created.borrow().iter().copied().collect()
    }

    fn known_path(&self, partition: PartitionId) -> StreamResult<String> {
        if self.created.borrow().contains(&partition) {
            Ok(self.partition_path(partition))
        } else {
            Err(Error::UnknownPartition(partition.to_string()).into())
        }
    }

    fn delete_paths(&self, paths: Vec<String>) -> LocalBoxFuture<'static, StreamResult<()>> {
        let storage = Arc::clone(&self.storage);
        async move {
            blocking(move || {
                for path in &paths {
                    storage.delete(path).map_err(StreamError::from)?;
                    trace!(%path, "deleted partition file");
                }
                Ok(())
            })
            .await
        }
        .boxed_local()
    }
}

impl<T> SorterStorage<T> for SpillStorage<T>
where
    T: Serialize + DeserializeOwned + 'static,
{
    fn allocate_partition(&self) -> StreamResult<PartitionId> {
        let partition = PartitionId::new(self.next_partition.fetch_add(1, Ordering::Relaxed));
        self.created.borrow_mut().insert(partition);
        Ok(partition)
    }

    fn writer(&self, partition: PartitionId) -> StreamResult<Rc<dyn StreamConsumer<T>>> {
        let path = self.known_path(partition)?;
        let writer =
            PartitionWriter::new(Arc::clone(&self.storage), path, self.codec, self.block_items);
        Ok(writer)
    }

    fn reader(&self, partition: PartitionId) -> StreamResult<Rc<dyn StreamProducer<T>>> {
        let path = self.known_path(partition)?;
        let reader = PartitionReader::open(Arc::clone(&self.storage), path);
        Ok(reader)
    }

    fn cleanup(&self, partitions: &[PartitionId]) -> LocalBoxFuture<'static, StreamResult<()>> {
        let paths = {
            let mut created = self.created.borrow_mut();
            partitions
                .iter()
                .filter(|p| created.remove(*p))
                .map(|p| self.partition_path(*p))
                .collect::<Vec<_>>()
        };
        debug!(count = paths.len(), "releasing partitions");
        self.delete_paths(paths)
    }

    fn cleanup_all(&self) -> LocalBoxFuture<'static, StreamResult<()>> {
        let all = self.partitions();
        SorterStorage::<T>::cleanup(self, &all)
    }
}

/// Consumer writing one partition file, `block_items` items per block.
///
/// It reports end-of-stream only once the last block is durable, so its
/// completion can be used to sequence reads after writes. The input stays
/// suspended while a block write is in flight.
pub struct PartitionWriter<T: 'static> {
    input: Rc<InputPort<T>>,
    state: Rc<WriterState<T>>,
}

struct WriterState<T: 'static> {
    input: Rc<InputPort<T>>,
    storage: Arc<dyn Storage>,
    path: String,
    codec: Codec,
    block_items: usize,
    buffer: RefCell<Vec<T>>,
    in_flight: Cell<bool>,
    input_ended: Cell<bool>,
    file_created: Cell<bool>,
    status: Cell<StreamStatus>,
    error: RefCell<Option<StreamError>>,
    completion: CompletionCell,
}

impl<T: Serialize + 'static> PartitionWriter<T> {
    pub fn new(
        storage: Arc<dyn Storage>,
        path: impl Into<String>,
        codec: Codec,
        block_items: usize,
    ) -> Rc<Self> {
        let path = path.into();
        let input = InputPort::new(format!("partition-writer {path}"));
        let state = Rc::new(WriterState {
            input: Rc::clone(&input),
            storage,
            path,
            codec,
            block_items: block_items.max(1),
            buffer: RefCell::new(Vec::new()),
            in_flight: Cell::new(false),
            input_ended: Cell::new(false),
            file_created: Cell::new(false),
            status: Cell::new(StreamStatus::Active),
            error: RefCell::new(None),
            completion: CompletionCell::new(),
        });
        let on_item = Rc::clone(&state);
        let on_end = Rc::clone(&state);
        let on_error = Rc::clone(&state);
        input.install(
            InputHooks::new(move |item: T| on_item.push(item))
                .on_end_of_stream(move || on_end.input_finished())
                .on_error(move |e| on_error.fail(e.clone())),
        );
        Rc::new(Self { input, state })
    }

    pub fn path(&self) -> &str {
        &self.state.path
    }
}

impl<T: Serialize + 'static> WriterState<T> {
    fn push(self: &Rc<Self>, item: T) {
        let full = {
            let mut buffer = self.buffer.borrow_mut();
            buffer.push(item);
            buffer.len() >= self.block_items
        };
        if full && !self.in_flight.get() {
            self.input.suspend();
            self.flush();
        }
    }

    fn input_finished(self: &Rc<Self>) {
        self.input_ended.set(true);
        if !self.in_flight.get() {
            self.flush();
        }
    }

    fn flush(self: &Rc<Self>) {
        if self.status.get().is_terminal() {
            return;
        }
        let items = std::mem::take(&mut *self.buffer.borrow_mut());
        if items.is_empty() && self.file_created.get() {
            if self.input_ended.get() {
                self.finish();
            } else {
                self.input.resume();
            }
            return;
        }

        // An empty partition still gets an (empty) file.
        let bytes = if items.is_empty() {
            Vec::new()
        } else {
            match encode_block(&items, self.codec) {
                Ok(bytes) => bytes,
                Err(e) => return self.fail(e.into()),
            }
        };
        trace!(path = %self.path, items = items.len(), bytes = bytes.len(), "writing block");
        drop(items);

        let replace = !self.file_created.get();
        let storage = Arc::clone(&self.storage);
        let path = self.path.clone();
        let this = Rc::clone(self);
        self.in_flight.set(true);
        post_future(async move {
            let res = blocking(move || {
                let written = if replace {
                    storage.write(&path, &bytes)
                } else {
                    storage.append(&path, &bytes)
                };
                written.map_err(StreamError::from)
            })
            .await;
            this.in_flight.set(false);
            match res {
                Ok(()) => {
                    this.file_created.set(true);
                    if this.input_ended.get() {
                        this.flush();
                    } else {
                        this.input.resume();
                    }
                }
                Err(e) => this.fail(e),
            }
        });
    }

    fn finish(&self) {
        if self.status.get().is_terminal() {
            return;
        }
        self.status.set(StreamStatus::EndOfStream);
        debug!(path = %self.path, "partition written");
        self.completion.complete(Ok(()));
    }

    fn fail(&self, error: StreamError) {
        if self.status.get().is_terminal() {
            return;
        }
        self.status.set(StreamStatus::ClosedWithError);
        *self.error.borrow_mut() = Some(error.clone());
        self.buffer.borrow_mut().clear();
        warn!(path = %self.path, %error, "partition write failed");
        self.input.close_with_error(error.clone());
        self.completion.complete(Err(error));
    }
}

impl<T: Serialize + 'static> StreamConsumer<T> for PartitionWriter<T> {
    fn set_producer(&self, producer: Rc<dyn StreamProducer<T>>) {
        self.input.set_producer(producer);
    }

    fn status(&self) -> StreamStatus {
        self.state.status.get()
    }

    fn error(&self) -> Option<StreamError> {
        self.state.error.borrow().clone()
    }

    fn end_of_stream(&self) {
        self.input.end_of_stream();
    }

    fn close_with_error(&self, error: StreamError) {
        self.state.fail(error);
    }

    fn completion(&self) -> Completion {
        self.state.completion.completion()
    }

    fn into_dyn(self: Rc<Self>) -> Rc<dyn StreamConsumer<T>> {
        self
    }
}

/// Producer streaming a partition file back, one block at a time.
pub struct PartitionReader<T: 'static> {
    port: Rc<OutputPort<T>>,
    storage: Arc<dyn Storage>,
    path: String,
    offset: Cell<u64>,
    buffer: RefCell<VecDeque<T>>,
    loading: Cell<bool>,
    exhausted: Cell<bool>,
}

impl<T: DeserializeOwned + 'static> PartitionReader<T> {
    pub fn open(storage: Arc<dyn Storage>, path: impl Into<String>) -> Rc<OutputPort<T>> {
        let path = path.into();
        let port = OutputPort::new(format!("partition-reader {path}"));
        let reader = Rc::new(PartitionReader {
            port: Rc::clone(&port),
            storage,
            path,
            offset: Cell::new(0),
            buffer: RefCell::new(VecDeque::new()),
            loading: Cell::new(false),
            exhausted: Cell::new(false),
        });
        let on_bound = Rc::clone(&reader);
        let on_resume = reader;
        port.install(
            OutputHooks::new()
                .on_bound(move || on_bound.pump())
                .on_resume(move || on_resume.pump()),
        );
        port
    }

    fn pump(self: &Rc<Self>) {
        loop {
            if self.port.status().is_terminal() {
                return;
            }
            if self.buffer.borrow().is_empty() {
                if self.exhausted.get() {
                    self.port.end_of_stream();
                } else {
                    self.load();
                }
                return;
            }
            if !self.port.is_ready() {
                return;
            }
            let item = self.buffer.borrow_mut().pop_front();
            if let Some(item) = item {
                self.port.send(item);
            }
        }
    }

    fn load(self: &Rc<Self>) {
        if self.loading.replace(true) {
            return;
        }
        let storage = Arc::clone(&self.storage);
        let path = self.path.clone();
        let offset = self.offset.get();
        let this = Rc::clone(self);
        post_future(async move {
            let raw = blocking(move || {
                read_block(storage.as_ref(), &path, offset).map_err(StreamError::from)
            })
            .await;
            this.loading.set(false);
            let decoded = raw.and_then(|raw| match raw {
                None => Ok(None),
                Some((bytes, next)) => decode_block::<T>(&bytes, offset)
                    .map(|items| Some((items, next)))
                    .map_err(StreamError::from),
            });
            match decoded {
                Ok(None) => {
                    this.exhausted.set(true);
                    this.pump();
                }
                Ok(Some((items, next))) => {
                    trace!(path = %this.path, offset, items = items.len(), "loaded block");
                    this.offset.set(next);
                    this.buffer.borrow_mut().extend(items);
                    this.pump();
                }
                Err(error) => {
                    warn!(path = %this.path, %error, "partition read failed");
                    this.port.close_with_error(error);
                }
            }
        });
    }
}
