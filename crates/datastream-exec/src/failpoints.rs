//! Failure injection for sorter storage (feature: `failpoints`).
//!
//! [`FailingStorage`] wraps any [`SorterStorage`] and fails chosen calls with
//! a storage error, so pipelines can be tested against allocation, write,
//! read and cleanup failures.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use futures::future::{self, FutureExt, LocalBoxFuture};
use tracing::debug;

use datastream_core::error::{Result, StreamError};
use datastream_core::id::PartitionId;
use datastream_core::port::{InputHooks, InputPort};
use datastream_core::protocol::{StreamConsumer, StreamProducer};
use datastream_core::storage::SorterStorage;
use datastream_core::supplier::closing_with_error;

/// Which calls fail. Partition ordinals count allocations from zero.
#[derive(Debug, Clone, Default)]
pub struct Failpoints {
    /// Fail allocation once this many partitions were allocated.
    pub allocate_after: Option<usize>,
    /// Fail the write of this partition.
    pub write: Option<usize>,
    /// Fail reading this partition.
    pub read: Option<usize>,
    pub cleanup: bool,
}

pub struct FailingStorage<T: 'static> {
    inner: Rc<dyn SorterStorage<T>>,
    points: Failpoints,
    ordinals: RefCell<HashMap<PartitionId, usize>>,
    cleanups: Cell<usize>,
}

impl<T: 'static> FailingStorage<T> {
    pub fn new(inner: Rc<dyn SorterStorage<T>>, points: Failpoints) -> Self {
        Self {
            inner,
            points,
            ordinals: RefCell::new(HashMap::new()),
            cleanups: Cell::new(0),
        }
    }

    /// Partitions allocated through this wrapper.
    pub fn allocated(&self) -> usize {
        self.ordinals.borrow().len()
    }

    /// `cleanup` calls seen, failed ones included.
    pub fn cleanups(&self) -> usize {
        self.cleanups.get()
    }

    fn ordinal(&self, partition: PartitionId) -> Option<usize> {
        self.ordinals.borrow().get(&partition).copied()
    }
}

fn injected(what: &str) -> StreamError {
    debug!(what, "failpoint triggered");
    StreamError::storage(format!("failpoint: {what}"))
}

impl<T: 'static> SorterStorage<T> for FailingStorage<T> {
    fn allocate_partition(&self) -> Result<PartitionId> {
        let allocated = self.allocated();
        if self.points.allocate_after == Some(allocated) {
            return Err(injected("allocate"));
        }
        let partition = self.inner.allocate_partition()?;
        self.ordinals.borrow_mut().insert(partition, allocated);
        Ok(partition)
    }

    fn writer(&self, partition: PartitionId) -> Result<Rc<dyn StreamConsumer<T>>> {
        if self.points.write.is_some() && self.points.write == self.ordinal(partition) {
            let port = InputPort::new("failpoint.writer");
            port.install(
                InputHooks::new(|_: T| {}).on_start(|input| input.close_with_error(injected("write"))),
            );
            return Ok(port);
        }
        self.inner.writer(partition)
    }

    fn reader(&self, partition: PartitionId) -> Result<Rc<dyn StreamProducer<T>>> {
        if self.points.read.is_some() && self.points.read == self.ordinal(partition) {
            return Ok(closing_with_error(injected("read")));
        }
        self.inner.reader(partition)
    }

    fn cleanup(&self, partitions: &[PartitionId]) -> LocalBoxFuture<'static, Result<()>> {
        self.cleanups.set(self.cleanups.get() + 1);
        if self.points.cleanup {
            return future::ready(Err(injected("cleanup"))).boxed_local();
        }
        self.inner.cleanup(partitions)
    }

    fn cleanup_all(&self) -> LocalBoxFuture<'static, Result<()>> {
        self.inner.cleanup_all()
    }
}
