//! Contract between the sorter and whatever keeps its spilled partitions.

use std::rc::Rc;

use futures::future::LocalBoxFuture;

use crate::error::Result;
use crate::id::PartitionId;
use crate::protocol::{StreamConsumer, StreamProducer};

/// Storage for sorted runs.
///
/// A partition is written once through the consumer returned by `writer`
/// and read back, in write order, through the producer returned by `reader`.
/// Ids are unique per storage instance, so several sorters may share one.
pub trait SorterStorage<T: 'static> {
    fn allocate_partition(&self) -> Result<PartitionId>;

    fn writer(&self, partition: PartitionId) -> Result<Rc<dyn StreamConsumer<T>>>;

    fn reader(&self, partition: PartitionId) -> Result<Rc<dyn StreamProducer<T>>>;

    /// Release the given partitions.
    fn cleanup(&self, partitions: &[PartitionId]) -> LocalBoxFuture<'static, Result<()>>;

    /// Release every partition this instance created.
    fn cleanup_all(&self) -> LocalBoxFuture<'static, Result<()>>;
}
