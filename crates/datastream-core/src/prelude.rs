//! Convenient re-exports for downstream crates.

pub use crate::completion::{wait_all, Completion};
pub use crate::config::{EngineConfig, StorageConfig};
pub use crate::error::{Result, StreamError};
pub use crate::id::PartitionId;
pub use crate::port::{InputHooks, InputPort, OutputHooks, OutputPort};
pub use crate::protocol::{connect, Receiver, StreamConsumer, StreamProducer};
pub use crate::sink::{SuspendPolicy, ToList};
pub use crate::status::StreamStatus;
pub use crate::storage::SorterStorage;
pub use crate::supplier::{closing_with_error, of_iter, of_iter_then_error};
