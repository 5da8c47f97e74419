#![forbid(unsafe_code)]
//! datastream-core: the push-based stream protocol.
//!
//! - `status`/`error`: the endpoint state machine and its terminal errors.
//! - `protocol`: the producer/consumer/receiver traits and `connect`.
//! - `port`: reusable endpoints every operator is built from.
//! - `supplier`/`sink`: built-in sources and sinks.
//! - `storage`: the contract a sorter spills through.
//!
//! Everything here is single-threaded (`Rc`, interior mutability) and runs on
//! a tokio current-thread runtime inside a `LocalSet`; see `eventloop`.

pub mod completion;
pub mod config;
pub mod error;
pub mod eventloop;
pub mod id;
pub mod port;
pub mod prelude;
pub mod protocol;
pub mod sink;
pub mod status;
pub mod storage;
pub mod supplier;

pub use completion::{wait_all, Completion, CompletionCell};
pub use error::{Result, StreamError};
pub use port::{InputHooks, InputPort, OutputHooks, OutputPort};
pub use protocol::{connect, Receiver, StreamConsumer, StreamProducer};
pub use status::StreamStatus;
