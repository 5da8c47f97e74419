#![forbid(unsafe_code)]
//! datastream: push-based dataflow pipelines with explicit backpressure.
//!
//! This crate re-exports the workspace crates under one name:
//! - [`core`]: status, protocol traits, ports, built-in sources and sinks.
//! - [`spill`]: block format and partition storage for external sorting.
//! - [`io`]: filesystem and in-memory byte stores.
//! - [`operators`]: wiring, merge, reduce, sort and join operators.
//! - [`exec`]: the config-driven [`Engine`](exec::Engine).

pub use datastream_core as core;
pub use datastream_exec as exec;
pub use datastream_io as io;
pub use datastream_operators as operators;
pub use datastream_spill as spill;

pub mod prelude {
    pub use datastream_core::prelude::*;
    pub use datastream_exec::{Engine, ExecError};
    pub use datastream_operators::{
        comparator, key_fn, natural_order, reverse_order, Decorator, Forwarder, Join, Merger,
        Sorter, Splitter, StreamReducer, Union,
    };
}
