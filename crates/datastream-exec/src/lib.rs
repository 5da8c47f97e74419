#![forbid(unsafe_code)]
//! datastream-exec: the runtime owner of a datastream pipeline.
//!
//! [`Engine`] validates an `EngineConfig`, selects the spill byte store and
//! codec, and hands out operators preconfigured with the engine's thresholds
//! and buffer sizes. Pipelines are driven by [`Engine::run`] on a
//! current-thread runtime.

#[cfg(feature = "failpoints")]
pub mod failpoints;
pub mod runtime;

pub use datastream_core::completion::wait_all;
pub use runtime::{Engine, ExecError};
