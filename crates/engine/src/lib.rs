//! Run execution and concurrency control.
//!
//! [`RunEngine`] drives queued test runs to completion and exposes the
//! control surface (cancel, pause, resume, prioritize) that may act on a
//! run while its execution loop is in flight. [`RunDispatcher`] feeds the
//! engine from the pending queue.

pub mod config;
pub mod control;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod execution;
pub mod queue;
pub mod registry;

pub use config::EngineConfig;
pub use control::{CancelOptions, CancelOutcome};
pub use dispatcher::RunDispatcher;
pub use engine::{Collaborators, RunEngine};
pub use error::ExecutionError;
pub use registry::ResourceRegistry;
