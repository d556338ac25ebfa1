//! Domain model and pure rules for the qarun run engine.
//!
//! Everything in this crate is free of I/O: run records, status rules,
//! queue ordering, retry accounting and environment merging. The store,
//! engine and API crates build on these types.

pub mod environment;
pub mod error;
pub mod lifecycle;
pub mod priority;
pub mod retry;
pub mod run;
pub mod status;
pub mod types;
