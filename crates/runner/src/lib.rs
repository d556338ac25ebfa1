//! Boundary to the browser-runner service.
//!
//! The engine never drives a browser itself. It consumes three
//! collaborator contracts defined in [`contracts`]:
//!
//! - [`AutomationPool`]: acquire and release a live automation resource.
//! - [`TestExecutor`]: execute one test against an acquired resource.
//! - [`TestCatalog`]: resolve suites, tests and project variables.
//!
//! [`RunnerClient`] implements all three against the runner service's HTTP
//! API.

pub mod client;
pub mod contracts;
pub mod signals;

pub use client::RunnerClient;
pub use contracts::{
    AutomationHandle, AutomationPool, ExecutionContext, RunnerError, TestCatalog, TestExecutor,
};
pub use signals::RunSignals;
