//! Repository layer. Each repository is a zero-sized struct with async
//! associated functions taking the pool explicitly.

pub mod test_run_repo;

pub use test_run_repo::TestRunRepo;
