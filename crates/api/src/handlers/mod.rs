pub mod queue;
pub mod runs;
