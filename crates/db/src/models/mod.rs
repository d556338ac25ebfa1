//! Database row types.

pub mod test_run;
