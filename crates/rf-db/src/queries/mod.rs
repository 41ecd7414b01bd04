//! Database query modules.

pub mod activity_results;
pub mod run_log;
pub mod runs;
pub mod scenes;
pub mod slots;
