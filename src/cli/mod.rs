//! Command-line interface for swe-harness.
//!
//! Provides commands for listing adapters, rendering build contexts,
//! parsing test logs, certifying fixes and running evaluations.

mod commands;

pub use commands::{parse_cli, run, run_with_cli};
