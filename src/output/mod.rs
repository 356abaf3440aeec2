//! Output module for run summaries
//!
//! This module handles:
//! - Compiling the end-of-run report from pool and store counters
//! - Printing it to stdout
//! - Converting it into a run history row

mod report;

pub use report::{print_report, RunReport, TargetOutcome};
