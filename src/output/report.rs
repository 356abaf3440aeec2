//! Run report
//!
//! Compiled by the orchestrator once the pipeline has drained, printed to
//! stdout and appended to the run history.

use crate::crawler::{CrawlTask, PoolStats, TaskStatus};
use crate::storage::{RunRecord, StoreStats};
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

/// Final state of one target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetOutcome {
    pub key: String,
    pub status: TaskStatus,
    pub attempts: u32,
    /// Items handed to the parse stage
    pub items: usize,
    pub last_error: Option<String>,
}

impl From<&CrawlTask> for TargetOutcome {
    fn from(task: &CrawlTask) -> Self {
        Self {
            key: task.key().to_string(),
            status: task.status,
            attempts: task.attempts,
            items: task.items,
            last_error: task.last_error.clone(),
        }
    }
}

/// Summary of one harvest run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub targets_total: usize,
    pub succeeded: usize,
    /// Aborted targets plus targets that never reached a terminal state
    pub failed: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub store: StoreStats,
    pub pool: PoolStats,
    /// One entry per target, in catalog order
    pub outcomes: Vec<TargetOutcome>,
}

impl RunReport {
    /// Percentage of targets that succeeded; 0 for an empty run
    pub fn success_rate(&self) -> f64 {
        if self.targets_total == 0 {
            0.0
        } else {
            (self.succeeded as f64 / self.targets_total as f64) * 100.0
        }
    }

    /// True if there was at least one target and none succeeded
    pub fn all_failed(&self) -> bool {
        self.targets_total > 0 && self.succeeded == 0
    }

    /// Converts the report into a run history row
    ///
    /// # Arguments
    ///
    /// * `config_hash` - SHA-256 of the configuration file the run used
    pub fn to_run_record(&self, config_hash: &str) -> RunRecord {
        RunRecord {
            started_at: self.started_at,
            finished_at: self.finished_at,
            config_hash: config_hash.to_string(),
            targets_total: self.targets_total as u64,
            succeeded: self.succeeded as u64,
            failed: self.failed as u64,
            inserted: self.store.inserted,
            updated: self.store.updated,
            duplicates: self.store.duplicates,
            errors: self.store.errors,
            pool_errors: self.pool.errors,
        }
    }

    /// Emits the one-line summary at `info`
    pub fn log_summary(&self) {
        tracing::info!(
            "Run finished in {:.1}s: {}/{} targets succeeded, {} inserted, {} updated, {} duplicates, {} errors",
            self.elapsed.as_secs_f64(),
            self.succeeded,
            self.targets_total,
            self.store.inserted,
            self.store.updated,
            self.store.duplicates,
            self.store.errors
        );
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Harvest Report ===\n")?;

        writeln!(f, "Targets:")?;
        writeln!(f, "  Total: {}", self.targets_total)?;
        writeln!(f, "  Succeeded: {}", self.succeeded)?;
        writeln!(f, "  Failed: {}", self.failed)?;
        writeln!(f)?;

        writeln!(f, "Records:")?;
        writeln!(f, "  Inserted: {}", self.store.inserted)?;
        writeln!(f, "  Updated: {}", self.store.updated)?;
        writeln!(f, "  Duplicates: {}", self.store.duplicates)?;
        writeln!(f, "  Errors: {}", self.store.errors)?;
        writeln!(f)?;

        let failures: Vec<_> = self
            .outcomes
            .iter()
            .filter(|o| o.status != TaskStatus::Succeeded)
            .collect();
        if !failures.is_empty() {
            writeln!(f, "Failed Targets ({}):", failures.len())?;
            for outcome in failures {
                writeln!(
                    f,
                    "  - {} ({} attempts): {}",
                    outcome.key,
                    outcome.attempts,
                    outcome.last_error.as_deref().unwrap_or("unknown error")
                )?;
            }
            writeln!(f)?;
        }

        writeln!(f, "Elapsed: {:.1}s", self.elapsed.as_secs_f64())?;
        write!(
            f,
            "Success Rate: {:.1}% ({} / {} targets)",
            self.success_rate(),
            self.succeeded,
            self.targets_total
        )
    }
}

/// Prints a report to stdout
pub fn print_report(report: &RunReport) {
    println!("{}", report);
}
