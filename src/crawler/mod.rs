//! Crawler module: the concurrent crawl → extract → persist pipeline
//!
//! This module contains:
//! - The dual-stage worker pool that runs crawl and parse jobs
//! - The per-target retry/backoff controller
//! - Crawl task state
//! - The orchestrator that ties a run together

mod coordinator;
mod pool;
mod retry;
mod task;

pub use coordinator::Harvester;
pub use pool::{CrawlJob, ParseJob, PoolError, PoolStats, Stage, WorkerPool};
pub use retry::{
    backoff_delay, base_backoff, drive, jittered_backoff, pacing_delay, AttemptOutcome,
    RetryController,
};
pub use task::{CrawlTask, RawItem, TaskStatus};
