//! Harvest orchestration
//!
//! A run:
//! - makes sure every schema has its table
//! - submits one crawl job per target to a fresh worker pool
//! - lets each successful crawl job hand its items to the parse stage
//! - drains the pool with a bounded graceful stop and compiles the run report

use crate::catalog::{Catalog, Schema, Target};
use crate::config::{Config, PoolConfig};
use crate::crawler::pool::{CrawlJob, ParseJob, PoolStats, WorkerPool};
use crate::crawler::retry::RetryController;
use crate::crawler::task::{CrawlTask, RawItem, TaskStatus};
use crate::extract::Extractor;
use crate::fetch::SessionFactory;
use crate::output::{RunReport, TargetOutcome};
use crate::storage::{SaveOutcome, Store, StoreStats};
use crate::{HarvestError, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How often progress is logged while the pool works
const PROGRESS_INTERVAL: Duration = Duration::from_secs(30);

const UNFINISHED: &str = "Did not finish before shutdown";

type Finished = Arc<Mutex<Vec<CrawlTask>>>;

/// Main harvest orchestrator
pub struct Harvester {
    pool_config: PoolConfig,
    catalog: Arc<Catalog>,
    store: Arc<dyn Store>,
    controller: Arc<RetryController>,
    extractor: Arc<Extractor>,
}

impl Harvester {
    /// Creates a new harvester
    ///
    /// # Arguments
    ///
    /// * `config` - Validated configuration
    /// * `catalog` - Schemas and the targets to crawl
    /// * `store` - Destination store, shared by all parse jobs
    /// * `factory` - Opens one fetch session per crawl attempt
    pub fn new(
        config: &Config,
        catalog: Catalog,
        store: Arc<dyn Store>,
        factory: Arc<dyn SessionFactory>,
    ) -> Self {
        Self {
            pool_config: config.pool.clone(),
            catalog: Arc::new(catalog),
            store,
            controller: Arc::new(RetryController::new(factory, config)),
            extractor: Arc::new(Extractor::new()),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Runs every target through the pipeline once
    ///
    /// Target failures are recorded in the report, not returned. Store
    /// counts in the report cover this run only. The pool's graceful stop is
    /// the drain barrier, so a target still crawling when `stop-timeout-secs`
    /// runs out is reported as aborted.
    ///
    /// # Returns
    ///
    /// * `Ok(RunReport)` - The pipeline drained
    /// * `Err(HarvestError)` - A schema table could not be created or the
    ///   pool refused work
    pub async fn run(&self) -> Result<RunReport> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let targets = self.catalog.targets();
        tracing::info!("Starting harvest of {} targets", targets.len());

        for schema in self.catalog.schemas() {
            self.store.ensure_schema(schema)?;
        }
        let baseline = self.store.stats();

        let pool = Arc::new(WorkerPool::new(self.pool_config.clone()));
        let finished: Finished = Arc::new(Mutex::new(Vec::with_capacity(targets.len())));
        pool.start();

        for target in targets {
            let Some(schema) = self.catalog.schema_for(target) else {
                let mut task = CrawlTask::new(Arc::clone(target));
                task.abort(format!("Unknown schema '{}'", target.schema_id));
                finished.lock().push(task);
                continue;
            };

            let job = self.crawl_job(&pool, target, schema, &finished);
            if let Err(e) = pool.submit_crawl(job).await {
                pool.stop(false).await;
                return Err(e.into());
            }
        }

        let drain = pool.stop(true);
        tokio::pin!(drain);
        let first_tick = tokio::time::Instant::now() + PROGRESS_INTERVAL;
        let mut progress = tokio::time::interval_at(first_tick, PROGRESS_INTERVAL);
        loop {
            tokio::select! {
                _ = &mut drain => break,
                _ = progress.tick() => log_progress(targets.len(), &finished, pool.stats()),
            }
        }

        let tasks = std::mem::take(&mut *finished.lock());
        let report =
            self.compile_report(tasks, pool.stats(), baseline, started_at, clock.elapsed());
        report.log_summary();

        Ok(report)
    }

    /// Crawls one target and submits a parse job per discovered item
    fn crawl_job(
        &self,
        pool: &Arc<WorkerPool>,
        target: &Arc<Target>,
        schema: &Arc<Schema>,
        finished: &Finished,
    ) -> CrawlJob {
        let pool = Arc::clone(pool);
        let target = Arc::clone(target);
        let schema = Arc::clone(schema);
        let finished = Arc::clone(finished);
        let controller = Arc::clone(&self.controller);
        let extractor = Arc::clone(&self.extractor);
        let store = Arc::clone(&self.store);

        Box::pin(async move {
            let mut task = CrawlTask::new(Arc::clone(&target));
            let fragments = controller.crawl(&mut task).await.unwrap_or_default();

            // The outcome is recorded only once every item has been handed off
            let mut handoff = Ok(());
            for item in RawItem::from_fragments(&target, &schema, fragments) {
                let job = parse_job(item, Arc::clone(&extractor), Arc::clone(&store));
                if let Err(e) = pool.submit_parse(job).await {
                    tracing::warn!("{}: items not handed off: {}", target.key, e);
                    task.revoke(format!("Items not handed off: {}", e));
                    handoff = Err(e);
                    break;
                }
            }

            finished.lock().push(task);
            handoff.map_err(HarvestError::from)
        })
    }

    fn compile_report(
        &self,
        tasks: Vec<CrawlTask>,
        pool: PoolStats,
        baseline: StoreStats,
        started_at: DateTime<Utc>,
        elapsed: Duration,
    ) -> RunReport {
        let mut by_key: HashMap<String, CrawlTask> = tasks
            .into_iter()
            .map(|task| (task.key().to_string(), task))
            .collect();

        // Targets whose crawl job never finished are aborted by the shutdown
        let outcomes: Vec<TargetOutcome> = self
            .catalog
            .targets()
            .iter()
            .map(|target| match by_key.remove(&target.key) {
                Some(task) => TargetOutcome::from(&task),
                None => TargetOutcome {
                    key: target.key.clone(),
                    status: TaskStatus::Aborted,
                    attempts: 0,
                    items: 0,
                    last_error: Some(UNFINISHED.to_string()),
                },
            })
            .collect();

        let succeeded = outcomes
            .iter()
            .filter(|o| o.status == TaskStatus::Succeeded)
            .count();

        RunReport {
            targets_total: outcomes.len(),
            succeeded,
            failed: outcomes.len() - succeeded,
            started_at,
            finished_at: Utc::now(),
            elapsed,
            store: self.store.stats().since(&baseline),
            pool,
            outcomes,
        }
    }
}

/// Extracts one item and saves it; a failure affects only this item
fn parse_job(item: RawItem, extractor: Arc<Extractor>, store: Arc<dyn Store>) -> ParseJob {
    Box::new(move || -> Result<()> {
        let record = extractor.extract(&item.target, &item.schema, &item.fragment)?;

        match store.save(&item.schema, &record) {
            Ok(SaveOutcome::Updated { changed }) => {
                tracing::debug!(
                    "{} item #{}: updated {}",
                    item.target.key,
                    item.ordinal,
                    changed.join(", ")
                );
            }
            Ok(outcome) => {
                tracing::trace!("{} item #{}: {:?}", item.target.key, item.ordinal, outcome);
            }
            Err(e) => {
                tracing::warn!(
                    "{} item #{} not saved: {}",
                    item.target.key,
                    item.ordinal,
                    e
                );
                return Err(e.into());
            }
        }

        Ok(())
    })
}

fn log_progress(total: usize, finished: &Finished, pool: PoolStats) {
    let done = finished.lock().len();
    tracing::info!(
        "Progress: {}/{} targets crawled, {}/{} items parsed, {} job errors",
        done,
        total,
        pool.parse_completed,
        pool.parse_submitted,
        pool.errors
    );
}
