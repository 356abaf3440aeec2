//! Dual-stage worker pool
//!
//! Two bounded queues feed two independently sized stages:
//! - crawl jobs are async futures, at most `crawl_workers` in flight
//! - parse jobs are blocking closures run on the blocking thread pool, at
//!   most `parse_workers` in flight
//!
//! A single dispatcher task pulls from a queue only once its stage has a
//! free slot and reaps finished jobs. A full queue makes `submit_*` wait,
//! which is the only backpressure in the pipeline. Job failures and panics
//! are counted and logged; they never reach the dispatcher or sibling jobs.

use crate::config::PoolConfig;
use crate::HarvestError;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::Instant;

/// An async unit of crawl work
pub type CrawlJob = Pin<Box<dyn Future<Output = Result<(), HarvestError>> + Send + 'static>>;

/// A blocking unit of parse work
pub type ParseJob = Box<dyn FnOnce() -> Result<(), HarvestError> + Send + 'static>;

/// Errors returned to submitters
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("Worker pool is not running")]
    NotRunning,

    #[error("The {0} queue is closed")]
    QueueClosed(Stage),
}

/// One of the two pipeline stages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Crawl,
    Parse,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Crawl => f.write_str("crawl"),
            Self::Parse => f.write_str("parse"),
        }
    }
}

/// Snapshot of the pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub crawl_submitted: u64,
    pub crawl_completed: u64,
    pub parse_submitted: u64,
    pub parse_completed: u64,
    /// Jobs that returned an error or panicked, both stages
    pub errors: u64,
}

#[derive(Default)]
struct Gauges {
    crawl_queued: AtomicUsize,
    crawl_active: AtomicUsize,
    parse_queued: AtomicUsize,
    parse_active: AtomicUsize,
}

impl Gauges {
    fn queued(&self, stage: Stage) -> &AtomicUsize {
        match stage {
            Stage::Crawl => &self.crawl_queued,
            Stage::Parse => &self.parse_queued,
        }
    }

    fn active(&self, stage: Stage) -> &AtomicUsize {
        match stage {
            Stage::Crawl => &self.crawl_active,
            Stage::Parse => &self.parse_active,
        }
    }

    /// Zeroes every gauge once the dispatcher is gone
    fn clear(&self) {
        for stage in [Stage::Crawl, Stage::Parse] {
            self.queued(stage).store(0, Ordering::SeqCst);
            self.active(stage).store(0, Ordering::SeqCst);
        }
    }
}

#[derive(Default)]
struct Shared {
    stats: Mutex<PoolStats>,
    gauges: Gauges,
}

#[derive(Default)]
struct Senders {
    crawl: Option<mpsc::Sender<CrawlJob>>,
    parse: Option<mpsc::Sender<ParseJob>>,
}

/// Handles owned between `start` and `stop`
struct Running {
    dispatcher: JoinHandle<()>,
    monitor: JoinHandle<()>,
    crawl_drained: oneshot::Receiver<()>,
    abort: oneshot::Sender<()>,
    monitor_stop: watch::Sender<bool>,
}

/// Bounded two-stage worker pool
///
/// The pool is meant to be shared behind an `Arc`: crawl jobs typically hold
/// a clone so they can submit parse work.
pub struct WorkerPool {
    config: PoolConfig,
    shared: Arc<Shared>,
    senders: Mutex<Senders>,
    running: Mutex<Option<Running>>,
    started: AtomicBool,
}

impl WorkerPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared::default()),
            senders: Mutex::new(Senders::default()),
            running: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    /// Spawns the dispatcher and monitor tasks
    ///
    /// Must be called from within a Tokio runtime. Starting a pool that is
    /// running or still stopping logs a warning and does nothing. A stopped
    /// pool can be started again; its counters carry over.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::warn!("Worker pool is running or still stopping, not starting");
            return;
        }

        let (crawl_tx, crawl_rx) = mpsc::channel(self.config.queue_capacity);
        let (parse_tx, parse_rx) = mpsc::channel(self.config.queue_capacity);
        let (drained_tx, drained_rx) = oneshot::channel();
        let (abort_tx, abort_rx) = oneshot::channel();
        let (monitor_tx, monitor_rx) = watch::channel(false);

        let dispatcher = Dispatcher {
            shared: Arc::clone(&self.shared),
            crawl_rx,
            parse_rx,
            crawl_slots: Arc::new(Semaphore::new(self.config.crawl_workers)),
            parse_slots: Arc::new(Semaphore::new(self.config.parse_workers)),
            crawl_drained: Some(drained_tx),
            abort: abort_rx,
        };

        let dispatcher = tokio::spawn(dispatcher.run());
        let monitor = tokio::spawn(monitor(
            Arc::clone(&self.shared),
            self.config.monitor_interval(),
            monitor_rx,
        ));

        {
            let mut senders = self.senders.lock();
            senders.crawl = Some(crawl_tx);
            senders.parse = Some(parse_tx);
        }

        *self.running.lock() = Some(Running {
            dispatcher,
            monitor,
            crawl_drained: drained_rx,
            abort: abort_tx,
            monitor_stop: monitor_tx,
        });

        tracing::info!(
            "Worker pool started: {} crawl / {} parse workers, queue capacity {}",
            self.config.crawl_workers,
            self.config.parse_workers,
            self.config.queue_capacity
        );
    }

    /// Returns true between `start` and `stop`
    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Enqueues a crawl job, waiting while the crawl queue is full
    ///
    /// # Errors
    ///
    /// * `PoolError::NotRunning` - The pool was never started or has been
    ///   stopped; nothing is enqueued and no counter changes
    /// * `PoolError::QueueClosed` - The pool stopped while this call waited
    pub async fn submit_crawl(&self, job: CrawlJob) -> Result<(), PoolError> {
        let tx = self
            .senders
            .lock()
            .crawl
            .clone()
            .ok_or(PoolError::NotRunning)?;

        let permit = tx
            .reserve()
            .await
            .map_err(|_| PoolError::QueueClosed(Stage::Crawl))?;
        self.shared.gauges.crawl_queued.fetch_add(1, Ordering::SeqCst);
        permit.send(job);

        self.shared.stats.lock().crawl_submitted += 1;
        Ok(())
    }

    /// Enqueues a parse job, waiting while the parse queue is full
    ///
    /// Parse submissions stay open while a graceful stop drains the crawl
    /// stage, so in-flight crawl jobs can still hand off their results.
    pub async fn submit_parse(&self, job: ParseJob) -> Result<(), PoolError> {
        let tx = self
            .senders
            .lock()
            .parse
            .clone()
            .ok_or(PoolError::NotRunning)?;

        let permit = tx
            .reserve()
            .await
            .map_err(|_| PoolError::QueueClosed(Stage::Parse))?;
        self.shared.gauges.parse_queued.fetch_add(1, Ordering::SeqCst);
        permit.send(job);

        self.shared.stats.lock().parse_submitted += 1;
        Ok(())
    }

    /// Stops the pool
    ///
    /// With `wait = true` the crawl queue is closed first and its queued and
    /// in-flight jobs are allowed to finish (bounded by `stop_timeout`); then
    /// the parse queue is closed and the dispatcher joined, again bounded. If
    /// the dispatcher does not finish in time it is aborted.
    ///
    /// With `wait = false` queued work is dropped and in-flight async jobs
    /// are aborted.
    ///
    /// Jobs dropped or aborted here are never counted as completed. The
    /// queue and active gauges read zero once `stop` returns.
    ///
    /// Stopping a stopped pool does nothing.
    pub async fn stop(&self, wait: bool) {
        let running = self.running.lock().take();
        let Some(running) = running else {
            tracing::debug!("Worker pool not running, nothing to stop");
            return;
        };

        let timeout = self.config.stop_timeout();
        let Running {
            mut dispatcher,
            monitor,
            crawl_drained,
            abort,
            monitor_stop,
        } = running;

        if wait {
            tracing::info!("Stopping worker pool, draining queues");
            self.senders.lock().crawl = None;

            if tokio::time::timeout(timeout, crawl_drained).await.is_err() {
                tracing::warn!("Crawl stage did not drain within {:?}", timeout);
            }

            self.senders.lock().parse = None;

            if tokio::time::timeout(timeout, &mut dispatcher).await.is_err() {
                tracing::warn!("Dispatcher did not finish within {:?}, aborting", timeout);
                dispatcher.abort();
            }
        } else {
            tracing::info!("Stopping worker pool immediately");
            {
                let mut senders = self.senders.lock();
                senders.crawl = None;
                senders.parse = None;
            }
            let _ = abort.send(());

            if tokio::time::timeout(timeout, &mut dispatcher).await.is_err() {
                dispatcher.abort();
            }
        }

        self.shared.gauges.clear();

        let _ = monitor_stop.send(true);
        if tokio::time::timeout(Duration::from_secs(5), monitor)
            .await
            .is_err()
        {
            tracing::warn!("Monitor task did not stop in time");
        }

        self.started.store(false, Ordering::SeqCst);
        tracing::info!("Worker pool stopped: {:?}", self.stats());
    }

    /// Polls until every submitted job has completed and both queues are idle
    ///
    /// On a stopped pool only the gauges are checked, since dropped jobs
    /// never complete. Returns false if `timeout` elapses first.
    pub async fn wait_all_completed(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_idle() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    fn is_idle(&self) -> bool {
        let stats = self.stats();
        let drained = !self.is_running()
            || (stats.crawl_submitted == stats.crawl_completed
                && stats.parse_submitted == stats.parse_completed);
        drained
            && [Stage::Crawl, Stage::Parse]
                .iter()
                .all(|&stage| self.queued(stage) == 0 && self.active(stage) == 0)
    }

    pub fn stats(&self) -> PoolStats {
        *self.shared.stats.lock()
    }

    /// Jobs waiting in a stage's queue
    pub fn queued(&self, stage: Stage) -> usize {
        self.shared.gauges.queued(stage).load(Ordering::SeqCst)
    }

    /// Jobs currently running in a stage
    pub fn active(&self, stage: Stage) -> usize {
        self.shared.gauges.active(stage).load(Ordering::SeqCst)
    }
}

type JobResult = Result<(), HarvestError>;

struct Dispatcher {
    shared: Arc<Shared>,
    crawl_rx: mpsc::Receiver<CrawlJob>,
    parse_rx: mpsc::Receiver<ParseJob>,
    crawl_slots: Arc<Semaphore>,
    parse_slots: Arc<Semaphore>,
    crawl_drained: Option<oneshot::Sender<()>>,
    abort: oneshot::Receiver<()>,
}

impl Dispatcher {
    async fn run(mut self) {
        let mut crawl_jobs: JoinSet<JobResult> = JoinSet::new();
        let mut parse_jobs: JoinSet<JobResult> = JoinSet::new();
        let mut crawl_open = true;
        let mut parse_open = true;

        loop {
            if !crawl_open && crawl_jobs.is_empty() {
                if let Some(tx) = self.crawl_drained.take() {
                    tracing::debug!("Crawl stage drained");
                    let _ = tx.send(());
                }
            }

            if !crawl_open && !parse_open && crawl_jobs.is_empty() && parse_jobs.is_empty() {
                break;
            }

            tokio::select! {
                biased;

                _ = &mut self.abort => {
                    tracing::debug!(
                        "Aborting {} crawl and {} parse jobs",
                        crawl_jobs.len(),
                        parse_jobs.len()
                    );
                    crawl_jobs.abort_all();
                    parse_jobs.abort_all();
                    break;
                }

                Some(result) = crawl_jobs.join_next(), if !crawl_jobs.is_empty() => {
                    self.reap(Stage::Crawl, result);
                }

                Some(result) = parse_jobs.join_next(), if !parse_jobs.is_empty() => {
                    self.reap(Stage::Parse, result);
                }

                next = next_job(Arc::clone(&self.parse_slots), &mut self.parse_rx), if parse_open => {
                    match next {
                        Some((permit, Some(job))) => {
                            self.shared.gauges.parse_active.fetch_add(1, Ordering::SeqCst);
                            self.shared.gauges.parse_queued.fetch_sub(1, Ordering::SeqCst);
                            parse_jobs.spawn_blocking(move || {
                                let _permit = permit;
                                job()
                            });
                        }
                        _ => parse_open = false,
                    }
                }

                next = next_job(Arc::clone(&self.crawl_slots), &mut self.crawl_rx), if crawl_open => {
                    match next {
                        Some((permit, Some(job))) => {
                            self.shared.gauges.crawl_active.fetch_add(1, Ordering::SeqCst);
                            self.shared.gauges.crawl_queued.fetch_sub(1, Ordering::SeqCst);
                            crawl_jobs.spawn(async move {
                                let _permit = permit;
                                job.await
                            });
                        }
                        _ => crawl_open = false,
                    }
                }

                else => break,
            }
        }
    }

    fn reap(&self, stage: Stage, result: Result<JobResult, JoinError>) {
        self.shared
            .gauges
            .active(stage)
            .fetch_sub(1, Ordering::SeqCst);

        let failure = match result {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("{} job failed: {}", stage, e)),
            Err(e) if e.is_panic() => Some(format!("{} job panicked", stage)),
            Err(e) => Some(format!("{} job cancelled: {}", stage, e)),
        };

        {
            let mut stats = self.shared.stats.lock();
            match stage {
                Stage::Crawl => stats.crawl_completed += 1,
                Stage::Parse => stats.parse_completed += 1,
            }
            if failure.is_some() {
                stats.errors += 1;
            }
        }

        if let Some(message) = failure {
            tracing::warn!("{}", message);
        }
    }
}

/// Waits for a free slot, then for the next job
///
/// Dropping this future before the job arrives releases the slot and leaves
/// the queue untouched. `None` in the job position means the queue closed.
async fn next_job<T>(
    slots: Arc<Semaphore>,
    rx: &mut mpsc::Receiver<T>,
) -> Option<(OwnedSemaphorePermit, Option<T>)> {
    let permit = slots.acquire_owned().await.ok()?;
    Some((permit, rx.recv().await))
}

async fn monitor(shared: Arc<Shared>, interval: Duration, mut stop: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let g = &shared.gauges;
                tracing::debug!(
                    "Pool: crawl {} queued / {} active, parse {} queued / {} active",
                    g.crawl_queued.load(Ordering::Relaxed),
                    g.crawl_active.load(Ordering::Relaxed),
                    g.parse_queued.load(Ordering::Relaxed),
                    g.parse_active.load(Ordering::Relaxed),
                );
            }
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.dispatcher.abort();
            running.monitor.abort();
        }
    }
}
