//! Per-target retry and backoff
//!
//! Each target runs through an explicit state machine:
//!
//! ```text
//! ATTEMPT -> SUCCESS
//! ATTEMPT -> RETRYABLE_FAILURE -> BACKOFF -> ATTEMPT   (until max_attempts)
//! ATTEMPT -> FATAL -> ABORTED
//! ```
//!
//! An attempt opens a fresh session, loads the listing, scrolls it to
//! exhaustion and collects item fragments. The session is closed when the
//! attempt ends, whatever the outcome.

use crate::catalog::Target;
use crate::config::{Config, RetryConfig, ScrollConfig};
use crate::crawler::task::CrawlTask;
use crate::fetch::{scroll_until_exhausted, FetchError, FetchSession, SessionFactory};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Result of a single attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome<T> {
    Success(T),
    Retryable(String),
    Fatal(String),
}

impl<T> From<FetchError> for AttemptOutcome<T> {
    fn from(error: FetchError) -> Self {
        if error.is_retryable() {
            Self::Retryable(error.to_string())
        } else {
            Self::Fatal(error.to_string())
        }
    }
}

/// Un-jittered backoff before `attempt`: `min(base * factor^attempt, max)`
pub fn base_backoff(config: &RetryConfig, attempt: u32) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let raw = config.base_delay_ms as f64 * config.backoff_factor.powi(exponent);
    let capped = raw.min(config.max_delay_ms as f64);
    Duration::from_millis(capped as u64)
}

/// Backoff with a jitter factor applied, clamped to `max_delay_ms`
pub fn jittered_backoff(config: &RetryConfig, attempt: u32, jitter: f64) -> Duration {
    let delay = base_backoff(config, attempt).mul_f64(jitter);
    delay.min(Duration::from_millis(config.max_delay_ms))
}

/// Backoff before `attempt` with a uniform jitter in `[0.5, 1.5)`
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let jitter = rand::thread_rng().gen_range(0.5..1.5);
    jittered_backoff(config, attempt, jitter)
}

/// Random pause in `[pacing_min_ms, pacing_max_ms]`
pub fn pacing_delay(config: &RetryConfig) -> Duration {
    if config.pacing_max_ms == 0 {
        return Duration::ZERO;
    }
    let ms = rand::thread_rng().gen_range(config.pacing_min_ms..=config.pacing_max_ms);
    Duration::from_millis(ms)
}

/// Runs attempts until success, a fatal outcome, or `max_attempts`
///
/// `attempt` receives the 1-based attempt number. The task's attempt counter,
/// last error and terminal status are updated here and nowhere else.
///
/// # Returns
///
/// * `Some(T)` - The task succeeded
/// * `None` - The task was aborted
pub async fn drive<T, F, Fut>(task: &mut CrawlTask, config: &RetryConfig, mut attempt: F) -> Option<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = AttemptOutcome<T>>,
{
    loop {
        task.attempts += 1;
        let number = task.attempts;

        match attempt(number).await {
            AttemptOutcome::Success(value) => {
                tracing::debug!("{} succeeded on attempt {}", task.key(), number);
                return Some(value);
            }
            AttemptOutcome::Fatal(reason) => {
                tracing::error!("{} aborted: {}", task.key(), reason);
                task.abort(reason);
                return None;
            }
            AttemptOutcome::Retryable(reason) => {
                if number >= config.max_attempts {
                    tracing::error!(
                        "{} aborted after {} attempts: {}",
                        task.key(),
                        number,
                        reason
                    );
                    task.abort(reason);
                    return None;
                }

                let delay = backoff_delay(config, number + 1);
                tracing::warn!(
                    "{} attempt {}/{} failed: {}; retrying in {:.1}s",
                    task.key(),
                    number,
                    config.max_attempts,
                    reason,
                    delay.as_secs_f64()
                );
                task.last_error = Some(reason);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Drives crawl attempts for targets against a session factory
pub struct RetryController {
    factory: Arc<dyn SessionFactory>,
    retry: RetryConfig,
    scroll: ScrollConfig,
    content_selector: String,
    item_selector: String,
}

impl RetryController {
    pub fn new(factory: Arc<dyn SessionFactory>, config: &Config) -> Self {
        Self {
            factory,
            retry: config.retry.clone(),
            scroll: config.scroll.clone(),
            content_selector: config.fetch.content_selector.clone(),
            item_selector: config.fetch.item_selector.clone(),
        }
    }

    /// Crawls one target to a terminal state
    ///
    /// # Returns
    ///
    /// * `Some(fragments)` - The task succeeded; fragments may be empty only
    ///   when `retry_on_empty` is off
    /// * `None` - The task was aborted; nothing should be parsed
    pub async fn crawl(&self, task: &mut CrawlTask) -> Option<Vec<String>> {
        let target = Arc::clone(&task.target);
        let fragments = drive(task, &self.retry, |_| self.attempt(&target)).await?;

        task.succeed(fragments.len());
        tracing::info!(
            "{}: {} items after {} attempt(s)",
            target.key,
            fragments.len(),
            task.attempts
        );

        let pause = pacing_delay(&self.retry);
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }

        Some(fragments)
    }

    async fn attempt(&self, target: &Target) -> AttemptOutcome<Vec<String>> {
        let mut session = match self.factory.open(target).await {
            Ok(session) => session,
            Err(e) => return e.into(),
        };

        let result = self.load(session.as_mut(), target).await;
        session.close().await;

        match result {
            Ok(fragments) if fragments.is_empty() && self.retry.retry_on_empty => {
                AttemptOutcome::Retryable(format!("DataNotFound: no items at {}", target.url))
            }
            Ok(fragments) => AttemptOutcome::Success(fragments),
            Err(e) => e.into(),
        }
    }

    async fn load(
        &self,
        session: &mut dyn FetchSession,
        target: &Target,
    ) -> Result<Vec<String>, FetchError> {
        self.navigate(session, &target.url).await?;
        self.await_content(session).await?;

        let report = scroll_until_exhausted(session, &self.scroll).await?;
        tracing::debug!(
            "{}: scrolled {} step(s), extent {}, exhausted: {}",
            target.key,
            report.steps,
            report.final_extent,
            report.exhausted
        );

        session.item_fragments(&self.item_selector).await
    }

    /// Navigates, retrying transient failures within the attempt
    async fn navigate(&self, session: &mut dyn FetchSession, url: &Url) -> Result<(), FetchError> {
        let mut tries = 0;
        loop {
            tries += 1;
            match session.navigate(url).await {
                Ok(()) => return Ok(()),
                Err(FetchError::Transient(reason)) if tries < self.retry.op_max_retries => {
                    tracing::debug!("Navigation to {} failed ({}), retrying", url, reason);
                    tokio::time::sleep(Duration::from_millis(self.retry.op_retry_delay_ms)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Waits for the content container, refreshing between tries
    async fn await_content(&self, session: &mut dyn FetchSession) -> Result<(), FetchError> {
        for tries in 1..=self.retry.op_max_retries {
            if session.wait_for_content(&self.content_selector).await? {
                return Ok(());
            }
            if tries < self.retry.op_max_retries {
                tracing::debug!("'{}' not present, refreshing", self.content_selector);
                tokio::time::sleep(Duration::from_millis(self.retry.op_retry_delay_ms)).await;
                session.refresh().await?;
            }
        }

        Err(FetchError::PageLoad(format!(
            "'{}' not found after {} tries",
            self.content_selector, self.retry.op_max_retries
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::TaskStatus;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn retry_config() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            base_delay_ms: 5000,
            backoff_factor: 2.0,
            max_delay_ms: 60000,
            op_max_retries: 3,
            op_retry_delay_ms: 2000,
            retry_on_empty: true,
            pacing_min_ms: 0,
            pacing_max_ms: 0,
        }
    }

    fn config(retry: RetryConfig) -> Config {
        crate::config::parse_config(
            r#"
[pool]
crawl-workers = 1
parse-workers = 1
queue-capacity = 4

[retry]
max-attempts = 3
base-delay-ms = 5000
backoff-factor = 2.0
max-delay-ms = 60000

[scroll]
step = 800
settle-delay-ms = 3000
no-growth-threshold = 3
max-scroll-attempts = 5

[fetch]
url-template = "https://mzj.sz.gov.cn/cn/isz/{key}/index.html"
content-selector = ".content"
item-selector = ".dataItem"
user-agents = ["TestAgent/1.0"]

[output]
database-path = ":memory:"
"#,
        )
        .map(|mut c| {
            c.retry = retry;
            c
        })
        .unwrap()
    }

    fn target() -> Arc<Target> {
        Arc::new(Target {
            key: "yljg".to_string(),
            description: String::new(),
            schema_id: "elderly_care_institutions".to_string(),
            url: Url::parse("https://mzj.sz.gov.cn/cn/isz/yljg/index.html").unwrap(),
            rules: Vec::new(),
        })
    }

    #[derive(Clone)]
    enum Script {
        OpenFails(FetchError),
        NavigateFails(FetchError),
        NoContent,
        Items(usize),
    }

    #[derive(Default)]
    struct Counters {
        opened: AtomicU32,
        closed: AtomicU32,
        navigations: AtomicU32,
        refreshes: AtomicU32,
    }

    struct ScriptedFactory {
        scripts: Mutex<VecDeque<Script>>,
        counters: Arc<Counters>,
    }

    impl ScriptedFactory {
        fn new(scripts: Vec<Script>) -> Self {
            Self {
                scripts: Mutex::new(scripts.into()),
                counters: Arc::new(Counters::default()),
            }
        }
    }

    struct ScriptedSession {
        script: Script,
        counters: Arc<Counters>,
    }

    #[async_trait]
    impl SessionFactory for ScriptedFactory {
        async fn open(&self, _target: &Target) -> Result<Box<dyn FetchSession>, FetchError> {
            let script = self
                .scripts
                .lock()
                .pop_front()
                .unwrap_or(Script::NavigateFails(FetchError::Transient("exhausted".into())));
            let script = match script {
                Script::OpenFails(e) => return Err(e),
                other => other,
            };
            self.counters.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ScriptedSession {
                script,
                counters: Arc::clone(&self.counters),
            }))
        }
    }

    #[async_trait]
    impl FetchSession for ScriptedSession {
        async fn navigate(&mut self, _url: &Url) -> Result<(), FetchError> {
            self.counters.navigations.fetch_add(1, Ordering::SeqCst);
            match &self.script {
                Script::NavigateFails(e) => Err(e.clone()),
                _ => Ok(()),
            }
        }

        async fn refresh(&mut self) -> Result<(), FetchError> {
            self.counters.refreshes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn wait_for_content(&mut self, _selector: &str) -> Result<bool, FetchError> {
            Ok(!matches!(self.script, Script::NoContent))
        }

        async fn scroll_by(&mut self, _units: u32) -> Result<(), FetchError> {
            Ok(())
        }

        async fn content_extent(&mut self) -> Result<u64, FetchError> {
            Ok(4096)
        }

        async fn item_fragments(&mut self, _selector: &str) -> Result<Vec<String>, FetchError> {
            match self.script {
                Script::Items(n) => Ok((0..n)
                    .map(|i| format!("<div class=\"dataItem\"><h4>{}</h4></div>", i))
                    .collect()),
                _ => Ok(Vec::new()),
            }
        }

        async fn close(&mut self) {
            self.counters.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn controller(factory: &Arc<ScriptedFactory>, retry: RetryConfig) -> RetryController {
        let factory: Arc<dyn SessionFactory> = Arc::clone(factory) as Arc<dyn SessionFactory>;
        RetryController::new(factory, &config(retry))
    }

    #[test]
    fn test_base_backoff_grows_and_caps() {
        let config = retry_config();

        assert_eq!(base_backoff(&config, 2), Duration::from_millis(20000));
        assert_eq!(base_backoff(&config, 3), Duration::from_millis(40000));
        assert_eq!(base_backoff(&config, 4), Duration::from_millis(60000));
        assert_eq!(base_backoff(&config, 50), Duration::from_millis(60000));

        let mut previous = Duration::ZERO;
        for attempt in 1..40 {
            let delay = base_backoff(&config, attempt);
            assert!(delay >= previous);
            assert!(delay <= Duration::from_millis(config.max_delay_ms));
            previous = delay;
        }
    }

    #[test]
    fn test_jittered_backoff_never_exceeds_max() {
        let config = retry_config();
        assert_eq!(
            jittered_backoff(&config, 2, 0.5),
            Duration::from_millis(10000)
        );
        assert_eq!(
            jittered_backoff(&config, 4, 1.49),
            Duration::from_millis(60000)
        );

        for attempt in 1..10 {
            for _ in 0..50 {
                assert!(backoff_delay(&config, attempt) <= Duration::from_millis(60000));
            }
        }
    }

    #[test]
    fn test_pacing_delay_range() {
        let mut config = retry_config();
        assert_eq!(pacing_delay(&config), Duration::ZERO);

        config.pacing_min_ms = 1000;
        config.pacing_max_ms = 3000;
        for _ in 0..50 {
            let pause = pacing_delay(&config);
            assert!(pause >= Duration::from_millis(1000));
            assert!(pause <= Duration::from_millis(3000));
        }
    }

    #[test]
    fn test_fetch_error_classification() {
        let transient: AttemptOutcome<()> = FetchError::Transient("timeout".into()).into();
        let page_load: AttemptOutcome<()> = FetchError::PageLoad(".content".into()).into();
        let permanent: AttemptOutcome<()> = FetchError::Permanent("HTTP 404".into()).into();

        assert!(matches!(transient, AttemptOutcome::Retryable(_)));
        assert!(matches!(page_load, AttemptOutcome::Retryable(_)));
        assert!(matches!(permanent, AttemptOutcome::Fatal(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drive_retries_then_succeeds() {
        let mut task = CrawlTask::new(target());
        let result = drive(&mut task, &retry_config(), |n| async move {
            if n < 3 {
                AttemptOutcome::Retryable(format!("timeout #{}", n))
            } else {
                AttemptOutcome::Success(n)
            }
        })
        .await;

        assert_eq!(result, Some(3));
        assert_eq!(task.attempts, 3);
        assert_eq!(task.last_error.as_deref(), Some("timeout #2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drive_fatal_stops_immediately() {
        let mut task = CrawlTask::new(target());
        let mut calls = 0;
        let result: Option<()> = drive(&mut task, &retry_config(), |_| {
            calls += 1;
            async { AttemptOutcome::Fatal("HTTP 404".to_string()) }
        })
        .await;

        assert_eq!(result, None);
        assert_eq!(calls, 1);
        assert_eq!(task.status, TaskStatus::Aborted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drive_backs_off_between_attempts() {
        let mut task = CrawlTask::new(target());
        let start = tokio::time::Instant::now();

        let result: Option<()> = drive(&mut task, &retry_config(), |_| async {
            AttemptOutcome::Retryable("timeout".to_string())
        })
        .await;

        assert_eq!(result, None);
        assert_eq!(task.attempts, 3);
        assert_eq!(task.status, TaskStatus::Aborted);
        // backoff before attempts 2 and 3: at least half of 20s and 40s
        assert!(start.elapsed() >= Duration::from_millis(30000));
        assert!(start.elapsed() <= Duration::from_millis(120000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_crawl_success_closes_session() {
        let factory = Arc::new(ScriptedFactory::new(vec![Script::Items(4)]));
        let mut task = CrawlTask::new(target());

        let fragments = controller(&factory, retry_config()).crawl(&mut task).await;

        assert_eq!(fragments.map(|f| f.len()), Some(4));
        assert_eq!(task.status, TaskStatus::Succeeded);
        assert_eq!(task.items, 4);
        assert_eq!(factory.counters.opened.load(Ordering::SeqCst), 1);
        assert_eq!(factory.counters.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_session_per_attempt() {
        let factory = Arc::new(ScriptedFactory::new(vec![
            Script::OpenFails(FetchError::Transient("driver crashed".into())),
            Script::NavigateFails(FetchError::Transient("timeout".into())),
            Script::Items(2),
        ]));
        let mut task = CrawlTask::new(target());

        let fragments = controller(&factory, retry_config()).crawl(&mut task).await;

        assert_eq!(fragments.map(|f| f.len()), Some(2));
        assert_eq!(task.attempts, 3);
        assert_eq!(factory.counters.opened.load(Ordering::SeqCst), 2);
        assert_eq!(factory.counters.closed.load(Ordering::SeqCst), 2);
        // op-level retries inside the failing attempt, then one clean navigation
        assert_eq!(factory.counters.navigations.load(Ordering::SeqCst), 3 + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_aborts_without_retry() {
        let factory = Arc::new(ScriptedFactory::new(vec![
            Script::NavigateFails(FetchError::Permanent("HTTP 404".into())),
            Script::Items(2),
        ]));
        let mut task = CrawlTask::new(target());

        let fragments = controller(&factory, retry_config()).crawl(&mut task).await;

        assert_eq!(fragments, None);
        assert_eq!(task.status, TaskStatus::Aborted);
        assert_eq!(task.attempts, 1);
        assert_eq!(factory.counters.navigations.load(Ordering::SeqCst), 1);
        assert_eq!(factory.counters.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_content_refreshes_then_retries() {
        let factory = Arc::new(ScriptedFactory::new(vec![Script::NoContent, Script::Items(1)]));
        let mut task = CrawlTask::new(target());

        let fragments = controller(&factory, retry_config()).crawl(&mut task).await;

        assert_eq!(fragments.map(|f| f.len()), Some(1));
        assert_eq!(task.attempts, 2);
        assert_eq!(factory.counters.refreshes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_listing_is_retried() {
        let factory = Arc::new(ScriptedFactory::new(vec![
            Script::Items(0),
            Script::Items(0),
            Script::Items(0),
        ]));
        let mut task = CrawlTask::new(target());

        let fragments = controller(&factory, retry_config()).crawl(&mut task).await;

        assert_eq!(fragments, None);
        assert_eq!(task.status, TaskStatus::Aborted);
        assert_eq!(task.attempts, 3);
        assert!(task.last_error.unwrap().contains("DataNotFound"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_listing_accepted_when_configured() {
        let factory = Arc::new(ScriptedFactory::new(vec![Script::Items(0)]));
        let mut retry = retry_config();
        retry.retry_on_empty = false;
        let mut task = CrawlTask::new(target());

        let fragments = controller(&factory, retry).crawl(&mut task).await;

        assert_eq!(fragments, Some(Vec::new()));
        assert_eq!(task.status, TaskStatus::Succeeded);
        assert_eq!(task.attempts, 1);
    }
}
