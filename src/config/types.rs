use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for the harvester
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub pool: PoolConfig,
    pub retry: RetryConfig,
    pub scroll: ScrollConfig,
    pub fetch: FetchConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub schemas: Vec<SchemaEntry>,
    #[serde(default)]
    pub targets: Vec<TargetEntry>,
}

/// Worker pool sizing
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    /// Concurrent crawl jobs
    #[serde(rename = "crawl-workers")]
    pub crawl_workers: usize,

    /// Concurrent parse/persist jobs
    #[serde(rename = "parse-workers")]
    pub parse_workers: usize,

    /// Capacity of each of the two bounded queues
    #[serde(rename = "queue-capacity")]
    pub queue_capacity: usize,

    /// Upper bound for each phase of a graceful shutdown (seconds)
    #[serde(rename = "stop-timeout-secs", default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,

    /// How often the monitor logs queue gauges (milliseconds)
    #[serde(rename = "monitor-interval-ms", default = "default_monitor_interval_ms")]
    pub monitor_interval_ms: u64,
}

/// Per-target retry and backoff behavior
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Attempts per target before it is aborted
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    #[serde(rename = "base-delay-ms")]
    pub base_delay_ms: u64,

    #[serde(rename = "backoff-factor")]
    pub backoff_factor: f64,

    #[serde(rename = "max-delay-ms")]
    pub max_delay_ms: u64,

    /// Retries of a single navigation or content wait inside one attempt
    #[serde(rename = "op-max-retries", default = "default_op_max_retries")]
    pub op_max_retries: u32,

    #[serde(rename = "op-retry-delay-ms", default = "default_op_retry_delay_ms")]
    pub op_retry_delay_ms: u64,

    /// Whether a target that yields zero items is retried or accepted as empty
    #[serde(rename = "retry-on-empty", default = "default_true")]
    pub retry_on_empty: bool,

    /// Polite pause after a successful target (milliseconds, inclusive range)
    #[serde(rename = "pacing-min-ms", default)]
    pub pacing_min_ms: u64,

    #[serde(rename = "pacing-max-ms", default)]
    pub pacing_max_ms: u64,
}

/// Infinite-scroll exhaustion detection
#[derive(Debug, Clone, Deserialize)]
pub struct ScrollConfig {
    /// Units scrolled per step
    pub step: u32,

    /// Wait after each scroll before sampling the content extent (milliseconds)
    #[serde(rename = "settle-delay-ms")]
    pub settle_delay_ms: u64,

    /// Consecutive no-growth samples that mean the page is exhausted
    #[serde(rename = "no-growth-threshold")]
    pub no_growth_threshold: u32,

    /// Hard cap on scroll steps
    #[serde(rename = "max-scroll-attempts")]
    pub max_scroll_attempts: u32,
}

/// Fetch collaborator settings
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    /// Listing URL template; `{key}` is replaced by the target key
    #[serde(rename = "url-template")]
    pub url_template: String,

    #[serde(rename = "page-load-timeout-secs", default = "default_page_load_timeout_secs")]
    pub page_load_timeout_secs: u64,

    /// Selector that must be present before the page counts as loaded
    #[serde(rename = "content-selector")]
    pub content_selector: String,

    /// Selector matching one listing item
    #[serde(rename = "item-selector")]
    pub item_selector: String,

    /// Pool of user agents, one picked at random per session
    #[serde(rename = "user-agents")]
    pub user_agents: Vec<String>,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

/// Destination table definition
#[derive(Debug, Clone, Deserialize)]
pub struct SchemaEntry {
    pub id: String,

    #[serde(default)]
    pub description: String,

    #[serde(rename = "natural-key", default = "default_natural_key")]
    pub natural_key: String,

    pub fields: Vec<FieldEntry>,
}

/// One column of a destination table
#[derive(Debug, Clone, Deserialize)]
pub struct FieldEntry {
    pub name: String,

    #[serde(rename = "type", default = "default_column_type")]
    pub column_type: String,
}

/// One listing source
#[derive(Debug, Clone, Deserialize)]
pub struct TargetEntry {
    pub key: String,

    /// Destination schema id
    pub schema: String,

    #[serde(default)]
    pub description: String,

    /// Overrides the global URL template
    pub url: Option<String>,

    #[serde(default)]
    pub rules: Vec<RuleEntry>,
}

/// Declarative extraction rule as written in the config file
#[derive(Debug, Clone, Deserialize)]
pub struct RuleEntry {
    pub field: String,

    /// CSS selector locator
    pub css: Option<String>,

    /// Labelled-row locator: text of the row's `<label>`
    pub label: Option<String>,

    /// `text` (default), `html` or `attr`
    pub method: Option<String>,

    /// Attribute name, required when `method = "attr"`
    pub attribute: Option<String>,

    pub processor: Option<String>,
}

impl PoolConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }
}

fn default_stop_timeout_secs() -> u64 {
    300
}

fn default_monitor_interval_ms() -> u64 {
    1000
}

fn default_op_max_retries() -> u32 {
    3
}

fn default_op_retry_delay_ms() -> u64 {
    2000
}

fn default_page_load_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_natural_key() -> String {
    "name".to_string()
}

fn default_column_type() -> String {
    "TEXT".to_string()
}
