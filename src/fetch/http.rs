//! HTTP fetch sessions
//!
//! Fetches server-rendered listings with `reqwest` and queries them with
//! `scraper`. Static pages never grow, so scrolling is a no-op and the content
//! extent is the body length; the pagination detector therefore finishes
//! after `no_growth_threshold` steps.

use crate::catalog::Target;
use crate::config::FetchConfig;
use crate::fetch::{FetchError, FetchSession, SessionFactory};
use async_trait::async_trait;
use rand::seq::SliceRandom;
use reqwest::{Client, StatusCode};
use scraper::{Html, Selector};
use std::time::Duration;
use url::Url;

/// Builds one `reqwest` client per session
pub struct HttpSessionFactory {
    user_agents: Vec<String>,
    timeout: Duration,
}

impl HttpSessionFactory {
    pub fn new(config: &FetchConfig) -> Self {
        Self {
            user_agents: config
                .user_agents
                .iter()
                .filter(|ua| !ua.trim().is_empty())
                .cloned()
                .collect(),
            timeout: Duration::from_secs(config.page_load_timeout_secs),
        }
    }

    fn pick_user_agent(&self) -> &str {
        self.user_agents
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
            .unwrap_or(concat!("listing-harvester/", env!("CARGO_PKG_VERSION")))
    }
}

#[async_trait]
impl SessionFactory for HttpSessionFactory {
    async fn open(&self, target: &Target) -> Result<Box<dyn FetchSession>, FetchError> {
        let user_agent = self.pick_user_agent();
        tracing::debug!("Opening session for {} as {}", target.key, user_agent);

        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(self.timeout)
            .connect_timeout(Duration::from_secs(10))
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(|e| FetchError::Permanent(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Box::new(HttpSession::new(client)))
    }
}

/// A session over one `reqwest::Client`
pub struct HttpSession {
    client: Client,
    current: Option<Url>,
    body: Option<String>,
}

impl HttpSession {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            current: None,
            body: None,
        }
    }

    fn body(&self) -> Result<&str, FetchError> {
        self.body
            .as_deref()
            .ok_or_else(|| FetchError::Permanent("No page loaded".to_string()))
    }
}

/// Maps an HTTP status to a fetch error; `None` for success
///
/// | Status | Result |
/// |--------|--------|
/// | 2xx | `None` |
/// | 429 | `Transient` |
/// | other 4xx (404, 410, ...) | `Permanent` |
/// | 5xx and anything else | `Transient` |
pub fn classify_status(status: StatusCode) -> Option<FetchError> {
    if status.is_success() {
        None
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        Some(FetchError::Transient(format!("HTTP {}", status.as_u16())))
    } else if status.is_client_error() {
        Some(FetchError::Permanent(format!("HTTP {}", status.as_u16())))
    } else {
        Some(FetchError::Transient(format!("HTTP {}", status.as_u16())))
    }
}

fn classify_request_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Transient("Request timeout".to_string())
    } else if e.is_connect() {
        FetchError::Transient(format!("Connection failed: {}", e))
    } else if e.is_builder() {
        FetchError::Permanent(e.to_string())
    } else {
        FetchError::Transient(e.to_string())
    }
}

fn parse_selector(selector: &str) -> Result<Selector, FetchError> {
    Selector::parse(selector)
        .map_err(|e| FetchError::Permanent(format!("Invalid selector '{}': {:?}", selector, e)))
}

fn has_match(body: &str, selector: &Selector) -> bool {
    Html::parse_document(body).select(selector).next().is_some()
}

fn outer_html(body: &str, selector: &Selector) -> Vec<String> {
    Html::parse_document(body)
        .select(selector)
        .map(|element| element.html())
        .collect()
}

#[async_trait]
impl FetchSession for HttpSession {
    async fn navigate(&mut self, url: &Url) -> Result<(), FetchError> {
        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(classify_request_error)?;

        if let Some(error) = classify_status(response.status()) {
            return Err(error);
        }

        let body = response.text().await.map_err(classify_request_error)?;
        self.current = Some(url.clone());
        self.body = Some(body);
        Ok(())
    }

    async fn refresh(&mut self) -> Result<(), FetchError> {
        let url = self
            .current
            .clone()
            .ok_or_else(|| FetchError::Permanent("Refresh before navigate".to_string()))?;
        self.navigate(&url).await
    }

    async fn wait_for_content(&mut self, selector: &str) -> Result<bool, FetchError> {
        let selector = parse_selector(selector)?;
        Ok(has_match(self.body()?, &selector))
    }

    async fn scroll_by(&mut self, _units: u32) -> Result<(), FetchError> {
        Ok(())
    }

    async fn content_extent(&mut self) -> Result<u64, FetchError> {
        Ok(self.body()?.len() as u64)
    }

    async fn item_fragments(&mut self, selector: &str) -> Result<Vec<String>, FetchError> {
        let selector = parse_selector(selector)?;
        Ok(outer_html(self.body()?, &selector))
    }

    async fn close(&mut self) {
        self.current = None;
        self.body = None;
    }
}
