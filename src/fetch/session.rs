use crate::catalog::Target;
use crate::fetch::FetchError;
use async_trait::async_trait;
use url::Url;

/// Opens one fresh session per crawl attempt
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self, target: &Target) -> Result<Box<dyn FetchSession>, FetchError>;
}

/// A single page-loading session
///
/// Sessions are never shared between attempts; the controller calls
/// [`close`](FetchSession::close) when an attempt ends, whatever its outcome.
#[async_trait]
pub trait FetchSession: Send {
    async fn navigate(&mut self, url: &Url) -> Result<(), FetchError>;

    /// Reloads the current page
    async fn refresh(&mut self) -> Result<(), FetchError>;

    /// Returns whether an element matching `selector` is present
    async fn wait_for_content(&mut self, selector: &str) -> Result<bool, FetchError>;

    async fn scroll_by(&mut self, units: u32) -> Result<(), FetchError>;

    /// Current scrollable height (or an equivalent monotone measure)
    async fn content_extent(&mut self) -> Result<u64, FetchError>;

    /// Outer markup of every element matching `selector`
    async fn item_fragments(&mut self, selector: &str) -> Result<Vec<String>, FetchError>;

    async fn close(&mut self);
}
