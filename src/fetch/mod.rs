//! Fetch collaborator
//!
//! The pipeline never talks to a browser or HTTP client directly. It opens a
//! [`FetchSession`] per attempt through a [`SessionFactory`] and drives it:
//! navigate, wait for the content container, scroll until the listing stops
//! growing, then collect item fragments.
//!
//! [`HttpSessionFactory`] is the bundled backend for server-rendered listings.

mod http;
pub mod pagination;
mod session;

pub use http::{classify_status, HttpSession, HttpSessionFactory};
pub use pagination::{scroll_until_exhausted, ScrollReport};
pub use session::{FetchSession, SessionFactory};

use thiserror::Error;

/// Errors raised by fetch sessions
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// Worth retrying: timeouts, connection failures, 429, 5xx
    #[error("Transient fetch error: {0}")]
    Transient(String),

    /// Retrying will not help: 404, 410, other 4xx, bad selectors
    #[error("Permanent fetch error: {0}")]
    Permanent(String),

    /// The content container never appeared
    #[error("Page load error: {0}")]
    PageLoad(String),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Permanent(_))
    }
}
