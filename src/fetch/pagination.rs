//! Infinite-scroll exhaustion detection
//!
//! Scrolls a session step by step and samples its content extent after each
//! settle delay. The listing counts as exhausted once the extent has failed to
//! grow for `no_growth_threshold` consecutive samples. The loop is bounded by
//! `max_scroll_attempts` regardless of what the page does.

use crate::config::ScrollConfig;
use crate::fetch::{FetchError, FetchSession};
use std::time::Duration;

/// Outcome of one scroll pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollReport {
    /// Scroll steps performed
    pub steps: u32,

    /// Largest extent observed
    pub final_extent: u64,

    /// True if the no-growth threshold was reached, false if the step cap was
    pub exhausted: bool,
}

/// Scrolls until the page stops growing or the step cap is reached
///
/// # Arguments
///
/// * `session` - A session with a page already loaded
/// * `config` - Step size, settle delay, threshold and cap
///
/// # Returns
///
/// * `Ok(ScrollReport)` - The pass finished
/// * `Err(FetchError)` - The session failed while scrolling or sampling
pub async fn scroll_until_exhausted(
    session: &mut dyn FetchSession,
    config: &ScrollConfig,
) -> Result<ScrollReport, FetchError> {
    let settle = Duration::from_millis(config.settle_delay_ms);
    let mut extent = session.content_extent().await?;
    let mut steps = 0;
    let mut no_growth = 0;

    while steps < config.max_scroll_attempts && no_growth < config.no_growth_threshold {
        session.scroll_by(config.step).await?;
        steps += 1;
        tokio::time::sleep(settle).await;

        let sampled = session.content_extent().await?;
        if sampled > extent {
            extent = sampled;
            no_growth = 0;
        } else {
            no_growth += 1;
        }

        tracing::trace!(
            "Scroll step {}: extent {} (no growth x{})",
            steps,
            extent,
            no_growth
        );
    }

    Ok(ScrollReport {
        steps,
        final_extent: extent,
        exhausted: no_growth >= config.no_growth_threshold,
    })
}
