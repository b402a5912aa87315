//! Adaptive infinite-scroll loop over a results feed.
//!
//! Each iteration scrolls the feed container to the bottom, waits inside the
//! page for more results to render, then hands the rendered page to an
//! extraction callback. The wait grows while the feed keeps growing and backs
//! off further while it looks exhausted.

use super::traits::PageAutomation;
use crate::error::{CrawlError, Result};
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Timing knobs for crawl jobs (milliseconds unless noted)
#[derive(Debug, Clone)]
pub struct ScrollPacing {
    pub initial_wait_ms: u64,
    pub min_wait_ms: u64,
    pub max_wait_ms: u64,
    /// Added per consecutive stable iteration
    pub stable_increment_ms: u64,
    /// Consecutive stable iterations before the feed counts as exhausted
    pub stable_threshold: u32,
    /// Wait multiplier after the feed height changed
    pub growth: f64,
    /// Pause between iterations
    pub iteration_pause: Duration,
    /// Settling time after opening a proximity search
    pub proximity_settle: Duration,
    /// Delay between attempts to read a listing payload
    pub payload_retry: Duration,
}

impl Default for ScrollPacing {
    fn default() -> Self {
        Self {
            initial_wait_ms: 800,
            min_wait_ms: 500,
            max_wait_ms: 60_000,
            stable_increment_ms: 500,
            stable_threshold: 5,
            growth: 1.3,
            iteration_pause: Duration::from_millis(200),
            proximity_settle: Duration::from_secs(6),
            payload_retry: Duration::from_millis(500),
        }
    }
}

impl ScrollPacing {
    /// Same thresholds with every wait removed, for scripted pages
    pub fn immediate() -> Self {
        Self {
            initial_wait_ms: 0,
            min_wait_ms: 0,
            max_wait_ms: 0,
            iteration_pause: Duration::ZERO,
            proximity_settle: Duration::ZERO,
            payload_retry: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// Per-run state of the termination heuristic
#[derive(Debug)]
struct ScrollState {
    wait_ms: f64,
    height: i64,
    stable: u32,
}

impl ScrollState {
    fn new(pacing: &ScrollPacing) -> Self {
        Self {
            wait_ms: pacing.initial_wait_ms as f64,
            height: 0,
            stable: 0,
        }
    }

    /// In-page wait for the coming iteration
    fn budget(&self, pacing: &ScrollPacing) -> u64 {
        let wait = self.wait_ms as u64 + pacing.stable_increment_ms * u64::from(self.stable);
        wait.clamp(pacing.min_wait_ms, pacing.max_wait_ms)
    }

    /// Record one iteration. Returns true once the feed is exhausted.
    fn observe(&mut self, pacing: &ScrollPacing, height: i64, new_items: usize) -> bool {
        if height == self.height {
            if new_items == 0 {
                self.stable += 1;
                if self.stable >= pacing.stable_threshold {
                    return true;
                }
                self.wait_ms += pacing.stable_increment_ms as f64;
            } else {
                self.stable = 0;
            }
        } else {
            self.stable = 0;
            self.height = height;
            self.wait_ms *= pacing.growth;
        }

        self.wait_ms = self
            .wait_ms
            .clamp(pacing.min_wait_ms as f64, pacing.max_wait_ms as f64);
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollSummary {
    pub iterations: u32,
    /// Stopped early because the feed stopped producing results
    pub exhausted: bool,
}

/// Script that scrolls `selector` to the bottom and resolves with the new
/// scroll height after `wait_ms`, or -1 when the element is missing
pub fn scroll_script(selector: &str, wait_ms: u64) -> String {
    format!(
        r#"(async () => {{
    const el = document.querySelector("{selector}");
    if (!el) return -1;
    el.scrollTop = el.scrollHeight;
    return await new Promise((resolve) => {{
        setTimeout(() => resolve(el.scrollHeight), {wait_ms});
    }});
}})()"#
    )
}

fn height_of(value: &Value, selector: &str) -> Result<i64> {
    let height = value
        .as_i64()
        .or_else(|| value.as_f64().map(|h| h as i64))
        .ok_or_else(|| CrawlError::Browser(format!("scroll height is not a number: {value}")))?;

    if height < 0 {
        return Err(CrawlError::ElementNotFound(selector.to_string()));
    }
    Ok(height)
}

/// Drive the scroll loop for at most `max_depth` iterations.
///
/// `extract` receives the rendered page and the 1-based depth and returns
/// how many new items it found. Cancellation stops the loop between
/// iterations without error.
pub async fn scroll_feed<F>(
    page: &dyn PageAutomation,
    selector: &str,
    max_depth: u32,
    pacing: &ScrollPacing,
    cancel: &CancellationToken,
    mut extract: F,
) -> Result<ScrollSummary>
where
    F: FnMut(&str, u32) -> usize + Send,
{
    let mut state = ScrollState::new(pacing);
    let mut summary = ScrollSummary {
        iterations: 0,
        exhausted: false,
    };

    for depth in 1..=max_depth {
        if cancel.is_cancelled() {
            break;
        }
        summary.iterations = depth;

        let wait_ms = state.budget(pacing);
        let value = page.evaluate(&scroll_script(selector, wait_ms)).await?;
        let height = height_of(&value, selector)?;

        let html = page.content().await?;
        let new_items = extract(&String::from_utf8_lossy(&html), depth);
        debug!(depth, height, new_items, wait_ms, "scroll iteration");

        if state.observe(pacing, height, new_items) {
            summary.exhausted = true;
            break;
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(pacing.iteration_pause) => {}
        }
    }

    Ok(summary)
}
