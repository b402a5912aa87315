//! Scroll-and-extract crawl job.
//!
//! One job type serves both full-text searches and proximity searches. A
//! full-text search may be redirected straight to a single listing, so it
//! first races a feed probe against the page URL; proximity searches always
//! render a feed.

use super::place::PlaceJob;
use super::scroll::{scroll_feed, ScrollPacing};
use super::traits::{CrawlContext, Job, JobOptions, JobOutput, PageAutomation};
use crate::error::{CrawlError, Result};
use crate::geo::{zoom_to_meters, Point};
use async_trait::async_trait;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

pub const FEED_SELECTOR: &str = "div[role='feed']";
pub const CONSENT_SELECTOR: &str = r#"form[action="https://consent.google.com/save"] input[type="submit"]"#;
pub const SINGLE_LISTING_MARKER: &str = "/maps/place/";

const FEED_LINK_SELECTOR: &str = "div[role=feed] div[jsaction]>a";
/// Result cards sometimes render without `jsaction` wrappers; any listing
/// anchor on the page is the next best source
const FALLBACK_LINK_SELECTOR: &str = "a[href*='/maps/place/']";

const FEED_PROBE_MS: u64 = 700;
const URL_POLL_INTERVAL: Duration = Duration::from_millis(150);
const URL_POLL_LIMIT: Duration = Duration::from_secs(5);
const PROXIMITY_FEED_TIMEOUT_MS: u64 = 15_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    FullText,
    Proximity,
}

/// Which layout the search page settled on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Landing {
    Feed,
    SingleResult(String),
}

/// Full-text or proximity search over the results feed
pub struct SearchJob {
    id: String,
    query: String,
    center: Point,
    zoom: u8,
    max_depth: u32,
    mode: SearchMode,
    options: JobOptions,
    pacing: ScrollPacing,
}

impl SearchJob {
    pub fn full_text(
        id: impl Into<String>,
        query: impl Into<String>,
        center: Point,
        zoom: u8,
        max_depth: u32,
        options: JobOptions,
    ) -> Self {
        Self {
            id: id.into(),
            query: query.into(),
            center,
            zoom,
            max_depth,
            mode: SearchMode::FullText,
            options,
            pacing: ScrollPacing::default(),
        }
    }

    pub fn proximity(
        id: impl Into<String>,
        category: impl Into<String>,
        center: Point,
        zoom: u8,
        max_depth: u32,
        options: JobOptions,
    ) -> Self {
        Self {
            mode: SearchMode::Proximity,
            ..Self::full_text(id, category, center, zoom, max_depth, options)
        }
    }

    pub fn with_pacing(mut self, pacing: ScrollPacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn mode(&self) -> SearchMode {
        self.mode
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn center(&self) -> Point {
        self.center
    }

    pub fn search_url(&self) -> String {
        match self.mode {
            SearchMode::FullText => full_search_url(&self.query, self.center, self.zoom, &self.options.lang),
            SearchMode::Proximity => proximity_url(
                &self.query,
                self.center,
                zoom_to_meters(self.zoom, self.center.lat),
                &self.options.lang,
            ),
        }
    }

    fn place_job(&self, link: String) -> Box<dyn Job> {
        Box::new(PlaceJob::new(self.id.clone(), link, self.options.clone()).with_pacing(self.pacing.clone()))
    }

    /// Scroll the feed, streaming newly seen links through a channel owned
    /// by this job
    async fn collect_feed_links(&self, page: &dyn PageAutomation, ctx: &CrawlContext) -> Result<Vec<String>> {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let mut seen = HashSet::new();

        let summary = scroll_feed(page, FEED_SELECTOR, self.max_depth, &self.pacing, &ctx.cancel, |html, depth| {
            let mut fresh = 0;
            for link in extract_place_links(html) {
                if seen.insert(link.clone()) {
                    fresh += 1;
                    let _ = tx.send(link);
                }
            }
            if fresh > 0 {
                info!(job = %self.id, depth, new = fresh, total = seen.len(), "found new places");
            }
            fresh
        })
        .await?;

        let mut links = Vec::new();
        while let Ok(link) = rx.try_recv() {
            links.push(link);
        }

        debug!(
            job = %self.id,
            iterations = summary.iterations,
            exhausted = summary.exhausted,
            links = links.len(),
            "scroll finished"
        );
        Ok(links)
    }
}

#[async_trait]
impl Job for SearchJob {
    fn id(&self) -> &str {
        &self.id
    }

    fn url(&self) -> String {
        self.search_url()
    }

    async fn run(&self, page: &dyn PageAutomation, ctx: &CrawlContext) -> Result<JobOutput> {
        let url = self.search_url();
        info!(job = %self.id, query = %self.query, mode = ?self.mode, "opening {}", url);

        page.navigate(&url).await?;
        dismiss_consent(page).await;

        let landing = match self.mode {
            SearchMode::FullText => {
                tokio::select! {
                    _ = ctx.cancel.cancelled() => return Err(CrawlError::Cancelled),
                    landing = detect_landing(page) => landing?,
                }
            }
            SearchMode::Proximity => {
                tokio::select! {
                    _ = ctx.cancel.cancelled() => return Err(CrawlError::Cancelled),
                    _ = tokio::time::sleep(self.pacing.proximity_settle) => {}
                }
                let found = tokio::select! {
                    _ = ctx.cancel.cancelled() => return Err(CrawlError::Cancelled),
                    found = page.wait_for_selector(FEED_SELECTOR, PROXIMITY_FEED_TIMEOUT_MS) => found?,
                };
                if !found {
                    return Err(CrawlError::ElementNotFound(format!(
                        "results feed not found: {FEED_SELECTOR}"
                    )));
                }
                Landing::Feed
            }
        };

        let links = match landing {
            Landing::SingleResult(url) => {
                info!(job = %self.id, "search resolved to a single listing");
                vec![url]
            }
            Landing::Feed => self.collect_feed_links(page, ctx).await?,
        };

        let children: Vec<Box<dyn Job>> = links
            .into_iter()
            .filter(|link| ctx.deduper.add_if_not_exists(link))
            .map(|link| self.place_job(link))
            .collect();

        if let Some(monitor) = &ctx.exit_monitor {
            monitor.incr_places_found(children.len());
            monitor.incr_seed_completed(1);
        }

        info!(job = %self.id, "{} places found", children.len());
        Ok(JobOutput::children(children))
    }
}

/// Best effort: a missing or unclickable consent form is ignored
pub async fn dismiss_consent(page: &dyn PageAutomation) {
    if let Err(e) = page.click(CONSENT_SELECTOR).await {
        debug!("no consent dialog dismissed: {}", e);
    }
}

/// Race the feed probe against the URL poller. The first positive answer
/// wins; when both come back negative the page is treated as a feed.
pub async fn detect_landing(page: &dyn PageAutomation) -> Result<Landing> {
    let feed_probe = page.wait_for_selector(FEED_SELECTOR, FEED_PROBE_MS);
    let url_poll = poll_for_single_listing(page);

    tokio::select! {
        Ok(true) = feed_probe => Ok(Landing::Feed),
        Some(url) = url_poll => Ok(Landing::SingleResult(url)),
        else => Ok(Landing::Feed),
    }
}

async fn poll_for_single_listing(page: &dyn PageAutomation) -> Option<String> {
    let deadline = tokio::time::Instant::now() + URL_POLL_LIMIT;
    let mut ticker = tokio::time::interval(URL_POLL_INTERVAL);

    while tokio::time::Instant::now() < deadline {
        ticker.tick().await;
        if let Ok(url) = page.current_url().await {
            if url.contains(SINGLE_LISTING_MARKER) {
                return Some(url);
            }
        }
    }
    None
}

/// Listing links rendered in the feed; falls back to any listing anchor
/// when the feed layout is not recognized
pub fn extract_place_links(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);

    let mut links = hrefs(&document, FEED_LINK_SELECTOR);
    if links.is_empty() {
        links = hrefs(&document, FALLBACK_LINK_SELECTOR);
    }
    links
}

fn hrefs(document: &Html, selector: &str) -> Vec<String> {
    let Ok(selector) = Selector::parse(selector) else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    document
        .select(&selector)
        .filter_map(|el| el.value().attr("href"))
        .filter(|href| !href.is_empty())
        .filter(|href| seen.insert(*href))
        .map(str::to_string)
        .collect()
}

fn escape(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

pub fn full_search_url(query: &str, center: Point, zoom: u8, lang: &str) -> String {
    format!(
        "https://www.google.com/maps/search/{}/@{},{},{}z?hl={}",
        escape(query),
        center.lat,
        center.lon,
        zoom,
        lang
    )
}

pub fn proximity_url(category: &str, center: Point, zoom_meters: u32, lang: &str) -> String {
    let cat = escape(category);
    let (lat, lon) = (center.lat, center.lon);
    format!(
        "https://www.google.com/maps/search/{cat}/@{lat:.6},{lon:.6},{zoom_meters}m/data=!3m1!1e3!4m7!2m6!3m5!1s{cat}!2s{lat:.7},+{lon:.7}!4m2!1d{lon:.7}!2d{lat:.7}?hl={lang}"
    )
}
