use super::places_api::PlacesClient;
use crate::error::Result;
use crate::geo::Point;
use crate::models::Listing;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Outcome of a page navigation
#[derive(Debug, Clone, Default)]
pub struct NavigateResponse {
    pub status: Option<u16>,
    pub final_url: String,
}

/// Browser page operations the crawl jobs drive
#[async_trait]
pub trait PageAutomation: Send + Sync {
    /// Navigate to a URL and wait for the DOM to load
    async fn navigate(&self, url: &str) -> Result<NavigateResponse>;

    /// Evaluate a script, awaiting a returned promise
    async fn evaluate(&self, script: &str) -> Result<Value>;

    /// Wait for a selector to appear. `Ok(false)` on timeout.
    async fn wait_for_selector(&self, selector: &str, timeout_ms: u64) -> Result<bool>;

    /// Rendered HTML of the current page
    async fn content(&self) -> Result<Vec<u8>>;

    /// Click the first element matching `selector`
    async fn click(&self, selector: &str) -> Result<()>;

    /// URL the page currently shows (after client-side redirects)
    async fn current_url(&self) -> Result<String>;
}

/// Hands out fresh pages to workers
#[async_trait]
pub trait PageFactory: Send + Sync {
    async fn new_page(&self) -> Result<Box<dyn PageAutomation>>;
}

/// Shared at-most-once set
pub trait Deduper: Send + Sync {
    /// True only the first time `key` is seen
    fn add_if_not_exists(&self, key: &str) -> bool;
}

/// Completion tracking that cancels the run once expected work is done
#[async_trait]
pub trait ExitMonitor: Send + Sync {
    fn set_seed_count(&self, n: usize);
    fn incr_seed_completed(&self, n: usize);
    fn incr_places_found(&self, n: usize);
    fn incr_places_completed(&self, n: usize);
    fn set_cancel(&self, token: CancellationToken);
    async fn run(&self, cancel: CancellationToken);
}

/// Downstream consumer of finished listings
pub trait ResultSink: Send + Sync {
    fn emit(&self, listing: Listing);
}

/// Fetches raw review-pagination payloads for the listing open in `page`
#[async_trait]
pub trait ReviewPager: Send + Sync {
    async fn fetch_pages(&self, page: &dyn PageAutomation, review_count: i64) -> Result<Vec<Vec<u8>>>;
}

/// Options a job passes on to the jobs it spawns
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    pub lang: String,
    pub extract_email: bool,
    pub extra_reviews: bool,
    /// Drop listings farther than `radius` meters from `center`
    pub radius_filter: Option<(Point, f64)>,
}

/// Collaborators shared by every job of a run
#[derive(Clone)]
pub struct CrawlContext {
    pub deduper: Arc<dyn Deduper>,
    pub exit_monitor: Option<Arc<dyn ExitMonitor>>,
    pub review_pager: Option<Arc<dyn ReviewPager>>,
    /// Structured search, used to fill in missing place ids
    pub places: Option<Arc<PlacesClient>>,
    pub cancel: CancellationToken,
}

impl CrawlContext {
    pub fn new(deduper: Arc<dyn Deduper>, cancel: CancellationToken) -> Self {
        Self {
            deduper,
            exit_monitor: None,
            review_pager: None,
            places: None,
            cancel,
        }
    }

    pub fn with_exit_monitor(mut self, monitor: Arc<dyn ExitMonitor>) -> Self {
        self.exit_monitor = Some(monitor);
        self
    }

    pub fn with_review_pager(mut self, pager: Arc<dyn ReviewPager>) -> Self {
        self.review_pager = Some(pager);
        self
    }

    pub fn with_places_client(mut self, client: Arc<PlacesClient>) -> Self {
        self.places = Some(client);
        self
    }
}

/// What a finished job hands back to the scheduler
#[derive(Default)]
pub struct JobOutput {
    pub listings: Vec<Listing>,
    pub children: Vec<Box<dyn Job>>,
}

impl JobOutput {
    pub fn listing(listing: Listing) -> Self {
        Self {
            listings: vec![listing],
            children: Vec::new(),
        }
    }

    pub fn children(children: Vec<Box<dyn Job>>) -> Self {
        Self {
            listings: Vec::new(),
            children,
        }
    }
}

/// One-shot acquisition unit run by the scheduler
#[async_trait]
pub trait Job: Send + Sync {
    fn id(&self) -> &str;

    /// Target URL, for logging
    fn url(&self) -> String;

    fn max_retries(&self) -> u32 {
        3
    }

    async fn run(&self, page: &dyn PageAutomation, ctx: &CrawlContext) -> Result<JobOutput>;

    /// Called once when every attempt failed
    fn on_give_up(&self, _ctx: &CrawlContext) {}
}
