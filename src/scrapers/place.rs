use super::email::EmailJob;
use super::places_api::PlacesClient;
use super::scroll::ScrollPacing;
use super::search::dismiss_consent;
use super::traits::{CrawlContext, Job, JobOptions, JobOutput, PageAutomation};
use crate::error::{CrawlError, Result};
use crate::geo::distance;
use crate::models::Listing;
use crate::parser::{parse_listing, parse_review_count};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

const PAYLOAD_ATTEMPTS: u32 = 10;
const EXTRA_REVIEWS_MIN_COUNT: i64 = 8;

/// Pulls the raw listing payload out of the page's initialization state.
/// Prefers the well-known slot and falls back to the longest prefixed string.
pub const PAYLOAD_SCRIPT: &str = r#"(() => {
    const state = window.APP_INITIALIZATION_STATE;
    if (!Array.isArray(state)) return null;
    const prefixed = (s) => typeof s === 'string' && s.trim().startsWith(")]}'");
    try {
        const slot = state[3];
        const key = slot && Object.keys(slot)[0];
        const data = key && slot[key] && slot[key][6];
        if (prefixed(data) && data.length > 100) return data;
    } catch (e) {}
    let best = null;
    for (const entry of state) {
        if (!entry || typeof entry !== 'object') continue;
        const key = Object.keys(entry)[0];
        if (!key || !Array.isArray(entry[key])) continue;
        for (const data of entry[key]) {
            if (prefixed(data) && data.length > 1000 && (!best || data.length > best.length)) {
                best = data;
            }
        }
    }
    return best;
})()"#;

/// Detail job for one listing link
pub struct PlaceJob {
    parent_id: String,
    link: String,
    options: JobOptions,
    pacing: ScrollPacing,
}

impl PlaceJob {
    pub fn new(parent_id: impl Into<String>, link: impl Into<String>, options: JobOptions) -> Self {
        Self {
            parent_id: parent_id.into(),
            link: link.into(),
            options,
            pacing: ScrollPacing::default(),
        }
    }

    pub fn with_pacing(mut self, pacing: ScrollPacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn link(&self) -> &str {
        &self.link
    }

    async fn fetch_payload(&self, page: &dyn PageAutomation, ctx: &CrawlContext) -> Result<String> {
        for attempt in 1..=PAYLOAD_ATTEMPTS {
            match page.evaluate(PAYLOAD_SCRIPT).await {
                Ok(Value::String(raw)) if !raw.is_empty() => return Ok(raw),
                Ok(_) => debug!(attempt, "listing payload not populated yet"),
                Err(e) => debug!(attempt, "payload script failed: {}", e),
            }

            tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(CrawlError::Cancelled),
                _ = tokio::time::sleep(self.pacing.payload_retry) => {}
            }
        }

        Err(CrawlError::PayloadUnavailable(format!(
            "not populated after {PAYLOAD_ATTEMPTS} attempts: {}",
            self.link
        )))
    }

    async fn enrich_place_id(&self, listing: &mut Listing, client: &PlacesClient) {
        let query = if listing.address.is_empty() {
            listing.title.clone()
        } else {
            format!("{} {}", listing.title, listing.address)
        };

        match client.find_place_id(&query).await {
            Ok(Some(id)) => {
                listing.place_id_url = place_id_url(&listing.title, &id);
                listing.place_id = id;
            }
            Ok(None) => debug!("no place id found for '{}'", query),
            Err(e) => warn!("place id lookup failed for '{}': {}", query, e),
        }
    }

    /// Later review pages, fetched before the full decode while the tab
    /// still shows the listing
    async fn extra_review_pages(&self, page: &dyn PageAutomation, raw: &str, ctx: &CrawlContext) -> Vec<Vec<u8>> {
        if !self.options.extra_reviews {
            return Vec::new();
        }
        let Some(pager) = &ctx.review_pager else {
            return Vec::new();
        };

        let review_count = match parse_review_count(raw.as_bytes()) {
            Ok(count) => count,
            Err(e) => {
                debug!("review count unavailable: {}", e);
                return Vec::new();
            }
        };
        if review_count <= EXTRA_REVIEWS_MIN_COUNT {
            return Vec::new();
        }

        match pager.fetch_pages(page, review_count).await {
            Ok(pages) => pages,
            Err(e) => {
                warn!(link = %self.link, "extra reviews unavailable: {}", e);
                Vec::new()
            }
        }
    }

    fn completed(&self, ctx: &CrawlContext) {
        if let Some(monitor) = &ctx.exit_monitor {
            monitor.incr_places_completed(1);
        }
    }
}

#[async_trait]
impl Job for PlaceJob {
    fn id(&self) -> &str {
        &self.link
    }

    fn url(&self) -> String {
        self.link.clone()
    }

    async fn run(&self, page: &dyn PageAutomation, ctx: &CrawlContext) -> Result<JobOutput> {
        page.navigate(&self.link).await?;
        dismiss_consent(page).await;

        if page.current_url().await?.contains("consent.google.com") {
            debug!("redirected to consent page, retrying {}", self.link);
            dismiss_consent(page).await;
            page.navigate(&self.link).await?;
        }

        let raw = self.fetch_payload(page, ctx).await?;
        let extra_reviews = self.extra_review_pages(page, &raw, ctx).await;
        let mut listing = parse_listing(raw.as_bytes())?;

        listing.id = self.parent_id.clone();
        if listing.link.is_empty() {
            listing.link = self.link.clone();
        }
        if let Some(id) = place_id_from_link(&listing.link) {
            listing.place_id_url = place_id_url(&listing.title, &id);
            listing.place_id = id;
        }

        if let Some(client) = ctx.places.as_deref() {
            if listing.place_id.is_empty() {
                self.enrich_place_id(&mut listing, client).await;
            }
        }

        if let Some((center, radius)) = self.options.radius_filter {
            if distance(listing.coordinates(), center) > radius {
                debug!(title = %listing.title, "outside search radius, dropped");
                self.completed(ctx);
                return Ok(JobOutput::default());
            }
        }

        if !extra_reviews.is_empty() {
            listing.add_extra_reviews(&extra_reviews);
        }

        if self.options.extract_email && listing.is_website_valid_for_email() {
            return Ok(JobOutput::children(vec![Box::new(EmailJob::new(listing))]));
        }

        info!(title = %listing.title, category = %listing.category, "listing extracted");
        self.completed(ctx);
        Ok(JobOutput::listing(listing))
    }

    fn on_give_up(&self, ctx: &CrawlContext) {
        self.completed(ctx);
    }
}

/// Place id embedded in a listing link as `place_id:<id>` or
/// `query_place_id=<id>`
pub fn place_id_from_link(link: &str) -> Option<String> {
    if let Some(pos) = link.find("place_id:") {
        let id: String = link[pos + "place_id:".len()..]
            .chars()
            .take_while(|c| !matches!(c, '&' | '/' | '?' | '#'))
            .collect();
        return (!id.is_empty()).then_some(id);
    }

    Url::parse(link)
        .ok()?
        .query_pairs()
        .find(|(k, v)| k == "query_place_id" && !v.is_empty())
        .map(|(_, v)| v.into_owned())
}

pub fn place_id_url(title: &str, place_id: &str) -> String {
    let query: String = url::form_urlencoded::byte_serialize(title.as_bytes()).collect();
    format!("https://www.google.com/maps/search/?api=1&query={query}&query_place_id={place_id}")
}
