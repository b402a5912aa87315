//! Review pagination through the listing's own tab.
//!
//! The first reviews ship with the listing payload. Later pages come from
//! the review RPC endpoint, fetched in-page so they carry the tab's cookies.
//! Each response names the token for the next page at index 1.

use super::traits::{PageAutomation, ReviewPager};
use crate::error::{CrawlError, Result};
use crate::parser::strip_security_prefix;
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use tracing::debug;

const REVIEWS_RPC_URL: &str = "https://www.google.com/maps/rpc/listugcposts";
pub const REVIEWS_PER_PAGE: i64 = 20;
const DEFAULT_MAX_PAGES: usize = 50;

static FEATURE_ID_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"!1s(0x[0-9a-fA-F]+:0x[0-9a-fA-F]+)").ok());

/// Listing feature id (`0x…:0x…`) embedded in a listing URL
pub fn feature_id(url: &str) -> Option<String> {
    let re = FEATURE_ID_RE.as_ref()?;
    re.captures(url).map(|c| c[1].to_string())
}

pub fn review_page_url(feature_id: &str, token: &str, lang: &str) -> String {
    let token: String = url::form_urlencoded::byte_serialize(token.as_bytes()).collect();
    format!(
        "{REVIEWS_RPC_URL}?authuser=0&hl={lang}&pb=!1m6!1s{feature_id}!6m4!4m1!1e1!4m1!1e3!2m2!1i{REVIEWS_PER_PAGE}!2s{token}!5m2!1s0!7e81!8m5!1b1!2b1!3b1!5b1!7b1!11m6!1e3!2e1!3s{lang}!4slk!6m1!1i2!13m1!1e1"
    )
}

/// Continuation token of a review page; `None` on the last page
pub fn next_page_token(raw: &[u8]) -> Option<String> {
    let document: Value = serde_json::from_slice(strip_security_prefix(raw)).ok()?;
    document
        .get(1)
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

fn fetch_script(url: &str) -> String {
    let quoted = Value::String(url.to_string()).to_string();
    format!("fetch({quoted}).then(r => r.ok ? r.text() : '').catch(() => '')")
}

/// Fetches review pages with the browser tab the listing is open in
pub struct BrowserReviewPager {
    lang: String,
    max_pages: usize,
}

impl BrowserReviewPager {
    pub fn new(lang: impl Into<String>) -> Self {
        Self {
            lang: lang.into(),
            max_pages: DEFAULT_MAX_PAGES,
        }
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    fn pages_for(&self, review_count: i64) -> usize {
        let pages = (review_count.max(1) + REVIEWS_PER_PAGE - 1) / REVIEWS_PER_PAGE;
        usize::try_from(pages).unwrap_or(usize::MAX).min(self.max_pages)
    }
}

#[async_trait]
impl ReviewPager for BrowserReviewPager {
    async fn fetch_pages(&self, page: &dyn PageAutomation, review_count: i64) -> Result<Vec<Vec<u8>>> {
        let url = page.current_url().await?;
        let feature_id =
            feature_id(&url).ok_or_else(|| CrawlError::ElementNotFound(format!("no feature id in {url}")))?;

        let wanted = self.pages_for(review_count);
        let mut pages = Vec::new();
        let mut token = String::new();

        while pages.len() < wanted {
            let script = fetch_script(&review_page_url(&feature_id, &token, &self.lang));
            let body = match page.evaluate(&script).await? {
                Value::String(body) if !body.is_empty() => body,
                _ => break,
            };

            let next = next_page_token(body.as_bytes());
            pages.push(body.into_bytes());
            match next {
                Some(next) => token = next,
                None => break,
            }
        }

        debug!(feature_id = %feature_id, pages = pages.len(), wanted, "review pages fetched");
        Ok(pages)
    }
}
