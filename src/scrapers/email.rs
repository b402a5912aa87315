use super::traits::{CrawlContext, Job, JobOutput, PageAutomation};
use crate::error::{CrawlError, Result};
use crate::models::Listing;
use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::{debug, info};

const MAX_EMAILS_PER_PAGE: usize = 50;

static EMAIL_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").ok());

static STRICT_EMAIL_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}$").ok());

const FALSE_POSITIVES: [&str; 21] = [
    "@example.com",
    "@test.com",
    "@localhost",
    "@sentry.io",
    "@wixpress.com",
    "@email.com",
    "@domain.com",
    "@yourdomain",
    "@placeholder",
    "noreply@",
    "no-reply@",
    "donotreply@",
    "mailer-daemon@",
    "postmaster@",
    "@2x.",
    "@3x.",
    ".png",
    ".jpg",
    ".gif",
    ".svg",
    ".webp",
];

/// Visits a listing's website and collects contact addresses
pub struct EmailJob {
    listing: Listing,
}

impl EmailJob {
    pub fn new(listing: Listing) -> Self {
        Self { listing }
    }
}

#[async_trait]
impl Job for EmailJob {
    fn id(&self) -> &str {
        &self.listing.website
    }

    fn url(&self) -> String {
        self.listing.website.clone()
    }

    async fn run(&self, page: &dyn PageAutomation, ctx: &CrawlContext) -> Result<JobOutput> {
        let mut listing = self.listing.clone();

        match fetch_page(page, &listing.website).await {
            Ok(html) => {
                listing.emails = extract_emails(&html);
                info!(title = %listing.title, count = listing.emails.len(), "email extraction finished");
            }
            // The listing is still worth keeping without contacts
            Err(e) => debug!(url = %listing.website, "email extraction skipped: {}", e),
        }

        if let Some(monitor) = &ctx.exit_monitor {
            monitor.incr_places_completed(1);
        }
        Ok(JobOutput::listing(listing))
    }
}

async fn fetch_page(page: &dyn PageAutomation, url: &str) -> Result<String> {
    let response = page.navigate(url).await?;
    if let Some(status) = response.status.filter(|s| *s >= 400) {
        return Err(CrawlError::Navigation(format!("status code {status}")));
    }
    let body = page.content().await?;
    Ok(String::from_utf8_lossy(&body).into_owned())
}

/// `mailto:` links first; a plain-text scan only when there are none
pub fn extract_emails(html: &str) -> Vec<String> {
    let emails = mailto_emails(html);
    if !emails.is_empty() {
        return emails;
    }
    text_emails(html)
}

fn mailto_emails(html: &str) -> Vec<String> {
    let Ok(selector) = Selector::parse("a[href^='mailto:']") else {
        return Vec::new();
    };
    let Some(strict) = STRICT_EMAIL_RE.as_ref() else {
        return Vec::new();
    };

    let document = Html::parse_document(html);
    let candidates = document
        .select(&selector)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| href.strip_prefix("mailto:"))
        .map(|value| value.split('?').next().unwrap_or_default().trim().to_string())
        .filter(|email| strict.is_match(email));

    keep_plausible(candidates)
}

fn text_emails(html: &str) -> Vec<String> {
    let Some(re) = EMAIL_RE.as_ref() else {
        return Vec::new();
    };
    keep_plausible(re.find_iter(html).map(|m| m.as_str().to_string()))
}

fn keep_plausible(candidates: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    candidates
        .filter(|email| is_likely_real_email(email))
        .filter(|email| seen.insert(email.clone()))
        .take(MAX_EMAILS_PER_PAGE)
        .collect()
}

/// Rejects placeholders, asset names and hash-like local parts
pub fn is_likely_real_email(email: &str) -> bool {
    let email = email.to_lowercase();
    if FALSE_POSITIVES.iter().any(|p| email.contains(p)) {
        return false;
    }

    let Some((local, _domain)) = email.split_once('@') else {
        return false;
    };
    if local.len() > 64 {
        return false;
    }
    !(local.len() > 8 && local.chars().all(|c| c.is_ascii_hexdigit()))
}
