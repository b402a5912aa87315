#![allow(dead_code)]

pub mod api;

use async_trait::async_trait;
use maps_scout::error::{CrawlError, Result};
use maps_scout::scrapers::place::PAYLOAD_SCRIPT;
use maps_scout::scrapers::traits::{NavigateResponse, PageAutomation, PageFactory};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// What a scripted page answers
#[derive(Debug, Clone, Default)]
pub struct PageScript {
    pub feed_present: bool,
    /// Navigating to the key lands on the value
    pub redirects: HashMap<String, String>,
    /// Scroll height per scroll call; the last one repeats, empty means 1000
    pub heights: Vec<i64>,
    /// Feed HTML after each scroll call; the last one repeats
    pub feed_pages: Vec<String>,
    /// Raw listing payload per listing URL
    pub payloads: HashMap<String, String>,
    /// Status and HTML per ordinary website
    pub sites: HashMap<String, (u16, String)>,
    /// Review RPC responses in request order; past the end the fetch fails
    pub review_pages: Vec<String>,
    /// How long the feed wait takes before answering
    pub feed_delay: Option<Duration>,
}

#[derive(Debug, Default)]
struct PageState {
    url: String,
    scrolls: usize,
    review_requests: Vec<String>,
}

pub struct FakePage {
    script: Arc<PageScript>,
    state: Mutex<PageState>,
    pub navigations: Arc<Mutex<Vec<String>>>,
}

impl FakePage {
    pub fn new(script: PageScript) -> Self {
        Self::shared(Arc::new(script), Arc::new(Mutex::new(Vec::new())))
    }

    fn shared(script: Arc<PageScript>, navigations: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            script,
            state: Mutex::new(PageState::default()),
            navigations,
        }
    }

    pub fn scrolls(&self) -> usize {
        self.state.lock().scrolls
    }

    pub fn review_requests(&self) -> Vec<String> {
        self.state.lock().review_requests.clone()
    }
}

fn nth_or_last<T: Clone>(items: &[T], n: usize) -> Option<T> {
    items.get(n).or_else(|| items.last()).cloned()
}

#[async_trait]
impl PageAutomation for FakePage {
    async fn navigate(&self, url: &str) -> Result<NavigateResponse> {
        self.navigations.lock().push(url.to_string());
        let landed = self.script.redirects.get(url).cloned().unwrap_or_else(|| url.to_string());
        let status = self.script.sites.get(&landed).map(|(s, _)| *s).unwrap_or(200);

        let mut state = self.state.lock();
        state.url = landed.clone();
        state.scrolls = 0;
        Ok(NavigateResponse {
            status: Some(status),
            final_url: landed,
        })
    }

    async fn evaluate(&self, script: &str) -> Result<Value> {
        let mut state = self.state.lock();
        if script.contains("scrollTop") {
            let height = nth_or_last(&self.script.heights, state.scrolls).unwrap_or(1000);
            state.scrolls += 1;
            return Ok(json!(height));
        }
        if script.contains("listugcposts") {
            let n = state.review_requests.len();
            state.review_requests.push(script.to_string());
            return Ok(self.script.review_pages.get(n).cloned().map(Value::String).unwrap_or(Value::Null));
        }
        if script == PAYLOAD_SCRIPT {
            return Ok(self
                .script
                .payloads
                .get(&state.url)
                .map(|p| Value::String(p.clone()))
                .unwrap_or(Value::Null));
        }
        Ok(Value::Null)
    }

    async fn wait_for_selector(&self, _selector: &str, _timeout_ms: u64) -> Result<bool> {
        if let Some(delay) = self.script.feed_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.script.feed_present)
    }

    async fn content(&self) -> Result<Vec<u8>> {
        let state = self.state.lock();
        if let Some((_, html)) = self.script.sites.get(&state.url) {
            return Ok(html.clone().into_bytes());
        }
        let page = nth_or_last(&self.script.feed_pages, state.scrolls.saturating_sub(1)).unwrap_or_default();
        Ok(page.into_bytes())
    }

    async fn click(&self, selector: &str) -> Result<()> {
        Err(CrawlError::ElementNotFound(selector.to_string()))
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.state.lock().url.clone())
    }
}

/// Hands out pages that all follow one script
pub struct FakeFactory {
    script: Arc<PageScript>,
    pub opened: AtomicUsize,
    pub navigations: Arc<Mutex<Vec<String>>>,
}

impl FakeFactory {
    pub fn new(script: PageScript) -> Self {
        Self {
            script: Arc::new(script),
            opened: AtomicUsize::new(0),
            navigations: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn navigated(&self) -> Vec<String> {
        self.navigations.lock().clone()
    }
}

#[async_trait]
impl PageFactory for FakeFactory {
    async fn new_page(&self) -> Result<Box<dyn PageAutomation>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakePage::shared(self.script.clone(), self.navigations.clone())))
    }
}

pub fn place_url(name: &str) -> String {
    format!("https://www.google.com/maps/place/{name}")
}

/// Feed markup with one result card per name
pub fn feed_html(names: &[&str]) -> String {
    let cards: String = names
        .iter()
        .map(|n| format!(r#"<div jsaction="card"><a href="{}">{n}</a></div>"#, place_url(n)))
        .collect();
    format!(r#"<html><body><div role="feed">{cards}</div></body></html>"#)
}

/// Minimal prefixed listing document
pub fn place_payload(title: &str, category: &str, lat: f64, lon: f64, website: &str) -> String {
    reviewed_place_payload(title, category, lat, lon, website, 3)
}

pub fn reviewed_place_payload(title: &str, category: &str, lat: f64, lon: f64, website: &str, reviews: i64) -> String {
    let mut payload = vec![Value::Null; 28];
    payload[4] = json!([null, null, null, null, null, null, null, 4.2, reviews]);
    payload[7] = json!([website]);
    payload[9] = json!([null, null, lat, lon]);
    payload[11] = json!(title);
    payload[13] = json!([category]);
    payload[27] = json!(place_url(title));

    let mut doc = vec![Value::Null; 7];
    doc[6] = Value::Array(payload);
    format!(")]}}'\n{}", Value::Array(doc))
}

/// One prefixed review RPC page with a review per name
pub fn review_page(next_token: Option<&str>, names: &[&str]) -> String {
    let reviews: Vec<Value> = names
        .iter()
        .map(|name| json!([[null, [null, null, null, null, [null, null, null, null, null, [name]]]]]))
        .collect();
    format!(")]}}'\n{}", json!([null, next_token, reviews]))
}
