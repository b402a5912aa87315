use super::traits::{NavigateResponse, PageAutomation, PageFactory};
use crate::error::{CrawlError, Result};
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Chrome closes itself after this long without a command
const IDLE_BROWSER_TIMEOUT: Duration = Duration::from_secs(30 * 60);

const NAVIGATION_STATUS_SCRIPT: &str = r#"(() => {
    const entry = performance.getEntriesByType('navigation')[0];
    return entry && entry.responseStatus ? entry.responseStatus : 0;
})()"#;

/// Launches one headless Chrome and opens a tab per worker
pub struct ChromePageFactory {
    browser: Arc<Browser>,
}

impl ChromePageFactory {
    pub fn launch(headless: bool) -> Result<Self> {
        info!(headless, "launching Chrome");

        let options = LaunchOptions::default_builder()
            .headless(headless)
            .idle_browser_timeout(IDLE_BROWSER_TIMEOUT)
            .build()
            .map_err(|e| CrawlError::Browser(format!("invalid launch options: {e}")))?;

        let browser = Browser::new(options).map_err(|e| CrawlError::Browser(format!("failed to launch Chrome: {e}")))?;
        Ok(Self {
            browser: Arc::new(browser),
        })
    }
}

#[async_trait]
impl PageFactory for ChromePageFactory {
    async fn new_page(&self) -> Result<Box<dyn PageAutomation>> {
        let browser = self.browser.clone();
        let tab = tokio::task::spawn_blocking(move || browser.new_tab())
            .await
            .map_err(|e| CrawlError::Browser(format!("browser task failed: {e}")))?
            .map_err(|e| CrawlError::Browser(format!("failed to open tab: {e}")))?;

        debug!("opened new tab");
        Ok(Box::new(ChromePage { tab }))
    }
}

/// One Chrome tab. The DevTools client blocks, so every call runs on the
/// blocking pool.
pub struct ChromePage {
    tab: Arc<Tab>,
}

impl ChromePage {
    async fn blocking<T, F>(&self, f: F) -> std::result::Result<T, String>
    where
        F: FnOnce(&Tab) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let tab = self.tab.clone();
        tokio::task::spawn_blocking(move || f(&tab))
            .await
            .map_err(|e| format!("browser task failed: {e}"))?
            .map_err(|e| e.to_string())
    }
}

#[async_trait]
impl PageAutomation for ChromePage {
    async fn navigate(&self, url: &str) -> Result<NavigateResponse> {
        let target = url.to_string();
        let final_url = self
            .blocking(move |tab| {
                tab.navigate_to(&target)?;
                tab.wait_until_navigated()?;
                Ok(tab.get_url())
            })
            .await
            .map_err(|e| CrawlError::Navigation(format!("{url}: {e}")))?;

        let status = self
            .evaluate(NAVIGATION_STATUS_SCRIPT)
            .await
            .ok()
            .and_then(|v| v.as_u64())
            .and_then(|s| u16::try_from(s).ok())
            .filter(|s| *s > 0);

        Ok(NavigateResponse { status, final_url })
    }

    async fn evaluate(&self, script: &str) -> Result<Value> {
        let script = script.to_string();
        let object = self
            .blocking(move |tab| tab.evaluate(&script, true))
            .await
            .map_err(CrawlError::Browser)?;
        Ok(object.value.unwrap_or(Value::Null))
    }

    async fn wait_for_selector(&self, selector: &str, timeout_ms: u64) -> Result<bool> {
        let selector = selector.to_string();
        let found = self
            .blocking(move |tab| {
                Ok(tab
                    .wait_for_element_with_custom_timeout(&selector, Duration::from_millis(timeout_ms))
                    .is_ok())
            })
            .await
            .map_err(CrawlError::Browser)?;
        Ok(found)
    }

    async fn content(&self) -> Result<Vec<u8>> {
        let html = self
            .blocking(|tab| tab.get_content())
            .await
            .map_err(CrawlError::Browser)?;
        Ok(html.into_bytes())
    }

    async fn click(&self, selector: &str) -> Result<()> {
        let target = selector.to_string();
        self.blocking(move |tab| {
            tab.find_element(&target)?.click()?;
            Ok(())
        })
        .await
        .map_err(|e| CrawlError::ElementNotFound(format!("{selector}: {e}")))
    }

    async fn current_url(&self) -> Result<String> {
        self.blocking(|tab| Ok(tab.get_url()))
            .await
            .map_err(CrawlError::Browser)
    }
}
