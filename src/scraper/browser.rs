//! Browser automation using chromiumoxide.
//!
//! A [`BrowserSession`] is an expensive scoped resource: one session
//! serves one product's interactive extraction and is closed on every
//! exit path. Interaction failures degrade to whatever content has
//! been rendered so far; they never abort the caller's run.

use anyhow::Result;
use chromiumoxide::browser::{Browser as ChromeBrowser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::element::Element;
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::CartFlowConfig;

/// Settle delay after a successful load-more click
const SETTLE_DELAY: Duration = Duration::from_millis(2000);
/// Poll interval while waiting for a selector to appear
const WAIT_POLL: Duration = Duration::from_millis(250);
/// Iteration cap for the load-more loop
pub const MAX_LOAD_MORE_ROUNDS: u32 = 10;

/// Driver surface the interaction loops run against; production code
/// uses a live page, tests inject a fake.
#[allow(async_fn_in_trait)]
pub trait PageDriver {
    /// Scroll to the document bottom to trigger lazy loading
    async fn scroll_to_bottom(&mut self) -> Result<()>;
    /// Click the first element matching `selector`. Ok(false) means no
    /// such control exists; Err means it exists but would not interact.
    async fn try_click(&mut self, selector: &str) -> Result<bool>;
    /// Give the page time to render newly loaded content
    async fn settle(&mut self, duration: Duration);
    /// Snapshot the current DOM as HTML
    async fn html(&mut self) -> Result<String>;
}

/// Phases of the load-more interaction loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadMorePhase {
    Idle,
    Scrolling,
    ClickingLoadMore,
    Extracting,
    Done,
}

/// Bounded scroll/click loop for listings that reveal items through a
/// "load more" control. Runs until no control is found or the round
/// cap is reached, then snapshots whatever has been rendered.
pub struct LoadMoreLoop<'a> {
    selectors: &'a [String],
    max_rounds: u32,
}

impl<'a> LoadMoreLoop<'a> {
    pub fn new(selectors: &'a [String]) -> Self {
        Self {
            selectors,
            max_rounds: MAX_LOAD_MORE_ROUNDS,
        }
    }

    #[cfg(test)]
    fn with_max_rounds(selectors: &'a [String], max_rounds: u32) -> Self {
        Self {
            selectors,
            max_rounds,
        }
    }

    /// Drive the loop to completion and return the final DOM snapshot
    pub async fn run<D: PageDriver>(&self, driver: &mut D) -> Result<String> {
        let mut phase = LoadMorePhase::Idle;
        let mut rounds = 0u32;
        let mut snapshot = None;

        while phase != LoadMorePhase::Done {
            phase = match phase {
                LoadMorePhase::Idle => LoadMorePhase::Scrolling,
                LoadMorePhase::Scrolling => {
                    if let Err(e) = driver.scroll_to_bottom().await {
                        warn!("scroll failed, extracting what rendered: {}", e);
                        LoadMorePhase::Extracting
                    } else {
                        LoadMorePhase::ClickingLoadMore
                    }
                }
                LoadMorePhase::ClickingLoadMore => {
                    if rounds >= self.max_rounds {
                        debug!("load-more cap reached after {} rounds", rounds);
                        LoadMorePhase::Extracting
                    } else if self.click_any(driver).await {
                        rounds += 1;
                        driver.settle(SETTLE_DELAY).await;
                        LoadMorePhase::Scrolling
                    } else {
                        LoadMorePhase::Extracting
                    }
                }
                LoadMorePhase::Extracting => {
                    snapshot = Some(driver.html().await?);
                    debug!("load-more loop finished after {} rounds", rounds);
                    LoadMorePhase::Done
                }
                LoadMorePhase::Done => LoadMorePhase::Done,
            };
        }

        snapshot.ok_or_else(|| anyhow::anyhow!("load-more loop produced no snapshot"))
    }

    /// Try each candidate control in order; the first click wins.
    /// A control that errors is skipped, not fatal.
    async fn click_any<D: PageDriver>(&self, driver: &mut D) -> bool {
        for selector in self.selectors {
            match driver.try_click(selector).await {
                Ok(true) => {
                    debug!("clicked load-more control: {}", selector);
                    return true;
                }
                Ok(false) => continue,
                Err(e) => {
                    warn!("load-more control '{}' would not click: {}", selector, e);
                    continue;
                }
            }
        }
        false
    }
}

/// A live chromiumoxide page implementing the driver surface
pub struct LivePage<'a> {
    page: &'a Page,
}

impl PageDriver for LivePage<'_> {
    async fn scroll_to_bottom(&mut self) -> Result<()> {
        self.page
            .evaluate("window.scrollTo(0, document.body.scrollHeight)")
            .await
            .map_err(|e| anyhow::anyhow!("scroll failed: {}", e))?;
        Ok(())
    }

    async fn try_click(&mut self, selector: &str) -> Result<bool> {
        let Ok(element) = self.page.find_element(selector).await else {
            return Ok(false);
        };
        click_element(self.page, &element, selector).await?;
        Ok(true)
    }

    async fn settle(&mut self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    async fn html(&mut self) -> Result<String> {
        self.page
            .content()
            .await
            .map_err(|e| anyhow::anyhow!("failed to get page content: {}", e))
    }
}

/// Click an element, attempting in order: native click, scroll into
/// view then click, script-dispatched click. The first method that
/// does not raise wins.
async fn click_element(page: &Page, element: &Element, selector: &str) -> Result<()> {
    if element.click().await.is_ok() {
        return Ok(());
    }
    if element.scroll_into_view().await.is_ok() && element.click().await.is_ok() {
        return Ok(());
    }
    let quoted = serde_json::to_string(selector)?;
    page.evaluate(format!("document.querySelector({})?.click()", quoted))
        .await
        .map_err(|e| anyhow::anyhow!("script click on {} failed: {}", selector, e))?;
    Ok(())
}

/// Scoped headless-browser session for one interactive extraction
pub struct BrowserSession {
    browser: ChromeBrowser,
    handle: tokio::task::JoinHandle<()>,
    page: Page,
}

impl BrowserSession {
    /// Launch a headless browser and open `url` in a fresh page
    pub async fn open(url: &str, user_agent: &str) -> Result<Self> {
        let chrome_path = if cfg!(target_os = "macos") {
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"
        } else if cfg!(target_os = "windows") {
            "C:\\Program Files\\Google\\Chrome\\Application\\chrome.exe"
        } else {
            "google-chrome"
        };

        let config = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .no_sandbox()
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-background-networking")
            .arg("--mute-audio")
            .window_size(1920, 1080)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build browser config: {}", e))?;

        let (browser, mut handler) = ChromeBrowser::launch(config)
            .await
            .map_err(|e| anyhow::anyhow!("failed to launch browser: {}", e))?;

        // Handler task must keep polling for the browser to work
        let handle = tokio::spawn(async move {
            loop {
                match handler.next().await {
                    Some(Ok(_)) => continue,
                    Some(Err(_)) => continue,
                    None => break,
                }
            }
        });

        let mut browser = browser;
        let page = match browser.new_page(url).await {
            Ok(page) => page,
            Err(e) => {
                // Release the browser even when the page never opened
                let _ = browser.close().await;
                handle.abort();
                return Err(anyhow::anyhow!("failed to open page: {}", e));
            }
        };
        if let Err(e) = page
            .set_user_agent(SetUserAgentOverrideParams::new(user_agent))
            .await
        {
            let _ = page.close().await;
            let _ = browser.close().await;
            handle.abort();
            return Err(anyhow::anyhow!("failed to set user agent: {}", e));
        }
        Self::wait_for_load(&page).await;

        Ok(Self {
            browser,
            handle,
            page,
        })
    }

    /// Wait for the page to render
    async fn wait_for_load(_page: &Page) {
        tokio::time::sleep(Duration::from_millis(1500)).await;
    }

    /// Navigate the existing page (cart flows)
    pub async fn goto(&self, url: &str) -> Result<()> {
        self.page
            .goto(url)
            .await
            .map_err(|e| anyhow::anyhow!("navigation to {} failed: {}", url, e))?;
        Self::wait_for_load(&self.page).await;
        Ok(())
    }

    /// Wait until any of the candidate selectors matches, polling up to
    /// `timeout`. Yields `None` on timeout, never an error.
    pub async fn wait_for_any(&self, selectors: &[String], timeout: Duration) -> Option<Element> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            for selector in selectors {
                if let Ok(element) = self.page.find_element(selector.as_str()).await {
                    return Some(element);
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(WAIT_POLL).await;
        }
    }

    /// Open configured accordion/expand controls (availability
    /// calendars, quick-stats toggles) before snapshotting. Controls
    /// that are missing or refuse to click are skipped.
    pub async fn expand_sections(&self, selectors: &[String]) {
        for selector in selectors {
            match self.page.find_element(selector.as_str()).await {
                Ok(element) => {
                    if let Err(e) = click_element(&self.page, &element, selector).await {
                        warn!("could not expand '{}': {}", selector, e);
                        continue;
                    }
                    tokio::time::sleep(SETTLE_DELAY).await;
                }
                Err(_) => debug!("no expandable section '{}'", selector),
            }
        }
    }

    /// Run the load-more loop on this page and return the final DOM
    pub async fn load_all(&self, load_more_selectors: &[String]) -> Result<String> {
        let mut driver = LivePage { page: &self.page };
        LoadMoreLoop::new(load_more_selectors).run(&mut driver).await
    }

    /// Snapshot the current DOM
    pub async fn snapshot_html(&self) -> Result<String> {
        self.page
            .content()
            .await
            .map_err(|e| anyhow::anyhow!("failed to get page content: {}", e))
    }

    /// Simulate the add-to-cart flow and read the shipping location
    /// from the cart page. Any step failing yields `None`; the session
    /// remains usable and must still be closed by the caller.
    pub async fn shipping_location(
        &self,
        flow: &CartFlowConfig,
        base_url: &str,
    ) -> Option<String> {
        if let Some(quantity) = &flow.quantity_selector {
            for _ in 0..flow.quantity_clicks {
                let mut driver = LivePage { page: &self.page };
                match driver.try_click(quantity).await {
                    Ok(true) => tokio::time::sleep(Duration::from_millis(500)).await,
                    Ok(false) => break,
                    Err(e) => {
                        warn!("quantity click failed: {}", e);
                        break;
                    }
                }
            }
        }

        let mut added = false;
        for selector in &flow.add_to_cart_selectors {
            let mut driver = LivePage { page: &self.page };
            if matches!(driver.try_click(selector).await, Ok(true)) {
                added = true;
                break;
            }
        }
        if !added {
            warn!("no add-to-cart control found; skipping location");
            return None;
        }
        tokio::time::sleep(SETTLE_DELAY).await;

        let cart_url = format!(
            "{}{}",
            base_url.trim_end_matches('/'),
            flow.cart_path
        );
        if let Err(e) = self.goto(&cart_url).await {
            warn!("cart navigation failed: {}", e);
            return None;
        }

        let element = self
            .wait_for_any(&flow.location_selectors, Duration::from_secs(10))
            .await?;
        let text = element.inner_text().await.ok().flatten()?;

        let location = text
            .split_once("Location:")
            .map(|(_, rest)| rest.trim().to_string())
            .unwrap_or_else(|| text.trim().to_string());
        if location.is_empty() {
            return None;
        }

        // Prefer an exact known warehouse over raw page text
        for known in &flow.known_locations {
            if location.contains(known.as_str()) {
                return Some(known.clone());
            }
        }
        Some(location)
    }

    /// Close the page and browser; always called, on every exit path
    pub async fn close(mut self) {
        let _ = self.page.close().await;
        let _ = self.browser.close().await;
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scripted fake page for the load-more state machine
    struct FakeDriver {
        /// How many times the load-more control will still appear
        remaining_controls: u32,
        scrolls: u32,
        clicks: u32,
        click_fails: bool,
        scroll_fails: bool,
    }

    impl FakeDriver {
        fn with_controls(n: u32) -> Self {
            Self {
                remaining_controls: n,
                scrolls: 0,
                clicks: 0,
                click_fails: false,
                scroll_fails: false,
            }
        }
    }

    impl PageDriver for FakeDriver {
        async fn scroll_to_bottom(&mut self) -> Result<()> {
            if self.scroll_fails {
                anyhow::bail!("scroll timeout");
            }
            self.scrolls += 1;
            Ok(())
        }

        async fn try_click(&mut self, selector: &str) -> Result<bool> {
            if selector != "button.load-more" {
                return Ok(false);
            }
            if self.remaining_controls == 0 {
                return Ok(false);
            }
            if self.click_fails {
                anyhow::bail!("element not interactable");
            }
            self.remaining_controls -= 1;
            self.clicks += 1;
            Ok(true)
        }

        async fn settle(&mut self, _duration: Duration) {}

        async fn html(&mut self) -> Result<String> {
            Ok(format!("<html>{} items</html>", 10 * (self.clicks + 1)))
        }
    }

    fn selectors() -> Vec<String> {
        vec!["a.load-more".to_string(), "button.load-more".to_string()]
    }

    #[tokio::test]
    async fn test_loop_clicks_until_control_disappears() {
        let mut driver = FakeDriver::with_controls(3);
        let sels = selectors();
        let html = LoadMoreLoop::with_max_rounds(&sels, 10)
            .run(&mut driver)
            .await
            .unwrap();
        assert_eq!(driver.clicks, 3);
        // One final scroll after the last click finds no control
        assert_eq!(driver.scrolls, 4);
        assert_eq!(html, "<html>40 items</html>");
    }

    #[tokio::test]
    async fn test_loop_respects_round_cap() {
        let mut driver = FakeDriver::with_controls(u32::MAX);
        let sels = selectors();
        LoadMoreLoop::with_max_rounds(&sels, 10)
            .run(&mut driver)
            .await
            .unwrap();
        assert_eq!(driver.clicks, 10);
    }

    #[tokio::test]
    async fn test_click_failure_degrades_to_extraction() {
        let mut driver = FakeDriver::with_controls(5);
        driver.click_fails = true;
        let sels = selectors();
        let html = LoadMoreLoop::with_max_rounds(&sels, 10)
            .run(&mut driver)
            .await
            .unwrap();
        // No clicks landed but content still comes back
        assert_eq!(driver.clicks, 0);
        assert_eq!(html, "<html>10 items</html>");
    }

    #[tokio::test]
    async fn test_scroll_failure_degrades_to_extraction() {
        let mut driver = FakeDriver::with_controls(5);
        driver.scroll_fails = true;
        let sels = selectors();
        let html = LoadMoreLoop::with_max_rounds(&sels, 10)
            .run(&mut driver)
            .await
            .unwrap();
        assert_eq!(driver.clicks, 0);
        assert!(html.contains("10 items"));
    }

    #[tokio::test]
    async fn test_no_control_extracts_immediately() {
        let mut driver = FakeDriver::with_controls(0);
        let sels = selectors();
        let html = LoadMoreLoop::with_max_rounds(&sels, 10)
            .run(&mut driver)
            .await
            .unwrap();
        assert_eq!(driver.scrolls, 1);
        assert_eq!(driver.clicks, 0);
        assert!(html.contains("10 items"));
    }
}
