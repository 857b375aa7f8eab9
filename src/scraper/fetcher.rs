//! Retrying, rate-limited HTTP retrieval of static documents.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::SiteConfig;
use crate::error::FetchError;
use crate::retry::{retry_if, Attempted, RetryConfig};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP fetcher for one site, enforcing its politeness delay across
/// all concurrent callers.
pub struct Fetcher {
    client: reqwest::Client,
    politeness: Duration,
    retry: RetryConfig,
    /// Next instant a request may be issued; callers reserve their
    /// slot under the lock, then sleep outside it
    next_slot: Mutex<Instant>,
}

impl Fetcher {
    /// Build a fetcher from a site's headers, user agent and limits
    pub fn for_site(site: &SiteConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in &site.headers {
            match (
                name.parse::<HeaderName>(),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => warn!("ignoring invalid header '{}' for site {}", name, site.name),
            }
        }

        let client = reqwest::Client::builder()
            .user_agent(&site.user_agent)
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(Duration::from_secs(10))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;

        Ok(Self {
            client,
            politeness: Duration::from_millis(site.politeness_delay_ms),
            retry: RetryConfig::with_max_retries(site.max_retries),
            next_slot: Mutex::new(Instant::now()),
        })
    }

    /// Build a fetcher with an explicit delay and retry policy
    /// (image downloads use the capped download policy)
    pub fn with_policy(
        user_agent: &str,
        politeness: Duration,
        retry: RetryConfig,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(Duration::from_secs(10))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;

        Ok(Self {
            client,
            politeness,
            retry,
            next_slot: Mutex::new(Instant::now()),
        })
    }

    /// Wait for this site's next request slot. Slots are reserved under
    /// the lock so concurrent callers space out by the politeness delay.
    async fn acquire_slot(&self) {
        let wake = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let wake = (*next).max(now);
            *next = wake + self.politeness;
            wake
        };
        tokio::time::sleep_until(wake).await;
    }

    /// Fetch a document, retrying transient failures with exponential
    /// backoff. Permanent failures (most 4xx) return immediately.
    pub async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        self.fetch_counted(url).await.map(|a| a.value)
    }

    /// Like [`fetch`](Self::fetch) but also reports how many retries
    /// the document took
    pub async fn fetch_counted(&self, url: &str) -> Result<Attempted<String>, FetchError> {
        retry_if(&self.retry, url, FetchError::is_retryable, || async {
            self.acquire_slot().await;
            self.fetch_once(url).await
        })
        .await
    }

    async fn fetch_once(&self, url: &str) -> Result<String, FetchError> {
        debug!("GET {}", url);
        let response = self.client.get(url).send().await.map_err(FetchError::from)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        response
            .text()
            .await
            .map_err(|e| FetchError::Body(e.to_string()))
    }

    /// Fetch raw bytes plus the response content type (image downloads)
    pub async fn fetch_bytes(&self, url: &str) -> Result<(Vec<u8>, Option<String>), FetchError> {
        let attempted = retry_if(&self.retry, url, FetchError::is_retryable, || async {
            self.acquire_slot().await;
            let response = self.client.get(url).send().await.map_err(FetchError::from)?;
            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::Status(status.as_u16()));
            }
            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let bytes = response
                .bytes()
                .await
                .map_err(|e| FetchError::Body(e.to_string()))?;
            Ok((bytes.to_vec(), content_type))
        })
        .await?;
        Ok(attempted.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SiteConfig;

    fn test_site(politeness_ms: u64) -> SiteConfig {
        let mut site = SiteConfig::new(
            "test",
            "https://hatchery.example",
            "https://hatchery.example/chicks",
        );
        site.politeness_delay_ms = politeness_ms;
        site
    }

    #[test]
    fn test_builds_from_site_config() {
        let fetcher = Fetcher::for_site(&test_site(500)).unwrap();
        assert_eq!(fetcher.politeness, Duration::from_millis(500));
        assert_eq!(fetcher.retry.max_retries, 3);
    }

    #[tokio::test]
    async fn test_politeness_spacing() {
        let fetcher = Fetcher::for_site(&test_site(50)).unwrap();

        let start = Instant::now();
        fetcher.acquire_slot().await;
        fetcher.acquire_slot().await;
        fetcher.acquire_slot().await;

        // Second and third slots each wait the full politeness delay
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_concurrent_slots_are_spaced() {
        let fetcher = std::sync::Arc::new(Fetcher::for_site(&test_site(40)).unwrap());

        let start = Instant::now();
        let tasks: Vec<_> = (0..3)
            .map(|_| {
                let f = fetcher.clone();
                tokio::spawn(async move { f.acquire_slot().await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        assert!(start.elapsed() >= Duration::from_millis(80));
    }
}
