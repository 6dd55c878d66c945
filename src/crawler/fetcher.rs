//! Fetch scheduling: per-host pacing and retries
//!
//! The fetcher wraps a [`FetchBackend`] with the politeness machinery: a
//! per-host last-request map enforcing the minimum delay (raised further by a
//! robots.txt `Crawl-delay`), and a bounded retry loop for connection errors
//! and server errors. Client errors (4xx) are terminal and never retried.

use crate::config::HttpConfig;
use crate::crawler::backend::{FetchBackend, FetchFailure, FetchedPage};
use crate::robots::RobotsCache;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use url::Url;

/// Retry schedule for transient failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            delays: vec![Duration::from_millis(250), Duration::from_secs(1)],
        }
    }
}

impl RetryPolicy {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let index = (attempt as usize).min(self.delays.len().saturating_sub(1));
        self.delays[index]
    }

    /// Connection errors and 5xx responses are retryable; 4xx and timeouts
    /// are terminal.
    fn should_retry(page: &FetchedPage) -> bool {
        match &page.error {
            Some(FetchFailure::Connect) => true,
            Some(FetchFailure::Timeout) | Some(FetchFailure::Other(_)) => false,
            None => (500..600).contains(&page.status),
        }
    }
}

/// Per-host request pacing
///
/// Each acquire reserves the next free slot for its host and sleeps until it
/// arrives, so concurrent workers targeting one host serialize at the
/// configured spacing.
pub struct HostPacer {
    slots: Mutex<HashMap<String, Instant>>,
}

impl HostPacer {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub async fn acquire(&self, host: &str, delay: Duration) {
        if delay.is_zero() {
            return;
        }

        let wake = {
            let mut slots = self.slots.lock().unwrap();
            let now = Instant::now();
            let slot = match slots.get(host) {
                Some(last) => (*last + delay).max(now),
                None => now,
            };
            slots.insert(host.to_string(), slot);
            slot
        };

        tokio::time::sleep_until(wake).await;
    }
}

impl Default for HostPacer {
    fn default() -> Self {
        Self::new()
    }
}

/// Backend plus politeness state for one crawl run
pub struct Fetcher {
    backend: FetchBackend,
    pacer: HostPacer,
    robots: Arc<RobotsCache>,
    config: HttpConfig,
    retry: RetryPolicy,
    /// Global bound on in-flight requests
    concurrency: Semaphore,
}

impl Fetcher {
    pub fn new(backend: FetchBackend, robots: Arc<RobotsCache>, config: HttpConfig) -> Self {
        let permits = config.max_concurrency.max(1);
        Self {
            backend,
            pacer: HostPacer::new(),
            robots,
            config,
            retry: RetryPolicy::default(),
            concurrency: Semaphore::new(permits),
        }
    }

    /// Fetches a URL, honoring the global concurrency bound, per-host
    /// pacing, and the retry policy.
    ///
    /// The effective host delay is the larger of the configured minimum and
    /// the host's robots.txt Crawl-delay.
    pub async fn fetch(&self, url: &Url) -> FetchedPage {
        let _permit = self.concurrency.acquire().await;
        let host = url.host_str().unwrap_or_default().to_string();
        let delay = self.effective_delay(url).await;

        let mut attempt: u32 = 0;
        loop {
            self.pacer.acquire(&host, delay).await;
            let page = self.backend.fetch(url).await;

            if attempt >= self.retry.max_retries || !RetryPolicy::should_retry(&page) {
                return page;
            }

            let backoff = self.retry.delay_for_attempt(attempt);
            tracing::debug!(
                "retrying {url} (attempt {}) after {:?}, status {} error {:?}",
                attempt + 1,
                backoff,
                page.status,
                page.error
            );
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }

    async fn effective_delay(&self, url: &Url) -> Duration {
        let configured = self.config.host_delay();
        let robots_delay = self
            .robots
            .crawl_delay(url)
            .await
            .map(Duration::from_secs_f64)
            .unwrap_or(Duration::ZERO);
        configured.max(robots_delay)
    }
}
