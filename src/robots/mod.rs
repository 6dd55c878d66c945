//! robots.txt acquisition and per-host caching
//!
//! On first reference to a host the cache fetches `{scheme}://{host}/robots.txt`
//! with a short timeout and keeps the parsed result for the lifetime of the
//! process. A missing file (404) is permissive. A fetch failure or server
//! error marks the host `unavailable`: the crawl proceeds as if allowed, but
//! indexability rows carry a `robots_txt_unavailable` flag.

mod parser;

pub use parser::ParsedRobots;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

/// Cached robots state for one host
#[derive(Debug)]
pub struct HostRobots {
    /// Parsed rules; permissive when the file was missing or unreachable
    pub rules: ParsedRobots,

    /// True when robots.txt could not be fetched (network error or 5xx)
    pub unavailable: bool,

    /// Sitemap URLs declared in the file
    pub sitemaps: Vec<String>,

    /// Crawl-delay declared for the effective user agent, seconds
    pub crawl_delay: Option<f64>,
}

/// Verdict for a single URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RobotsVerdict {
    pub allowed: bool,
    pub unavailable: bool,
}

/// Per-host robots.txt cache shared across fetch workers
pub struct RobotsCache {
    entries: Mutex<HashMap<String, Arc<HostRobots>>>,
    client: reqwest::Client,
    user_agent: String,
}

impl RobotsCache {
    /// Builds a cache with its own short-timeout HTTP client.
    pub fn new(user_agent: &str) -> crate::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            entries: Mutex::new(HashMap::new()),
            client,
            user_agent: user_agent.to_string(),
        })
    }

    /// Returns the cached entry for a URL's host, fetching robots.txt on
    /// first use. The cache key includes the port so sites on non-default
    /// ports are kept apart.
    ///
    /// Two tasks racing on an uncached host may both fetch; the second insert
    /// wins and the results are equivalent.
    pub async fn host_robots(&self, url: &Url) -> Arc<HostRobots> {
        let key = cache_key(url);

        if let Some(entry) = self.entries.lock().unwrap().get(&key) {
            return Arc::clone(entry);
        }

        let entry = match url.join("/robots.txt") {
            Ok(robots_url) => Arc::new(self.fetch_host(robots_url).await),
            Err(_) => Arc::new(Self::unavailable()),
        };
        self.entries
            .lock()
            .unwrap()
            .insert(key, Arc::clone(&entry));
        entry
    }

    /// Evaluates a URL against its host's robots rules.
    pub async fn verdict(&self, url: &Url) -> RobotsVerdict {
        if url.host_str().is_none() {
            return RobotsVerdict {
                allowed: true,
                unavailable: false,
            };
        }

        let entry = self.host_robots(url).await;
        RobotsVerdict {
            allowed: entry.rules.is_allowed(url.as_str(), &self.user_agent),
            unavailable: entry.unavailable,
        }
    }

    /// Sitemap URLs declared by a host's robots.txt.
    pub async fn declared_sitemaps(&self, base: &Url) -> Vec<String> {
        self.host_robots(base).await.sitemaps.clone()
    }

    /// Crawl-delay declared for a host, if any.
    pub async fn crawl_delay(&self, base: &Url) -> Option<f64> {
        self.host_robots(base).await.crawl_delay
    }

    /// Number of hosts currently cached.
    pub fn cached_hosts(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    async fn fetch_host(&self, robots_url: Url) -> HostRobots {
        tracing::debug!("fetching robots.txt from {robots_url}");

        match self.client.get(robots_url.clone()).send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    match response.text().await {
                        Ok(content) => Self::from_content(&content, &self.user_agent),
                        Err(e) => {
                            tracing::warn!("failed to read robots.txt body from {robots_url}: {e}");
                            Self::unavailable()
                        }
                    }
                } else if status.is_server_error() {
                    tracing::debug!("{robots_url} returned {status}, marking unavailable");
                    Self::unavailable()
                } else {
                    // 404 and other client statuses mean "no robots policy".
                    tracing::debug!("{robots_url} returned {status}, allowing all");
                    HostRobots {
                        rules: ParsedRobots::allow_all(),
                        unavailable: false,
                        sitemaps: Vec::new(),
                        crawl_delay: None,
                    }
                }
            }
            Err(e) => {
                tracing::debug!("failed to fetch {robots_url}: {e}");
                Self::unavailable()
            }
        }
    }

    fn from_content(content: &str, user_agent: &str) -> HostRobots {
        let rules = ParsedRobots::from_content(content);
        let sitemaps = rules.sitemaps().to_vec();
        let crawl_delay = rules.crawl_delay(user_agent);
        HostRobots {
            rules,
            unavailable: false,
            sitemaps,
            crawl_delay,
        }
    }

    fn unavailable() -> HostRobots {
        HostRobots {
            rules: ParsedRobots::allow_all(),
            unavailable: true,
            sitemaps: Vec::new(),
            crawl_delay: None,
        }
    }

    /// Seeds the cache with pre-parsed content; used by tests.
    #[cfg(test)]
    pub fn insert_for_test(&self, host: &str, content: &str) {
        let entry = Arc::new(Self::from_content(content, &self.user_agent));
        self.entries
            .lock()
            .unwrap()
            .insert(host.to_lowercase(), entry);
    }
}

/// Cache key for a URL's authority: lowercase host plus explicit port.
fn cache_key(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default().to_lowercase();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host,
    }
}
