//! Crawl configuration
//!
//! Configuration is assembled from built-in defaults, `SQLITECRAWLER_*`
//! environment variables, and finally command-line flags; later sources win.
//! The database file names are derived from the seed URL's host so that two
//! sites never share a database pair.

use std::path::PathBuf;
use std::time::Duration;

/// HTTP client behavior
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// User-Agent header sent with every request
    pub user_agent: String,

    /// Hard per-request timeout in seconds
    pub timeout_secs: u64,

    /// Maximum concurrent fetches
    pub max_concurrency: usize,

    /// Minimum seconds between requests to the same host
    pub delay_between_requests: f64,

    /// Whether robots.txt disallow rules block fetching
    pub respect_robots_txt: bool,

    /// Skip reading Sitemap: directives from robots.txt
    pub skip_robots_sitemaps: bool,

    /// Skip sitemap discovery entirely
    pub skip_sitemaps: bool,

    /// Maximum redirect hops followed per request
    pub max_redirects: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: preset_user_agent(UserAgentPreset::ParadiseCrawler).to_string(),
            timeout_secs: 20,
            max_concurrency: 10,
            delay_between_requests: 0.1,
            respect_robots_txt: true,
            skip_robots_sitemaps: false,
            skip_sitemaps: false,
            max_redirects: 10,
        }
    }
}

impl HttpConfig {
    /// Defaults with `SQLITECRAWLER_*` environment overrides applied.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(ua) = env_string("SQLITECRAWLER_UA") {
            cfg.user_agent = ua;
        }
        if let Some(t) = env_parse::<u64>("SQLITECRAWLER_TIMEOUT") {
            cfg.timeout_secs = t;
        }
        if let Some(c) = env_parse::<usize>("SQLITECRAWLER_CONCURRENCY") {
            cfg.max_concurrency = c.max(1);
        }
        if let Some(d) = env_parse::<f64>("SQLITECRAWLER_DELAY") {
            cfg.delay_between_requests = d;
        }
        if let Some(flag) = env_parse::<u8>("SQLITECRAWLER_RESPECT_ROBOTS") {
            cfg.respect_robots_txt = flag == 1;
        }
        cfg
    }

    /// Per-request timeout as a Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Minimum per-host delay as a Duration
    pub fn host_delay(&self) -> Duration {
        Duration::from_secs_f64(self.delay_between_requests.max(0.0))
    }
}

/// Global crawl limits
#[derive(Debug, Clone)]
pub struct CrawlLimits {
    /// Maximum pages to fetch in this run; `None` means unlimited
    pub max_pages: Option<u64>,

    /// Maximum frontier depth; children beyond this are rejected
    pub max_depth: u32,

    /// Only enqueue URLs on the seed host
    pub same_host_only: bool,
}

impl Default for CrawlLimits {
    fn default() -> Self {
        Self {
            max_pages: None,
            max_depth: 3,
            same_host_only: true,
        }
    }
}

impl CrawlLimits {
    /// Defaults with `SQLITECRAWLER_*` environment overrides applied.
    pub fn from_env() -> Self {
        let mut limits = Self::default();
        if let Some(n) = env_parse::<u64>("SQLITECRAWLER_MAX_PAGES") {
            limits.max_pages = if n == 0 { None } else { Some(n) };
        }
        if let Some(d) = env_parse::<u32>("SQLITECRAWLER_MAX_DEPTH") {
            limits.max_depth = d;
        }
        if let Some(flag) = env_parse::<u8>("SQLITECRAWLER_SAME_HOST_ONLY") {
            limits.same_host_only = flag == 1;
        }
        limits
    }

    /// True once `fetched` pages have exhausted the page budget.
    pub fn pages_exhausted(&self, fetched: u64) -> bool {
        match self.max_pages {
            Some(max) => fetched >= max,
            None => false,
        }
    }
}

/// Complete configuration for one crawl run
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub http: HttpConfig,
    pub limits: CrawlLimits,

    /// Use the scripted-browser fetch backend
    pub use_js: bool,

    /// Truncate the frontier before starting
    pub reset_frontier: bool,

    /// Storage writer pool size
    pub storage_workers: usize,

    /// Directory holding the database pair; defaults to the working
    /// directory, overridable with `SQLITECRAWLER_DATA`
    pub data_dir: PathBuf,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            limits: CrawlLimits::default(),
            use_js: false,
            reset_frontier: false,
            storage_workers: 2,
            data_dir: env_string("SQLITECRAWLER_DATA")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
        }
    }
}

/// Built-in User-Agent presets selectable from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAgentPreset {
    ScreamingFrog,
    ParadiseCrawler,
    Googlebot,
    Custom,
}

/// Returns the User-Agent string for a preset.
///
/// `Custom` falls back to the default crawler UA; callers are expected to
/// substitute the `--custom-ua` value instead.
pub fn preset_user_agent(preset: UserAgentPreset) -> &'static str {
    match preset {
        UserAgentPreset::ScreamingFrog => "Screaming Frog SEO Spider/19.2",
        UserAgentPreset::ParadiseCrawler => {
            "ParadiseCrawler/0.2 (+https://github.com/paradise-crawler/paradise-crawler)"
        }
        UserAgentPreset::Googlebot => {
            "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)"
        }
        UserAgentPreset::Custom => {
            "ParadiseCrawler/0.2 (+https://github.com/paradise-crawler/paradise-crawler)"
        }
    }
}

/// Derives the `{host}_pages.db` / `{host}_crawl.db` pair for a seed host,
/// co-located under `data_dir`. The host is sanitized so the names stay
/// portable across filesystems.
pub fn db_paths_for_host(data_dir: &std::path::Path, host: &str) -> (PathBuf, PathBuf) {
    let safe = sanitize_host(host);
    (
        data_dir.join(format!("{safe}_pages.db")),
        data_dir.join(format!("{safe}_crawl.db")),
    )
}

/// Lowercases a host, strips a leading `www.`, and replaces everything
/// outside `[a-z0-9]` with underscores.
pub fn sanitize_host(host: &str) -> String {
    let mut h = host.to_lowercase();
    if let Some(stripped) = h.strip_prefix("www.") {
        h = stripped.to_string();
    }
    h.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_string(name).and_then(|v| v.parse().ok())
}
