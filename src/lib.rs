//! Paradise Crawler: a persistent, resumable SEO crawler
//!
//! This crate implements a batch web crawler that discovers pages from seed
//! URLs, respects robots.txt and per-host pacing, extracts structural SEO
//! content, and persists everything to a pair of SQLite databases so that a
//! crawl can be stopped and resumed at any point.

pub mod config;
pub mod crawler;
pub mod extract;
pub mod indexability;
pub mod robots;
pub mod sitemap;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for crawler operations
///
/// Per-URL failures (timeouts, connection errors, HTTP error statuses) are
/// recorded in the databases rather than surfaced through this type; only
/// conditions that end the whole run propagate as errors.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("malformed URL: {0}")]
    MalformedUrl(String),

    #[error("robots.txt unavailable for {host}")]
    RobotsUnavailable { host: String },

    #[error("network error for {url}: {message}")]
    Network { url: String, message: String },

    #[error("request timeout for {url}")]
    Timeout { url: String },

    #[error("parse error for {url}: {message}")]
    Parse { url: String, message: String },

    #[error("storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CrawlError {
    /// True when the error should abort the run rather than be recorded
    /// against the URL that produced it.
    pub fn is_fatal(&self) -> bool {
        match self {
            CrawlError::Storage(e) => e.is_fatal(),
            CrawlError::Io(_) => true,
            _ => false,
        }
    }
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("failed to parse URL: {0}")]
    Malformed(String),

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("missing host in URL")]
    MissingHost,
}

/// Result type alias for crawler operations
pub type Result<T> = std::result::Result<T, CrawlError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use crate::config::{CrawlConfig, CrawlLimits, HttpConfig};
pub use crate::url::{classify_url, normalize_url, UrlClass, UrlKind};
