//! Crawl engine
//!
//! - [`backend`]: the pluggable fetch interface (plain HTTP, scripted browser)
//! - [`fetcher`]: per-host pacing and retry policy around a backend
//! - [`controller`]: the main loop binding frontier, fetcher, and extractor

pub mod backend;
pub mod controller;
pub mod fetcher;

pub use backend::{FetchBackend, FetchFailure, FetchedPage, HttpBackend, RedirectHop};
pub use controller::{crawl, CrawlOutcome, CrawlStats};
pub use fetcher::{Fetcher, HostPacer, RetryPolicy};
