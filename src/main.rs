//! Paradise Crawler command-line interface

use clap::{Parser, ValueEnum};
use paradise_crawler::config::{preset_user_agent, CrawlConfig, CrawlLimits, HttpConfig, UserAgentPreset};
use paradise_crawler::crawler::{crawl, CrawlOutcome};
use paradise_crawler::CrawlError;
use tracing_subscriber::EnvFilter;

/// Persistent SQLite-backed SEO crawler with resumable frontier
#[derive(Parser, Debug)]
#[command(name = "paradise-crawler")]
#[command(version)]
#[command(about = "Persistent, resumable SEO crawler backed by SQLite", long_about = None)]
struct Cli {
    /// Start URL (or XML sitemap URL) to begin crawling
    start: String,

    /// Maximum pages to fetch in this run (0 or absent = unlimited)
    #[arg(long, value_name = "N")]
    max_pages: Option<u64>,

    /// Maximum crawl depth (default: 3)
    #[arg(long, value_name = "N")]
    max_depth: Option<u32>,

    /// Allow enqueueing offsite URLs (default: same host only)
    #[arg(long)]
    offsite: bool,

    /// User agent preset
    #[arg(long, value_enum, default_value = "paradise-crawler")]
    user_agent: UaPreset,

    /// Custom user agent string (overrides the preset)
    #[arg(long, value_name = "STRING")]
    custom_ua: Option<String>,

    /// Per-request timeout in seconds (default: 20)
    #[arg(long, value_name = "N")]
    timeout: Option<u64>,

    /// Maximum concurrent fetches (default: 10)
    #[arg(long, value_name = "N")]
    concurrency: Option<usize>,

    /// Minimum seconds between requests to the same host (default: 0.1)
    #[arg(long, value_name = "N")]
    delay: Option<f64>,

    /// Ignore robots.txt for crawlability (still parsed for sitemaps)
    #[arg(long)]
    ignore_robots: bool,

    /// Do not read Sitemap: directives from robots.txt
    #[arg(long)]
    skip_robots_sitemaps: bool,

    /// Skip sitemap discovery entirely
    #[arg(long)]
    skip_sitemaps: bool,

    /// Storage writer pool size (default: 2)
    #[arg(long, value_name = "N", default_value_t = 2)]
    max_workers: usize,

    /// Use the scripted-browser fetch backend
    #[arg(long)]
    js: bool,

    /// Enable verbose output
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress non-error output
    #[arg(short, long)]
    quiet: bool,

    /// Clear the frontier and reseed from the start URL
    #[arg(long)]
    reset_frontier: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum UaPreset {
    ScreamingFrog,
    ParadiseCrawler,
    Googlebot,
    Custom,
}

impl From<UaPreset> for UserAgentPreset {
    fn from(preset: UaPreset) -> Self {
        match preset {
            UaPreset::ScreamingFrog => UserAgentPreset::ScreamingFrog,
            UaPreset::ParadiseCrawler => UserAgentPreset::ParadiseCrawler,
            UaPreset::Googlebot => UserAgentPreset::Googlebot,
            UaPreset::Custom => UserAgentPreset::Custom,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.quiet);

    let config = match build_config(&cli) {
        Ok(config) => config,
        Err(message) => {
            eprintln!("error: {message}");
            std::process::exit(2);
        }
    };

    if cli.verbose {
        tracing::debug!("configuration: {config:#?}");
    }

    match crawl(&cli.start, config).await {
        Ok(outcome) => {
            print_summary(&outcome);
            if outcome.interrupted {
                std::process::exit(130);
            }
        }
        Err(CrawlError::MalformedUrl(url)) => {
            eprintln!("error: cannot parse start URL: {url}");
            std::process::exit(2);
        }
        Err(e) => {
            tracing::error!("crawl failed: {e}");
            std::process::exit(1);
        }
    }
}

/// Builds the run configuration: defaults, then environment overrides, then
/// command-line flags.
fn build_config(cli: &Cli) -> Result<CrawlConfig, String> {
    let mut http = HttpConfig::from_env();
    let mut limits = CrawlLimits::from_env();

    if let Some(user_agent) = &cli.custom_ua {
        http.user_agent = user_agent.clone();
    } else if cli.user_agent == UaPreset::Custom {
        return Err("--user-agent custom requires --custom-ua".to_string());
    } else if cli.user_agent != UaPreset::ParadiseCrawler {
        // An explicit preset beats the environment; the default preset only
        // applies when SQLITECRAWLER_UA is unset.
        http.user_agent = preset_user_agent(cli.user_agent.into()).to_string();
    }

    if let Some(timeout) = cli.timeout {
        http.timeout_secs = timeout;
    }
    if let Some(concurrency) = cli.concurrency {
        if concurrency == 0 {
            return Err("--concurrency must be at least 1".to_string());
        }
        http.max_concurrency = concurrency;
    }
    if let Some(delay) = cli.delay {
        if delay < 0.0 {
            return Err("--delay cannot be negative".to_string());
        }
        http.delay_between_requests = delay;
    }
    if cli.ignore_robots {
        http.respect_robots_txt = false;
    }
    http.skip_robots_sitemaps = cli.skip_robots_sitemaps || cli.skip_sitemaps;
    http.skip_sitemaps = cli.skip_sitemaps;

    if let Some(max_pages) = cli.max_pages {
        limits.max_pages = if max_pages == 0 { None } else { Some(max_pages) };
    }
    if let Some(max_depth) = cli.max_depth {
        limits.max_depth = max_depth;
    }
    if cli.offsite {
        limits.same_host_only = false;
    }

    if cli.max_workers == 0 {
        return Err("--max-workers must be at least 1".to_string());
    }

    Ok(CrawlConfig {
        http,
        limits,
        use_js: cli.js,
        reset_frontier: cli.reset_frontier,
        storage_workers: cli.max_workers,
        ..CrawlConfig::default()
    })
}

fn setup_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("paradise_crawler=debug,info")
    } else {
        EnvFilter::new("paradise_crawler=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn print_summary(outcome: &CrawlOutcome) {
    let stats = &outcome.stats;
    println!();
    println!("Crawl summary");
    println!("  pages fetched:   {}", stats.pages_fetched);
    println!("  robots denied:   {}", stats.robots_denied);
    println!(
        "  errors:          {} network, {} timeout, {} http, {} malformed, {} parse",
        stats.network_errors,
        stats.timeouts,
        stats.http_errors,
        stats.malformed_urls,
        stats.parse_errors
    );
    println!(
        "  frontier:        {} queued, {} done",
        outcome.frontier.queued, outcome.frontier.done
    );
    if outcome.interrupted {
        println!("  interrupted; re-run to resume from the frontier");
    }
}
