//! Crawl controller
//!
//! Binds the frontier, fetcher, extractor, and sitemap discoverer into the
//! main loop: seed and sitemap URLs enter the frontier, batches are leased
//! and fetched in parallel, results populate the stores, and newly
//! discovered links feed back in until the frontier empties, the page budget
//! runs out, or a shutdown is requested.

use crate::config::{db_paths_for_host, CrawlConfig};
use crate::crawler::backend::{FetchBackend, FetchFailure, FetchedPage};
use crate::crawler::fetcher::Fetcher;
use crate::extract::{extract_page, ExtractedPage};
use crate::indexability::{evaluate, reasons, IndexabilityInput};
use crate::robots::{RobotsCache, RobotsVerdict};
use crate::sitemap::{DiscoveredUrl, SitemapDiscoverer, SitemapDocument};
use crate::storage::crawl_store::{
    ContentRecord, FrontierCounts, HreflangSource, IndexabilityRecord, LeasedUrl, LinkRow,
    RedirectHopRow, SitemapListing,
};
use crate::storage::page_store::PageArtifact;
use crate::storage::{CrawlStore, PageStore, UrlSeen};
use crate::url::{
    classify_url, kind_from_content_type, normalize_url, normalize_with_base, should_enqueue,
    ClassifyContext, UrlClass, UrlKind,
};
use crate::{CrawlError, Result};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use url::Url;

/// Counters reported in the exit summary
#[derive(Debug, Clone, Copy, Default)]
pub struct CrawlStats {
    pub pages_fetched: u64,
    pub robots_denied: u64,
    pub network_errors: u64,
    pub timeouts: u64,
    pub http_errors: u64,
    pub malformed_urls: u64,
    pub parse_errors: u64,
}

/// Final state of a crawl run
#[derive(Debug, Clone, Copy)]
pub struct CrawlOutcome {
    pub stats: CrawlStats,
    pub frontier: FrontierCounts,
    pub interrupted: bool,
}

/// Result of processing one leased URL on a fetch worker
enum PageResult {
    /// The stored URL no longer parses; counted and dropped
    Malformed,
    /// robots.txt disallows the URL and robots are enforced
    Denied,
    /// The fetch ran (possibly failing with status 0)
    Fetched {
        page: FetchedPage,
        kind: UrlKind,
        extracted: Option<Box<ExtractedPage>>,
        sitemap: Option<SitemapDocument>,
    },
}

struct UrlOutcome {
    leased: LeasedUrl,
    verdict: RobotsVerdict,
    result: PageResult,
}

/// Runs a complete crawl for one seed URL.
pub async fn crawl(seed: &str, config: CrawlConfig) -> Result<CrawlOutcome> {
    let seed_url =
        normalize_url(seed).map_err(|_| CrawlError::MalformedUrl(seed.to_string()))?;
    let host = seed_url
        .host_str()
        .ok_or(crate::UrlError::MissingHost)?
        .to_lowercase();

    let allow_external = !config.limits.same_host_only;
    let ctx = ClassifyContext::new(&host, allow_external);

    let (pages_path, crawl_path) = db_paths_for_host(&config.data_dir, &host);
    tracing::info!(
        "using databases {} and {}",
        pages_path.display(),
        crawl_path.display()
    );

    let store = CrawlStore::open(&crawl_path, config.storage_workers)?;
    let pages = PageStore::open(&pages_path, config.storage_workers)?;

    if config.reset_frontier {
        store.reset_frontier().await?;
        tracing::info!("frontier reset; reseeding from {seed_url}");
    }

    let robots = Arc::new(RobotsCache::new(&config.http.user_agent)?);

    // The seed enters the frontier before any sitemap URL so it is always
    // fetched first on a fresh crawl.
    let (seed_id, _) = store.intern(seen_for(&seed_url, &ctx, None, false)).await?;
    store
        .enqueue(seed_id, 0, None, config.limits.max_depth)
        .await?;

    if !config.http.skip_sitemaps {
        run_sitemap_discovery(&store, &robots, &ctx, &config, &seed_url).await?;
    } else {
        tracing::info!("sitemap discovery skipped");
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested; draining in-flight work");
                shutdown.store(true, Ordering::SeqCst);
            }
        });
    }

    let backend = FetchBackend::new(&config.http, config.use_js)?;
    let fetcher = Arc::new(Fetcher::new(
        backend,
        Arc::clone(&robots),
        config.http.clone(),
    ));

    let mut stats = CrawlStats::default();
    // URLs currently being worked; leased rows stay `queued` on disk so a
    // crash re-leases them on the next run.
    let mut leased_ids: HashSet<i64> = HashSet::new();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        if config.limits.pages_exhausted(stats.pages_fetched) {
            tracing::info!("page budget reached");
            break;
        }

        let batch_limit = match config.limits.max_pages {
            Some(max) => {
                ((max.saturating_sub(stats.pages_fetched)) as usize).min(config.http.max_concurrency)
            }
            None => config.http.max_concurrency,
        }
        .max(1);

        let batch = store.lease(batch_limit, leased_ids.clone()).await?;
        if batch.is_empty() {
            break;
        }

        let mut join_set = tokio::task::JoinSet::new();
        for leased in batch {
            leased_ids.insert(leased.url_id);
            let fetcher = Arc::clone(&fetcher);
            let robots = Arc::clone(&robots);
            let ctx = ctx.clone();
            let respect_robots = config.http.respect_robots_txt;
            join_set
                .spawn(async move { process_one(fetcher, robots, ctx, respect_robots, leased).await });
        }

        while let Some(joined) = join_set.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!("fetch task failed: {e}");
                    continue;
                }
            };
            let url_id = outcome.leased.url_id;
            record_outcome(&store, &pages, &ctx, &config, &mut stats, outcome).await?;
            store.mark_done(vec![url_id]).await?;
            leased_ids.remove(&url_id);
        }
    }

    let frontier = store.frontier_counts().await?;
    let interrupted = shutdown.load(Ordering::SeqCst);

    // Flush both stores before reporting.
    pages.shutdown();
    store.shutdown();

    Ok(CrawlOutcome {
        stats,
        frontier,
        interrupted,
    })
}

/// Seeds the frontier from declared and well-known sitemaps.
async fn run_sitemap_discovery(
    store: &CrawlStore,
    robots: &RobotsCache,
    ctx: &ClassifyContext,
    config: &CrawlConfig,
    seed_url: &Url,
) -> Result<()> {
    let robots_sitemaps = if config.http.skip_robots_sitemaps {
        Vec::new()
    } else {
        robots.declared_sitemaps(seed_url).await
    };

    let client = reqwest::Client::builder()
        .user_agent(&config.http.user_agent)
        .timeout(std::time::Duration::from_secs(30))
        .gzip(true)
        .build()?;
    let discoverer = SitemapDiscoverer::new(&client);

    let roots = discoverer.discover_roots(seed_url, &robots_sitemaps).await;
    if roots.is_empty() {
        tracing::info!("no sitemaps found for {seed_url}");
        return Ok(());
    }

    tracing::info!("found {} sitemap root(s)", roots.len());
    let discovered = discoverer.collect(roots).await;
    tracing::info!("discovered {} URLs from sitemaps", discovered.len());

    record_sitemap_urls(store, ctx, config, discovered).await
}

/// Interns, records provenance for, and enqueues sitemap-discovered URLs.
/// Sitemap URLs are crawl roots: they always enter at depth 0.
async fn record_sitemap_urls(
    store: &CrawlStore,
    ctx: &ClassifyContext,
    config: &CrawlConfig,
    discovered: Vec<DiscoveredUrl>,
) -> Result<()> {
    let allow_external = !config.limits.same_host_only;

    for item in discovered {
        let url = match normalize_url(&item.entry.loc) {
            Ok(url) => url,
            Err(_) => continue,
        };
        let class = classify_url(url.as_str(), ctx, true);
        let (url_id, _) = store
            .intern(seen_with(&url, Some(UrlKind::Html), class))
            .await?;

        if let Ok(sitemap_url) = normalize_url(&item.source_sitemap) {
            let sitemap_class = classify_url(sitemap_url.as_str(), ctx, true);
            let (sitemap_id, _) = store
                .intern(seen_with(&sitemap_url, Some(UrlKind::Sitemap), sitemap_class))
                .await?;
            store
                .write_sitemap_listing(SitemapListing {
                    url_id,
                    sitemap_url_id: sitemap_id,
                    lastmod: item.entry.lastmod.clone(),
                    changefreq: item.entry.changefreq.clone(),
                    priority: item.entry.priority,
                })
                .await?;
        }

        for (lang, href) in &item.entry.hreflangs {
            if let Ok(href_url) = normalize_url(href) {
                let href_class = classify_url(href_url.as_str(), ctx, true);
                let (href_id, _) = store.intern(seen_with(&href_url, None, href_class)).await?;
                store
                    .write_hreflang(HreflangSource::Sitemap, url_id, lang.clone(), href_id)
                    .await?;
            }
        }

        if should_enqueue(class, allow_external) {
            store
                .enqueue(url_id, 0, None, config.limits.max_depth)
                .await?;
        }
    }
    Ok(())
}

/// The per-URL pipeline run on a fetch worker: robots verdict, paced fetch,
/// and CPU-side extraction of whatever the body turned out to be.
async fn process_one(
    fetcher: Arc<Fetcher>,
    robots: Arc<RobotsCache>,
    ctx: ClassifyContext,
    respect_robots: bool,
    leased: LeasedUrl,
) -> UrlOutcome {
    let url = match Url::parse(&leased.url) {
        Ok(url) => url,
        Err(_) => {
            return UrlOutcome {
                leased,
                verdict: RobotsVerdict {
                    allowed: true,
                    unavailable: false,
                },
                result: PageResult::Malformed,
            }
        }
    };

    let verdict = robots.verdict(&url).await;
    if respect_robots && !verdict.allowed {
        tracing::debug!("robots.txt disallows {url}");
        return UrlOutcome {
            leased,
            verdict,
            result: PageResult::Denied,
        };
    }

    let page = fetcher.fetch(&url).await;

    let mut kind = UrlKind::Other;
    let mut extracted = None;
    let mut sitemap = None;

    if page.status > 0 {
        kind = kind_from_content_type(page.content_type.as_deref(), &page.final_url);
        if kind.is_sitemap() && !page.body.is_empty() {
            let xml_bytes = crate::sitemap::maybe_gunzip(&page.body);
            let xml = String::from_utf8_lossy(&xml_bytes);
            sitemap = crate::sitemap::parse_sitemap(&xml).ok();
        } else if kind == UrlKind::Html && !page.body.is_empty() {
            let body = String::from_utf8_lossy(&page.body).into_owned();
            let base = Url::parse(&page.final_url).unwrap_or_else(|_| url.clone());
            extracted = Some(extract_page(&body, &base, &ctx));
        }
    }

    UrlOutcome {
        leased,
        verdict,
        result: PageResult::Fetched {
            page,
            kind,
            extracted: extracted.map(Box::new),
            sitemap,
        },
    }
}

/// Persists everything one processed URL produced.
async fn record_outcome(
    store: &CrawlStore,
    pages: &PageStore,
    ctx: &ClassifyContext,
    config: &CrawlConfig,
    stats: &mut CrawlStats,
    outcome: UrlOutcome,
) -> Result<()> {
    let leased = &outcome.leased;

    match outcome.result {
        PageResult::Malformed => {
            stats.malformed_urls += 1;
            tracing::debug!("dropping malformed frontier URL {}", leased.url);
        }
        PageResult::Denied => {
            stats.robots_denied += 1;
            let mut bits = reasons::ROBOTS_DISALLOWED;
            if outcome.verdict.unavailable {
                bits |= reasons::ROBOTS_UNAVAILABLE;
            }
            store
                .write_indexability(IndexabilityRecord {
                    url_id: leased.url_id,
                    robots_txt_allows: false,
                    html_meta_allows: true,
                    http_header_allows: true,
                    overall_indexable: false,
                    reasons: bits,
                })
                .await?;
            tracing::info!("[robots] {} disallowed, not fetched", leased.url);
        }
        PageResult::Fetched {
            page,
            kind,
            extracted,
            sitemap,
        } => {
            if page.status == 0 {
                match page.error {
                    Some(FetchFailure::Timeout) => stats.timeouts += 1,
                    _ => stats.network_errors += 1,
                }
                store
                    .write_indexability(evaluate(&IndexabilityInput {
                        url_id: leased.url_id,
                        robots_txt_allows: outcome.verdict.allowed,
                        robots_txt_unavailable: outcome.verdict.unavailable,
                        html_meta_allows: true,
                        x_robots_tag: None,
                        final_status: 0,
                    }))
                    .await?;
                tracing::info!("[  0] {} ({:?})", leased.url, page.error);
                return Ok(());
            }

            stats.pages_fetched += 1;
            if page.status >= 400 {
                stats.http_errors += 1;
            }

            // Resolve the final URL's identity; redirected fetches store
            // their artifacts under the final target.
            let (final_id, final_url) = if page.final_url != page.requested_url {
                match normalize_url(&page.final_url) {
                    Ok(final_url) => {
                        let class = classify_url(final_url.as_str(), ctx, false);
                        let (id, _) = store.intern(seen_with(&final_url, None, class)).await?;
                        (id, final_url)
                    }
                    Err(_) => (leased.url_id, Url::parse(&leased.url)?),
                }
            } else {
                (leased.url_id, Url::parse(&leased.url)?)
            };

            if !page.redirect_hops.is_empty() {
                let mut hop_rows = Vec::new();
                for (i, hop) in page.redirect_hops.iter().enumerate() {
                    let target_url = match normalize_url(&hop.to) {
                        Ok(url) => url,
                        Err(_) => continue,
                    };
                    let class = classify_url(target_url.as_str(), ctx, false);
                    let (target_id, _) = store.intern(seen_with(&target_url, None, class)).await?;
                    hop_rows.push(RedirectHopRow {
                        hop_index: i as u32,
                        target_url_id: target_id,
                        status_code: hop.status,
                    });
                }
                store
                    .write_redirect_chain(
                        leased.url_id,
                        hop_rows,
                        final_id,
                        page.status,
                        page.looped,
                    )
                    .await?;
            }

            if kind.is_sitemap() && sitemap.is_none() && !page.body.is_empty() {
                stats.parse_errors += 1;
            }

            let record_kind = match &sitemap {
                Some(SitemapDocument::Index(_)) => UrlKind::SitemapIndex,
                Some(SitemapDocument::UrlSet(_)) => UrlKind::Sitemap,
                None => kind,
            };
            store.set_url_kind(final_id, record_kind).await?;
            if final_id != leased.url_id {
                store.set_url_kind(leased.url_id, record_kind).await?;
            }

            let artifact = PageArtifact::build(
                final_id,
                page.status,
                page.content_type.clone(),
                page.encoding.clone(),
                &page.headers,
                &page.body,
            )?;
            pages.write_page(artifact).await?;

            if let Some(link_header) = page.header("link") {
                for (lang, href) in parse_link_header_alternates(link_header) {
                    if let Ok(href_url) = normalize_url(&href) {
                        let class = classify_url(href_url.as_str(), ctx, false);
                        let (href_id, _) = store.intern(seen_with(&href_url, None, class)).await?;
                        store
                            .write_hreflang(HreflangSource::Header, final_id, lang, href_id)
                            .await?;
                    }
                }
            }

            let mut html_meta_allows = true;
            if let Some(extracted) = extracted.as_deref() {
                html_meta_allows = extracted.meta_allows_indexing();
                record_extracted(store, ctx, config, leased, final_id, &final_url, extracted)
                    .await?;
            }

            if let Some(document) = sitemap {
                record_midcrawl_sitemap(store, ctx, config, &final_url, document).await?;
            }

            store
                .write_indexability(evaluate(&IndexabilityInput {
                    url_id: leased.url_id,
                    robots_txt_allows: outcome.verdict.allowed,
                    robots_txt_unavailable: outcome.verdict.unavailable,
                    html_meta_allows,
                    x_robots_tag: page.header("x-robots-tag").map(|s| s.to_string()),
                    final_status: page.status,
                }))
                .await?;

            tracing::info!(
                "[{:>3}] {} -> {} (depth {}, {})",
                page.status,
                leased.url,
                final_url,
                leased.depth,
                record_kind.as_str()
            );
        }
    }

    Ok(())
}

/// Writes content, links, and HTML hreflang rows; enqueues children.
async fn record_extracted(
    store: &CrawlStore,
    ctx: &ClassifyContext,
    config: &CrawlConfig,
    leased: &LeasedUrl,
    final_id: i64,
    final_url: &Url,
    extracted: &ExtractedPage,
) -> Result<()> {
    let allow_external = !config.limits.same_host_only;

    let canonical_url_id = match &extracted.canonical {
        Some(canonical) => match normalize_url(canonical) {
            Ok(url) => {
                let class = classify_url(url.as_str(), ctx, false);
                Some(store.intern(seen_with(&url, None, class)).await?.0)
            }
            Err(_) => None,
        },
        None => None,
    };

    let mut internal_count: u32 = 0;
    let mut external_count: u32 = 0;
    let mut link_rows: Vec<LinkRow> = Vec::new();
    let mut children: Vec<i64> = Vec::new();

    for anchor in &extracted.anchors {
        match anchor.class {
            UrlClass::Mail => {
                // Addresses are registered but never enqueued.
                store
                    .intern(UrlSeen {
                        url: anchor.resolved.clone(),
                        host: String::new(),
                        scheme: "mailto".to_string(),
                        kind: Some(UrlKind::Other),
                        class: UrlClass::Mail,
                    })
                    .await?;
                continue;
            }
            UrlClass::Other => continue,
            _ => {}
        }

        let target_url = match Url::parse(&anchor.resolved) {
            Ok(url) => url,
            Err(_) => continue,
        };
        let (target_id, _) = store
            .intern(seen_with(&target_url, None, anchor.class))
            .await?;

        if anchor.class == UrlClass::Internal {
            internal_count += 1;
            link_rows.push(LinkRow {
                target_url_id: target_id,
                anchor_text: anchor.text.clone(),
                xpath: anchor.xpath.clone(),
                href: anchor.href.clone(),
                rel_flags: anchor.rel_flags,
            });
        } else {
            external_count += 1;
        }

        if should_enqueue(anchor.class, allow_external) {
            children.push(target_id);
        }
    }

    store
        .write_content(ContentRecord {
            url_id: final_id,
            title: extracted.title.clone(),
            meta_description: extracted.meta_description.clone(),
            h1_count: extracted.h1_count,
            h2_count: extracted.h2_count,
            first_h1: extracted.first_h1.clone(),
            first_h2: extracted.first_h2.clone(),
            word_count: extracted.word_count,
            html_lang: extracted.html_lang.clone(),
            canonical_url_id,
            meta_robots: extracted.meta_robots_joined(),
            internal_link_count: internal_count,
            external_link_count: external_count,
        })
        .await?;

    if !link_rows.is_empty() {
        store.write_links(final_id, link_rows).await?;
    }

    for alt in &extracted.hreflangs {
        if let Ok(href_url) = normalize_with_base(final_url, &alt.href) {
            let class = classify_url(href_url.as_str(), ctx, false);
            let (href_id, _) = store.intern(seen_with(&href_url, None, class)).await?;
            store
                .write_hreflang(HreflangSource::Html, final_id, alt.lang.clone(), href_id)
                .await?;
        }
    }

    let child_depth = leased.depth + 1;
    for target_id in children {
        store
            .enqueue(
                target_id,
                child_depth,
                Some(leased.url_id),
                config.limits.max_depth,
            )
            .await?;
    }

    Ok(())
}

/// Handles a sitemap fetched through the frontier mid-crawl. Entries and
/// child sitemaps enter the frontier at depth 0, like any other sitemap
/// source.
async fn record_midcrawl_sitemap(
    store: &CrawlStore,
    ctx: &ClassifyContext,
    config: &CrawlConfig,
    sitemap_url: &Url,
    document: SitemapDocument,
) -> Result<()> {
    match document {
        SitemapDocument::Index(child_sitemaps) => {
            for child in child_sitemaps {
                let url = match normalize_url(&child) {
                    Ok(url) => url,
                    Err(_) => continue,
                };
                let class = classify_url(url.as_str(), ctx, true);
                let (url_id, _) = store
                    .intern(seen_with(&url, Some(UrlKind::Sitemap), class))
                    .await?;
                if should_enqueue(class, !config.limits.same_host_only) {
                    store
                        .enqueue(url_id, 0, None, config.limits.max_depth)
                        .await?;
                }
            }
        }
        SitemapDocument::UrlSet(entries) => {
            let discovered = entries
                .into_iter()
                .map(|entry| DiscoveredUrl {
                    entry,
                    source_sitemap: sitemap_url.to_string(),
                })
                .collect();
            record_sitemap_urls(store, ctx, config, discovered).await?;
        }
    }
    Ok(())
}

fn seen_for(url: &Url, ctx: &ClassifyContext, kind: Option<UrlKind>, from_sitemap: bool) -> UrlSeen {
    let class = classify_url(url.as_str(), ctx, from_sitemap);
    seen_with(url, kind, class)
}

fn seen_with(url: &Url, kind: Option<UrlKind>, class: UrlClass) -> UrlSeen {
    UrlSeen {
        url: url.to_string(),
        host: url.host_str().unwrap_or_default().to_lowercase(),
        scheme: url.scheme().to_string(),
        kind,
        class,
    }
}

/// Parses `Link` response headers for `rel="alternate"` entries carrying a
/// `hreflang` parameter. Returns `(language, href)` pairs.
pub fn parse_link_header_alternates(value: &str) -> Vec<(String, String)> {
    let mut alternates = Vec::new();

    for part in value.split(',') {
        let mut segments = part.split(';');
        let target = match segments.next() {
            Some(t) => t.trim(),
            None => continue,
        };
        if !target.starts_with('<') || !target.ends_with('>') {
            continue;
        }
        let href = target[1..target.len() - 1].trim();
        if href.is_empty() {
            continue;
        }

        let mut is_alternate = false;
        let mut hreflang: Option<String> = None;
        for segment in segments {
            if let Some((key, raw)) = segment.split_once('=') {
                let key = key.trim().to_lowercase();
                let val = raw.trim().trim_matches('"');
                match key.as_str() {
                    "rel" => {
                        is_alternate = val.split_whitespace().any(|r| r.eq_ignore_ascii_case("alternate"))
                    }
                    "hreflang" => hreflang = Some(val.to_lowercase()),
                    _ => {}
                }
            }
        }

        if is_alternate {
            if let Some(lang) = hreflang {
                if !lang.is_empty() {
                    alternates.push((lang, href.to_string()));
                }
            }
        }
    }

    alternates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_link_header_single() {
        let header = r#"<https://a.example/fr>; rel="alternate"; hreflang="fr-FR""#;
        assert_eq!(
            parse_link_header_alternates(header),
            vec![("fr-fr".to_string(), "https://a.example/fr".to_string())]
        );
    }

    #[test]
    fn test_parse_link_header_multiple() {
        let header =
            r#"<https://a.example/de>; rel="alternate"; hreflang=de, <https://a.example/>; rel="canonical""#;
        assert_eq!(
            parse_link_header_alternates(header),
            vec![("de".to_string(), "https://a.example/de".to_string())]
        );
    }

    #[test]
    fn test_parse_link_header_ignores_non_alternate() {
        let header = r#"<https://a.example/style.css>; rel="preload"; hreflang="en""#;
        assert!(parse_link_header_alternates(header).is_empty());
    }

    #[test]
    fn test_parse_link_header_requires_hreflang() {
        let header = r#"<https://a.example/other>; rel="alternate""#;
        assert!(parse_link_header_alternates(header).is_empty());
    }

    #[test]
    fn test_parse_link_header_garbage() {
        assert!(parse_link_header_alternates("not a link header").is_empty());
        assert!(parse_link_header_alternates("").is_empty());
    }

    #[test]
    fn test_seen_with_lowercases_host() {
        let url = Url::parse("https://A.Example/x").unwrap();
        let seen = seen_with(&url, Some(UrlKind::Html), UrlClass::Internal);
        assert_eq!(seen.host, "a.example");
        assert_eq!(seen.scheme, "https");
        assert_eq!(seen.kind, Some(UrlKind::Html));
    }
}
