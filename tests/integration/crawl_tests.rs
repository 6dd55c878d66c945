//! Integration tests for the crawl engine
//!
//! These tests run the full controller against wiremock servers and then
//! inspect the resulting database pair directly.

use paradise_crawler::config::{db_paths_for_host, CrawlConfig, CrawlLimits, HttpConfig};
use paradise_crawler::crawler::crawl;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Configuration tuned for tests: no pacing, shallow depth, sitemaps off
/// unless a test turns them on.
fn test_config(data_dir: &Path) -> CrawlConfig {
    CrawlConfig {
        http: HttpConfig {
            user_agent: "TestBot/1.0".to_string(),
            timeout_secs: 5,
            max_concurrency: 4,
            delay_between_requests: 0.0,
            respect_robots_txt: true,
            skip_robots_sitemaps: false,
            skip_sitemaps: true,
            max_redirects: 10,
        },
        limits: CrawlLimits {
            max_pages: None,
            max_depth: 1,
            same_host_only: true,
        },
        use_js: false,
        reset_frontier: false,
        storage_workers: 2,
        data_dir: data_dir.to_path_buf(),
    }
}

fn crawl_db(data_dir: &Path) -> PathBuf {
    let (_pages, crawl) = db_paths_for_host(data_dir, "127.0.0.1");
    crawl
}

fn pages_db(data_dir: &Path) -> PathBuf {
    let (pages, _crawl) = db_paths_for_host(data_dir, "127.0.0.1");
    pages
}

fn count(conn: &Connection, sql: &str) -> i64 {
    conn.query_row(sql, [], |row| row.get(0)).unwrap()
}

fn url_id(conn: &Connection, url: &str) -> Option<i64> {
    conn.query_row(
        "SELECT id FROM urls WHERE url = ?1",
        rusqlite::params![url],
        |row| row.get(0),
    )
    .ok()
}

async fn mount_robots(server: &MockServer, body: &str) {
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body.to_string()))
        .mount(server)
        .await;
}

fn html_response(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_string(body.to_string())
        .insert_header("content-type", "text/html; charset=utf-8")
}

#[tokio::test]
async fn test_crawl_fetches_seed_and_children() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_robots(&server, "User-agent: *\nAllow: /").await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_response(
            r#"<html><head><title>Home</title></head><body>
               <a href="/x">X</a>
               <a href="/y">Y</a>
               </body></html>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/x"))
        .respond_with(html_response("<html><head><title>X</title></head><body>x page</body></html>"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/y"))
        .respond_with(html_response("<html><head><title>Y</title></head><body>y page</body></html>"))
        .mount(&server)
        .await;

    let outcome = crawl(&server.uri(), test_config(dir.path())).await.unwrap();

    assert_eq!(outcome.stats.pages_fetched, 3);
    assert_eq!(outcome.frontier.done, 3);
    assert_eq!(outcome.frontier.queued, 0);
    assert!(!outcome.interrupted);

    let conn = Connection::open(crawl_db(dir.path())).unwrap();
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM content"), 3);
    assert_eq!(
        count(&conn, "SELECT COUNT(*) FROM internal_links"),
        2,
        "root links to both children"
    );

    let pages = Connection::open(pages_db(dir.path())).unwrap();
    assert_eq!(count(&pages, "SELECT COUNT(*) FROM pages"), 3);
}

#[tokio::test]
async fn test_redirect_chain_recorded() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let base = server.uri();

    mount_robots(&server, "User-agent: *\nAllow: /").await;
    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(ResponseTemplate::new(301).insert_header("location", "/new"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/new"))
        .respond_with(html_response(
            "<html><head><title>New home</title></head><body>moved</body></html>",
        ))
        .mount(&server)
        .await;

    let outcome = crawl(&format!("{base}/old"), test_config(dir.path()))
        .await
        .unwrap();
    assert_eq!(outcome.stats.pages_fetched, 1);

    let conn = Connection::open(crawl_db(dir.path())).unwrap();
    let old_id = url_id(&conn, &format!("{base}/old")).unwrap();
    let new_id = url_id(&conn, &format!("{base}/new")).unwrap();

    let (final_target, chain_length, final_status): (i64, i64, i64) = conn
        .query_row(
            "SELECT final_target_url_id, chain_length, final_status FROM redirects WHERE source_url_id = ?1",
            rusqlite::params![old_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .unwrap();
    assert_eq!(final_target, new_id);
    assert_eq!(chain_length, 1);
    assert_eq!(final_status, 200);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM redirect_hops"), 1);

    // The page artifact belongs to the final URL, not the redirect source.
    let pages = Connection::open(pages_db(dir.path())).unwrap();
    assert_eq!(
        count(&pages, "SELECT COUNT(*) FROM pages"),
        1
    );
    let stored_for_new: i64 = pages
        .query_row(
            "SELECT COUNT(*) FROM pages WHERE url_id = ?1",
            rusqlite::params![new_id],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(stored_for_new, 1);
}

#[tokio::test]
async fn test_robots_disallow_blocks_fetch() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_robots(&server, "User-agent: *\nDisallow: /private").await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_response(
            r#"<html><body><a href="/private">secret</a><a href="/open">open</a></body></html>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/open"))
        .respond_with(html_response("<html><body>fine</body></html>"))
        .mount(&server)
        .await;
    // /private must never be requested.
    Mock::given(method("GET"))
        .and(path("/private"))
        .respond_with(html_response("should not happen"))
        .expect(0)
        .mount(&server)
        .await;

    let outcome = crawl(&server.uri(), test_config(dir.path())).await.unwrap();
    assert_eq!(outcome.stats.robots_denied, 1);
    assert_eq!(outcome.stats.pages_fetched, 2);

    let conn = Connection::open(crawl_db(dir.path())).unwrap();
    let private_id = url_id(&conn, &format!("{}/private", server.uri())).unwrap();

    let (robots_allows, overall): (bool, bool) = conn
        .query_row(
            "SELECT robots_txt_allows, overall_indexable FROM indexability WHERE url_id = ?1",
            rusqlite::params![private_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert!(!robots_allows);
    assert!(!overall);

    let pages = Connection::open(pages_db(dir.path())).unwrap();
    let private_pages: i64 = pages
        .query_row(
            "SELECT COUNT(*) FROM pages WHERE url_id = ?1",
            rusqlite::params![private_id],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(private_pages, 0, "disallowed URL must have no page row");
}

#[tokio::test]
async fn test_resume_refetches_nothing() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_robots(&server, "User-agent: *\nAllow: /").await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_response(
            r#"<html><body><a href="/x">X</a></body></html>"#,
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/x"))
        .respond_with(html_response("<html><body>x</body></html>"))
        .expect(1)
        .mount(&server)
        .await;

    let first = crawl(&server.uri(), test_config(dir.path())).await.unwrap();
    assert_eq!(first.stats.pages_fetched, 2);

    // Same seed, no reset: everything is already done, nothing refetches.
    let second = crawl(&server.uri(), test_config(dir.path())).await.unwrap();
    assert_eq!(second.stats.pages_fetched, 0);
    assert_eq!(second.frontier.done, 2);
    assert_eq!(second.frontier.queued, 0);
}

#[tokio::test]
async fn test_reset_frontier_refetches_but_keeps_urls() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_robots(&server, "User-agent: *\nAllow: /").await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_response(
            r#"<html><body><a href="/x">X</a></body></html>"#,
        ))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/x"))
        .respond_with(html_response("<html><body>x</body></html>"))
        .expect(2)
        .mount(&server)
        .await;

    let first = crawl(&server.uri(), test_config(dir.path())).await.unwrap();
    assert_eq!(first.stats.pages_fetched, 2);

    let conn = Connection::open(crawl_db(dir.path())).unwrap();
    let urls_after_first = count(&conn, "SELECT COUNT(*) FROM urls");
    drop(conn);

    let mut config = test_config(dir.path());
    config.reset_frontier = true;
    let second = crawl(&server.uri(), config).await.unwrap();
    assert_eq!(second.stats.pages_fetched, 2);

    let conn = Connection::open(crawl_db(dir.path())).unwrap();
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM urls"), urls_after_first);
}

#[tokio::test]
async fn test_max_pages_one_fetches_exactly_one() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_robots(&server, "User-agent: *\nAllow: /").await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_response(
            r#"<html><body><a href="/x">X</a><a href="/y">Y</a></body></html>"#,
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/x"))
        .respond_with(html_response("x"))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/y"))
        .respond_with(html_response("y"))
        .expect(0)
        .mount(&server)
        .await;

    let mut config = test_config(dir.path());
    config.limits.max_pages = Some(1);
    let outcome = crawl(&server.uri(), config).await.unwrap();

    assert_eq!(outcome.stats.pages_fetched, 1);
    assert_eq!(outcome.frontier.done, 1);
    assert_eq!(outcome.frontier.queued, 2, "children stay queued for resume");
}

#[tokio::test]
async fn test_max_depth_zero_fetches_only_seed() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_robots(&server, "User-agent: *\nAllow: /").await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_response(
            r#"<html><body><a href="/x">X</a></body></html>"#,
        ))
        .mount(&server)
        .await;

    let mut config = test_config(dir.path());
    config.limits.max_depth = 0;
    let outcome = crawl(&server.uri(), config).await.unwrap();

    assert_eq!(outcome.stats.pages_fetched, 1);
    assert_eq!(outcome.frontier.done, 1);
    assert_eq!(outcome.frontier.queued, 0, "no children enqueued at depth 0");
}

#[tokio::test]
async fn test_sitemap_discovery_seeds_frontier_at_depth_zero() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let base = server.uri();

    mount_robots(
        &server,
        &format!("User-agent: *\nAllow: /\nSitemap: {base}/sitemap.xml"),
    )
    .await;

    let index = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <sitemap><loc>{base}/sm1.xml</loc></sitemap>
  <sitemap><loc>{base}/sm2.xml</loc></sitemap>
</sitemapindex>"#
    );
    let sm1 = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9"
        xmlns:xhtml="http://www.w3.org/1999/xhtml">
  <url>
    <loc>{base}/page1</loc>
    <lastmod>2024-05-01</lastmod>
    <xhtml:link rel="alternate" hreflang="fr" href="{base}/fr/page1"/>
  </url>
  <url><loc>{base}/page2</loc></url>
  <url><loc>{base}/page3</loc></url>
</urlset>"#
    );
    let sm2 = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url><loc>{base}/page4</loc></url>
  <url><loc>{base}/page5</loc></url>
</urlset>"#
    );

    for (route, body) in [
        ("/sitemap.xml", index),
        ("/sm1.xml", sm1),
        ("/sm2.xml", sm2),
    ] {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(body)
                    .insert_header("content-type", "application/xml"),
            )
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_response("<html><body>home</body></html>"))
        .mount(&server)
        .await;

    let mut config = test_config(dir.path());
    config.http.skip_sitemaps = false;
    // Only the seed is fetched; discovery happens before the main loop.
    config.limits.max_pages = Some(1);
    let outcome = crawl(&base, config).await.unwrap();
    assert_eq!(outcome.stats.pages_fetched, 1);

    let conn = Connection::open(crawl_db(dir.path())).unwrap();
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM sitemaps_listed"), 5);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM hreflang_sitemap"), 1);

    // Sitemap URLs are crawl roots: every queued row sits at depth 0.
    let max_queued_depth: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(depth), 0) FROM frontier WHERE status = 'queued'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(max_queued_depth, 0);
    assert_eq!(outcome.frontier.queued, 5);
}

#[tokio::test]
async fn test_fetch_failure_marks_done_with_reason() {
    let dir = TempDir::new().unwrap();

    // Port 9 is discard; connections fail immediately.
    let mut config = test_config(dir.path());
    config.http.timeout_secs = 2;
    let outcome = crawl("http://127.0.0.1:9/", config).await.unwrap();

    assert_eq!(outcome.stats.pages_fetched, 0);
    assert!(outcome.stats.network_errors + outcome.stats.timeouts >= 1);
    assert_eq!(outcome.frontier.done, 1);
    assert_eq!(outcome.frontier.queued, 0);

    let conn = Connection::open(crawl_db(dir.path())).unwrap();
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM indexability"), 1);
    assert_eq!(
        count(
            &conn,
            "SELECT COUNT(*) FROM indexability WHERE overall_indexable = 0"
        ),
        1
    );
}
