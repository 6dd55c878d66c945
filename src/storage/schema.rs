//! Database schema definitions and version guard

use crate::storage::{StorageError, StorageResult};
use rusqlite::{params, Connection, OptionalExtension};

/// Version stamped into the `meta` table of both databases
pub const SCHEMA_VERSION: i64 = 1;

/// Schema for the crawl metadata database
pub const CRAWL_SCHEMA: &str = r#"
-- Central URL registry; one row per canonical URL string, immutable id
CREATE TABLE IF NOT EXISTS urls (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL UNIQUE,
    host TEXT NOT NULL,
    scheme TEXT NOT NULL,
    kind TEXT,
    classification TEXT NOT NULL,
    first_seen INTEGER NOT NULL,
    last_seen INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_urls_host ON urls(host);
CREATE INDEX IF NOT EXISTS idx_urls_classification ON urls(classification);

-- Persistent crawl frontier; one row per URL, retained after completion
CREATE TABLE IF NOT EXISTS frontier (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url_id INTEGER NOT NULL REFERENCES urls(id),
    depth INTEGER NOT NULL,
    parent_id INTEGER REFERENCES urls(id),
    status TEXT NOT NULL CHECK (status IN ('queued','done')),
    enqueued_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    UNIQUE(url_id)
);
CREATE INDEX IF NOT EXISTS idx_frontier_status ON frontier(status);

-- Normalized lookup tables
CREATE TABLE IF NOT EXISTS anchor_texts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    text TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS xpaths (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    xpath TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS hrefs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    href TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS meta_robots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    directives TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS hreflang_languages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    code TEXT NOT NULL UNIQUE
);

-- Extracted page content; one row per URL, overwritten on re-fetch
CREATE TABLE IF NOT EXISTS content (
    url_id INTEGER PRIMARY KEY REFERENCES urls(id),
    title TEXT,
    meta_description TEXT,
    h1_count INTEGER NOT NULL DEFAULT 0,
    h2_count INTEGER NOT NULL DEFAULT 0,
    first_h1 TEXT,
    first_h2 TEXT,
    word_count INTEGER NOT NULL DEFAULT 0,
    html_lang TEXT,
    canonical_url_id INTEGER REFERENCES urls(id),
    meta_robots_id INTEGER REFERENCES meta_robots(id),
    internal_link_count INTEGER NOT NULL DEFAULT 0,
    external_link_count INTEGER NOT NULL DEFAULT 0
);

-- Anchor inventory for internal links
CREATE TABLE IF NOT EXISTS internal_links (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_url_id INTEGER NOT NULL REFERENCES urls(id),
    target_url_id INTEGER NOT NULL REFERENCES urls(id),
    anchor_text_id INTEGER REFERENCES anchor_texts(id),
    xpath_id INTEGER REFERENCES xpaths(id),
    href_id INTEGER NOT NULL REFERENCES hrefs(id),
    rel_flags INTEGER NOT NULL DEFAULT 0,
    UNIQUE(source_url_id, xpath_id)
);
CREATE INDEX IF NOT EXISTS idx_internal_links_source ON internal_links(source_url_id);
CREATE INDEX IF NOT EXISTS idx_internal_links_target ON internal_links(target_url_id);

-- Redirect chains: ordered hops plus a materialized summary per source
CREATE TABLE IF NOT EXISTS redirect_hops (
    source_url_id INTEGER NOT NULL REFERENCES urls(id),
    hop_index INTEGER NOT NULL,
    target_url_id INTEGER NOT NULL REFERENCES urls(id),
    status_code INTEGER NOT NULL,
    UNIQUE(source_url_id, hop_index)
);
CREATE TABLE IF NOT EXISTS redirects (
    source_url_id INTEGER PRIMARY KEY REFERENCES urls(id),
    final_target_url_id INTEGER NOT NULL REFERENCES urls(id),
    chain_length INTEGER NOT NULL,
    final_status INTEGER NOT NULL,
    looped INTEGER NOT NULL DEFAULT 0,
    discovered_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_redirects_target ON redirects(final_target_url_id);

-- Hreflang alternates by source
CREATE TABLE IF NOT EXISTS hreflang_sitemap (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url_id INTEGER NOT NULL REFERENCES urls(id),
    language_id INTEGER NOT NULL REFERENCES hreflang_languages(id),
    href_url_id INTEGER NOT NULL REFERENCES urls(id),
    UNIQUE(url_id, language_id, href_url_id)
);
CREATE TABLE IF NOT EXISTS hreflang_html (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url_id INTEGER NOT NULL REFERENCES urls(id),
    language_id INTEGER NOT NULL REFERENCES hreflang_languages(id),
    href_url_id INTEGER NOT NULL REFERENCES urls(id),
    UNIQUE(url_id, language_id, href_url_id)
);
CREATE TABLE IF NOT EXISTS hreflang_header (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url_id INTEGER NOT NULL REFERENCES urls(id),
    language_id INTEGER NOT NULL REFERENCES hreflang_languages(id),
    href_url_id INTEGER NOT NULL REFERENCES urls(id),
    UNIQUE(url_id, language_id, href_url_id)
);

-- Crawlability verdict; one row per URL
CREATE TABLE IF NOT EXISTS indexability (
    url_id INTEGER PRIMARY KEY REFERENCES urls(id),
    robots_txt_allows INTEGER NOT NULL,
    html_meta_allows INTEGER NOT NULL,
    http_header_allows INTEGER NOT NULL,
    overall_indexable INTEGER NOT NULL,
    reasons INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_indexability_overall ON indexability(overall_indexable);

-- Provenance of URLs discovered via sitemaps
CREATE TABLE IF NOT EXISTS sitemaps_listed (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url_id INTEGER NOT NULL REFERENCES urls(id),
    sitemap_url_id INTEGER NOT NULL REFERENCES urls(id),
    lastmod TEXT,
    changefreq TEXT,
    priority REAL,
    discovered_at INTEGER NOT NULL,
    UNIQUE(url_id, sitemap_url_id)
);
CREATE INDEX IF NOT EXISTS idx_sitemaps_listed_sitemap ON sitemaps_listed(sitemap_url_id);
"#;

/// Schema for the raw page artifact database
pub const PAGES_SCHEMA: &str = r#"
-- Raw fetch artifacts; url_id refers to the companion crawl database
CREATE TABLE IF NOT EXISTS pages (
    url_id INTEGER PRIMARY KEY,
    final_status INTEGER NOT NULL,
    fetched_at INTEGER NOT NULL,
    content_type TEXT,
    encoding TEXT,
    headers_zlib BLOB,
    body_zlib BLOB
);
"#;

/// Applies connection pragmas shared by every connection the crate opens.
pub fn configure_connection(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA temp_store = MEMORY;
    ",
    )?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    Ok(())
}

/// Creates the schema after checking the version stamp.
///
/// The `meta` table is created and inspected before anything else so that a
/// database written by an incompatible build is refused untouched.
pub fn ensure_schema(conn: &Connection, schema_sql: &str) -> StorageResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS meta (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
        [],
    )?;

    let existing: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;

    match existing {
        Some(version) if version.parse::<i64>() == Ok(SCHEMA_VERSION) => {}
        Some(version) => {
            return Err(StorageError::SchemaMismatch {
                found: version,
                expected: SCHEMA_VERSION,
            });
        }
        None => {
            conn.execute(
                "INSERT INTO meta (key, value) VALUES ('schema_version', ?1)",
                params![SCHEMA_VERSION.to_string()],
            )?;
            conn.execute(
                "INSERT OR IGNORE INTO meta (key, value) VALUES ('blob_format', 'zlib')",
                [],
            )?;
        }
    }

    conn.execute_batch(schema_sql)?;
    Ok(())
}
