//! Crawl metadata store
//!
//! Repository over the crawl database: the URL registry, the persistent
//! frontier, and the normalized SEO tables (content, links, redirects,
//! hreflang, indexability, sitemap provenance). The SQL lives in
//! connection-level functions in [`ops`]; [`CrawlStore`] is the async facade
//! that routes them through the writer pool.

use crate::storage::writer::WriterPool;
use crate::storage::{now_ts, schema, StorageResult};
use crate::url::{UrlClass, UrlKind};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

/// A URL being registered, with the metadata known at sighting time
#[derive(Debug, Clone)]
pub struct UrlSeen {
    pub url: String,
    pub host: String,
    pub scheme: String,
    pub kind: Option<UrlKind>,
    pub class: UrlClass,
}

/// A frontier row handed to a fetch worker
#[derive(Debug, Clone)]
pub struct LeasedUrl {
    pub url_id: i64,
    pub url: String,
    pub depth: u32,
    pub parent_id: Option<i64>,
}

/// Extracted content destined for the `content` table
#[derive(Debug, Clone, Default)]
pub struct ContentRecord {
    pub url_id: i64,
    pub title: Option<String>,
    pub meta_description: Option<String>,
    pub h1_count: u32,
    pub h2_count: u32,
    pub first_h1: Option<String>,
    pub first_h2: Option<String>,
    pub word_count: u32,
    pub html_lang: Option<String>,
    pub canonical_url_id: Option<i64>,
    /// Ordered, comma-joined meta robots tokens; interned on write
    pub meta_robots: Option<String>,
    pub internal_link_count: u32,
    pub external_link_count: u32,
}

/// One internal link occurrence on a page
#[derive(Debug, Clone)]
pub struct LinkRow {
    pub target_url_id: i64,
    pub anchor_text: String,
    pub xpath: String,
    pub href: String,
    pub rel_flags: i64,
}

/// One hop of a redirect chain
#[derive(Debug, Clone)]
pub struct RedirectHopRow {
    pub hop_index: u32,
    pub target_url_id: i64,
    pub status_code: u16,
}

/// Crawlability verdict for one URL
#[derive(Debug, Clone)]
pub struct IndexabilityRecord {
    pub url_id: i64,
    pub robots_txt_allows: bool,
    pub html_meta_allows: bool,
    pub http_header_allows: bool,
    pub overall_indexable: bool,
    pub reasons: i64,
}

/// Provenance row for a URL listed in a sitemap
#[derive(Debug, Clone)]
pub struct SitemapListing {
    pub url_id: i64,
    pub sitemap_url_id: i64,
    pub lastmod: Option<String>,
    pub changefreq: Option<String>,
    pub priority: Option<f64>,
}

/// Which document declared a hreflang alternate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HreflangSource {
    Sitemap,
    Html,
    Header,
}

impl HreflangSource {
    fn table(self) -> &'static str {
        match self {
            Self::Sitemap => "hreflang_sitemap",
            Self::Html => "hreflang_html",
            Self::Header => "hreflang_header",
        }
    }
}

/// Counters surfaced in the exit summary
#[derive(Debug, Clone, Copy, Default)]
pub struct FrontierCounts {
    pub queued: u64,
    pub done: u64,
}

/// Connection-level operations; also used directly by tests
pub(crate) mod ops {
    use super::*;
    use rusqlite::{params, Connection, OptionalExtension};

    /// Rows per transaction when writing link/hreflang batches
    const LINK_BATCH_SIZE: usize = 500;

    /// Insert-or-select on the canonical URL string. Returns the stable id
    /// and whether the row was created by this call.
    pub fn intern(conn: &Connection, seen: &UrlSeen) -> StorageResult<(i64, bool)> {
        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM urls WHERE url = ?1",
                params![seen.url],
                |row| row.get(0),
            )
            .optional()?;

        let now = now_ts();
        if let Some(id) = existing {
            conn.execute(
                "UPDATE urls SET last_seen = ?1, kind = COALESCE(kind, ?2) WHERE id = ?3",
                params![now, seen.kind.map(|k| k.as_str()), id],
            )?;
            return Ok((id, false));
        }

        match conn.execute(
            "INSERT INTO urls (url, host, scheme, kind, classification, first_seen, last_seen)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                seen.url,
                seen.host,
                seen.scheme,
                seen.kind.map(|k| k.as_str()),
                seen.class.as_str(),
                now
            ],
        ) {
            Ok(_) => Ok((conn.last_insert_rowid(), true)),
            // Unique violation: another writer got there first; re-select.
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                let id: i64 = conn.query_row(
                    "SELECT id FROM urls WHERE url = ?1",
                    params![seen.url],
                    |row| row.get(0),
                )?;
                Ok((id, false))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn url_id_of(conn: &Connection, url: &str) -> StorageResult<Option<i64>> {
        Ok(conn
            .query_row("SELECT id FROM urls WHERE url = ?1", params![url], |row| {
                row.get(0)
            })
            .optional()?)
    }

    pub fn url_of(conn: &Connection, url_id: i64) -> StorageResult<Option<String>> {
        Ok(conn
            .query_row(
                "SELECT url FROM urls WHERE id = ?1",
                params![url_id],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Records the resolved kind once a URL has actually been fetched.
    pub fn set_url_kind(conn: &Connection, url_id: i64, kind: UrlKind) -> StorageResult<()> {
        conn.execute(
            "UPDATE urls SET kind = ?1 WHERE id = ?2",
            params![kind.as_str(), url_id],
        )?;
        Ok(())
    }

    /// Enqueues a URL unless a frontier row (queued or done) already exists.
    /// Returns whether a row was inserted.
    pub fn enqueue(
        conn: &Connection,
        url_id: i64,
        depth: u32,
        parent_id: Option<i64>,
    ) -> StorageResult<bool> {
        let now = now_ts();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO frontier (url_id, depth, parent_id, status, enqueued_at, updated_at)
             VALUES (?1, ?2, ?3, 'queued', ?4, ?4)",
            params![url_id, depth, parent_id, now],
        )?;
        Ok(inserted > 0)
    }

    /// Selects up to `limit` queued rows in insertion order, skipping ids in
    /// `exclude` (the in-process leased set).
    pub fn lease(
        conn: &Connection,
        limit: usize,
        exclude: &HashSet<i64>,
    ) -> StorageResult<Vec<LeasedUrl>> {
        let mut stmt = conn.prepare(
            "SELECT f.url_id, u.url, f.depth, f.parent_id
             FROM frontier f JOIN urls u ON f.url_id = u.id
             WHERE f.status = 'queued'
             ORDER BY f.id
             LIMIT ?1",
        )?;

        let fetch_limit = (limit + exclude.len()) as i64;
        let rows = stmt.query_map(params![fetch_limit], |row| {
            Ok(LeasedUrl {
                url_id: row.get(0)?,
                url: row.get(1)?,
                depth: row.get(2)?,
                parent_id: row.get(3)?,
            })
        })?;

        let mut leased = Vec::with_capacity(limit);
        for row in rows {
            let row = row?;
            if exclude.contains(&row.url_id) {
                continue;
            }
            leased.push(row);
            if leased.len() >= limit {
                break;
            }
        }
        Ok(leased)
    }

    /// Transitions frontier rows to `done`. Completing an already-done row is
    /// a no-op.
    pub fn mark_done(conn: &Connection, url_ids: &[i64]) -> StorageResult<()> {
        let now = now_ts();
        let mut stmt =
            conn.prepare("UPDATE frontier SET status = 'done', updated_at = ?1 WHERE url_id = ?2")?;
        for url_id in url_ids {
            stmt.execute(params![now, url_id])?;
        }
        Ok(())
    }

    pub fn reset_frontier(conn: &Connection) -> StorageResult<()> {
        conn.execute("DELETE FROM frontier", [])?;
        Ok(())
    }

    pub fn frontier_counts(conn: &Connection) -> StorageResult<FrontierCounts> {
        let (queued, done): (i64, i64) = conn.query_row(
            "SELECT COALESCE(SUM(status = 'queued'), 0), COALESCE(SUM(status = 'done'), 0) FROM frontier",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(FrontierCounts {
            queued: queued as u64,
            done: done as u64,
        })
    }

    fn get_or_create_id(
        conn: &Connection,
        select_sql: &str,
        insert_sql: &str,
        value: &str,
    ) -> StorageResult<i64> {
        if let Some(id) = conn
            .query_row(select_sql, params![value], |row| row.get(0))
            .optional()?
        {
            return Ok(id);
        }
        conn.execute(insert_sql, params![value])?;
        Ok(conn.last_insert_rowid())
    }

    pub fn anchor_text_id(conn: &Connection, text: &str) -> StorageResult<i64> {
        get_or_create_id(
            conn,
            "SELECT id FROM anchor_texts WHERE text = ?1",
            "INSERT INTO anchor_texts (text) VALUES (?1)",
            text,
        )
    }

    pub fn xpath_id(conn: &Connection, xpath: &str) -> StorageResult<i64> {
        get_or_create_id(
            conn,
            "SELECT id FROM xpaths WHERE xpath = ?1",
            "INSERT INTO xpaths (xpath) VALUES (?1)",
            xpath,
        )
    }

    pub fn href_id(conn: &Connection, href: &str) -> StorageResult<i64> {
        get_or_create_id(
            conn,
            "SELECT id FROM hrefs WHERE href = ?1",
            "INSERT INTO hrefs (href) VALUES (?1)",
            href,
        )
    }

    pub fn meta_robots_id(conn: &Connection, directives: &str) -> StorageResult<i64> {
        get_or_create_id(
            conn,
            "SELECT id FROM meta_robots WHERE directives = ?1",
            "INSERT INTO meta_robots (directives) VALUES (?1)",
            directives,
        )
    }

    pub fn language_id(conn: &Connection, code: &str) -> StorageResult<i64> {
        get_or_create_id(
            conn,
            "SELECT id FROM hreflang_languages WHERE code = ?1",
            "INSERT INTO hreflang_languages (code) VALUES (?1)",
            code,
        )
    }

    /// Writes (or overwrites) the content row for a URL.
    pub fn write_content(conn: &Connection, record: &ContentRecord) -> StorageResult<()> {
        let meta_robots_id = match &record.meta_robots {
            Some(directives) => Some(meta_robots_id(conn, directives)?),
            None => None,
        };

        conn.execute(
            "INSERT INTO content (url_id, title, meta_description, h1_count, h2_count,
                                  first_h1, first_h2, word_count, html_lang,
                                  canonical_url_id, meta_robots_id,
                                  internal_link_count, external_link_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT(url_id) DO UPDATE SET
               title = excluded.title,
               meta_description = excluded.meta_description,
               h1_count = excluded.h1_count,
               h2_count = excluded.h2_count,
               first_h1 = excluded.first_h1,
               first_h2 = excluded.first_h2,
               word_count = excluded.word_count,
               html_lang = excluded.html_lang,
               canonical_url_id = excluded.canonical_url_id,
               meta_robots_id = excluded.meta_robots_id,
               internal_link_count = excluded.internal_link_count,
               external_link_count = excluded.external_link_count",
            params![
                record.url_id,
                record.title,
                record.meta_description,
                record.h1_count,
                record.h2_count,
                record.first_h1,
                record.first_h2,
                record.word_count,
                record.html_lang,
                record.canonical_url_id,
                meta_robots_id,
                record.internal_link_count,
                record.external_link_count,
            ],
        )?;
        Ok(())
    }

    /// Writes the internal-link inventory for one source page in bounded
    /// transactions so a large page does not hold the database for long.
    pub fn write_links(
        conn: &mut Connection,
        source_url_id: i64,
        links: &[LinkRow],
    ) -> StorageResult<()> {
        for chunk in links.chunks(LINK_BATCH_SIZE) {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR IGNORE INTO internal_links
                       (source_url_id, target_url_id, anchor_text_id, xpath_id, href_id, rel_flags)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;
                for link in chunk {
                    let anchor = if link.anchor_text.is_empty() {
                        None
                    } else {
                        Some(anchor_text_id(&tx, &link.anchor_text)?)
                    };
                    let xpath = xpath_id(&tx, &link.xpath)?;
                    let href = href_id(&tx, &link.href)?;
                    stmt.execute(params![
                        source_url_id,
                        link.target_url_id,
                        anchor,
                        xpath,
                        href,
                        link.rel_flags
                    ])?;
                }
            }
            tx.commit()?;
        }
        Ok(())
    }

    /// Records a redirect chain: one row per hop plus the materialized
    /// summary. Re-fetching replaces the previous chain.
    pub fn write_redirect_chain(
        conn: &mut Connection,
        source_url_id: i64,
        hops: &[RedirectHopRow],
        final_target_url_id: i64,
        final_status: u16,
        looped: bool,
    ) -> StorageResult<()> {
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM redirect_hops WHERE source_url_id = ?1",
            params![source_url_id],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO redirect_hops (source_url_id, hop_index, target_url_id, status_code)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for hop in hops {
                stmt.execute(params![
                    source_url_id,
                    hop.hop_index,
                    hop.target_url_id,
                    hop.status_code
                ])?;
            }
        }
        tx.execute(
            "INSERT INTO redirects (source_url_id, final_target_url_id, chain_length,
                                    final_status, looped, discovered_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(source_url_id) DO UPDATE SET
               final_target_url_id = excluded.final_target_url_id,
               chain_length = excluded.chain_length,
               final_status = excluded.final_status,
               looped = excluded.looped,
               discovered_at = excluded.discovered_at",
            params![
                source_url_id,
                final_target_url_id,
                hops.len() as i64,
                final_status,
                looped,
                now_ts()
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn write_indexability(
        conn: &Connection,
        record: &IndexabilityRecord,
    ) -> StorageResult<()> {
        conn.execute(
            "INSERT INTO indexability (url_id, robots_txt_allows, html_meta_allows,
                                       http_header_allows, overall_indexable, reasons)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(url_id) DO UPDATE SET
               robots_txt_allows = excluded.robots_txt_allows,
               html_meta_allows = excluded.html_meta_allows,
               http_header_allows = excluded.http_header_allows,
               overall_indexable = excluded.overall_indexable,
               reasons = excluded.reasons",
            params![
                record.url_id,
                record.robots_txt_allows,
                record.html_meta_allows,
                record.http_header_allows,
                record.overall_indexable,
                record.reasons
            ],
        )?;
        Ok(())
    }

    pub fn write_hreflang(
        conn: &Connection,
        source: HreflangSource,
        url_id: i64,
        code: &str,
        href_url_id: i64,
    ) -> StorageResult<()> {
        let lang_id = language_id(conn, code)?;
        let sql = format!(
            "INSERT OR IGNORE INTO {} (url_id, language_id, href_url_id) VALUES (?1, ?2, ?3)",
            source.table()
        );
        conn.execute(&sql, params![url_id, lang_id, href_url_id])?;
        Ok(())
    }

    pub fn write_sitemap_listing(
        conn: &Connection,
        listing: &SitemapListing,
    ) -> StorageResult<()> {
        conn.execute(
            "INSERT OR IGNORE INTO sitemaps_listed
               (url_id, sitemap_url_id, lastmod, changefreq, priority, discovered_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                listing.url_id,
                listing.sitemap_url_id,
                listing.lastmod,
                listing.changefreq,
                listing.priority,
                now_ts()
            ],
        )?;
        Ok(())
    }

    pub fn count_urls(conn: &Connection) -> StorageResult<u64> {
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM urls", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

/// Async repository over the crawl database
pub struct CrawlStore {
    pool: Arc<WriterPool>,
}

impl CrawlStore {
    /// Opens (or creates) the crawl database with `workers` writer threads.
    pub fn open(path: &Path, workers: usize) -> StorageResult<Self> {
        let pool = WriterPool::open(path, schema::CRAWL_SCHEMA, workers)?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    pub async fn intern(&self, seen: UrlSeen) -> StorageResult<(i64, bool)> {
        self.pool
            .run_retrying(move |conn| ops::intern(conn, &seen))
            .await
    }

    pub async fn url_of(&self, url_id: i64) -> StorageResult<Option<String>> {
        self.pool.run(move |conn| ops::url_of(conn, url_id)).await
    }

    pub async fn set_url_kind(&self, url_id: i64, kind: UrlKind) -> StorageResult<()> {
        self.pool
            .run_retrying(move |conn| ops::set_url_kind(conn, url_id, kind))
            .await
    }

    /// Enqueues unless the URL already has a frontier row or sits deeper than
    /// `max_depth`.
    pub async fn enqueue(
        &self,
        url_id: i64,
        depth: u32,
        parent_id: Option<i64>,
        max_depth: u32,
    ) -> StorageResult<bool> {
        if depth > max_depth {
            return Ok(false);
        }
        self.pool
            .run_retrying(move |conn| ops::enqueue(conn, url_id, depth, parent_id))
            .await
    }

    pub async fn lease(
        &self,
        limit: usize,
        exclude: HashSet<i64>,
    ) -> StorageResult<Vec<LeasedUrl>> {
        self.pool
            .run(move |conn| ops::lease(conn, limit, &exclude))
            .await
    }

    pub async fn mark_done(&self, url_ids: Vec<i64>) -> StorageResult<()> {
        self.pool
            .run_retrying(move |conn| ops::mark_done(conn, &url_ids))
            .await
    }

    pub async fn reset_frontier(&self) -> StorageResult<()> {
        self.pool.run(|conn| ops::reset_frontier(conn)).await
    }

    pub async fn frontier_counts(&self) -> StorageResult<FrontierCounts> {
        self.pool.run(|conn| ops::frontier_counts(conn)).await
    }

    pub async fn write_content(&self, record: ContentRecord) -> StorageResult<()> {
        self.pool
            .run_retrying(move |conn| ops::write_content(conn, &record))
            .await
    }

    pub async fn write_links(&self, source_url_id: i64, links: Vec<LinkRow>) -> StorageResult<()> {
        self.pool
            .run_retrying(move |conn| ops::write_links(conn, source_url_id, &links))
            .await
    }

    pub async fn write_redirect_chain(
        &self,
        source_url_id: i64,
        hops: Vec<RedirectHopRow>,
        final_target_url_id: i64,
        final_status: u16,
        looped: bool,
    ) -> StorageResult<()> {
        self.pool
            .run_retrying(move |conn| {
                ops::write_redirect_chain(
                    conn,
                    source_url_id,
                    &hops,
                    final_target_url_id,
                    final_status,
                    looped,
                )
            })
            .await
    }

    pub async fn write_indexability(&self, record: IndexabilityRecord) -> StorageResult<()> {
        self.pool
            .run_retrying(move |conn| ops::write_indexability(conn, &record))
            .await
    }

    pub async fn write_hreflang(
        &self,
        source: HreflangSource,
        url_id: i64,
        code: String,
        href_url_id: i64,
    ) -> StorageResult<()> {
        self.pool
            .run_retrying(move |conn| ops::write_hreflang(conn, source, url_id, &code, href_url_id))
            .await
    }

    pub async fn write_sitemap_listing(&self, listing: SitemapListing) -> StorageResult<()> {
        self.pool
            .run_retrying(move |conn| ops::write_sitemap_listing(conn, &listing))
            .await
    }

    pub async fn count_urls(&self) -> StorageResult<u64> {
        self.pool.run(|conn| ops::count_urls(conn)).await
    }

    /// Flushes pending writes and stops the writer threads.
    pub fn shutdown(self) {
        if let Ok(pool) = Arc::try_unwrap(self.pool) {
            pool.shutdown();
        }
    }
}
