//! Raw page artifact store
//!
//! Holds the bulky fetch artifacts (zlib-compressed headers and bodies) in a
//! database of its own so the crawl metadata database stays small and fast to
//! query. `url_id` values refer to the companion crawl database; SQLite
//! cannot enforce that across files, so the controller is the only writer of
//! both and keeps them consistent.

use crate::storage::writer::WriterPool;
use crate::storage::{compress_blob, now_ts, schema, StorageResult};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// A fetched page ready to be persisted
#[derive(Debug, Clone)]
pub struct PageArtifact {
    pub url_id: i64,
    pub final_status: u16,
    pub content_type: Option<String>,
    pub encoding: Option<String>,
    /// Already zlib-compressed response headers (JSON object)
    pub headers_zlib: Vec<u8>,
    /// Already zlib-compressed response body
    pub body_zlib: Vec<u8>,
}

impl PageArtifact {
    /// Compresses headers and body into an artifact.
    ///
    /// Bodies are compressed as soon as they leave the fetcher so the raw
    /// bytes never sit in memory alongside a parsed DOM.
    pub fn build(
        url_id: i64,
        final_status: u16,
        content_type: Option<String>,
        encoding: Option<String>,
        headers: &HashMap<String, String>,
        body: &[u8],
    ) -> StorageResult<Self> {
        let headers_json = serde_json::to_vec(headers).unwrap_or_else(|_| b"{}".to_vec());
        Ok(Self {
            url_id,
            final_status,
            content_type,
            encoding,
            headers_zlib: compress_blob(&headers_json)?,
            body_zlib: compress_blob(body)?,
        })
    }
}

/// Async repository over the pages database
pub struct PageStore {
    pool: Arc<WriterPool>,
}

impl PageStore {
    pub fn open(path: &Path, workers: usize) -> StorageResult<Self> {
        let pool = WriterPool::open(path, schema::PAGES_SCHEMA, workers)?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Writes (or atomically overwrites) the artifact row for a URL.
    pub async fn write_page(&self, artifact: PageArtifact) -> StorageResult<()> {
        self.pool
            .run_retrying(move |conn| {
                conn.execute(
                    "INSERT INTO pages (url_id, final_status, fetched_at, content_type,
                                        encoding, headers_zlib, body_zlib)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(url_id) DO UPDATE SET
                       final_status = excluded.final_status,
                       fetched_at = excluded.fetched_at,
                       content_type = excluded.content_type,
                       encoding = excluded.encoding,
                       headers_zlib = excluded.headers_zlib,
                       body_zlib = excluded.body_zlib",
                    rusqlite::params![
                        artifact.url_id,
                        artifact.final_status,
                        now_ts(),
                        artifact.content_type,
                        artifact.encoding,
                        artifact.headers_zlib,
                        artifact.body_zlib,
                    ],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn count_pages(&self) -> StorageResult<u64> {
        self.pool
            .run(|conn| {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM pages", [], |row| row.get(0))?;
                Ok(count as u64)
            })
            .await
    }

    /// Returns whether an artifact row exists for a URL.
    pub async fn has_page(&self, url_id: i64) -> StorageResult<bool> {
        self.pool
            .run(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM pages WHERE url_id = ?1",
                    rusqlite::params![url_id],
                    |row| row.get(0),
                )?;
                Ok(count > 0)
            })
            .await
    }

    /// Flushes pending writes and stops the writer threads.
    pub fn shutdown(self) {
        if let Ok(pool) = Arc::try_unwrap(self.pool) {
            pool.shutdown();
        }
    }
}
