//! Storage layer
//!
//! Crawl state is split across two SQLite databases: `{host}_crawl.db` holds
//! normalized metadata (URLs, frontier, content, links, indexability) and
//! `{host}_pages.db` holds the bulky raw artifacts (compressed headers and
//! bodies), so analytical queries never page through large blobs.
//!
//! All writes serialize through a small pool of writer threads fed by a
//! bounded queue; see [`writer::WriterPool`].

pub mod crawl_store;
pub mod page_store;
pub mod schema;
pub mod writer;

pub use crawl_store::{CrawlStore, LeasedUrl, UrlSeen};
pub use page_store::PageStore;

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use thiserror::Error;

/// Errors from the storage layer
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("storage queue full, write could not be accepted")]
    Busy,

    #[error(
        "schema version mismatch: database has version {found}, this build expects {expected}; \
         move the database aside or re-run with a matching build"
    )]
    SchemaMismatch { found: String, expected: i64 },

    #[error("storage writer terminated")]
    WriterGone,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// `Busy` is retryable; everything else aborts the run.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, StorageError::Busy)
    }
}

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Compresses a blob with zlib. The format is recorded in each database's
/// `meta` table under `blob_format`.
pub fn compress_blob(data: &[u8]) -> StorageResult<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Decompresses a zlib blob back to its original bytes.
pub fn decompress_blob(data: &[u8]) -> StorageResult<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Current unix timestamp, used for all `*_at` columns.
pub(crate) fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}
