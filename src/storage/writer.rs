//! Writer pool
//!
//! All mutations of a database funnel through a small pool of dedicated
//! writer threads fed by a bounded queue. Each worker owns its own SQLite
//! connection (WAL mode with a busy timeout, so writers interleave safely).
//! When the queue cannot accept a job within the enqueue timeout the caller
//! gets [`StorageError::Busy`], which is retryable.

use crate::storage::{schema, StorageError, StorageResult};
use crossbeam_channel::{bounded, Sender, TrySendError};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::Duration;

type Job = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

/// Maximum number of jobs waiting in the queue
const QUEUE_CAPACITY: usize = 256;

/// How long an enqueue may block before reporting `Busy`
const ENQUEUE_TIMEOUT: Duration = Duration::from_secs(2);

/// Backoff schedule for internal `Busy` retries
const BUSY_BACKOFF: &[Duration] = &[Duration::from_millis(100), Duration::from_millis(500)];

/// A pool of writer threads bound to one database file
#[derive(Debug)]
pub struct WriterPool {
    tx: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    path: PathBuf,
}

impl WriterPool {
    /// Opens the database, verifies/creates the schema, and starts `workers`
    /// writer threads.
    pub fn open(path: &Path, schema_sql: &'static str, workers: usize) -> StorageResult<Self> {
        // Schema check happens once, up front, on a dedicated connection so a
        // version mismatch is reported before any worker starts.
        let setup = Connection::open(path)?;
        schema::configure_connection(&setup)?;
        schema::ensure_schema(&setup, schema_sql)?;
        drop(setup);

        let (tx, rx) = bounded::<Job>(QUEUE_CAPACITY);
        let mut handles = Vec::with_capacity(workers.max(1));

        for i in 0..workers.max(1) {
            let rx = rx.clone();
            let worker_path = path.to_path_buf();
            let handle = std::thread::Builder::new()
                .name(format!("storage-writer-{i}"))
                .spawn(move || {
                    let mut conn = match Connection::open(&worker_path) {
                        Ok(conn) => conn,
                        Err(e) => {
                            tracing::error!("storage worker failed to open database: {e}");
                            return;
                        }
                    };
                    if let Err(e) = schema::configure_connection(&conn) {
                        tracing::error!("storage worker failed to configure connection: {e}");
                        return;
                    }
                    while let Ok(job) = rx.recv() {
                        job(&mut conn);
                    }
                })?;
            handles.push(handle);
        }

        Ok(Self {
            tx: Some(tx),
            workers: handles,
            path: path.to_path_buf(),
        })
    }

    /// Runs a write job on a pool worker and awaits its result.
    pub async fn run<T, F>(&self, f: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StorageResult<T> + Send + 'static,
    {
        let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
        let job: Job = Box::new(move |conn| {
            let _ = reply_tx.send(f(conn));
        });

        let tx = self.tx.as_ref().ok_or(StorageError::WriterGone)?;
        match tx.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => {
                // Backpressure: fall back to a bounded blocking send.
                match tx.send_timeout(job, ENQUEUE_TIMEOUT) {
                    Ok(()) => {}
                    Err(crossbeam_channel::SendTimeoutError::Timeout(_)) => {
                        return Err(StorageError::Busy)
                    }
                    Err(crossbeam_channel::SendTimeoutError::Disconnected(_)) => {
                        return Err(StorageError::WriterGone)
                    }
                }
            }
            Err(TrySendError::Disconnected(_)) => return Err(StorageError::WriterGone),
        }

        reply_rx.await.map_err(|_| StorageError::WriterGone)?
    }

    /// Like [`run`](Self::run) but retries `Busy` with a short backoff before
    /// giving up.
    pub async fn run_retrying<T, F>(&self, f: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StorageResult<T> + Send + Clone + 'static,
    {
        for delay in BUSY_BACKOFF {
            match self.run(f.clone()).await {
                Err(StorageError::Busy) => {
                    tracing::debug!("storage queue busy, retrying in {delay:?}");
                    tokio::time::sleep(*delay).await;
                }
                other => return other,
            }
        }
        self.run(f).await
    }

    /// Path of the backing database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drains the queue and joins every worker. Called at the end of a run so
    /// partial state is flushed before the process exits.
    pub fn shutdown(mut self) {
        self.close_and_join();
    }

    fn close_and_join(&mut self) {
        self.tx.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for WriterPool {
    fn drop(&mut self) {
        self.close_and_join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::params;
    use tempfile::TempDir;

    const TEST_SCHEMA: &str = "CREATE TABLE IF NOT EXISTS kv (k TEXT PRIMARY KEY, v TEXT);";

    fn pool_in(dir: &TempDir) -> WriterPool {
        WriterPool::open(&dir.path().join("test.db"), TEST_SCHEMA, 2).unwrap()
    }

    #[tokio::test]
    async fn test_run_executes_job() {
        let dir = TempDir::new().unwrap();
        let pool = pool_in(&dir);

        pool.run(|conn| {
            conn.execute("INSERT INTO kv (k, v) VALUES ('a', '1')", [])?;
            Ok(())
        })
        .await
        .unwrap();

        let count: i64 = pool
            .run(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM kv", [], |row| row.get(0))?)
            })
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_concurrent_jobs() {
        let dir = TempDir::new().unwrap();
        let pool = std::sync::Arc::new(pool_in(&dir));

        let mut handles = Vec::new();
        for i in 0..20 {
            let pool = std::sync::Arc::clone(&pool);
            handles.push(tokio::spawn(async move {
                pool.run(move |conn| {
                    conn.execute(
                        "INSERT OR REPLACE INTO kv (k, v) VALUES (?1, ?2)",
                        params![format!("k{i}"), format!("{i}")],
                    )?;
                    Ok(())
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let count: i64 = pool
            .run(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM kv", [], |row| row.get(0))?))
            .await
            .unwrap();
        assert_eq!(count, 20);
    }

    #[tokio::test]
    async fn test_schema_mismatch_refuses_to_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.db");

        let conn = Connection::open(&path).unwrap();
        conn.execute(
            "CREATE TABLE meta (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO meta (key, value) VALUES ('schema_version', '999')",
            [],
        )
        .unwrap();
        drop(conn);

        let err = WriterPool::open(&path, TEST_SCHEMA, 1).unwrap_err();
        assert!(matches!(err, StorageError::SchemaMismatch { .. }));
    }

    #[tokio::test]
    async fn test_shutdown_flushes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.db");
        let pool = WriterPool::open(&path, TEST_SCHEMA, 1).unwrap();

        pool.run(|conn| {
            conn.execute("INSERT INTO kv (k, v) VALUES ('x', 'y')", [])?;
            Ok(())
        })
        .await
        .unwrap();
        pool.shutdown();

        let conn = Connection::open(&path).unwrap();
        let v: String = conn
            .query_row("SELECT v FROM kv WHERE k = 'x'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(v, "y");
    }
}
