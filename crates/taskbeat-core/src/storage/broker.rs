//! Broker storage for the queue backend.
//!
//! The broker is a redb database addressed by `redb://<path>` URLs
//! (bare filesystem paths are accepted too). FIFO delivery comes from
//! the zero-padded enqueue-timestamp key; prefetch=1 is the worker
//! popping exactly one job per iteration.

use anyhow::{Context, Result};
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::models::{Job, JobRecord};

const PENDING: TableDefinition<&str, &[u8]> = TableDefinition::new("pending");
const RESULTS: TableDefinition<&str, &[u8]> = TableDefinition::new("results");

/// Resolve a broker/result-backend URL to a filesystem path.
pub fn database_path(url: &str) -> PathBuf {
    PathBuf::from(url.strip_prefix("redb://").unwrap_or(url))
}

/// Open (creating if needed) the database behind a broker URL.
///
/// This is the "broker connection": failure here is fatal to the queue
/// backend only, never to local scheduling.
pub fn open_database(url: &str) -> Result<Arc<Database>> {
    let path = database_path(url);
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create broker directory {}", parent.display()))?;
    }
    let db = Database::create(&path)
        .with_context(|| format!("failed to open broker database at {}", path.display()))?;
    Ok(Arc::new(db))
}

/// Whether two URLs resolve to the same database file.
///
/// redb holds one exclusive lock per file, so a shared file means a
/// shared `Database` handle.
pub fn same_database(a: &str, b: &str) -> bool {
    let pa = database_path(a);
    let pb = database_path(b);
    canonical(&pa) == canonical(&pb)
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// The single named job queue consumed by the sequential worker.
#[derive(Clone)]
pub struct JobQueue {
    db: Arc<Database>,
}

impl JobQueue {
    pub fn new(db: Arc<Database>) -> Result<Self> {
        // Ensure the table exists
        let write_txn = db.begin_write()?;
        write_txn.open_table(PENDING)?;
        write_txn.commit()?;
        Ok(Self { db })
    }

    pub fn enqueue(&self, job: &Job) -> Result<()> {
        let serialized = serde_json::to_vec(job)?;
        let key = job.queue_key();
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(PENDING)?;
            table.insert(key.as_str(), serialized.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Atomically pop the oldest pending job.
    ///
    /// Remove-and-commit in a single write transaction so a job is
    /// delivered at most once to the single consumer.
    pub fn pop(&self) -> Result<Option<Job>> {
        let write_txn = self.db.begin_write()?;

        let job = {
            let mut pending = write_txn.open_table(PENDING)?;

            let first_entry = if let Some(first) = pending.first()? {
                let key = first.0.value().to_string();
                let data = first.1.value().to_vec();
                Some((key, data))
            } else {
                None
            };

            if let Some((key, data)) = first_entry {
                pending.remove(key.as_str())?;
                let job: Job = serde_json::from_slice(&data)?;
                Some(job)
            } else {
                None
            }
        };

        if job.is_some() {
            write_txn.commit()?;
        } else {
            write_txn.abort()?;
        }

        Ok(job)
    }

    pub fn pending_count(&self) -> Result<u64> {
        let read_txn = self.db.begin_read()?;
        let pending = read_txn.open_table(PENDING)?;
        Ok(pending.len()?)
    }

    /// Drop every still-queued job; returns how many were removed.
    ///
    /// Called on shutdown so a restart does not replay stale work.
    pub fn purge(&self) -> Result<usize> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let pending = write_txn.open_table(PENDING)?;
            pending.len()? as usize
        };
        write_txn.delete_table(PENDING)?;
        write_txn.open_table(PENDING)?;
        write_txn.commit()?;
        Ok(removed)
    }
}

/// Per-task outcome store, last write wins.
///
/// The fidelity matches how the original system used its result
/// backend: outcomes are recorded and available for inspection, never
/// consumed by the scheduling path itself.
#[derive(Clone)]
pub struct ResultStore {
    db: Arc<Database>,
}

impl ResultStore {
    pub fn new(db: Arc<Database>) -> Result<Self> {
        let write_txn = db.begin_write()?;
        write_txn.open_table(RESULTS)?;
        write_txn.commit()?;
        Ok(Self { db })
    }

    pub fn record(&self, record: &JobRecord) -> Result<()> {
        let serialized = serde_json::to_vec(record)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(RESULTS)?;
            table.insert(record.task_id.as_str(), serialized.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get(&self, task_id: &str) -> Result<Option<JobRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RESULTS)?;
        if let Some(data) = table.get(task_id)? {
            Ok(Some(serde_json::from_slice(data.value())?))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::tempdir;

    fn setup_queue() -> (JobQueue, tempfile::TempDir) {
        let temp_dir = tempdir().unwrap();
        let db = open_database(temp_dir.path().join("broker.redb").to_str().unwrap()).unwrap();
        let queue = JobQueue::new(db).unwrap();
        (queue, temp_dir)
    }

    fn job(task_id: &str, enqueued_at_ms: i64) -> Job {
        Job {
            task_id: task_id.to_string(),
            query: "q".to_string(),
            delay_variation: 0,
            max_retries: 0,
            attempt: 0,
            enqueued_at_ms,
            expires_at_ms: enqueued_at_ms + 60_000,
        }
    }

    #[test]
    fn test_database_path_strips_scheme() {
        assert_eq!(
            database_path("redb:///var/lib/taskbeat/broker.redb"),
            PathBuf::from("/var/lib/taskbeat/broker.redb")
        );
        assert_eq!(database_path("/tmp/q.redb"), PathBuf::from("/tmp/q.redb"));
    }

    #[test]
    fn test_enqueue_pop_fifo() {
        let (queue, _temp_dir) = setup_queue();

        queue.enqueue(&job("b", 2_000)).unwrap();
        queue.enqueue(&job("a", 1_000)).unwrap();
        assert_eq!(queue.pending_count().unwrap(), 2);

        assert_eq!(queue.pop().unwrap().unwrap().task_id, "a");
        assert_eq!(queue.pop().unwrap().unwrap().task_id, "b");
        assert!(queue.pop().unwrap().is_none());
    }

    #[test]
    fn test_pop_delivers_each_job_once() {
        let (queue, _temp_dir) = setup_queue();
        queue.enqueue(&job("only", 1_000)).unwrap();

        assert!(queue.pop().unwrap().is_some());
        assert!(queue.pop().unwrap().is_none());
        assert_eq!(queue.pending_count().unwrap(), 0);
    }

    #[test]
    fn test_purge_clears_pending() {
        let (queue, _temp_dir) = setup_queue();
        queue.enqueue(&job("a", 1_000)).unwrap();
        queue.enqueue(&job("b", 2_000)).unwrap();

        assert_eq!(queue.purge().unwrap(), 2);
        assert_eq!(queue.pending_count().unwrap(), 0);
        assert!(queue.pop().unwrap().is_none());
    }

    #[test]
    fn test_result_store_last_write_wins() {
        let temp_dir = tempdir().unwrap();
        let db = open_database(temp_dir.path().join("results.redb").to_str().unwrap()).unwrap();
        let store = ResultStore::new(db).unwrap();

        let j = job("report", Utc::now().timestamp_millis());
        store.record(&JobRecord::failure(&j, "boom".to_string())).unwrap();
        store
            .record(&JobRecord::success(&j, "all good".to_string()))
            .unwrap();

        let record = store.get("report").unwrap().unwrap();
        assert!(record.success);
        assert_eq!(record.output.as_deref(), Some("all good"));
        assert!(store.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_shared_database_detection() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("shared.redb");
        let url = format!("redb://{}", path.display());
        assert!(same_database(&url, path.to_str().unwrap()));
        assert!(!same_database(&url, "/tmp/other.redb"));
    }
}
