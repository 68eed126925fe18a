//! Channel history import jobs with per-job cancellation.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rusqlite::Connection;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use omnihub_bus::bus::{BusEvent, MessageBus};
use omnihub_core::types::{ImportCounters, ImportJob, ImportStatus};

use crate::error::{DispatchError, Result};

/// One page of historical records pulled from a provider.
#[derive(Debug, Clone, Default)]
pub struct ImportBatch {
    pub counters: ImportCounters,
    /// No further batches follow.
    pub done: bool,
}

/// Provider-side history pagination. `cursor` is the batch ordinal.
#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn next_batch(
        &self,
        since: Option<DateTime<Utc>>,
        cursor: usize,
        batch_size: usize,
    ) -> Result<ImportBatch>;
}

pub struct ImportJobStore {
    db: Mutex<Connection>,
}

impl ImportJobStore {
    pub fn new(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS import_jobs (
                id TEXT PRIMARY KEY,
                channel_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                totals TEXT NOT NULL DEFAULT '{}',
                imported TEXT NOT NULL DEFAULT '{}',
                started_at TEXT,
                completed_at TEXT,
                error_message TEXT,
                import_since TEXT
            );",
        )?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    pub fn create(&self, channel_id: &str, import_since: Option<DateTime<Utc>>) -> Result<ImportJob> {
        let job = ImportJob {
            id: uuid::Uuid::now_v7().to_string(),
            channel_id: channel_id.to_string(),
            status: ImportStatus::Pending,
            totals: ImportCounters::default(),
            imported: ImportCounters::default(),
            started_at: None,
            completed_at: None,
            error_message: None,
            import_since,
        };
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO import_jobs (id, channel_id, status, totals, imported, import_since)
             VALUES (?1, ?2, 'pending', '{}', '{}', ?3)",
            rusqlite::params![job.id, channel_id, import_since.map(|t| t.to_rfc3339())],
        )?;
        Ok(job)
    }

    pub fn get(&self, job_id: &str) -> Result<Option<ImportJob>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT id, channel_id, status, totals, imported, started_at, completed_at,
                    error_message, import_since
             FROM import_jobs WHERE id = ?1",
            [job_id],
            row_to_job,
        ) {
            Ok(job) => Ok(Some(job)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(DispatchError::Database(e)),
        }
    }

    fn mark_running(&self, job_id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE import_jobs SET status = 'running', started_at = ?2 WHERE id = ?1",
            rusqlite::params![job_id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn update_progress(&self, job_id: &str, imported: &ImportCounters) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE import_jobs SET imported = ?2 WHERE id = ?1",
            rusqlite::params![job_id, serde_json::to_string(imported)?],
        )?;
        Ok(())
    }

    fn finish(&self, job_id: &str, status: ImportStatus, error: Option<&str>) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE import_jobs SET status = ?2, completed_at = ?3, error_message = ?4
             WHERE id = ?1",
            rusqlite::params![job_id, status.as_str(), Utc::now().to_rfc3339(), error],
        )?;
        Ok(())
    }
}

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<ImportJob> {
    let status_raw: String = row.get(2)?;
    let totals_raw: String = row.get(3)?;
    let imported_raw: String = row.get(4)?;
    Ok(ImportJob {
        id: row.get(0)?,
        channel_id: row.get(1)?,
        status: status_raw.parse().unwrap_or(ImportStatus::Pending),
        totals: serde_json::from_str(&totals_raw).unwrap_or_default(),
        imported: serde_json::from_str(&imported_raw).unwrap_or_default(),
        started_at: parse_opt_ts(row.get::<_, Option<String>>(5)?),
        completed_at: parse_opt_ts(row.get::<_, Option<String>>(6)?),
        error_message: row.get(7)?,
        import_since: parse_opt_ts(row.get::<_, Option<String>>(8)?),
    })
}

fn parse_opt_ts(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.and_then(|t| DateTime::parse_from_rfc3339(&t).ok())
        .map(|t| t.with_timezone(&Utc))
}

/// Runs import jobs and keeps the process-wide cancel registry.
pub struct ImportRunner {
    jobs: Arc<ImportJobStore>,
    bus: Arc<dyn MessageBus>,
    batch_size: usize,
    cancels: DashMap<String, CancellationToken>,
}

impl ImportRunner {
    pub fn new(jobs: Arc<ImportJobStore>, bus: Arc<dyn MessageBus>, batch_size: usize) -> Self {
        Self {
            jobs,
            bus,
            batch_size,
            cancels: DashMap::new(),
        }
    }

    /// Cancel a running import; checked at the start and at every batch
    /// boundary.
    pub fn cancel(&self, job_id: &str) -> bool {
        match self.cancels.get(job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Drive one job to completion. Returns the terminal status.
    pub async fn run(&self, job_id: &str, source: &dyn HistorySource) -> Result<ImportStatus> {
        let job = self
            .jobs
            .get(job_id)?
            .ok_or_else(|| DispatchError::JobNotFound {
                id: job_id.to_string(),
            })?;

        let token = CancellationToken::new();
        self.cancels.insert(job_id.to_string(), token.clone());
        self.jobs.mark_running(job_id)?;
        info!(job_id, channel_id = %job.channel_id, "history import started");

        let result = self.run_inner(&job, source, &token).await;
        self.cancels.remove(job_id);

        let status = match result {
            Ok(status) => {
                self.jobs.finish(job_id, status, None)?;
                status
            }
            Err(e) => {
                warn!(job_id, error = %e, "history import failed");
                self.jobs
                    .finish(job_id, ImportStatus::Failed, Some(&e.to_string()))?;
                ImportStatus::Failed
            }
        };
        info!(job_id, status = status.as_str(), "history import finished");
        Ok(status)
    }

    async fn run_inner(
        &self,
        job: &ImportJob,
        source: &dyn HistorySource,
        token: &CancellationToken,
    ) -> Result<ImportStatus> {
        let mut imported = ImportCounters::default();
        let mut cursor = 0usize;
        loop {
            if token.is_cancelled() {
                return Ok(ImportStatus::Cancelled);
            }

            let batch = source
                .next_batch(job.import_since, cursor, self.batch_size)
                .await?;
            imported.conversations += batch.counters.conversations;
            imported.messages += batch.counters.messages;
            imported.contacts += batch.counters.contacts;
            self.jobs.update_progress(&job.id, &imported)?;
            let _ = self
                .bus
                .publish_event(BusEvent::ImportProgress {
                    job_id: job.id.clone(),
                    conversations: imported.conversations,
                    messages: imported.messages,
                    contacts: imported.contacts,
                })
                .await;

            if batch.done {
                return Ok(ImportStatus::Completed);
            }
            cursor += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use omnihub_bus::InMemoryBus;

    struct PagedSource {
        pages: usize,
        served: AtomicUsize,
    }

    #[async_trait]
    impl HistorySource for PagedSource {
        async fn next_batch(
            &self,
            _since: Option<DateTime<Utc>>,
            cursor: usize,
            _batch_size: usize,
        ) -> Result<ImportBatch> {
            self.served.fetch_add(1, Ordering::SeqCst);
            Ok(ImportBatch {
                counters: ImportCounters {
                    conversations: 1,
                    messages: 10,
                    contacts: 1,
                },
                done: cursor + 1 >= self.pages,
            })
        }
    }

    fn runner() -> (ImportRunner, Arc<ImportJobStore>) {
        let jobs = Arc::new(ImportJobStore::new(Connection::open_in_memory().unwrap()).unwrap());
        let bus = Arc::new(InMemoryBus::new(16));
        (ImportRunner::new(jobs.clone(), bus, 200), jobs)
    }

    #[tokio::test]
    async fn import_accumulates_counters_to_completion() {
        let (runner, jobs) = runner();
        let job = jobs.create("ch1", None).unwrap();
        let source = PagedSource {
            pages: 3,
            served: AtomicUsize::new(0),
        };

        let status = runner.run(&job.id, &source).await.unwrap();
        assert_eq!(status, ImportStatus::Completed);

        let job = jobs.get(&job.id).unwrap().unwrap();
        assert_eq!(job.status, ImportStatus::Completed);
        assert_eq!(job.imported.messages, 30);
        assert_eq!(job.imported.conversations, 3);
        assert!(job.completed_at.is_some());
    }

    #[tokio::test]
    async fn cancellation_is_honored_at_batch_boundary() {
        struct CancellingSource<'a> {
            runner: &'a ImportRunner,
            job_id: String,
        }

        #[async_trait]
        impl HistorySource for CancellingSource<'_> {
            async fn next_batch(
                &self,
                _since: Option<DateTime<Utc>>,
                _cursor: usize,
                _batch_size: usize,
            ) -> Result<ImportBatch> {
                // Cancel mid-flight: the loop notices at the next
                // boundary check.
                self.runner.cancel(&self.job_id);
                Ok(ImportBatch {
                    counters: ImportCounters::default(),
                    done: false,
                })
            }
        }

        let (runner, jobs) = runner();
        let job = jobs.create("ch1", None).unwrap();
        let source = CancellingSource {
            runner: &runner,
            job_id: job.id.clone(),
        };

        let status = runner.run(&job.id, &source).await.unwrap();
        assert_eq!(status, ImportStatus::Cancelled);
        assert_eq!(jobs.get(&job.id).unwrap().unwrap().status, ImportStatus::Cancelled);
    }

    #[tokio::test]
    async fn source_error_fails_the_job() {
        struct BrokenSource;

        #[async_trait]
        impl HistorySource for BrokenSource {
            async fn next_batch(
                &self,
                _since: Option<DateTime<Utc>>,
                _cursor: usize,
                _batch_size: usize,
            ) -> Result<ImportBatch> {
                Err(DispatchError::Source("provider export unavailable".to_string()))
            }
        }

        let (runner, jobs) = runner();
        let job = jobs.create("ch1", None).unwrap();
        let status = runner.run(&job.id, &BrokenSource).await.unwrap();
        assert_eq!(status, ImportStatus::Failed);
        let job = jobs.get(&job.id).unwrap().unwrap();
        assert!(job
            .error_message
            .unwrap()
            .contains("provider export unavailable"));
    }

    #[tokio::test]
    async fn cancel_unknown_job_is_a_noop() {
        let (runner, _) = runner();
        assert!(!runner.cancel("ghost"));
    }
}
