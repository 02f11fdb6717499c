use std::path::Path;

use deadpool_sqlite::{Config, Runtime};
use rusqlite::params;

use crate::db;
use crate::error::Result;
use crate::types::{Job, JobStatus, Schedule};

/// Pooled async access to the scheduler's `jobs` table.
#[derive(Clone)]
pub struct SchedulerStore {
    pool: deadpool_sqlite::Pool,
}

impl SchedulerStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let pool = Config::new(path.to_string_lossy().to_string())
            .builder(Runtime::Tokio1)
            .map_err(|e| crate::error::SchedulerError::Interact(e.to_string()))?
            .max_size(8)
            .build()
            .map_err(|e| crate::error::SchedulerError::Interact(e.to_string()))?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    pub async fn open_in_memory() -> Result<Self> {
        let url = format!("file:corvus_scheduler_{}?mode=memory&cache=shared", uuid::Uuid::new_v4());
        let pool = Config::new(url)
            .builder(Runtime::Tokio1)
            .map_err(|e| crate::error::SchedulerError::Interact(e.to_string()))?
            .max_size(8)
            .build()
            .map_err(|e| crate::error::SchedulerError::Interact(e.to_string()))?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    async fn init(&self) -> Result<()> {
        self.pool
            .get()
            .await?
            .interact(|conn| -> Result<()> {
                db::configure_connection(conn)?;
                db::init_db(conn)
            })
            .await??;
        Ok(())
    }

    pub async fn insert_job(&self, job: &Job) -> Result<()> {
        let job = job.clone();
        self.pool
            .get()
            .await?
            .interact(move |conn| {
                let schedule_json = serde_json::to_string(&job.schedule)?;
                conn.execute(
                    "INSERT INTO jobs
                     (id, name, group_id, schedule, prompt, status, last_run, next_run,
                      run_count, consecutive_failures, max_retries, retry_delay_ms,
                      timeout_secs, created_at, updated_at)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)",
                    params![
                        job.id,
                        job.name,
                        job.group,
                        schedule_json,
                        job.prompt,
                        job.status.to_string(),
                        job.last_run,
                        job.next_run,
                        job.run_count,
                        job.consecutive_failures,
                        job.max_retries,
                        job.retry_delay_ms as i64,
                        job.timeout_secs as i64,
                        job.created_at,
                        job.updated_at,
                    ],
                )
                .map_err(crate::error::SchedulerError::from)
                .map(|_| ())
            })
            .await??;
        Ok(())
    }

    pub async fn update_job(&self, job: &Job) -> Result<()> {
        let job = job.clone();
        self.pool
            .get()
            .await?
            .interact(move |conn| {
                conn.execute(
                    "UPDATE jobs SET
                        status = ?1, last_run = ?2, next_run = ?3, run_count = ?4,
                        consecutive_failures = ?5, updated_at = ?6
                     WHERE id = ?7",
                    params![
                        job.status.to_string(),
                        job.last_run,
                        job.next_run,
                        job.run_count,
                        job.consecutive_failures,
                        job.updated_at,
                        job.id,
                    ],
                )
                .map_err(crate::error::SchedulerError::from)
                .map(|_| ())
            })
            .await??;
        Ok(())
    }

    pub async fn remove_job(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        let n = self
            .pool
            .get()
            .await?
            .interact(move |conn| conn.execute("DELETE FROM jobs WHERE id = ?1", params![id]))
            .await??;
        if n == 0 {
            return Err(crate::error::SchedulerError::JobNotFound {
                id: "unknown".to_string(),
            });
        }
        Ok(())
    }

    pub async fn list_jobs(&self) -> Result<Vec<Job>> {
        let rows = self
            .pool
            .get()
            .await?
            .interact(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, group_id, schedule, prompt, status, last_run, next_run,
                            run_count, consecutive_failures, max_retries, retry_delay_ms,
                            timeout_secs, created_at, updated_at
                     FROM jobs ORDER BY created_at",
                )?;
                let rows = stmt.query_map([], row_to_job)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })
            .await??;
        Ok(rows.into_iter().filter_map(|r| r).collect())
    }

    pub async fn get_job(&self, id: &str) -> Result<Option<Job>> {
        let id = id.to_string();
        let job = self
            .pool
            .get()
            .await?
            .interact(move |conn| {
                conn.query_row(
                    "SELECT id, name, group_id, schedule, prompt, status, last_run, next_run,
                            run_count, consecutive_failures, max_retries, retry_delay_ms,
                            timeout_secs, created_at, updated_at
                     FROM jobs WHERE id = ?1",
                    params![id],
                    row_to_job,
                )
            })
            .await;
        match job {
            Ok(Ok(Some(j))) => Ok(Some(j)),
            Ok(Ok(None)) => Ok(None),
            Ok(Err(rusqlite::Error::QueryReturnedNoRows)) => Ok(None),
            Ok(Err(e)) => Err(e.into()),
            Err(e) => Err(e.into()),
        }
    }

    /// Tasks whose `next_run` has already passed at startup.
    pub async fn due_jobs(&self, now_rfc3339: &str) -> Result<Vec<Job>> {
        let now = now_rfc3339.to_string();
        let rows = self
            .pool
            .get()
            .await?
            .interact(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, group_id, schedule, prompt, status, last_run, next_run,
                            run_count, consecutive_failures, max_retries, retry_delay_ms,
                            timeout_secs, created_at, updated_at
                     FROM jobs
                     WHERE status = 'pending' AND next_run IS NOT NULL AND next_run <= ?1",
                )?;
                let rows = stmt.query_map(params![now], row_to_job)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })
            .await??;
        Ok(rows.into_iter().filter_map(|r| r).collect())
    }

    pub async fn missed_jobs(&self) -> Result<Vec<Job>> {
        let rows = self
            .pool
            .get()
            .await?
            .interact(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, group_id, schedule, prompt, status, last_run, next_run,
                            run_count, consecutive_failures, max_retries, retry_delay_ms,
                            timeout_secs, created_at, updated_at
                     FROM jobs WHERE status = 'missed'",
                )?;
                let rows = stmt.query_map([], row_to_job)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })
            .await??;
        Ok(rows.into_iter().filter_map(|r| r).collect())
    }

    /// Mark pending tasks whose `next_run` has already passed as `missed`
    /// rather than firing them in a startup burst.
    pub async fn mark_missed_on_startup(&self, now_rfc3339: &str) -> Result<u64> {
        let now = now_rfc3339.to_string();
        let n = self
            .pool
            .get()
            .await?
            .interact(move |conn| {
                conn.execute(
                    "UPDATE jobs SET status = 'missed', updated_at = ?1
                     WHERE status = 'pending' AND next_run IS NOT NULL AND next_run < ?1",
                    params![now],
                )
            })
            .await??;
        Ok(n as u64)
    }
}

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<Option<Job>> {
    let schedule_json: String = row.get(3)?;
    let status_str: String = row.get(5)?;
    let Ok(schedule) = serde_json::from_str::<Schedule>(&schedule_json) else {
        return Ok(None);
    };
    let Ok(status) = status_str.parse::<JobStatus>() else {
        return Ok(None);
    };
    let next_run: Option<String> = row.get(7)?;
    let next_run_local = next_run.as_deref().and_then(|s| {
        chrono::DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| crate::engine::format_local(dt.with_timezone(&chrono::Utc)))
    });
    Ok(Some(Job {
        id: row.get(0)?,
        name: row.get(1)?,
        group: row.get(2)?,
        schedule,
        prompt: row.get(4)?,
        status,
        last_run: row.get(6)?,
        next_run,
        next_run_local,
        run_count: row.get(8)?,
        consecutive_failures: row.get(9)?,
        max_retries: row.get(10)?,
        retry_delay_ms: row.get::<_, i64>(11)? as u64,
        timeout_secs: row.get::<_, i64>(12)? as u64,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    }))
}
