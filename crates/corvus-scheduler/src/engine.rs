use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::schedule::{backoff_delay_ms, compute_next_run};
use crate::store::SchedulerStore;
use crate::types::{Job, JobStatus, Schedule};

/// Poll interval for the tick loop. Drift under this is tolerated per the
/// documented ≤10s precision.
const POLL_INTERVAL_SECS: u64 = 10;

/// Consecutive failures before a task is paused (circuit breaker).
const CIRCUIT_BREAKER_THRESHOLD: u32 = 3;

/// Render a UTC instant for display. A real deployment would apply the
/// configured display timezone; this renders the host's local zone.
pub fn format_local(dt: DateTime<Utc>) -> String {
    chrono::Local
        .from_utc_datetime(&dt.naive_utc())
        .to_rfc3339()
}

use chrono::TimeZone;

/// Boundary the scheduler submits fired tasks through. Kept as a trait so
/// `corvus-scheduler` never depends directly on `corvus-queue` — the caller
/// wires a real submitter at startup.
#[async_trait::async_trait]
pub trait JobSink: Send + Sync {
    /// Submit `prompt` for `group` as a high-priority queue entry with the
    /// given per-task timeout. An `Err` here means the submission itself
    /// failed (e.g. the queue rejected it), which the engine treats as an
    /// immediate failed run — it does not mean the task's work failed.
    async fn submit(&self, group: &str, prompt: &str, timeout: std::time::Duration) -> std::result::Result<(), String>;
}

struct Inner {
    store: SchedulerStore,
    sink: Arc<dyn JobSink>,
    in_flight: Mutex<HashMap<String, String>>,
    dedupe: Mutex<HashSet<String>>,
}

/// Cloneable handle for job management and outcome reporting.
#[derive(Clone)]
pub struct SchedulerHandle {
    inner: Arc<Inner>,
}

impl SchedulerHandle {
    #[allow(clippy::too_many_arguments)]
    pub async fn add_job(
        &self,
        name: &str,
        group: &str,
        schedule: Schedule,
        prompt: &str,
        max_retries: u32,
        retry_delay_ms: u64,
        timeout_secs: u64,
    ) -> Result<Job> {
        let now = Utc::now();
        let now_str = now.to_rfc3339();
        let next = compute_next_run(&schedule, now);
        let job = Job {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            group: group.to_string(),
            schedule,
            prompt: prompt.to_string(),
            status: if next.is_some() { JobStatus::Pending } else { JobStatus::Completed },
            last_run: None,
            next_run: next.map(|dt| dt.to_rfc3339()),
            next_run_local: next.map(format_local),
            run_count: 0,
            consecutive_failures: 0,
            max_retries,
            retry_delay_ms,
            timeout_secs,
            created_at: now_str.clone(),
            updated_at: now_str,
        };
        self.inner.store.insert_job(&job).await?;
        info!(job_id = %job.id, %name, "task added");
        Ok(job)
    }

    pub async fn remove_job(&self, id: &str) -> Result<()> {
        self.inner.store.remove_job(id).await
    }

    pub async fn list_jobs(&self) -> Result<Vec<Job>> {
        self.inner.store.list_jobs().await
    }

    /// Admin action: clear a paused task's failure count and resume normal scheduling.
    pub async fn reset_paused(&self, id: &str) -> Result<()> {
        let Some(mut job) = self.inner.store.get_job(id).await? else {
            return Err(crate::error::SchedulerError::JobNotFound { id: id.to_string() });
        };
        job.consecutive_failures = 0;
        let now = Utc::now();
        let next = compute_next_run(&job.schedule, now);
        apply_next_run(&mut job, next);
        job.updated_at = now.to_rfc3339();
        self.inner.store.update_job(&job).await?;
        info!(job_id = %id, "task reset from paused state");
        Ok(())
    }

    /// Report the outcome of a previously-submitted task run. Must be called
    /// exactly once per successful `submit`.
    pub async fn record_outcome(&self, job_id: &str, success: bool) -> Result<()> {
        let Some(job) = self.inner.store.get_job(job_id).await? else {
            warn!(job_id, "outcome reported for unknown task");
            return Ok(());
        };
        self.apply_outcome(job, success, Utc::now()).await
    }

    async fn apply_outcome(&self, mut job: Job, success: bool, now: DateTime<Utc>) -> Result<()> {
        if let Some(key) = self.inner.in_flight.lock().await.remove(&job.id) {
            self.inner.dedupe.lock().await.remove(&key);
        }
        job.run_count += 1;

        if success {
            job.consecutive_failures = 0;
            let next = compute_next_run(&job.schedule, now);
            apply_next_run(&mut job, next);
        } else {
            job.consecutive_failures += 1;
            if job.consecutive_failures >= CIRCUIT_BREAKER_THRESHOLD {
                job.status = JobStatus::Paused;
                job.next_run = None;
                job.next_run_local = None;
                error!(job_id = %job.id, name = %job.name, "task paused: three consecutive failures");
            } else {
                let next = if job.max_retries > 0 {
                    let delay = backoff_delay_ms(job.retry_delay_ms, job.consecutive_failures);
                    Some(now + ChronoDuration::milliseconds(delay as i64))
                } else {
                    compute_next_run(&job.schedule, now)
                };
                apply_next_run(&mut job, next);
            }
        }

        job.updated_at = now.to_rfc3339();
        self.inner.store.update_job(&job).await
    }
}

fn apply_next_run(job: &mut Job, next: Option<DateTime<Utc>>) {
    match next {
        Some(dt) => {
            job.next_run = Some(dt.to_rfc3339());
            job.next_run_local = Some(format_local(dt));
            if job.status != JobStatus::Paused {
                job.status = JobStatus::Pending;
            }
        }
        None => {
            job.next_run = None;
            job.next_run_local = None;
            job.status = JobStatus::Completed;
        }
    }
}

/// Drives the tick loop. All mutable state lives behind the [`SchedulerHandle`]
/// it shares, so job management and outcome reporting can happen from other
/// tasks while `run` is polling.
pub struct SchedulerEngine {
    handle: SchedulerHandle,
}

impl SchedulerEngine {
    pub fn new(store: SchedulerStore, sink: Arc<dyn JobSink>) -> Self {
        Self {
            handle: SchedulerHandle {
                inner: Arc::new(Inner {
                    store,
                    sink,
                    in_flight: Mutex::new(HashMap::new()),
                    dedupe: Mutex::new(HashSet::new()),
                }),
            },
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("scheduler engine started");
        if let Err(e) = self.mark_missed_on_startup().await {
            error!("missed-on-startup pass failed: {e}");
        }

        let mut interval = tokio::time::interval(std::time::Duration::from_secs(POLL_INTERVAL_SECS));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn mark_missed_on_startup(&self) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let n = self.handle.inner.store.mark_missed_on_startup(&now).await?;
        if n > 0 {
            warn!(count = n, "tasks marked missed on startup");
        }
        Ok(())
    }

    async fn tick(&self) {
        self.reschedule_missed().await;

        let now = Utc::now();
        let due = match self.handle.inner.store.due_jobs(&now.to_rfc3339()).await {
            Ok(d) => d,
            Err(e) => {
                error!("scheduler tick query failed: {e}");
                return;
            }
        };
        for job in due {
            self.fire(job, now).await;
        }
    }

    /// Reschedule (without firing) tasks that were marked `missed` at
    /// startup, pushing them to their next regular occurrence.
    async fn reschedule_missed(&self) {
        let missed = match self.handle.inner.store.missed_jobs().await {
            Ok(m) => m,
            Err(e) => {
                error!("failed to load missed tasks: {e}");
                return;
            }
        };
        let now = Utc::now();
        for mut job in missed {
            let next = compute_next_run(&job.schedule, now);
            apply_next_run(&mut job, next);
            job.updated_at = now.to_rfc3339();
            if let Err(e) = self.handle.inner.store.update_job(&job).await {
                warn!(job_id = %job.id, error = %e, "failed to reschedule missed task");
            } else {
                debug!(job_id = %job.id, "missed task rescheduled forward");
            }
        }
    }

    async fn fire(&self, mut job: Job, now: DateTime<Utc>) {
        let key = job.dedupe_key();
        {
            let mut dedupe = self.handle.inner.dedupe.lock().await;
            if dedupe.contains(&key) {
                debug!(job_id = %job.id, "duplicate guard: already enqueued or running");
                return;
            }
            dedupe.insert(key.clone());
        }
        self.handle.inner.in_flight.lock().await.insert(job.id.clone(), key);

        job.status = JobStatus::Running;
        job.last_run = Some(now.to_rfc3339());
        job.updated_at = now.to_rfc3339();
        if let Err(e) = self.handle.inner.store.update_job(&job).await {
            warn!(job_id = %job.id, error = %e, "failed to persist running transition");
        }

        let timeout = std::time::Duration::from_secs(job.timeout_secs);
        info!(job_id = %job.id, name = %job.name, "firing task");
        if let Err(e) = self.handle.inner.sink.submit(&job.group, &job.prompt, timeout).await {
            warn!(job_id = %job.id, error = %e, "submission failed, recording as a failed run");
            if let Err(e) = self.handle.apply_outcome(job, false, now).await {
                error!(error = %e, "failed to persist failed-submission outcome");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeSink {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl JobSink for FakeSink {
        async fn submit(&self, _group: &str, _prompt: &str, _timeout: std::time::Duration) -> std::result::Result<(), String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err("queue full".to_string())
            } else {
                Ok(())
            }
        }
    }

    async fn engine_with(sink: Arc<FakeSink>) -> (SchedulerEngine, SchedulerStore) {
        let store = SchedulerStore::open_in_memory().await.unwrap();
        let engine = SchedulerEngine::new(store.clone(), sink);
        (engine, store)
    }

    #[tokio::test]
    async fn once_job_completes_after_firing() {
        let sink = Arc::new(FakeSink { calls: AtomicUsize::new(0), fail: false });
        let (engine, store) = engine_with(sink.clone()).await;
        let handle = engine.handle();

        let past = Utc::now() - ChronoDuration::seconds(5);
        let job = handle
            .add_job("once-job", "main", Schedule::Once { at: past }, "do it", 0, 0, 60)
            .await
            .unwrap();
        engine.tick().await;

        let reloaded = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);

        handle.record_outcome(&job.id, true).await.unwrap();
        let after = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(after.status, JobStatus::Completed);
        assert!(after.next_run.is_none());
        let _ = reloaded;
    }

    #[tokio::test]
    async fn three_consecutive_failures_pause_the_task() {
        let sink = Arc::new(FakeSink { calls: AtomicUsize::new(0), fail: false });
        let (engine, store) = engine_with(sink).await;
        let handle = engine.handle();

        let job = handle
            .add_job(
                "flaky",
                "main",
                Schedule::Cron { expression: "* * * * *".to_string() },
                "retry me",
                3,
                1000,
                60,
            )
            .await
            .unwrap();

        for _ in 0..3 {
            handle.record_outcome(&job.id, false).await.unwrap();
        }

        let after = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(after.status, JobStatus::Paused);
        assert!(after.next_run.is_none());
    }

    #[tokio::test]
    async fn duplicate_fire_is_suppressed_while_in_flight() {
        let sink = Arc::new(FakeSink { calls: AtomicUsize::new(0), fail: false });
        let (engine, _store) = engine_with(sink.clone()).await;
        let handle = engine.handle();

        let past = Utc::now() - ChronoDuration::seconds(5);
        let job = handle
            .add_job("dup", "main", Schedule::Once { at: past }, "same prompt", 0, 0, 60)
            .await
            .unwrap();

        // Firing the same loaded job struct twice simulates two ticks before
        // an outcome is reported; the second must be suppressed.
        engine.fire(job.clone(), Utc::now()).await;
        engine.fire(job, Utc::now()).await;

        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reset_paused_clears_failures_and_resumes() {
        let sink = Arc::new(FakeSink { calls: AtomicUsize::new(0), fail: false });
        let (engine, store) = engine_with(sink).await;
        let handle = engine.handle();

        let job = handle
            .add_job(
                "flaky2",
                "main",
                Schedule::Cron { expression: "* * * * *".to_string() },
                "retry me",
                0,
                0,
                60,
            )
            .await
            .unwrap();
        for _ in 0..3 {
            handle.record_outcome(&job.id, false).await.unwrap();
        }
        assert_eq!(store.get_job(&job.id).await.unwrap().unwrap().status, JobStatus::Paused);

        handle.reset_paused(&job.id).await.unwrap();
        let after = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(after.status, JobStatus::Pending);
        assert_eq!(after.consecutive_failures, 0);
    }
}
