use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Defines when a job should run: a recurring five-field cron expression or
/// a one-shot absolute instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    /// Run exactly once at the given UTC instant.
    Once { at: DateTime<Utc> },

    /// Standard five-field cron expression (minute hour day month weekday), UTC.
    Cron { expression: String },
}

/// Lifecycle state of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for its next_run time.
    Pending,
    /// Submitted to the queue; awaiting an outcome.
    Running,
    /// A `once:` job fired and will not run again.
    Completed,
    /// Most recent run failed and a retry is scheduled.
    Failed,
    /// `next_run` had already passed at startup; rescheduled for the next regular tick.
    Missed,
    /// Three consecutive failures tripped the circuit breaker; needs an admin reset.
    Paused,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Missed => "missed",
            Self::Paused => "paused",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "missed" => Ok(Self::Missed),
            "paused" => Ok(Self::Paused),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// A persisted scheduled task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// UUID v4 string — primary key.
    pub id: String,
    /// Human-readable label.
    pub name: String,
    /// The group this task's prompt runs against.
    pub group: String,
    /// Serialised schedule definition.
    pub schedule: Schedule,
    /// The prompt submitted to the queue when the task fires.
    pub prompt: String,
    /// Current lifecycle state.
    pub status: JobStatus,
    /// ISO-8601 timestamp of the most recent execution start, if any.
    pub last_run: Option<String>,
    /// ISO-8601 UTC timestamp of the next planned execution, if any.
    pub next_run: Option<String>,
    /// Zone-formatted rendering of `next_run` for display.
    pub next_run_local: Option<String>,
    /// Total number of completed runs (success or failure).
    pub run_count: u32,
    /// Consecutive failed runs since the last success.
    pub consecutive_failures: u32,
    /// Maximum retries on failure before falling back to normal cron timing
    /// (`0` disables the backoff retry path).
    pub max_retries: u32,
    /// Base delay for the exponential backoff: `retry_delay_ms * 2^(failures-1)`.
    pub retry_delay_ms: u64,
    /// Hard per-task execution timeout once submitted to the queue.
    pub timeout_secs: u64,
    /// ISO-8601 timestamp of job creation.
    pub created_at: String,
    /// ISO-8601 timestamp of the last metadata update.
    pub updated_at: String,
}

impl Job {
    /// Deduplication key used to detect an already-enqueued-or-running task:
    /// `(group, schedule, first 100 chars of prompt)`.
    pub fn dedupe_key(&self) -> String {
        let schedule_key = match &self.schedule {
            Schedule::Once { at } => format!("once:{}", at.to_rfc3339()),
            Schedule::Cron { expression } => format!("cron:{expression}"),
        };
        let prompt_prefix: String = self.prompt.chars().take(100).collect();
        format!("{}|{}|{}", self.group, schedule_key, prompt_prefix)
    }
}
