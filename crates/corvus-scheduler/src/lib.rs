//! Tokio-based recurring/one-shot task scheduler with SQLite persistence.
//!
//! Tasks are persisted to a `jobs` table. [`engine::SchedulerEngine`] polls
//! every ten seconds and fires any task whose `next_run` has arrived,
//! submitting it through an injected [`engine::JobSink`] rather than
//! depending on a queue implementation directly. Callers report success or
//! failure back via [`engine::SchedulerHandle::record_outcome`] once the
//! submitted work actually finishes.
//!
//! # Schedule variants
//!
//! | Variant | Behaviour                                                |
//! |---------|-----------------------------------------------------------|
//! | `Once`  | Single fire at an absolute UTC instant                     |
//! | `Cron`  | Standard five-field cron expression, UTC                   |

pub mod db;
pub mod engine;
pub mod error;
pub mod schedule;
pub mod store;
pub mod types;

pub use engine::{format_local, JobSink, SchedulerEngine, SchedulerHandle};
pub use error::{Result, SchedulerError};
pub use schedule::{backoff_delay_ms, compute_next_run};
pub use store::SchedulerStore;
pub use types::{Job, JobStatus, Schedule};
