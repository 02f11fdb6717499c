pub mod db;
pub mod error;
pub mod manager;
pub mod pressure;
pub mod store;
pub mod types;

pub use error::{QueueError, Result};
pub use manager::{spawn, spawn_concurrency_sampler, QueueHandle, MAX_QUEUE_SIZE};
pub use store::QueueStore;
pub use types::{EnqueueOutcome, EntryStatus, QueueEntry};
