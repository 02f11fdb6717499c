use chrono::{DateTime, Utc};
use corvus_core::types::{ChatId, GroupId, Priority};
use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// Lifecycle state of a persisted queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Waiting,
    Active,
    Completed,
    Failed,
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for EntryStatus {
    type Err = QueueError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(Self::Waiting),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(QueueError::InvalidStatus(other.to_string())),
        }
    }
}

/// Parse a priority string persisted by `Priority::to_string()`. `Priority`
/// lives in `corvus-core` so we can't implement `FromStr` on it here.
pub fn parse_priority(s: &str) -> Priority {
    match s {
        "high" => Priority::High,
        "low" => Priority::Low,
        _ => Priority::Normal,
    }
}

/// One unit of work queued for a group: a prompt to run inside a container,
/// waiting for a slot in the group's FIFO.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: String,
    pub group: GroupId,
    pub chat: ChatId,
    pub priority: Priority,
    pub prompt: String,
    pub enqueued_at: DateTime<Utc>,
    pub status: EntryStatus,
    pub container_id: Option<String>,
}

impl QueueEntry {
    pub fn new(group: GroupId, chat: ChatId, priority: Priority, prompt: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            group,
            chat,
            priority,
            prompt: prompt.into(),
            enqueued_at: Utc::now(),
            status: EntryStatus::Waiting,
            container_id: None,
        }
    }

    /// Sort key giving the total order within a group: high priority first,
    /// then earliest-enqueued first.
    pub fn sort_key(&self) -> (Priority, DateTime<Utc>) {
        (self.priority, self.enqueued_at)
    }
}

/// Outcome of a successful enqueue: where the entry landed in its group's line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueOutcome {
    pub entry_id: String,
    pub position: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_status_round_trips_through_display_and_from_str() {
        for status in [
            EntryStatus::Waiting,
            EntryStatus::Active,
            EntryStatus::Completed,
            EntryStatus::Failed,
        ] {
            let s = status.to_string();
            let parsed: EntryStatus = s.parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn unknown_status_is_rejected() {
        assert!("bogus".parse::<EntryStatus>().is_err());
    }

    #[test]
    fn unknown_priority_string_defaults_to_normal() {
        assert_eq!(parse_priority("weird"), Priority::Normal);
    }
}
