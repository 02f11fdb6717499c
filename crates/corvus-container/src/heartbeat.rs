//! Container liveness tracking — passive, derived from the most recent
//! heartbeat rather than a polled ping.
//!
//! Mirrors the rolling-window health model used elsewhere in this codebase:
//! instead of the success/failure window over a time span, each container
//! gets a single `(instant, ok)` slot updated on every heartbeat, and
//! `Stuck` is derived from how long ago that slot was last touched.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;

use corvus_core::types::ContainerId;

/// A container with no heartbeat for longer than this is considered stuck.
const STUCK_THRESHOLD_SECS: u64 = 180;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Liveness {
    Alive,
    Stuck,
    Unknown,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatEntry {
    pub container_id: String,
    pub liveness: Liveness,
    pub last_heartbeat_secs_ago: Option<u64>,
    pub beats: u64,
}

struct Slot {
    last_beat: Instant,
    beats: u64,
}

/// Concurrent liveness tracker keyed by container id.
pub struct HeartbeatTracker {
    slots: DashMap<ContainerId, Slot>,
}

impl HeartbeatTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { slots: DashMap::new() })
    }

    /// Record a heartbeat from `container_id`, received "now".
    pub fn record(&self, container_id: &ContainerId) {
        self.slots
            .entry(container_id.clone())
            .and_modify(|s| {
                s.last_beat = Instant::now();
                s.beats += 1;
            })
            .or_insert_with(|| Slot { last_beat: Instant::now(), beats: 1 });
    }

    /// Drop tracking for a container once it has stopped.
    pub fn remove(&self, container_id: &ContainerId) {
        self.slots.remove(container_id);
    }

    /// Whether `container_id` is stuck: tracked but silent past the threshold.
    pub fn is_stuck(&self, container_id: &ContainerId) -> bool {
        self.slots
            .get(container_id)
            .map(|s| s.last_beat.elapsed() >= Duration::from_secs(STUCK_THRESHOLD_SECS))
            .unwrap_or(false)
    }

    /// All containers currently tracked as stuck.
    pub fn stuck_containers(&self) -> Vec<ContainerId> {
        self.slots
            .iter()
            .filter(|e| e.value().last_beat.elapsed() >= Duration::from_secs(STUCK_THRESHOLD_SECS))
            .map(|e| e.key().clone())
            .collect()
    }

    pub fn entry(&self, container_id: &ContainerId) -> Option<HeartbeatEntry> {
        self.slots.get(container_id).map(|s| {
            let secs_ago = s.last_beat.elapsed().as_secs();
            let liveness = if secs_ago >= STUCK_THRESHOLD_SECS { Liveness::Stuck } else { Liveness::Alive };
            HeartbeatEntry {
                container_id: container_id.as_str().to_string(),
                liveness,
                last_heartbeat_secs_ago: Some(secs_ago),
                beats: s.beats,
            }
        })
    }

    pub fn all_entries(&self) -> Vec<HeartbeatEntry> {
        self.slots
            .iter()
            .map(|e| {
                let secs_ago = e.value().last_beat.elapsed().as_secs();
                let liveness = if secs_ago >= STUCK_THRESHOLD_SECS { Liveness::Stuck } else { Liveness::Alive };
                HeartbeatEntry {
                    container_id: e.key().as_str().to_string(),
                    liveness,
                    last_heartbeat_secs_ago: Some(secs_ago),
                    beats: e.value().beats,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_heartbeat_is_alive() {
        let tracker = HeartbeatTracker::new();
        let id = ContainerId::new();
        tracker.record(&id);
        assert!(!tracker.is_stuck(&id));
        let entry = tracker.entry(&id).unwrap();
        assert_eq!(entry.liveness, Liveness::Alive);
        assert_eq!(entry.beats, 1);
    }

    #[test]
    fn repeated_heartbeats_accumulate_beats() {
        let tracker = HeartbeatTracker::new();
        let id = ContainerId::new();
        tracker.record(&id);
        tracker.record(&id);
        tracker.record(&id);
        assert_eq!(tracker.entry(&id).unwrap().beats, 3);
    }

    #[test]
    fn untracked_container_is_not_stuck() {
        let tracker = HeartbeatTracker::new();
        let id = ContainerId::new();
        assert!(!tracker.is_stuck(&id));
        assert!(tracker.entry(&id).is_none());
    }

    #[test]
    fn removed_container_drops_out_of_entries() {
        let tracker = HeartbeatTracker::new();
        let id = ContainerId::new();
        tracker.record(&id);
        tracker.remove(&id);
        assert!(tracker.entry(&id).is_none());
        assert!(tracker.all_entries().is_empty());
    }

    #[test]
    fn stuck_containers_lists_only_stale_slots() {
        let tracker = HeartbeatTracker::new();
        let fresh = ContainerId::new();
        tracker.record(&fresh);
        assert!(tracker.stuck_containers().is_empty());
    }
}
