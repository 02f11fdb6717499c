//! Container registry — the warm pool and lifecycle state machine.
//!
//! State machine per container: `warming -> ready -> in_use -> draining ->
//! stopped`, with `stuck` as a side-state derived from heartbeat age rather
//! than a transition of its own. The registry owns container records
//! exclusively; queue entries only ever hold a container id reference.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};

use corvus_core::types::{ContainerId, GroupId};

use crate::error::{ContainerError, Result};
use crate::heartbeat::HeartbeatTracker;
use crate::runtime::{ContainerEngine, ContainerSpec};

/// Minimum number of ready containers the pool tries to maintain.
pub const MIN_SIZE: usize = 1;
/// Hard ceiling on total containers the pool will hold.
pub const MAX_SIZE: usize = 5;
/// A ready container idle this long is retired.
const IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
/// A `warming` container that hasn't signalled ready within this long is stopped.
const WARMUP_TIMEOUT: Duration = Duration::from_secs(10);
/// Graceful stop window before escalating to a kill.
const GRACEFUL_STOP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    Warming,
    Ready,
    InUse,
    Draining,
    Stopped,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ContainerRecord {
    pub id: ContainerId,
    pub engine_id: String,
    pub group: GroupId,
    pub started_at: DateTime<Utc>,
    pub status: ContainerStatus,
    pub reuse_count: u32,
    pub labels: HashMap<String, String>,
    /// When this record last transitioned to `Ready` with no assignment —
    /// used to evaluate idle retirement.
    pub ready_since: Option<DateTime<Utc>>,
    pub warming_since: Option<DateTime<Utc>>,
}

pub struct ContainerRegistry {
    engine: Arc<dyn ContainerEngine>,
    heartbeats: Arc<HeartbeatTracker>,
    records: Mutex<HashMap<ContainerId, ContainerRecord>>,
}

impl ContainerRegistry {
    pub fn new(engine: Arc<dyn ContainerEngine>, heartbeats: Arc<HeartbeatTracker>) -> Self {
        Self {
            engine,
            heartbeats,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Force-stop any engine-level container labelled `managed=true` that
    /// isn't in our (empty, freshly-started) registry.
    pub async fn sweep_orphans(&self) -> Result<usize> {
        let managed = self.engine.list_managed().await?;
        let records = self.records.lock().await;
        let known: std::collections::HashSet<String> =
            records.values().map(|r| r.engine_id.clone()).collect();
        drop(records);

        let mut swept = 0;
        for engine_id in managed {
            if !known.contains(engine_id.as_str()) {
                warn!(engine_id, "orphan container found at startup, force-stopping");
                self.engine.force_stop(&engine_id).await?;
                swept += 1;
            }
        }
        Ok(swept)
    }

    /// Acquire a container for `group`: same-group ready, else any ready,
    /// else warm a new one, else cold-spawn directly as a last resort.
    pub async fn acquire(&self, group: &GroupId, spawn: impl Fn() -> ContainerSpec) -> Result<ContainerId> {
        if let Some(id) = self.take_ready(Some(group)).await {
            return Ok(id);
        }
        if let Some(id) = self.take_ready(None).await {
            return Ok(id);
        }

        let count = self.records.lock().await.len();
        if count >= MAX_SIZE {
            return Err(ContainerError::PoolExhausted(count, MAX_SIZE));
        }

        let spec = spawn();
        let id = self.spawn_warming(spec).await?;
        self.mark_ready(&id).await?;
        self.take_ready(Some(group)).await.ok_or_else(|| ContainerError::NoContainer(group.to_string()))
    }

    async fn take_ready(&self, group: Option<&GroupId>) -> Option<ContainerId> {
        let mut records = self.records.lock().await;
        let candidate = records
            .values()
            .find(|r| r.status == ContainerStatus::Ready && group.map(|g| &r.group == g).unwrap_or(true))
            .map(|r| r.id.clone())?;
        if let Some(record) = records.get_mut(&candidate) {
            record.status = ContainerStatus::InUse;
            record.ready_since = None;
            record.reuse_count += 1;
        }
        Some(candidate)
    }

    /// Spawn a new container and register it in `warming`.
    pub async fn spawn_warming(&self, spec: ContainerSpec) -> Result<ContainerId> {
        let engine_id = self.engine.spawn(&spec).await?;
        let id = ContainerId::new();
        let mut labels = HashMap::new();
        labels.insert("managed".to_string(), "true".to_string());
        labels.insert("group".to_string(), spec.group.as_str().to_string());

        let record = ContainerRecord {
            id: id.clone(),
            engine_id,
            group: spec.group.clone(),
            started_at: Utc::now(),
            status: ContainerStatus::Warming,
            reuse_count: 0,
            labels,
            ready_since: None,
            warming_since: Some(Utc::now()),
        };
        self.records.lock().await.insert(id.clone(), record);
        info!(container_id = %id, group = %spec.group, "container warming");
        Ok(id)
    }

    /// Transition `warming -> ready` on receipt of the container's READY signal.
    pub async fn mark_ready(&self, id: &ContainerId) -> Result<()> {
        let mut records = self.records.lock().await;
        let record = records.get_mut(id).ok_or_else(|| ContainerError::NoContainer(id.to_string()))?;
        record.status = ContainerStatus::Ready;
        record.ready_since = Some(Utc::now());
        record.warming_since = None;
        Ok(())
    }

    /// Release an in-use container back to `ready` for reuse, or `draining`
    /// if it's being retired instead.
    pub async fn release(&self, id: &ContainerId) -> Result<()> {
        let mut records = self.records.lock().await;
        if let Some(record) = records.get_mut(id) {
            record.status = ContainerStatus::Ready;
            record.ready_since = Some(Utc::now());
        }
        Ok(())
    }

    /// Stop containers that have been `warming` past [`WARMUP_TIMEOUT`].
    pub async fn sweep_warmup_timeouts(&self) -> Result<Vec<ContainerId>> {
        let stale: Vec<(ContainerId, String)> = {
            let records = self.records.lock().await;
            records
                .values()
                .filter(|r| {
                    r.status == ContainerStatus::Warming
                        && r.warming_since
                            .map(|t| Utc::now().signed_duration_since(t).num_seconds() as u64 >= WARMUP_TIMEOUT.as_secs())
                            .unwrap_or(false)
                })
                .map(|r| (r.id.clone(), r.engine_id.clone()))
                .collect()
        };

        for (id, engine_id) in &stale {
            warn!(container_id = %id, "container failed to become ready in time, stopping");
            self.engine.force_stop(engine_id).await?;
            self.transition_stopped(id).await;
        }
        Ok(stale.into_iter().map(|(id, _)| id).collect())
    }

    /// Retire `ready` containers that have been idle past [`IDLE_TIMEOUT`],
    /// while keeping at least [`MIN_SIZE`] ready.
    pub async fn retire_idle(&self) -> Result<Vec<ContainerId>> {
        let ready_count = {
            let records = self.records.lock().await;
            records.values().filter(|r| r.status == ContainerStatus::Ready).count()
        };
        if ready_count <= MIN_SIZE {
            return Ok(Vec::new());
        }

        let candidates: Vec<(ContainerId, String)> = {
            let records = self.records.lock().await;
            let mut v: Vec<_> = records
                .values()
                .filter(|r| {
                    r.status == ContainerStatus::Ready
                        && r.ready_since
                            .map(|t| Utc::now().signed_duration_since(t).num_seconds() as u64 >= IDLE_TIMEOUT.as_secs())
                            .unwrap_or(false)
                })
                .map(|r| (r.id.clone(), r.engine_id.clone()))
                .collect();
            v.truncate(ready_count - MIN_SIZE);
            v
        };

        for (id, engine_id) in &candidates {
            info!(container_id = %id, "retiring idle container");
            self.engine.stop(engine_id, GRACEFUL_STOP_TIMEOUT).await.ok();
            self.transition_stopped(id).await;
        }
        Ok(candidates.into_iter().map(|(id, _)| id).collect())
    }

    /// Whether `id` is currently stuck per heartbeat age.
    pub async fn is_stuck(&self, id: &ContainerId) -> bool {
        self.heartbeats.is_stuck(id)
    }

    pub async fn record_heartbeat(&self, id: &ContainerId) {
        self.heartbeats.record(id);
    }

    pub async fn get(&self, id: &ContainerId) -> Option<ContainerRecord> {
        self.records.lock().await.get(id).cloned()
    }

    pub async fn list(&self) -> Vec<ContainerRecord> {
        self.records.lock().await.values().cloned().collect()
    }

    pub async fn ready_count(&self) -> usize {
        self.records
            .lock()
            .await
            .values()
            .filter(|r| r.status == ContainerStatus::Ready)
            .count()
    }

    async fn transition_stopped(&self, id: &ContainerId) {
        self.heartbeats.remove(id);
        self.records.lock().await.remove(id);
    }

    /// Ordered shutdown: mark every in-use container `draining`, give it
    /// [`GRACEFUL_STOP_TIMEOUT`] to finish, then force-stop whatever remains.
    pub async fn shutdown(&self) -> Result<()> {
        let to_stop: Vec<(ContainerId, String, bool)> = {
            let mut records = self.records.lock().await;
            records
                .values_mut()
                .map(|r| {
                    let was_in_use = r.status == ContainerStatus::InUse;
                    r.status = ContainerStatus::Draining;
                    (r.id.clone(), r.engine_id.clone(), was_in_use)
                })
                .collect()
        };

        for (id, engine_id, was_in_use) in to_stop {
            let timeout = if was_in_use { GRACEFUL_STOP_TIMEOUT } else { Duration::from_secs(0) };
            if self.engine.stop(&engine_id, timeout).await.is_err() {
                self.engine.force_stop(&engine_id).await.ok();
            }
            self.transition_stopped(&id).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::FakeEngine;
    use std::path::PathBuf;

    fn spec(group: &str) -> ContainerSpec {
        ContainerSpec {
            group: GroupId::new(group),
            image: "corvus-agent:latest".into(),
            ipc_dir: PathBuf::from("/tmp/ipc"),
            workspace_dir: PathBuf::from("/tmp/ws"),
            session_dir: PathBuf::from("/tmp/session"),
            ipc_secret: "secret".into(),
            memory_limit: "512m".into(),
            cpu_quota: "1.0".into(),
        }
    }

    fn registry() -> ContainerRegistry {
        ContainerRegistry::new(Arc::new(FakeEngine::new()), HeartbeatTracker::new())
    }

    #[tokio::test]
    async fn acquire_warms_and_reuses_for_same_group() {
        let reg = registry();
        let group = GroupId::new("main");
        let id1 = reg.acquire(&group, || spec("main")).await.unwrap();
        reg.release(&id1).await.unwrap();

        let id2 = reg.acquire(&group, || spec("main")).await.unwrap();
        assert_eq!(id1, id2, "should reuse the same-group ready container");
        assert_eq!(reg.get(&id2).await.unwrap().reuse_count, 1);
    }

    #[tokio::test]
    async fn acquire_falls_back_to_any_ready_when_group_mismatched() {
        let reg = registry();
        let a = reg.acquire(&GroupId::new("alpha"), || spec("alpha")).await.unwrap();
        reg.release(&a).await.unwrap();

        let id = reg.acquire(&GroupId::new("beta"), || spec("beta")).await.unwrap();
        assert_eq!(id, a);
    }

    #[tokio::test]
    async fn pool_exhaustion_is_reported() {
        let reg = registry();
        for i in 0..MAX_SIZE {
            let group = GroupId::new(format!("g{i}"));
            reg.acquire(&group, move || spec("gN")).await.unwrap();
        }
        let result = reg.acquire(&GroupId::new("overflow"), || spec("overflow")).await;
        assert!(matches!(result, Err(ContainerError::PoolExhausted(_, MAX_SIZE))));
    }

    #[tokio::test]
    async fn sweep_orphans_force_stops_untracked_containers() {
        let engine = Arc::new(FakeEngine::new());
        let orphan_id = engine.spawn(&spec("ghost")).await.unwrap();
        let reg = ContainerRegistry::new(engine.clone(), HeartbeatTracker::new());

        let swept = reg.sweep_orphans().await.unwrap();
        assert_eq!(swept, 1);
        assert!(!engine.is_alive(&orphan_id).await);
    }

    #[tokio::test]
    async fn shutdown_stops_every_container() {
        let reg = registry();
        let id = reg.acquire(&GroupId::new("main"), || spec("main")).await.unwrap();
        reg.shutdown().await.unwrap();
        assert!(reg.get(&id).await.is_none());
        assert!(reg.list().await.is_empty());
    }
}
