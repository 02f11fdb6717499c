//! Container engine abstraction — spawns and stops the sandboxed agent
//! process that backs one container record. The default implementation
//! shells out to a local container engine CLI (`docker` by convention);
//! registry tests substitute a fake so no test depends on a real engine.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{ContainerError, Result};
use corvus_core::types::GroupId;

/// Everything needed to spawn one container for a group.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub group: GroupId,
    pub image: String,
    pub ipc_dir: PathBuf,
    pub workspace_dir: PathBuf,
    pub session_dir: PathBuf,
    pub ipc_secret: String,
    pub memory_limit: String,
    pub cpu_quota: String,
}

/// Abstraction over the local container engine. `DockerEngine` is the real
/// implementation; tests use a fake implementing the same trait.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Start a container for `spec`, returning the engine's own id for it.
    async fn spawn(&self, spec: &ContainerSpec) -> Result<String>;
    /// Ask the container to stop, waiting up to `graceful_timeout` before
    /// the caller should escalate to `force_stop`.
    async fn stop(&self, engine_id: &str, graceful_timeout: Duration) -> Result<()>;
    /// Kill the container immediately.
    async fn force_stop(&self, engine_id: &str) -> Result<()>;
    /// Whether the engine still reports this container as running.
    async fn is_alive(&self, engine_id: &str) -> bool;
    /// Engine ids of every container labelled `managed=true`, for the
    /// startup orphan sweep.
    async fn list_managed(&self) -> Result<Vec<String>>;
}

/// Shells out to `docker` (or a compatible CLI named via `CONTAINER_ENGINE_BIN`).
pub struct DockerEngine {
    bin: String,
}

impl DockerEngine {
    pub fn new() -> Self {
        Self {
            bin: std::env::var("CONTAINER_ENGINE_BIN").unwrap_or_else(|_| "docker".to_string()),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.bin)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ContainerError::SpawnFailed(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(ContainerError::SpawnFailed(stderr));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl Default for DockerEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn spawn(&self, spec: &ContainerSpec) -> Result<String> {
        let group = spec.group.as_str().to_string();
        let mut args: Vec<String> = vec![
            "run".into(),
            "-d".into(),
            "--rm".into(),
            "--label".into(),
            "managed=true".into(),
            "--label".into(),
            format!("group={group}"),
            "--network".into(),
            "internal".into(),
            "--memory".into(),
            spec.memory_limit.clone(),
            "--cpus".into(),
            spec.cpu_quota.clone(),
            "--user".into(),
            "1000:1000".into(),
            "-v".into(),
            format!("{}:/workspace", spec.workspace_dir.display()),
            "-v".into(),
            format!("{}:/ipc", spec.ipc_dir.display()),
            "-v".into(),
            format!("{}:/session", spec.session_dir.display()),
            "-e".into(),
            format!("IPC_SECRET={}", spec.ipc_secret),
            "-e".into(),
            format!("GROUP={group}"),
        ];
        args.push(spec.image.clone());

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let id = self.run(&arg_refs).await?;
        debug!(engine_id = %id, group, "container spawned");
        Ok(id)
    }

    async fn stop(&self, engine_id: &str, graceful_timeout: Duration) -> Result<()> {
        let secs = graceful_timeout.as_secs().to_string();
        self.run(&["stop", "-t", &secs, engine_id]).await?;
        Ok(())
    }

    async fn force_stop(&self, engine_id: &str) -> Result<()> {
        if let Err(e) = self.run(&["kill", engine_id]).await {
            warn!(engine_id, error = %e, "force-stop failed, container may already be gone");
        }
        Ok(())
    }

    async fn is_alive(&self, engine_id: &str) -> bool {
        self.run(&["inspect", "-f", "{{.State.Running}}", engine_id])
            .await
            .map(|s| s == "true")
            .unwrap_or(false)
    }

    async fn list_managed(&self) -> Result<Vec<String>> {
        let out = self
            .run(&["ps", "-aq", "--filter", "label=managed=true"])
            .await?;
        Ok(out.lines().map(str::to_string).filter(|l| !l.is_empty()).collect())
    }
}

/// In-memory fake used by registry tests — no real process is ever spawned.
#[cfg(test)]
pub struct FakeEngine {
    pub alive: std::sync::Mutex<HashMap<String, bool>>,
    pub next_id: std::sync::atomic::AtomicU64,
}

#[cfg(test)]
impl FakeEngine {
    pub fn new() -> Self {
        Self {
            alive: std::sync::Mutex::new(HashMap::new()),
            next_id: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn kill_externally(&self, engine_id: &str) {
        self.alive.lock().unwrap().insert(engine_id.to_string(), false);
    }
}

#[cfg(test)]
#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn spawn(&self, _spec: &ContainerSpec) -> Result<String> {
        let id = self.next_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let engine_id = format!("fake-{id}");
        self.alive.lock().unwrap().insert(engine_id.clone(), true);
        Ok(engine_id)
    }

    async fn stop(&self, engine_id: &str, _graceful_timeout: Duration) -> Result<()> {
        self.alive.lock().unwrap().insert(engine_id.to_string(), false);
        Ok(())
    }

    async fn force_stop(&self, engine_id: &str) -> Result<()> {
        self.alive.lock().unwrap().insert(engine_id.to_string(), false);
        Ok(())
    }

    async fn is_alive(&self, engine_id: &str) -> bool {
        self.alive.lock().unwrap().get(engine_id).copied().unwrap_or(false)
    }

    async fn list_managed(&self) -> Result<Vec<String>> {
        Ok(self
            .alive
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, alive)| **alive)
            .map(|(id, _)| id.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ContainerSpec {
        ContainerSpec {
            group: GroupId::new("main"),
            image: "corvus-agent:latest".into(),
            ipc_dir: PathBuf::from("/tmp/ipc/main"),
            workspace_dir: PathBuf::from("/tmp/ws/main"),
            session_dir: PathBuf::from("/tmp/session/main"),
            ipc_secret: "secret".into(),
            memory_limit: "512m".into(),
            cpu_quota: "1.0".into(),
        }
    }

    #[tokio::test]
    async fn fake_engine_spawn_then_alive() {
        let engine = FakeEngine::new();
        let id = engine.spawn(&spec()).await.unwrap();
        assert!(engine.is_alive(&id).await);
        engine.stop(&id, Duration::from_secs(1)).await.unwrap();
        assert!(!engine.is_alive(&id).await);
    }

    #[tokio::test]
    async fn fake_engine_lists_only_alive_as_managed() {
        let engine = FakeEngine::new();
        let a = engine.spawn(&spec()).await.unwrap();
        let b = engine.spawn(&spec()).await.unwrap();
        engine.kill_externally(&a);
        let managed = engine.list_managed().await.unwrap();
        assert_eq!(managed, vec![b]);
    }
}
