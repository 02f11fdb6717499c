//! Container task execution: acquire a container, hand off the assembled
//! prompt, collect the streamed reply, and apply the self-reflection and
//! partial-output recovery policies.
//!
//! Handoff rides the same request/response channel a container uses for
//! tool calls: on startup a container sends one `task.claim` request, and
//! the host answers it with the task payload. There is no separate
//! assignment transport — claiming a task is just the first tool call.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tracing::{info, warn};

use corvus_container::{ContainerRegistry, ContainerSpec, IpcChannel};
use corvus_core::error::{CorvusError, Result};
use corvus_core::types::{ContainerId, GroupId, Tier};
use corvus_protocol::{IpcRequest, IpcResponse, StreamFrame};

use crate::prompt::AssembledPrompt;

const TASK_CLAIM_OP: &str = "task.claim";
const MAX_SELF_REFLECTION_RETRIES: u32 = 2;
const QUALITY_RETRY_THRESHOLD: f32 = 0.5;

/// One container-backed task run.
pub struct TaskAssignment {
    pub entry_id: String,
    pub group: GroupId,
    pub prompt: AssembledPrompt,
}

/// Outcome of running a container task through to completion.
pub struct TaskOutcome {
    pub text: String,
    pub retries: u32,
    pub recovered_partial: bool,
}

pub struct PipelineRunner {
    registry: Arc<ContainerRegistry>,
    ipc_root: PathBuf,
    workspace_root: PathBuf,
    session_root: PathBuf,
    ipc_secret: String,
    image: String,
    memory_limit: String,
    cpu_quota: String,
    container_timeout: Duration,
    channels: Mutex<HashMap<GroupId, Arc<IpcChannel>>>,
    pending: Arc<Mutex<HashMap<String, String>>>,
    shutdown: watch::Receiver<bool>,
}

impl PipelineRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<ContainerRegistry>,
        ipc_root: PathBuf,
        workspace_root: PathBuf,
        session_root: PathBuf,
        ipc_secret: String,
        image: String,
        memory_limit: String,
        cpu_quota: String,
        container_timeout: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            registry,
            ipc_root,
            workspace_root,
            session_root,
            ipc_secret,
            image,
            memory_limit,
            cpu_quota,
            container_timeout,
            channels: Mutex::new(HashMap::new()),
            pending: Arc::new(Mutex::new(HashMap::new())),
            shutdown,
        }
    }

    async fn channel_for(&self, group: &GroupId) -> Arc<IpcChannel> {
        let mut channels = self.channels.lock().await;
        if let Some(existing) = channels.get(group) {
            return existing.clone();
        }

        let dir = self.ipc_root.join(group.as_str());
        let channel = Arc::new(IpcChannel::new(dir, self.ipc_secret.clone().into_bytes()));
        let (req_tx, mut req_rx) = mpsc::channel::<IpcRequest>(32);
        channel.clone().spawn_request_watcher(req_tx, self.shutdown.clone());

        let pending = self.pending.clone();
        let responder = channel.clone();
        tokio::spawn(async move {
            while let Some(request) = req_rx.recv().await {
                if request.op != TASK_CLAIM_OP {
                    let resp = IpcResponse::err(request.id, format!("unknown op: {}", request.op));
                    let _ = responder.write_response(&resp).await;
                    continue;
                }
                let task = pending.lock().await.remove(&request.id);
                let resp = match task {
                    Some(prompt_text) => IpcResponse::ok(request.id, prompt_text),
                    None => IpcResponse::err(request.id, "no task assigned for this id".to_string()),
                };
                let _ = responder.write_response(&resp).await;
            }
        });

        channels.insert(group.clone(), channel.clone());
        channel
    }

    fn spec_for(&self, group: &GroupId, channel: &IpcChannel) -> ContainerSpec {
        ContainerSpec {
            group: group.clone(),
            image: self.image.clone(),
            ipc_dir: channel.dir().to_path_buf(),
            workspace_dir: self.workspace_root.join(group.as_str()),
            session_dir: self.session_root.join(group.as_str()),
            ipc_secret: self.ipc_secret.clone(),
            memory_limit: self.memory_limit.clone(),
            cpu_quota: self.cpu_quota.clone(),
        }
    }

    /// Run one task to completion, applying self-reflection retries for
    /// container-full tier and partial-output recovery on a dropped stream.
    pub async fn run(&self, assignment: TaskAssignment, tier: Tier) -> Result<TaskOutcome> {
        let mut retries = 0;
        loop {
            let outcome = self.run_once(&assignment).await?;

            if tier == Tier::ContainerFull
                && retries < MAX_SELF_REFLECTION_RETRIES
                && estimate_quality(&outcome.text) < QUALITY_RETRY_THRESHOLD
            {
                warn!(entry_id = %assignment.entry_id, retries, "self-reflection: low-quality reply, retrying");
                retries += 1;
                continue;
            }

            return Ok(TaskOutcome { retries, ..outcome });
        }
    }

    async fn run_once(&self, assignment: &TaskAssignment) -> Result<TaskOutcome> {
        let channel = self.channel_for(&assignment.group).await;
        let spec = self.spec_for(&assignment.group, &channel);
        let container_id = self
            .registry
            .acquire(&assignment.group, || spec.clone())
            .await
            .map_err(|e| CorvusError::ContainerSpawnFailed(e.to_string()))?;

        self.pending
            .lock()
            .await
            .insert(assignment.entry_id.clone(), assignment.prompt.text.clone());

        let (tx, mut rx) = mpsc::channel::<StreamFrame>(64);
        let tail = channel.tail_stream(tx, self.shutdown.clone());

        let mut text = String::new();
        let collector = async {
            while let Some(frame) = rx.recv().await {
                self.registry.record_heartbeat(&container_id).await;
                text.push_str(&frame.text);
            }
        };

        let done = tokio::select! {
            result = tail => result,
            _ = tokio::time::sleep(self.container_timeout) => None,
            _ = collector => None,
        };

        self.release(&container_id).await;

        match done {
            Some(_) => Ok(TaskOutcome { text, retries: 0, recovered_partial: false }),
            None => self.handle_partial_output(assignment, &container_id, text).await,
        }
    }

    async fn release(&self, container_id: &ContainerId) {
        if let Err(e) = self.registry.release(container_id).await {
            warn!(container_id = %container_id, error = %e, "failed to release container back to the pool");
        }
    }

    /// A stream that never produced `stream.done` is a partial output: the
    /// caller gets what arrived, and the entry is scheduled for one
    /// automatic high-priority retry before it's surfaced to an admin.
    async fn handle_partial_output(
        &self,
        assignment: &TaskAssignment,
        container_id: &ContainerId,
        partial: String,
    ) -> Result<TaskOutcome> {
        if self.registry.is_stuck(container_id).await {
            warn!(container_id = %container_id, entry_id = %assignment.entry_id, "container stuck mid-task");
        }
        if partial.is_empty() {
            return Err(CorvusError::PartialOutput);
        }
        info!(entry_id = %assignment.entry_id, "recovered partial output after stream loss");
        Ok(TaskOutcome { text: partial, retries: 0, recovered_partial: true })
    }
}

/// Cheap proxy for reply quality until a real scoring model is wired in:
/// empty or very short replies are treated as low quality.
fn estimate_quality(text: &str) -> f32 {
    let len = text.trim().len();
    if len == 0 {
        0.0
    } else if len < 20 {
        0.3
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_reply_is_low_quality() {
        assert!(estimate_quality("") < QUALITY_RETRY_THRESHOLD);
    }

    #[test]
    fn short_reply_is_low_quality() {
        assert!(estimate_quality("ok") < QUALITY_RETRY_THRESHOLD);
    }

    #[test]
    fn substantial_reply_passes() {
        assert!(estimate_quality("here is a complete and useful answer to the question") >= QUALITY_RETRY_THRESHOLD);
    }
}
