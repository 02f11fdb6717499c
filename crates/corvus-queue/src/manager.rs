use std::collections::HashMap;
use std::time::Duration;

use corvus_core::types::{ChatId, GroupId, Priority};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::{QueueError, Result};
use crate::store::QueueStore;
use crate::types::{EnqueueOutcome, EntryStatus, QueueEntry};

/// Bounded total queue size across all groups.
pub const MAX_QUEUE_SIZE: usize = 20;

enum Command {
    Enqueue {
        group: GroupId,
        chat: ChatId,
        priority: Priority,
        prompt: String,
        reply: oneshot::Sender<Result<EnqueueOutcome>>,
    },
    NextForGroup {
        group: GroupId,
        reply: oneshot::Sender<Option<QueueEntry>>,
    },
    Complete {
        id: String,
        success: bool,
        reply: oneshot::Sender<Result<()>>,
    },
    SetConcurrency {
        limit: usize,
    },
    Depth {
        group: GroupId,
        reply: oneshot::Sender<usize>,
    },
}

/// Cloneable front door to the queue supervisor. Every interaction goes
/// through message passing over a typed channel; no caller ever touches the
/// supervisor's maps directly.
#[derive(Clone)]
pub struct QueueHandle {
    tx: mpsc::Sender<Command>,
}

impl QueueHandle {
    /// Enqueue a prompt for `group`. Rejects with `QueueError::Full` (and
    /// does not persist anything) once the global bound is reached.
    pub async fn enqueue(
        &self,
        group: GroupId,
        chat: ChatId,
        priority: Priority,
        prompt: impl Into<String>,
    ) -> Result<EnqueueOutcome> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Enqueue {
                group,
                chat,
                priority,
                prompt: prompt.into(),
                reply,
            })
            .await
            .map_err(|_| QueueError::Interact("supervisor task has stopped".into()))?;
        rx.await
            .map_err(|_| QueueError::Interact("supervisor dropped the reply channel".into()))?
    }

    /// Pop the next waiting entry for `group`, if the concurrency cap allows
    /// another active run. Returns `None` under backpressure or when empty.
    pub async fn next_for_group(&self, group: GroupId) -> Option<QueueEntry> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::NextForGroup { group, reply }).await.is_err() {
            return None;
        }
        rx.await.unwrap_or(None)
    }

    /// Mark an active entry finished (successfully or not) and remove it
    /// from persistence.
    pub async fn complete(&self, id: impl Into<String>, success: bool) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Complete {
                id: id.into(),
                success,
                reply,
            })
            .await
            .map_err(|_| QueueError::Interact("supervisor task has stopped".into()))?;
        rx.await
            .map_err(|_| QueueError::Interact("supervisor dropped the reply channel".into()))?
    }

    /// Set the live concurrency cap (clamped server-side to `[1, base]`).
    pub async fn set_concurrency(&self, limit: usize) {
        let _ = self.tx.send(Command::SetConcurrency { limit }).await;
    }

    /// Number of entries currently waiting in `group`'s line.
    pub async fn depth(&self, group: GroupId) -> usize {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Depth { group, reply }).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// Owns all queue state. Exactly one instance runs per process; every other
/// subsystem reaches it only through a [`QueueHandle`].
struct Supervisor {
    store: QueueStore,
    waiting: HashMap<GroupId, Vec<QueueEntry>>,
    active: HashMap<String, QueueEntry>,
    base_concurrency: usize,
    concurrency_limit: usize,
}

impl Supervisor {
    fn total_waiting(&self) -> usize {
        self.waiting.values().map(|v| v.len()).sum()
    }

    async fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Enqueue {
                group,
                chat,
                priority,
                prompt,
                reply,
            } => {
                let outcome = self.enqueue(group, chat, priority, prompt).await;
                let _ = reply.send(outcome);
            }
            Command::NextForGroup { group, reply } => {
                let entry = self.next_for_group(&group).await;
                let _ = reply.send(entry);
            }
            Command::Complete { id, success, reply } => {
                let res = self.complete(&id, success).await;
                let _ = reply.send(res);
            }
            Command::SetConcurrency { limit } => {
                self.concurrency_limit = limit.clamp(1, self.base_concurrency);
            }
            Command::Depth { group, reply } => {
                let depth = self.waiting.get(&group).map(|v| v.len()).unwrap_or(0);
                let _ = reply.send(depth);
            }
        }
    }

    async fn enqueue(
        &mut self,
        group: GroupId,
        chat: ChatId,
        priority: Priority,
        prompt: String,
    ) -> Result<EnqueueOutcome> {
        if self.total_waiting() + self.active.len() >= MAX_QUEUE_SIZE {
            warn!(group = %group, "queue at capacity, rejecting new entry");
            return Err(QueueError::Full {
                capacity: MAX_QUEUE_SIZE,
            });
        }
        let entry = QueueEntry::new(group.clone(), chat, priority, prompt);
        self.store.insert(&entry).await?;

        let bucket = self.waiting.entry(group).or_default();
        let idx = bucket
            .binary_search_by(|e| e.sort_key().cmp(&entry.sort_key()))
            .unwrap_or_else(|i| i);
        bucket.insert(idx, entry.clone());
        info!(id = %entry.id, position = idx, "enqueued");
        Ok(EnqueueOutcome {
            entry_id: entry.id,
            position: idx,
        })
    }

    async fn next_for_group(&mut self, group: &GroupId) -> Option<QueueEntry> {
        if self.active.len() >= self.concurrency_limit {
            return None;
        }
        let bucket = self.waiting.get_mut(group)?;
        if bucket.is_empty() {
            return None;
        }
        let mut entry = bucket.remove(0);
        entry.status = EntryStatus::Active;
        if let Err(e) = self.store.update_status(&entry.id, EntryStatus::Active, None).await {
            warn!(id = %entry.id, error = %e, "failed to persist active transition");
        }
        self.active.insert(entry.id.clone(), entry.clone());
        Some(entry)
    }

    async fn complete(&mut self, id: &str, success: bool) -> Result<()> {
        if self.active.remove(id).is_none() {
            return Err(QueueError::NotFound { id: id.to_string() });
        }
        let status = if success {
            EntryStatus::Completed
        } else {
            EntryStatus::Failed
        };
        self.store.update_status(id, status, None).await?;
        self.store.delete(id).await.ok();
        Ok(())
    }
}

/// Start the supervisor task, reclaiming any persisted state: waiting
/// entries are re-enqueued as-is; active entries whose linked container
/// `container_is_alive` reports dead are reset to waiting and re-enqueued.
pub async fn spawn<F>(
    store: QueueStore,
    base_concurrency: usize,
    container_is_alive: F,
) -> Result<(QueueHandle, tokio::task::JoinHandle<()>)>
where
    F: Fn(&str) -> bool + Send + Sync + 'static,
{
    let persisted = store.load_all().await?;
    let mut waiting: HashMap<GroupId, Vec<QueueEntry>> = HashMap::new();
    let mut active: HashMap<String, QueueEntry> = HashMap::new();

    for mut entry in persisted {
        match entry.status {
            EntryStatus::Waiting => {
                waiting.entry(entry.group.clone()).or_default().push(entry);
            }
            EntryStatus::Active => {
                let alive = entry
                    .container_id
                    .as_deref()
                    .map(|id| container_is_alive(id))
                    .unwrap_or(false);
                if alive {
                    active.insert(entry.id.clone(), entry);
                } else {
                    entry.status = EntryStatus::Waiting;
                    entry.container_id = None;
                    store.update_status(&entry.id, EntryStatus::Waiting, None).await?;
                    waiting.entry(entry.group.clone()).or_default().push(entry);
                }
            }
            EntryStatus::Completed | EntryStatus::Failed => {
                let _ = store.delete(&entry.id).await;
            }
        }
    }
    for bucket in waiting.values_mut() {
        bucket.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    }

    info!(
        reclaimed_waiting = waiting.values().map(|v| v.len()).sum::<usize>(),
        reclaimed_active = active.len(),
        "queue state restored from persistence"
    );

    let (tx, mut rx) = mpsc::channel(256);
    let mut supervisor = Supervisor {
        store,
        waiting,
        active,
        base_concurrency,
        concurrency_limit: base_concurrency,
    };
    let join = tokio::spawn(async move {
        while let Some(cmd) = rx.recv().await {
            supervisor.handle(cmd).await;
        }
    });
    Ok((QueueHandle { tx }, join))
}

/// Sample `/proc`-derived system pressure every 30s and nudge the live
/// concurrency cap down under load or back up toward `base_concurrency`
/// once it eases.
pub fn spawn_concurrency_sampler(handle: QueueHandle, base_concurrency: usize) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut current = base_concurrency;
        loop {
            tokio::time::sleep(Duration::from_secs(30)).await;
            let target = if crate::pressure::under_pressure() {
                current.saturating_sub(1).max(1)
            } else {
                (current + 1).min(base_concurrency)
            };
            if target != current {
                debug!(from = current, to = target, "adjusting queue concurrency");
                current = target;
                handle.set_concurrency(current).await;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn started(base: usize) -> QueueHandle {
        let store = QueueStore::open_in_memory().await.unwrap();
        let (handle, _join) = spawn(store, base, |_| false).await.unwrap();
        handle
    }

    #[tokio::test]
    async fn high_priority_jumps_ahead_of_earlier_normal_entry() {
        let handle = started(4).await;
        let group = GroupId::main();
        handle
            .enqueue(group.clone(), ChatId::new("tg", "1"), Priority::Normal, "first")
            .await
            .unwrap();
        handle
            .enqueue(group.clone(), ChatId::new("tg", "2"), Priority::High, "urgent")
            .await
            .unwrap();

        let next = handle.next_for_group(group).await.unwrap();
        assert_eq!(next.prompt, "urgent");
    }

    #[tokio::test]
    async fn same_priority_entries_are_fifo() {
        let handle = started(4).await;
        let group = GroupId::main();
        handle
            .enqueue(group.clone(), ChatId::new("tg", "1"), Priority::Normal, "a")
            .await
            .unwrap();
        handle
            .enqueue(group.clone(), ChatId::new("tg", "1"), Priority::Normal, "b")
            .await
            .unwrap();

        let first = handle.next_for_group(group.clone()).await.unwrap();
        assert_eq!(first.prompt, "a");
    }

    #[tokio::test]
    async fn concurrency_cap_withholds_further_entries() {
        let handle = started(1).await;
        let group = GroupId::main();
        handle
            .enqueue(group.clone(), ChatId::new("tg", "1"), Priority::Normal, "a")
            .await
            .unwrap();
        handle
            .enqueue(group.clone(), ChatId::new("tg", "1"), Priority::Normal, "b")
            .await
            .unwrap();

        let first = handle.next_for_group(group.clone()).await;
        assert!(first.is_some());
        // Cap is 1 and one entry is already active; the second must wait.
        let second = handle.next_for_group(group).await;
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn enqueue_rejects_once_global_capacity_is_reached() {
        let handle = started(MAX_QUEUE_SIZE).await;
        let group = GroupId::main();
        for i in 0..MAX_QUEUE_SIZE {
            handle
                .enqueue(group.clone(), ChatId::new("tg", &i.to_string()), Priority::Normal, "x")
                .await
                .unwrap();
        }
        let overflow = handle
            .enqueue(group, ChatId::new("tg", "overflow"), Priority::Normal, "x")
            .await;
        assert!(matches!(overflow, Err(QueueError::Full { capacity }) if capacity == MAX_QUEUE_SIZE));
    }

    #[tokio::test]
    async fn complete_frees_a_concurrency_slot() {
        let handle = started(1).await;
        let group = GroupId::main();
        handle
            .enqueue(group.clone(), ChatId::new("tg", "1"), Priority::Normal, "a")
            .await
            .unwrap();
        handle
            .enqueue(group.clone(), ChatId::new("tg", "1"), Priority::Normal, "b")
            .await
            .unwrap();

        let first = handle.next_for_group(group.clone()).await.unwrap();
        handle.complete(first.id, true).await.unwrap();

        let second = handle.next_for_group(group).await;
        assert!(second.is_some());
    }

    #[tokio::test]
    async fn active_entries_reclaimed_as_waiting_when_container_is_dead() {
        let store = QueueStore::open_in_memory().await.unwrap();
        let entry = QueueEntry::new(GroupId::main(), ChatId::new("tg", "1"), Priority::Normal, "resume me");
        store.insert(&entry).await.unwrap();
        store
            .update_status(&entry.id, EntryStatus::Active, Some("dead-container"))
            .await
            .unwrap();

        let (handle, _join) = spawn(store, 4, |_| false).await.unwrap();
        let reclaimed = handle.next_for_group(GroupId::main()).await;
        assert!(reclaimed.is_some());
    }
}
