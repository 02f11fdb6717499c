//! In-process event bus between the pipeline, scheduler, and HTTP layer.
//!
//! Subscribers get a broadcast receiver; a slow or absent subscriber never
//! blocks a publisher. Because a lagged receiver silently drops the events
//! it missed, callers that must not miss anything (notably the scheduler's
//! own due-task check) also poll directly every 30 seconds rather than
//! relying on the bus alone.

use chrono::{DateTime, Utc};
use corvus_core::types::{ContainerId, GroupId};
use serde::Serialize;
use tokio::sync::broadcast;

/// Fallback poll interval for subscribers that cannot afford to miss an event.
pub const MISSED_EVENT_POLL_SECS: u64 = 30;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    TaskEnqueued { entry_id: String, group: GroupId, at: DateTime<Utc> },
    TaskCompleted { entry_id: String, group: GroupId, success: bool, at: DateTime<Utc> },
    ContainerStuck { container_id: ContainerId, group: GroupId, at: DateTime<Utc> },
    ScheduledTaskPaused { job_id: String, failures: u32, at: DateTime<Utc> },
    ChannelDegraded { channel: String, at: DateTime<Utc> },
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: Event) {
        // A full channel with no subscribers is not an error: there may
        // simply be nobody listening right now.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(Event::TaskEnqueued {
            entry_id: "e1".into(),
            group: GroupId::main(),
            at: Utc::now(),
        });
        let event = rx.recv().await.unwrap();
        matches!(event, Event::TaskEnqueued { .. });
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::new(8);
        bus.publish(Event::ChannelDegraded { channel: "telegram".into(), at: Utc::now() });
    }

    #[tokio::test]
    async fn lagged_subscriber_recovers_on_next_recv() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for i in 0..5 {
            bus.publish(Event::TaskEnqueued {
                entry_id: format!("e{i}"),
                group: GroupId::main(),
                at: Utc::now(),
            });
        }
        // Overflowed the small buffer; recv should report a lag rather than hang.
        assert!(matches!(rx.recv().await, Err(broadcast::error::RecvError::Lagged(_)) | Ok(_)));
    }
}
