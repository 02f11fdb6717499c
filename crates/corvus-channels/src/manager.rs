use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use corvus_core::types::ChatId;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

use crate::{channel::Channel, error::ChannelError, types::{ConnectionState, OutboundPayload}};

/// Backoff schedule between `disconnected` and `reconnecting`: 5s, 10s, 30s,
/// 60s, then 5 minutes. Once the schedule is exhausted it holds at the last
/// step rather than growing further or giving up.
const BACKOFF_SCHEDULE_SECS: [u64; 5] = [5, 10, 30, 60, 300];

struct Buffered {
    chat_id: ChatId,
    payload: OutboundPayload,
}

struct ManagedChannel {
    channel: Arc<dyn Channel>,
    buffer: Mutex<VecDeque<Buffered>>,
}

/// Registers channel adapters, drives their connection supervisors, and
/// buffers outbound sends made while a channel is unavailable.
///
/// One channel's connection trouble never affects another's: each adapter
/// gets its own supervisor task, and a `LoggedOut` or exhausted-backoff
/// channel simply stays degraded while the rest keep operating normally.
pub struct ChannelManager {
    channels: HashMap<String, Arc<ManagedChannel>>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self { channels: HashMap::new() }
    }

    /// Register an adapter and spawn its connection supervisor.
    pub fn register(&mut self, channel: Arc<dyn Channel>) {
        let name = channel.name().to_string();
        let managed = Arc::new(ManagedChannel {
            channel,
            buffer: Mutex::new(VecDeque::new()),
        });
        info!(channel = %name, "registering channel adapter");
        tokio::spawn(supervise(managed.clone()));
        self.channels.insert(name, managed);
    }

    /// Send text, buffering it if the channel is not currently connected.
    pub async fn send_text(&self, channel_name: &str, chat_id: &ChatId, text: &str) -> Result<(), ChannelError> {
        self.send_payload(channel_name, chat_id, OutboundPayload::text(text)).await
    }

    /// Send a payload, buffering it if the channel is not currently connected.
    ///
    /// A failed send on a channel that believes itself connected is also
    /// buffered — the supervisor will flush it once the channel recovers.
    pub async fn send_payload(&self, channel_name: &str, chat_id: &ChatId, payload: OutboundPayload) -> Result<(), ChannelError> {
        let Some(managed) = self.channels.get(channel_name) else {
            return Err(ChannelError::ConfigError(format!("unknown channel: {channel_name}")));
        };

        if managed.channel.state().is_unavailable() {
            managed.buffer.lock().await.push_back(Buffered { chat_id: chat_id.clone(), payload });
            return Ok(());
        }

        match managed.channel.send_payload(chat_id, payload.clone()).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(channel = %channel_name, error = %e, "send failed, buffering for retry on reconnect");
                managed.buffer.lock().await.push_back(Buffered { chat_id: chat_id.clone(), payload });
                Err(e)
            }
        }
    }

    pub async fn set_typing(&self, channel_name: &str, chat_id: &ChatId, active: bool) -> Result<(), ChannelError> {
        let Some(managed) = self.channels.get(channel_name) else {
            return Err(ChannelError::ConfigError(format!("unknown channel: {channel_name}")));
        };
        if managed.channel.state().is_unavailable() {
            return Ok(());
        }
        managed.channel.set_typing(chat_id, active).await
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Channel>> {
        self.channels.get(name).map(|m| m.channel.clone())
    }

    /// Current state of every registered channel, sorted by name.
    pub fn states(&self) -> Vec<(String, ConnectionState)> {
        let mut result: Vec<(String, ConnectionState)> = self
            .channels
            .iter()
            .map(|(name, m)| (name.clone(), m.channel.state()))
            .collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }

    pub async fn disconnect_all(&self) {
        for (name, managed) in &self.channels {
            if let Err(e) = managed.channel.disconnect().await {
                warn!(channel = %name, error = %e, "error while disconnecting channel");
            }
        }
    }
}

impl Default for ChannelManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives one channel's connect/backoff/flush lifecycle for the life of the process.
async fn supervise(managed: Arc<ManagedChannel>) {
    let name = managed.channel.name().to_string();
    loop {
        if managed.channel.state() == ConnectionState::LoggedOut {
            warn!(channel = %name, "channel is logged out; supervisor standing down");
            return;
        }

        match connect_with_backoff(&managed).await {
            true => {
                flush_buffer(&managed).await;
                // Poll state at a modest cadence; a transition away from
                // Connected re-enters the backoff loop.
                loop {
                    sleep(Duration::from_secs(5)).await;
                    let state = managed.channel.state();
                    if state == ConnectionState::LoggedOut {
                        warn!(channel = %name, "channel logged out, standing down");
                        return;
                    }
                    if state != ConnectionState::Connected {
                        warn!(channel = %name, ?state, "channel dropped connection, reconnecting");
                        break;
                    }
                }
            }
            false => {
                error!(channel = %name, "exhausted reconnect schedule; will keep retrying at the longest interval");
                sleep(Duration::from_secs(*BACKOFF_SCHEDULE_SECS.last().unwrap())).await;
            }
        }
    }
}

/// Attempt to connect, retrying across [`BACKOFF_SCHEDULE_SECS`]. Returns
/// `true` once connected, `false` if every step in the schedule failed.
async fn connect_with_backoff(managed: &ManagedChannel) -> bool {
    let name = managed.channel.name();
    for (attempt, delay_secs) in BACKOFF_SCHEDULE_SECS.iter().enumerate() {
        match managed.channel.connect().await {
            Ok(()) => {
                info!(channel = %name, attempt = attempt + 1, "channel connected");
                return true;
            }
            Err(e) => {
                warn!(
                    channel = %name,
                    attempt = attempt + 1,
                    max = BACKOFF_SCHEDULE_SECS.len(),
                    error = %e,
                    retry_after_secs = delay_secs,
                    "channel connect failed"
                );
                sleep(Duration::from_secs(*delay_secs)).await;
            }
        }
    }
    false
}

/// Flush buffered sends in the order they were enqueued.
async fn flush_buffer(managed: &ManagedChannel) {
    let mut buffer = managed.buffer.lock().await;
    if buffer.is_empty() {
        return;
    }
    info!(channel = %managed.channel.name(), count = buffer.len(), "flushing buffered sends after reconnect");
    while let Some(item) = buffer.pop_front() {
        if let Err(e) = managed.channel.send_payload(&item.chat_id, item.payload.clone()).await {
            warn!(channel = %managed.channel.name(), error = %e, "buffered send failed again, re-queueing");
            buffer.push_front(item);
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Mutex as AsyncMutex;

    struct FakeChannel {
        connected: AtomicBool,
        sent: AsyncMutex<Vec<(String, OutboundPayload)>>,
        send_failures_remaining: AtomicUsize,
    }

    impl FakeChannel {
        fn new() -> Self {
            Self {
                connected: AtomicBool::new(false),
                sent: AsyncMutex::new(Vec::new()),
                send_failures_remaining: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Channel for FakeChannel {
        fn name(&self) -> &str {
            "fake"
        }

        async fn connect(&self) -> Result<(), ChannelError> {
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), ChannelError> {
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn send_payload(&self, chat_id: &ChatId, payload: OutboundPayload) -> Result<(), ChannelError> {
            if self.send_failures_remaining.load(Ordering::SeqCst) > 0 {
                self.send_failures_remaining.fetch_sub(1, Ordering::SeqCst);
                return Err(ChannelError::SendFailed("simulated".to_string()));
            }
            self.sent.lock().await.push((chat_id.as_str().to_string(), payload));
            Ok(())
        }

        async fn set_typing(&self, _chat_id: &ChatId, _active: bool) -> Result<(), ChannelError> {
            Ok(())
        }

        fn state(&self) -> ConnectionState {
            if self.connected.load(Ordering::SeqCst) {
                ConnectionState::Connected
            } else {
                ConnectionState::Disconnected
            }
        }
    }

    #[tokio::test]
    async fn send_while_disconnected_is_buffered_not_lost() {
        let fake = Arc::new(FakeChannel::new());
        let managed = Arc::new(ManagedChannel { channel: fake.clone(), buffer: Mutex::new(VecDeque::new()) });

        let chat = ChatId::new("fake", "1");
        managed.buffer.lock().await.push_back(Buffered { chat_id: chat.clone(), payload: OutboundPayload::text("hi") });
        assert_eq!(managed.buffer.lock().await.len(), 1);

        fake.connect().await.unwrap();
        flush_buffer(&managed).await;

        assert!(managed.buffer.lock().await.is_empty());
        assert_eq!(fake.sent.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn flush_preserves_fifo_order_and_stops_on_first_failure() {
        let fake = Arc::new(FakeChannel::new());
        fake.connect().await.unwrap();
        fake.send_failures_remaining.store(1, Ordering::SeqCst);
        let managed = Arc::new(ManagedChannel { channel: fake.clone(), buffer: Mutex::new(VecDeque::new()) });

        let chat = ChatId::new("fake", "1");
        for i in 0..3 {
            managed.buffer.lock().await.push_back(Buffered {
                chat_id: chat.clone(),
                payload: OutboundPayload::text(format!("msg-{i}")),
            });
        }

        flush_buffer(&managed).await;

        // First send fails and is requeued at the front; the rest never run this pass.
        assert_eq!(managed.buffer.lock().await.len(), 3);
        assert!(fake.sent.lock().await.is_empty());

        flush_buffer(&managed).await;
        assert!(managed.buffer.lock().await.is_empty());
        let sent = fake.sent.lock().await;
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0].0, "fake:1");
    }

    #[tokio::test]
    async fn manager_send_text_buffers_when_channel_unavailable() {
        let mut manager = ChannelManager::new();
        let fake = Arc::new(FakeChannel::new());
        manager.register(fake.clone());

        let chat = ChatId::new("fake", "42");
        manager.send_text("fake", &chat, "hello").await.unwrap();

        assert!(fake.sent.lock().await.is_empty());
        let states = manager.states();
        assert_eq!(states[0].0, "fake");
    }
}
