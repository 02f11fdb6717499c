use async_trait::async_trait;
use corvus_core::types::ChatId;

use crate::{
    error::ChannelError,
    types::{ConnectionState, OutboundPayload},
};

/// Uniform contract implemented by every channel adapter (Telegram, WhatsApp, …).
///
/// Implementations are `Send + Sync` so a single instance can be shared
/// behind an `Arc` and driven from multiple Tokio tasks. Inbound events are
/// not trait methods — an adapter pushes [`crate::types::ChannelEvent`]
/// values onto the `mpsc::Sender` it was constructed with, so a slow
/// consumer never blocks the adapter's own read loop.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Stable lowercase identifier for this channel (e.g. `"telegram"`).
    fn name(&self) -> &str;

    /// Establish (or re-establish) the connection. Adapters drive their own
    /// state transitions; callers only observe them through [`Channel::state`].
    async fn connect(&self) -> Result<(), ChannelError>;

    /// Gracefully close the connection and settle in [`ConnectionState::Disconnected`].
    async fn disconnect(&self) -> Result<(), ChannelError>;

    /// Send plain text. Equivalent to `send_payload` with [`OutboundPayload::Text`].
    async fn send_text(&self, chat_id: &ChatId, text: &str) -> Result<(), ChannelError> {
        self.send_payload(chat_id, OutboundPayload::text(text)).await
    }

    /// Send a text, photo, or document payload.
    async fn send_payload(&self, chat_id: &ChatId, payload: OutboundPayload) -> Result<(), ChannelError>;

    /// Set (or clear) the typing/composing indicator. Adapters that surface
    /// this to the platform must auto-expire it after five minutes even if
    /// the caller never clears it explicitly.
    async fn set_typing(&self, chat_id: &ChatId, active: bool) -> Result<(), ChannelError>;

    /// Current connection state, non-blocking.
    fn state(&self) -> ConnectionState;
}
