use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use corvus_core::types::ChatId;

/// A file reference attached to an inbound or outbound message. Channels
/// exchange opaque local paths or platform file IDs; resolving them to bytes
/// is the adapter's concern, not this crate's.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub kind: AttachmentKind,
    /// Local path (outbound) or platform-native file reference (inbound).
    pub file: String,
    pub caption: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Photo,
    Document,
}

/// Content an adapter hands to [`crate::channel::Channel::send_payload`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutboundPayload {
    Text { text: String },
    Photo { file: String, caption: Option<String> },
    Document { file: String, caption: Option<String> },
}

impl OutboundPayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// Events an adapter raises as they happen. Delivered to subscribers through
/// a bounded channel rather than a direct callback, so a slow subscriber
/// cannot block the adapter's read loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChannelEvent {
    MessageReceived {
        chat_id: ChatId,
        content: String,
        sender: String,
        timestamp: DateTime<Utc>,
        attachments: Vec<Attachment>,
    },
    ChatMetadata {
        chat_id: ChatId,
        timestamp: DateTime<Utc>,
        display_name: Option<String>,
    },
}

/// Connection lifecycle of a channel adapter.
///
/// `LoggedOut` is terminal for that one channel but never propagates past
/// it — the rest of the system keeps running in a degraded mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Degraded,
    LoggedOut,
}

impl ConnectionState {
    /// Whether outbound sends should be buffered rather than attempted.
    pub fn is_unavailable(&self) -> bool {
        !matches!(self, Self::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Degraded => "degraded",
            Self::LoggedOut => "logged_out",
        };
        write!(f, "{s}")
    }
}
