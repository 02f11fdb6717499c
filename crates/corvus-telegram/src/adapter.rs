//! Telegram channel adapter.
//!
//! Wraps a teloxide `Bot` and long-polling `Dispatcher`, translating inbound
//! updates into [`ChannelEvent`]s and implementing the [`Channel`] contract
//! for outbound sends, typing, and connection-state tracking.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use teloxide::dispatching::ShutdownToken;
use teloxide::prelude::*;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{info, warn};

use corvus_channels::{Attachment, AttachmentKind, Channel, ChannelError, ChannelEvent, ConnectionState, OutboundPayload};
use corvus_core::types::ChatId as CoreChatId;

use crate::send::{send_document, send_photo, send_response};
use crate::typing::TypingHandle;

pub struct TelegramAdapter {
    bot_token: String,
    bot: AsyncMutex<Option<Bot>>,
    state: RwLock<ConnectionState>,
    shutdown: AsyncMutex<Option<ShutdownToken>>,
    typing: AsyncMutex<HashMap<String, TypingHandle>>,
    events: mpsc::Sender<ChannelEvent>,
}

impl TelegramAdapter {
    pub fn new(bot_token: impl Into<String>, events: mpsc::Sender<ChannelEvent>) -> Self {
        Self {
            bot_token: bot_token.into(),
            bot: AsyncMutex::new(None),
            state: RwLock::new(ConnectionState::Disconnected),
            shutdown: AsyncMutex::new(None),
            typing: AsyncMutex::new(HashMap::new()),
            events,
        }
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write().expect("state lock poisoned") = state;
    }

    fn teloxide_chat_id(chat_id: &CoreChatId) -> Result<ChatId, ChannelError> {
        let native = chat_id.as_str().split_once(':').map(|(_, n)| n).unwrap_or(chat_id.as_str());
        native
            .parse::<i64>()
            .map(ChatId)
            .map_err(|_| ChannelError::ConfigError(format!("not a Telegram chat id: {}", chat_id.as_str())))
    }
}

#[async_trait]
impl Channel for TelegramAdapter {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn connect(&self) -> Result<(), ChannelError> {
        self.set_state(ConnectionState::Connecting);
        let bot = Bot::new(&self.bot_token);

        if let Err(e) = bot.get_me().await {
            self.set_state(ConnectionState::Reconnecting);
            return Err(ChannelError::AuthFailed(e.to_string()));
        }

        let events = self.events.clone();
        let handler = Update::filter_message().endpoint(
            move |bot: Bot, msg: Message| {
                let events = events.clone();
                async move {
                    forward_update(&bot, &msg, &events).await;
                    respond(())
                }
            },
        );

        let mut dispatcher = Dispatcher::builder(bot.clone(), handler)
            .default_handler(|_upd| async {})
            .build();
        let token = dispatcher.shutdown_token();
        tokio::spawn(async move {
            dispatcher.dispatch().await;
        });

        *self.bot.lock().await = Some(bot);
        *self.shutdown.lock().await = Some(token);
        self.set_state(ConnectionState::Connected);
        info!("telegram: connected and dispatching");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ChannelError> {
        if let Some(token) = self.shutdown.lock().await.take() {
            if let Ok(fut) = token.shutdown() {
                fut.await;
            }
        }
        *self.bot.lock().await = None;
        self.set_state(ConnectionState::Disconnected);
        Ok(())
    }

    async fn send_payload(&self, chat_id: &CoreChatId, payload: OutboundPayload) -> Result<(), ChannelError> {
        let guard = self.bot.lock().await;
        let bot = guard.as_ref().ok_or_else(|| ChannelError::SendFailed("telegram not connected".to_string()))?;
        let tg_chat_id = Self::teloxide_chat_id(chat_id)?;

        match payload {
            OutboundPayload::Text { text } => send_response(bot, tg_chat_id, &text).await,
            OutboundPayload::Photo { file, caption } => send_photo(bot, tg_chat_id, &file, caption.as_deref()).await,
            OutboundPayload::Document { file, caption } => send_document(bot, tg_chat_id, &file, caption.as_deref()).await,
        }
    }

    async fn set_typing(&self, chat_id: &CoreChatId, active: bool) -> Result<(), ChannelError> {
        let guard = self.bot.lock().await;
        let bot = guard.as_ref().ok_or_else(|| ChannelError::SendFailed("telegram not connected".to_string()))?;
        let tg_chat_id = Self::teloxide_chat_id(chat_id)?;

        let mut typing = self.typing.lock().await;
        if active {
            typing
                .entry(chat_id.as_str().to_string())
                .or_insert_with(|| TypingHandle::start(bot.clone(), tg_chat_id));
        } else if let Some(handle) = typing.remove(chat_id.as_str()) {
            handle.stop();
        }
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        *self.state.read().expect("state lock poisoned")
    }
}

/// Translate a teloxide `Message` into a [`ChannelEvent`] and push it onto
/// the adapter's event channel. Drops silently on a full/closed channel —
/// the receiver disappearing means the adapter is shutting down.
async fn forward_update(bot: &Bot, msg: &Message, events: &mpsc::Sender<ChannelEvent>) {
    let chat_id = CoreChatId::new("tg", &msg.chat.id.0.to_string());
    let sender = msg
        .from
        .as_ref()
        .map(|u| u.full_name())
        .unwrap_or_else(|| "unknown".to_string());
    let timestamp = Utc::now();

    if let Some(display_name) = msg.chat.title().or_else(|| msg.from.as_ref().map(|u| u.first_name.as_str())) {
        let _ = events
            .send(ChannelEvent::ChatMetadata {
                chat_id: chat_id.clone(),
                timestamp,
                display_name: Some(display_name.to_string()),
            })
            .await;
    }

    let content = msg.text().map(str::to_string).unwrap_or_default();
    let attachments = extract_attachments(bot, msg).await;

    if content.is_empty() && attachments.is_empty() {
        return;
    }

    let _ = events
        .send(ChannelEvent::MessageReceived {
            chat_id,
            content,
            sender,
            timestamp,
            attachments,
        })
        .await;
}

async fn extract_attachments(bot: &Bot, msg: &Message) -> Vec<Attachment> {
    let caption = msg.caption().map(str::to_string);

    if let Some(sizes) = msg.photo() {
        let Some(largest) = sizes.last() else { return Vec::new() };
        return match bot.get_file(&largest.file.id).await {
            Ok(f) => vec![Attachment { kind: AttachmentKind::Photo, file: f.path, caption }],
            Err(e) => {
                warn!(error = %e, "telegram: failed to resolve photo file path");
                Vec::new()
            }
        };
    }

    if let Some(doc) = msg.document() {
        return match bot.get_file(&doc.file.id).await {
            Ok(f) => vec![Attachment { kind: AttachmentKind::Document, file: f.path, caption }],
            Err(e) => {
                warn!(error = %e, "telegram: failed to resolve document file path");
                Vec::new()
            }
        };
    }

    Vec::new()
}
