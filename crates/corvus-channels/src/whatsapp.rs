//! Thin WhatsApp adapter.
//!
//! Talks to a local bridge process (e.g. a Baileys sidecar) over HTTP rather
//! than implementing the WhatsApp wire protocol directly — that protocol is
//! a thin-client boundary, not this crate's concern. This adapter exists to
//! prove the connection-state machine and buffering contract hold for a
//! second, independently-failing channel, not just Telegram.

use std::sync::RwLock;

use async_trait::async_trait;
use corvus_core::types::ChatId;
use reqwest::{Client, StatusCode};

use crate::channel::Channel;
use crate::error::ChannelError;
use crate::types::{ConnectionState, OutboundPayload};

pub struct WhatsAppAdapter {
    http: Client,
    bridge_url: String,
    state: RwLock<ConnectionState>,
}

impl WhatsAppAdapter {
    pub fn new(bridge_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            bridge_url: bridge_url.into(),
            state: RwLock::new(ConnectionState::Disconnected),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write().expect("state lock poisoned") = state;
    }
}

#[async_trait]
impl Channel for WhatsAppAdapter {
    fn name(&self) -> &str {
        "whatsapp"
    }

    async fn connect(&self) -> Result<(), ChannelError> {
        self.set_state(ConnectionState::Connecting);
        let resp = self.http.get(format!("{}/status", self.bridge_url)).send().await;
        match resp {
            Ok(r) if r.status().is_success() => {
                self.set_state(ConnectionState::Connected);
                Ok(())
            }
            Ok(r) if r.status() == StatusCode::UNAUTHORIZED => {
                self.set_state(ConnectionState::LoggedOut);
                Err(ChannelError::AuthFailed("whatsapp session logged out".to_string()))
            }
            Ok(r) => {
                self.set_state(ConnectionState::Reconnecting);
                Err(ChannelError::ConnectionFailed(format!("bridge returned {}", r.status())))
            }
            Err(e) => {
                self.set_state(ConnectionState::Reconnecting);
                Err(ChannelError::ConnectionFailed(e.to_string()))
            }
        }
    }

    async fn disconnect(&self) -> Result<(), ChannelError> {
        self.set_state(ConnectionState::Disconnected);
        Ok(())
    }

    async fn send_payload(&self, chat_id: &ChatId, payload: OutboundPayload) -> Result<(), ChannelError> {
        let body = serde_json::json!({ "chat_id": chat_id.as_str(), "payload": payload });
        self.http
            .post(format!("{}/send", self.bridge_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?
            .error_for_status()
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?;
        Ok(())
    }

    async fn set_typing(&self, chat_id: &ChatId, active: bool) -> Result<(), ChannelError> {
        let body = serde_json::json!({ "chat_id": chat_id.as_str(), "active": active });
        self.http
            .post(format!("{}/typing", self.bridge_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?;
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        *self.state.read().expect("state lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_adapter_starts_disconnected() {
        let adapter = WhatsAppAdapter::new("http://127.0.0.1:9999");
        assert_eq!(adapter.state(), ConnectionState::Disconnected);
        assert_eq!(adapter.name(), "whatsapp");
    }
}
