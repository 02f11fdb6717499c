//! Telegram typing indicator — sends `sendChatAction` every 4 seconds.
//!
//! Telegram's typing status expires after ~5 seconds, so we refresh every 4s.
//! The loop self-cancels after five minutes even if nothing calls `stop()`,
//! matching the auto-expiry every channel adapter is required to honor.
//! `TypingHandle::stop()` aborts the loop immediately.

use std::time::Duration;

use teloxide::prelude::*;
use teloxide::types::ChatAction;

/// Typing indicators auto-expire after this long regardless of `stop()`.
const MAX_TYPING_DURATION: Duration = Duration::from_secs(5 * 60);

/// Handle to a background typing indicator task.
///
/// Call `stop()` once the response is ready to abort the loop.
pub struct TypingHandle(tokio::task::JoinHandle<()>);

impl TypingHandle {
    /// Spawn the typing indicator loop for `chat_id`.
    ///
    /// Sends `ChatAction::Typing` immediately, then every 4 seconds, until
    /// either `stop()` is called or five minutes elapse.
    pub fn start(bot: Bot, chat_id: ChatId) -> Self {
        let handle = tokio::spawn(async move {
            let deadline = tokio::time::Instant::now() + MAX_TYPING_DURATION;
            loop {
                let _ = bot.send_chat_action(chat_id, ChatAction::Typing).await;
                if tokio::time::Instant::now() >= deadline {
                    break;
                }
                tokio::time::sleep(Duration::from_secs(4)).await;
            }
        });
        TypingHandle(handle)
    }

    /// Abort the typing indicator loop.
    pub fn stop(self) {
        self.0.abort();
    }
}
