pub mod channel;
pub mod error;
pub mod manager;
pub mod types;
pub mod whatsapp;

pub use channel::Channel;
pub use error::ChannelError;
pub use manager::ChannelManager;
pub use types::{Attachment, AttachmentKind, ChannelEvent, ConnectionState, OutboundPayload};
pub use whatsapp::WhatsAppAdapter;
