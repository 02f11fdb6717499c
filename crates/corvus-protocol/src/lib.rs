//! Wire types and HMAC framing for the host↔container IPC channel.

pub mod envelope;
pub mod error;
pub mod frames;

pub use envelope::{open, seal, SignedEnvelope};
pub use error::{ProtocolError, Result};
pub use frames::{IpcRequest, IpcResponse, StreamDone, StreamFrame};
