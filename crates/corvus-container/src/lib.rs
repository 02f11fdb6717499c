//! Sandboxed agent container lifecycle: warm pool, state machine, and the
//! signed filesystem-namespace IPC channel used to talk to a running
//! container.

pub mod error;
pub mod heartbeat;
pub mod ipc;
pub mod registry;
pub mod runtime;

pub use error::{ContainerError, Result};
pub use heartbeat::{HeartbeatEntry, HeartbeatTracker, Liveness};
pub use ipc::IpcChannel;
pub use registry::{ContainerRecord, ContainerRegistry, ContainerStatus, MAX_SIZE, MIN_SIZE};
pub use runtime::{ContainerEngine, ContainerSpec, DockerEngine};
