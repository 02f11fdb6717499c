use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Container → host: `ipc/<group>/request-<uuid>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcRequest {
    pub id: String,
    pub op: String,
    #[serde(default)]
    pub params: Option<Value>,
}

/// Host → container: `ipc/<group>/response-<uuid>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcResponse {
    pub id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IpcResponse {
    pub fn ok(id: impl Into<String>, result: impl Serialize) -> Self {
        Self {
            id: id.into(),
            ok: true,
            result: Some(serde_json::to_value(result).unwrap_or(Value::Null)),
            error: None,
        }
    }

    pub fn err(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ok: false,
            result: None,
            error: Some(message.into()),
        }
    }
}

/// One line of `ipc/<group>/stream.jsonl`. The container appends one of
/// these per chunk produced; `index` is the ordering tie-breaker when
/// frames arrive out of write order (e.g. notify coalescing).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamFrame {
    pub index: u64,
    pub text: String,
    pub ts: i64,
}

/// Written once to `ipc/<group>/stream.done` to mark a stream complete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamDone {
    pub total_chunks: u64,
    pub completed_at: i64,
}
