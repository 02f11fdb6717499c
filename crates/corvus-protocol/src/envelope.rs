use hmac::{Hmac, Mac};
use serde::{de::DeserializeOwned, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{ProtocolError, Result};

type HmacSha256 = Hmac<Sha256>;

/// The on-disk envelope wrapping every IPC frame: `{ "payload": ..., "hmac": "<hex>" }`.
/// `payload` is the canonical JSON encoding of the inner frame; `hmac` is the
/// hex-encoded HMAC-SHA256 of those exact bytes under the per-instance shared
/// secret (`IPC_SECRET`).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SignedEnvelope {
    pub payload: serde_json::Value,
    pub hmac: String,
}

/// Sign `payload` and wrap it in a [`SignedEnvelope`].
pub fn seal<T: Serialize>(secret: &[u8], payload: &T) -> Result<SignedEnvelope> {
    let value = serde_json::to_value(payload)?;
    let canonical = serde_json::to_vec(&value)?;
    let mut mac =
        HmacSha256::new_from_slice(secret).map_err(|e| ProtocolError::Hmac(e.to_string()))?;
    mac.update(&canonical);
    let hmac = hex::encode(mac.finalize().into_bytes());
    Ok(SignedEnvelope {
        payload: value,
        hmac,
    })
}

/// Verify and unwrap a [`SignedEnvelope`]. Uses a constant-time comparison
/// of the computed and supplied HMAC so a partial match can't be used to
/// probe the secret byte-by-byte. Any mismatch is `IntegrityRejected` — the
/// caller is expected to delete the offending file and bump a rejection
/// counter, never to act on the payload.
pub fn open<T: DeserializeOwned>(secret: &[u8], envelope: &SignedEnvelope) -> Result<T> {
    let canonical = serde_json::to_vec(&envelope.payload)?;
    let mut mac =
        HmacSha256::new_from_slice(secret).map_err(|e| ProtocolError::Hmac(e.to_string()))?;
    mac.update(&canonical);
    let expected = mac.finalize().into_bytes();

    let supplied = hex::decode(&envelope.hmac).map_err(|_| ProtocolError::IntegrityRejected)?;
    if supplied.len() != expected.len() || expected.ct_eq(&supplied).unwrap_u8() != 1 {
        return Err(ProtocolError::IntegrityRejected);
    }

    Ok(serde_json::from_value(envelope.payload.clone())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::IpcRequest;

    fn req() -> IpcRequest {
        IpcRequest {
            id: "abc".into(),
            op: "chat.run".into(),
            params: Some(serde_json::json!({"prompt": "hi"})),
        }
    }

    #[test]
    fn seal_then_open_round_trips() {
        let secret = b"super-secret-key";
        let envelope = seal(secret, &req()).unwrap();
        let opened: IpcRequest = open(secret, &envelope).unwrap();
        assert_eq!(opened.id, "abc");
        assert_eq!(opened.op, "chat.run");
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let secret = b"super-secret-key";
        let mut envelope = seal(secret, &req()).unwrap();
        envelope.payload["op"] = serde_json::json!("chat.delete_everything");
        let result: Result<IpcRequest> = open(secret, &envelope);
        assert!(matches!(result, Err(ProtocolError::IntegrityRejected)));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let envelope = seal(b"secret-one-----", &req()).unwrap();
        let result: Result<IpcRequest> = open(b"secret-two-----", &envelope);
        assert!(matches!(result, Err(ProtocolError::IntegrityRejected)));
    }

    #[test]
    fn malformed_hex_hmac_is_rejected() {
        let mut envelope = seal(b"super-secret-key", &req()).unwrap();
        envelope.hmac = "not-hex!!".to_string();
        let result: Result<IpcRequest> = open(b"super-secret-key", &envelope);
        assert!(matches!(result, Err(ProtocolError::IntegrityRejected)));
    }
}
