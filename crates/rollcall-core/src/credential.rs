//! QR + PIN credential carried by the session code.

use crate::error::AttendanceError;
use crate::session::Session;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const QR_SERVICE_URL: &str = "https://api.qrserver.com/v1/create-qr-code/?size=220x220&data=";

/// Payload rendered into the session's QR code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrPayload {
    pub session_id: String,
    pub pin: String,
}

impl QrPayload {
    /// Payload for a live session; `None` until a session has an id and PIN.
    pub fn for_session(session: &Session) -> Option<Self> {
        Some(Self {
            session_id: session.id()?.to_string(),
            pin: session.pin()?.to_string(),
        })
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// URL of a rendered QR image for this payload.
    pub fn image_url(&self) -> String {
        format!("{QR_SERVICE_URL}{}", encode_uri_component(&self.to_json()))
    }
}

/// Check a pasted QR payload and typed PIN against the active session.
///
/// Only `sessionId` is read from the payload; any other keys, including a
/// `pin` of any type, are ignored. The PIN comes from the student's input.
/// Both are compared as strings.
pub fn verify(raw_payload: &str, pin: &str, session: &Session) -> Result<(), AttendanceError> {
    if !session.is_active() {
        return Err(AttendanceError::NoActiveSession);
    }
    let payload: Value = serde_json::from_str(raw_payload.trim())
        .map_err(|e| AttendanceError::MalformedCredential(e.to_string()))?;
    if payload.is_null() {
        return Err(AttendanceError::MalformedCredential("payload is null".into()));
    }

    let pasted_id = payload.get("sessionId").and_then(Value::as_str);
    let id_ok = pasted_id.is_some() && session.id() == pasted_id;
    let pin_ok = session.pin() == Some(pin.trim());
    if id_ok && pin_ok {
        Ok(())
    } else {
        tracing::debug!(id_ok, pin_ok, "credential rejected");
        Err(AttendanceError::CredentialMismatch)
    }
}

/// Percent-encode everything outside the unreserved URI component set.
fn encode_uri_component(input: &str) -> String {
    let mut out = String::with_capacity(input.len() * 3);
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'-'
            | b'_'
            | b'.'
            | b'!'
            | b'~'
            | b'*'
            | b'\''
            | b'('
            | b')' => out.push(byte as char),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
