//! Protocol definitions for client-server signaling
//!
//! Envelopes travel as JSON text frames over the websocket.

mod message;

pub use message::{
    EmptyPayload, IceCandidatePayload, MessageKind, OtherPartyLeftPayload, Role, SdpPayload,
    SessionEndedPayload, SessionReadyPayload, SignalMessage,
};

use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

/// Maximum accepted frame size (64 KiB); SDP blobs are well under this
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Protocol-specific errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("Malformed {kind} payload: {reason}")]
    MalformedPayload { kind: MessageKind, reason: String },

    #[error("Empty {field} in {kind}")]
    EmptyField {
        kind: MessageKind,
        field: &'static str,
    },

    #[error("Message type {0} is not accepted from clients")]
    NotClientSendable(MessageKind),

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Envelope with its payload still untyped
#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: serde_json::Value,
}

/// Serialize a message to a JSON text frame
pub fn encode(msg: &SignalMessage) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(msg)?)
}

/// Decode a JSON text frame into a typed message
///
/// The `type` field is resolved first so an unknown type is reported as
/// such rather than as a generic parse failure. Types without data accept a
/// missing, null or empty payload.
pub fn decode(text: &str) -> Result<SignalMessage, ProtocolError> {
    decode_with_limit(text, MAX_MESSAGE_SIZE)
}

/// Decode with an explicit frame size limit
pub fn decode_with_limit(text: &str, max: usize) -> Result<SignalMessage, ProtocolError> {
    if text.len() > max {
        return Err(ProtocolError::MessageTooLarge {
            size: text.len(),
            max,
        });
    }

    let raw: RawEnvelope = serde_json::from_str(text)
        .map_err(|e| ProtocolError::MalformedEnvelope(e.to_string()))?;

    let kind: MessageKind = serde_json::from_value(serde_json::Value::String(raw.kind.clone()))
        .map_err(|_| ProtocolError::UnknownType(raw.kind))?;

    let msg = match kind {
        MessageKind::Offer => SignalMessage::Offer(typed_payload(kind, raw.payload)?),
        MessageKind::Answer => SignalMessage::Answer(typed_payload(kind, raw.payload)?),
        MessageKind::IceCandidate => {
            SignalMessage::IceCandidate(typed_payload(kind, raw.payload)?)
        }
        MessageKind::LeaveCall => SignalMessage::LeaveCall(EmptyPayload::default()),
        MessageKind::Ping => SignalMessage::Ping(EmptyPayload::default()),
        MessageKind::Pong => SignalMessage::Pong(EmptyPayload::default()),
        MessageKind::SessionReady => {
            SignalMessage::SessionReady(typed_payload(kind, raw.payload)?)
        }
        MessageKind::OtherPartyLeft => {
            SignalMessage::OtherPartyLeft(typed_payload(kind, raw.payload)?)
        }
        MessageKind::SessionEnded => {
            SignalMessage::SessionEnded(typed_payload(kind, raw.payload)?)
        }
    };

    Ok(msg)
}

fn typed_payload<T: DeserializeOwned>(
    kind: MessageKind,
    payload: serde_json::Value,
) -> Result<T, ProtocolError> {
    serde_json::from_value(payload).map_err(|e| ProtocolError::MalformedPayload {
        kind,
        reason: e.to_string(),
    })
}

/// Reject messages whose mandatory fields are empty
pub fn validate(msg: &SignalMessage) -> Result<(), ProtocolError> {
    match msg {
        SignalMessage::Offer(p) | SignalMessage::Answer(p) if p.sdp.is_empty() => {
            Err(ProtocolError::EmptyField {
                kind: msg.kind(),
                field: "sdp",
            })
        }
        SignalMessage::IceCandidate(p) if p.candidate.is_empty() => {
            Err(ProtocolError::EmptyField {
                kind: msg.kind(),
                field: "candidate",
            })
        }
        _ => Ok(()),
    }
}

/// Decode a frame received from a client and check it may be acted on
pub fn parse_client_message(text: &str, max: usize) -> Result<SignalMessage, ProtocolError> {
    let msg = decode_with_limit(text, max)?;
    if !msg.kind().is_client_sendable() {
        return Err(ProtocolError::NotClientSendable(msg.kind()));
    }
    validate(&msg)?;
    Ok(msg)
}
