//! Message types for the signaling protocol

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Which side of an appointment a party is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Mentor,
    User,
}

impl Role {
    /// The role on the other side of the call
    pub fn other(self) -> Role {
        match self {
            Role::Mentor => Role::User,
            Role::User => Role::Mentor,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Mentor => "mentor",
            Role::User => "user",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A signaling envelope: `{"type": ..., "payload": ...}` on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum SignalMessage {
    /// SDP offer, relayed to the other party
    Offer(SdpPayload),

    /// SDP answer, relayed to the other party
    Answer(SdpPayload),

    /// Trickled ICE candidate, relayed to the other party
    IceCandidate(IceCandidatePayload),

    /// The sender is hanging up
    LeaveCall(EmptyPayload),

    /// Application-level liveness probe
    Ping(EmptyPayload),

    /// Reply to `Ping` (server only)
    Pong(EmptyPayload),

    /// Both parties are present (server only)
    SessionReady(SessionReadyPayload),

    /// The other party disconnected (server only)
    OtherPartyLeft(OtherPartyLeftPayload),

    /// The call was ended by the server (server only)
    SessionEnded(SessionEndedPayload),
}

impl SignalMessage {
    pub fn pong() -> Self {
        SignalMessage::Pong(EmptyPayload::default())
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            SignalMessage::Offer(_) => MessageKind::Offer,
            SignalMessage::Answer(_) => MessageKind::Answer,
            SignalMessage::IceCandidate(_) => MessageKind::IceCandidate,
            SignalMessage::LeaveCall(_) => MessageKind::LeaveCall,
            SignalMessage::Ping(_) => MessageKind::Ping,
            SignalMessage::Pong(_) => MessageKind::Pong,
            SignalMessage::SessionReady(_) => MessageKind::SessionReady,
            SignalMessage::OtherPartyLeft(_) => MessageKind::OtherPartyLeft,
            SignalMessage::SessionEnded(_) => MessageKind::SessionEnded,
        }
    }
}

/// The `type` discriminator of an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Offer,
    Answer,
    IceCandidate,
    LeaveCall,
    Ping,
    Pong,
    SessionReady,
    OtherPartyLeft,
    SessionEnded,
}

impl MessageKind {
    /// Whether a client is allowed to send this kind
    pub fn is_client_sendable(self) -> bool {
        match self {
            MessageKind::Offer
            | MessageKind::Answer
            | MessageKind::IceCandidate
            | MessageKind::LeaveCall
            | MessageKind::Ping => true,
            MessageKind::Pong
            | MessageKind::SessionReady
            | MessageKind::OtherPartyLeft
            | MessageKind::SessionEnded => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Offer => "offer",
            MessageKind::Answer => "answer",
            MessageKind::IceCandidate => "ice_candidate",
            MessageKind::LeaveCall => "leave_call",
            MessageKind::Ping => "ping",
            MessageKind::Pong => "pong",
            MessageKind::SessionReady => "session_ready",
            MessageKind::OtherPartyLeft => "other_party_left",
            MessageKind::SessionEnded => "session_ended",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload for message types that carry no data
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyPayload {}

/// SDP offer or answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdpPayload {
    pub sdp: String,
}

/// ICE candidate matching `RTCIceCandidateInit`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidatePayload {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_m_line_index: Option<u32>,
}

/// Sent to each party once both have joined
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionReadyPayload {
    pub other_party_name: String,
    /// Role of the other party
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtherPartyLeftPayload {
    pub booking_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEndedPayload {
    pub booking_id: Uuid,
    pub reason: String,
    /// Call duration in seconds
    pub duration: i64,
}
