//! Routing of inbound frames between the two parties of a session

use super::connection::{Client, Delivery, ReadyNotice};
use super::session::Session;
use crate::protocol::{self, SessionReadyPayload, SignalMessage};

/// What the inbound loop should do after a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Continue,
    /// The party asked to leave; stop reading
    Leave,
}

/// Decode one text frame from `client` and act on it
///
/// Malformed, oversized, unknown or server-only frames are logged and
/// ignored; they never end the connection.
pub fn handle_frame(session: &Session, client: &Client, text: &str, max_size: usize) -> Dispatch {
    match protocol::parse_client_message(text, max_size) {
        Ok(msg) => dispatch(session, client, msg),
        Err(e) => {
            tracing::warn!(
                booking_id = %client.booking_id(),
                role = %client.role(),
                "Discarding message: {}",
                e
            );
            Dispatch::Continue
        }
    }
}

/// Act on a decoded client message
pub fn dispatch(session: &Session, client: &Client, msg: SignalMessage) -> Dispatch {
    tracing::debug!(
        booking_id = %client.booking_id(),
        role = %client.role(),
        kind = %msg.kind(),
        "Received message"
    );

    match msg {
        SignalMessage::Offer(_) | SignalMessage::Answer(_) | SignalMessage::IceCandidate(_) => {
            relay(session, client, msg);
            Dispatch::Continue
        }
        SignalMessage::LeaveCall(_) => {
            tracing::info!(
                booking_id = %client.booking_id(),
                role = %client.role(),
                "Party left the call"
            );
            Dispatch::Leave
        }
        SignalMessage::Ping(_) => {
            if !client.send(SignalMessage::pong()) {
                tracing::debug!(conn_id = %client.id(), "Could not enqueue pong");
            }
            Dispatch::Continue
        }
        SignalMessage::Pong(_)
        | SignalMessage::SessionReady(_)
        | SignalMessage::OtherPartyLeft(_)
        | SignalMessage::SessionEnded(_) => {
            tracing::warn!(
                conn_id = %client.id(),
                kind = %msg.kind(),
                "Ignoring server-only message from client"
            );
            Dispatch::Continue
        }
    }
}

/// Forward a signaling message to the opposite party unchanged
fn relay(session: &Session, sender: &Client, msg: SignalMessage) {
    // Retry a ready notice that could not be enqueued earlier
    announce_ready(session);

    let kind = msg.kind();
    let target = sender.role().other();
    match session.deliver_to_role(target, msg) {
        Some(Delivery::Sent) => {
            tracing::debug!(booking_id = %session.booking_id(), %kind, from = %sender.role(), to = %target, "Relayed message");
        }
        Some(Delivery::Buffered) => {
            tracing::debug!(booking_id = %session.booking_id(), %kind, to = %target, "Buffered message until party is ready");
        }
        Some(Delivery::Dropped) => {
            tracing::warn!(booking_id = %session.booking_id(), %kind, to = %target, "Dropped relayed message");
        }
        None => {
            tracing::debug!(booking_id = %session.booking_id(), %kind, to = %target, "No party to relay to");
        }
    }
}

/// Tell each party about the other once both are present
///
/// Each client gets the other party's name and role, at most once per
/// connection. Returns `true` if both parties are present.
pub fn announce_ready(session: &Session) -> bool {
    let Some((mentor, user)) = session.pair() else {
        return false;
    };

    for (party, other) in [(&mentor, &user), (&user, &mentor)] {
        let notice = SignalMessage::SessionReady(SessionReadyPayload {
            other_party_name: other.display_name().to_string(),
            role: other.role(),
        });
        match party.deliver_ready_notice(notice) {
            ReadyNotice::Delivered { replayed } => {
                tracing::info!(
                    booking_id = %session.booking_id(),
                    role = %party.role(),
                    replayed,
                    "Session ready"
                );
            }
            ReadyNotice::AlreadySent => {}
            ReadyNotice::Dropped => {
                tracing::warn!(
                    booking_id = %session.booking_id(),
                    role = %party.role(),
                    "Could not enqueue session ready notice"
                );
            }
        }
    }
    true
}
