//! Session lifecycle - bridges the live registry to persisted call records
//!
//! Join eligibility is checked against the stored appointment before any
//! session exists. Join and leave timestamps are written best-effort: a slow
//! or failing store is logged and never holds up the signaling path.

mod memory;
mod store;
mod window;

pub use memory::{MemoryStore, Party, Seed};
pub use store::{
    Booking, BookingStatus, BookingStore, PartyDirectory, StoreError, VideoSessionRecord,
    VideoSessionStatus, VideoSessionStore,
};
pub use window::{parse_timezone, JoinWindow, WindowPosition};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::auth::derive_role;
use crate::config::LifecycleConfig;
use crate::protocol::{OtherPartyLeftPayload, Role, SessionEndedPayload, SignalMessage};
use crate::server::{Client, Hub, Session};

/// Ineligibility reason for an unconfirmed booking
pub const REASON_NOT_CONFIRMED: &str = "booking must be confirmed";

/// Ineligibility reason for a join outside the scheduled window
pub const REASON_OUTSIDE_WINDOW: &str = "outside booking window";

/// End reason when either party leaves
pub const END_PARTY_LEFT: &str = "party_left";

/// End reason when the session outlives its duration cap
pub const END_TIME_LIMIT: &str = "time_limit_reached";

/// End reason when the server shuts down mid-call
pub const END_SHUTDOWN: &str = "server_shutdown";

/// Eligibility of a party to join a booking's call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub can_join: bool,
    pub reason: Option<String>,
    pub window_start: Option<String>,
    pub window_end: Option<String>,
    pub other_party_joined: bool,
    pub other_party_name: Option<String>,
}

impl SessionInfo {
    fn rejected(reason: &str, window: Option<&JoinWindow>) -> Self {
        Self {
            can_join: false,
            reason: Some(reason.to_string()),
            window_start: window.map(|w| w.start.to_rfc3339()),
            window_end: window.map(|w| w.end.to_rfc3339()),
            ..Self::default()
        }
    }
}

/// Failures of join validation that are not eligibility reasons
#[derive(Debug, Error)]
pub enum JoinError {
    #[error("booking not found")]
    BookingNotFound,

    #[error("not authorized for this booking")]
    Unauthorized,

    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("booking time does not exist in timezone {0}")]
    UnschedulableTime(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Glue between live sessions and the persistence collaborators
pub struct LifecycleService {
    hub: Arc<Hub>,
    bookings: Arc<dyn BookingStore>,
    sessions: Arc<dyn VideoSessionStore>,
    directory: Arc<dyn PartyDirectory>,
    config: LifecycleConfig,
}

impl LifecycleService {
    pub fn new(
        hub: Arc<Hub>,
        bookings: Arc<dyn BookingStore>,
        sessions: Arc<dyn VideoSessionStore>,
        directory: Arc<dyn PartyDirectory>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            hub,
            bookings,
            sessions,
            directory,
            config,
        }
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Bound a store call by the configured timeout
    async fn bounded<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        tokio::time::timeout(self.config.store_timeout(), fut)
            .await
            .map_err(|_| StoreError::Timeout)?
    }

    /// Check whether `party_id` may join `booking_id` as `role` right now
    ///
    /// `timezone` is the zone the booking's naive date and times are written
    /// in. Creates a waiting call record on the first eligible check.
    pub async fn validate_and_start_session(
        &self,
        booking_id: Uuid,
        party_id: Uuid,
        role: Role,
        timezone: &str,
    ) -> Result<SessionInfo, JoinError> {
        let booking = self
            .bounded(self.bookings.booking(booking_id))
            .await?
            .ok_or(JoinError::BookingNotFound)?;

        let mentor_profile = self
            .bounded(self.directory.mentor_profile_id(party_id))
            .await?;
        if derive_role(&booking, party_id, mentor_profile) != Some(role) {
            return Err(JoinError::Unauthorized);
        }

        if booking.status != BookingStatus::Confirmed {
            return Ok(SessionInfo::rejected(REASON_NOT_CONFIRMED, None));
        }

        let tz = parse_timezone(timezone)
            .ok_or_else(|| JoinError::InvalidTimezone(timezone.to_string()))?;
        let window = JoinWindow::resolve(&booking, tz)
            .ok_or_else(|| JoinError::UnschedulableTime(timezone.to_string()))?;

        let now = Utc::now();
        let early = chrono::Duration::minutes(self.config.join_early_minutes);
        let position = window.position(now, early);
        if position != WindowPosition::Open {
            tracing::info!(%booking_id, %role, ?position, "Join outside booking window");
            return Ok(SessionInfo::rejected(REASON_OUTSIDE_WINDOW, Some(&window)));
        }

        let record = VideoSessionRecord::waiting(&booking, now);
        if self.bounded(self.sessions.create_if_absent(record)).await? {
            tracing::info!(%booking_id, "Video session record created");
        }

        let other = self
            .hub
            .get_session(booking_id)
            .and_then(|session| session.other_party(role));

        Ok(SessionInfo {
            can_join: true,
            reason: None,
            window_start: Some(window.start.to_rfc3339()),
            window_end: Some(window.end.to_rfc3339()),
            other_party_joined: other.is_some(),
            other_party_name: other.map(|c| c.display_name().to_string()),
        })
    }

    pub async fn record_joined(&self, booking_id: Uuid, role: Role) {
        let result = self
            .bounded(self.sessions.record_joined(booking_id, role, Utc::now()))
            .await;
        if let Err(e) = result {
            tracing::warn!(%booking_id, %role, "Failed to record join: {}", e);
        }
    }

    pub async fn record_left(&self, booking_id: Uuid, role: Role) {
        let result = self
            .bounded(self.sessions.record_left(booking_id, role, Utc::now()))
            .await;
        if let Err(e) = result {
            tracing::warn!(%booking_id, %role, "Failed to record leave: {}", e);
        }
    }

    /// Stamp the call start once both parties are present
    pub async fn mark_active(&self, booking_id: Uuid) {
        let result = self
            .bounded(self.sessions.mark_active(booking_id, Utc::now()))
            .await;
        if let Err(e) = result {
            tracing::warn!(%booking_id, "Failed to mark session active: {}", e);
        }
    }

    /// Complete the call record and return its duration in seconds
    ///
    /// Duration runs from the recorded start to now, zero if the call never
    /// started. Ending an already completed record changes nothing and
    /// returns the stored duration. The booking itself is left untouched.
    pub async fn end_session(&self, booking_id: Uuid, reason: &str) -> Result<i64, StoreError> {
        let record = self
            .bounded(self.sessions.get(booking_id))
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("video session for {booking_id}")))?;

        if record.status == VideoSessionStatus::Completed {
            tracing::debug!(%booking_id, "Session already ended");
            return Ok(record.duration_seconds);
        }

        let now = Utc::now();
        let duration = record
            .session_started_at
            .map(|started| (now - started).num_seconds().max(0))
            .unwrap_or(0);

        let ended = self
            .bounded(self.sessions.end(booking_id, duration, reason, now))
            .await?;
        if ended {
            tracing::info!(%booking_id, duration, reason, "Session ended");
        }
        Ok(duration)
    }

    /// Departure path run after a client's inbound loop exits
    ///
    /// A connection that was superseded by a newer one for the same role is
    /// skipped entirely. Otherwise the leave is recorded, the other party is
    /// told and closed, and the call is ended with `party_left` by whichever
    /// path terminates the session first.
    pub async fn handle_client_left(&self, client: &Client) {
        let booking_id = client.booking_id();
        let role = client.role();

        let session = match self.hub.get_session(booking_id) {
            Some(session) if session.is_current(client) => session,
            _ => {
                tracing::debug!(%booking_id, %role, conn_id = %client.id(), "Superseded connection left");
                return;
            }
        };

        self.record_left(booking_id, role).await;

        if !session.is_terminated() {
            let notice = SignalMessage::OtherPartyLeft(OtherPartyLeftPayload { booking_id });
            if session.send_to_role(role.other(), notice) {
                tracing::info!(%booking_id, left = %role, "Notified other party of departure");
            }
        }

        if session.close() {
            if let Err(e) = self.end_session(booking_id, END_PARTY_LEFT).await {
                tracing::warn!(%booking_id, "Failed to end session: {}", e);
            }
        }

        self.hub.remove_connection(booking_id, role, client.id());
    }

    /// End a session that outlived its duration cap
    ///
    /// Returns `false` if another path already ended it.
    pub async fn end_expired(&self, session: &Session) -> bool {
        if !session.terminate() {
            return false;
        }
        let duration = self.finish(session, END_TIME_LIMIT).await;
        tracing::info!(booking_id = %session.booking_id(), duration, "Session reached its time limit");
        true
    }

    /// End a live session because the server is stopping
    ///
    /// The session is about to leave the registry, so the departure path
    /// will not find it. Leaves are recorded here for every occupant.
    pub async fn end_for_shutdown(&self, session: &Session) -> bool {
        if !session.terminate() {
            return false;
        }
        let booking_id = session.booking_id();
        for role in [Role::Mentor, Role::User] {
            if session.occupant(role).is_some() {
                self.record_left(booking_id, role).await;
            }
        }
        let duration = self.finish(session, END_SHUTDOWN).await;
        tracing::info!(%booking_id, duration, "Session ended for shutdown");
        true
    }

    /// Persist the end, tell both parties why, and close the session
    async fn finish(&self, session: &Session, reason: &str) -> i64 {
        let booking_id = session.booking_id();
        let duration = match self.end_session(booking_id, reason).await {
            Ok(duration) => duration,
            Err(e) => {
                tracing::warn!(%booking_id, "Failed to end session: {}", e);
                session.elapsed().as_secs() as i64
            }
        };

        session.broadcast(SignalMessage::SessionEnded(SessionEndedPayload {
            booking_id,
            reason: reason.to_string(),
            duration,
        }));
        session.close();
        duration
    }
}
