//! Persistence collaborator interface
//!
//! The signaling core reads appointments and writes call records through
//! these traits; the storage engine behind them is not part of this crate.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::protocol::Role;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("store call timed out")]
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

/// A scheduled appointment
///
/// `date`, `start_time` and `end_time` are naive local values in the
/// timezone the caller supplies at join time, not UTC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    /// Mentor profile id, not the mentor's party id
    pub mentor_id: Uuid,
    pub user_id: Uuid,
    pub status: BookingStatus,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoSessionStatus {
    Waiting,
    Active,
    Completed,
}

/// Persisted history of one call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoSessionRecord {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub mentor_id: Uuid,
    pub user_id: Uuid,
    pub status: VideoSessionStatus,
    pub session_started_at: Option<DateTime<Utc>>,
    pub session_ended_at: Option<DateTime<Utc>>,
    pub mentor_joined_at: Option<DateTime<Utc>>,
    pub user_joined_at: Option<DateTime<Utc>>,
    pub mentor_left_at: Option<DateTime<Utc>>,
    pub user_left_at: Option<DateTime<Utc>>,
    pub duration_seconds: i64,
    pub end_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VideoSessionRecord {
    /// A fresh record in the waiting state
    pub fn waiting(booking: &Booking, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            booking_id: booking.id,
            mentor_id: booking.mentor_id,
            user_id: booking.user_id,
            status: VideoSessionStatus::Waiting,
            session_started_at: None,
            session_ended_at: None,
            mentor_joined_at: None,
            user_joined_at: None,
            mentor_left_at: None,
            user_left_at: None,
            duration_seconds: 0,
            end_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn joined_at(&self, role: Role) -> Option<DateTime<Utc>> {
        match role {
            Role::Mentor => self.mentor_joined_at,
            Role::User => self.user_joined_at,
        }
    }

    pub fn left_at(&self, role: Role) -> Option<DateTime<Utc>> {
        match role {
            Role::Mentor => self.mentor_left_at,
            Role::User => self.user_left_at,
        }
    }
}

#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn booking(&self, id: Uuid) -> Result<Option<Booking>, StoreError>;
}

#[async_trait]
pub trait PartyDirectory: Send + Sync {
    /// Display name of an authenticated party
    async fn display_name(&self, party_id: Uuid) -> Result<Option<String>, StoreError>;

    /// Mentor profile owned by a party, if it has one
    async fn mentor_profile_id(&self, party_id: Uuid) -> Result<Option<Uuid>, StoreError>;
}

#[async_trait]
pub trait VideoSessionStore: Send + Sync {
    async fn get(&self, booking_id: Uuid) -> Result<Option<VideoSessionRecord>, StoreError>;

    /// Insert `record` unless the booking already has one
    ///
    /// Returns whether the record was inserted. Check and insert must be
    /// atomic so concurrent first joins agree on a single record.
    async fn create_if_absent(&self, record: VideoSessionRecord) -> Result<bool, StoreError>;

    async fn record_joined(
        &self,
        booking_id: Uuid,
        role: Role,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn record_left(
        &self,
        booking_id: Uuid,
        role: Role,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Move a waiting record to active and stamp its start time
    async fn mark_active(&self, booking_id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Complete the record; returns `false` if it was already completed
    async fn end(
        &self,
        booking_id: Uuid,
        duration_seconds: i64,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
}
