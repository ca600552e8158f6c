//! In-memory store backing all persistence traits
//!
//! Used by the binary for local runs (optionally seeded from a TOML file) and
//! by the test suite.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::Path;
use uuid::Uuid;

use super::store::{
    Booking, BookingStore, PartyDirectory, StoreError, VideoSessionRecord, VideoSessionStatus,
    VideoSessionStore,
};
use crate::protocol::Role;

/// A party known to the directory
#[derive(Debug, Clone, Deserialize)]
pub struct Party {
    pub id: Uuid,
    pub display_name: String,
    #[serde(default)]
    pub mentor_profile_id: Option<Uuid>,
}

/// Seed file layout: `[[bookings]]` and `[[parties]]` tables
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Seed {
    pub bookings: Vec<Booking>,
    pub parties: Vec<Party>,
}

#[derive(Default)]
pub struct MemoryStore {
    bookings: RwLock<HashMap<Uuid, Booking>>,
    parties: RwLock<HashMap<Uuid, Party>>,
    sessions: RwLock<HashMap<Uuid, VideoSessionRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: Seed) -> Self {
        let store = Self::new();
        for booking in seed.bookings {
            store.insert_booking(booking);
        }
        for party in seed.parties {
            store.insert_party(party);
        }
        store
    }

    /// Load a TOML seed file
    pub fn load_seed(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let seed: Seed = toml::from_str(&content)?;
        tracing::info!(
            bookings = seed.bookings.len(),
            parties = seed.parties.len(),
            "Loaded directory seed from {:?}",
            path
        );
        Ok(Self::from_seed(seed))
    }

    pub fn insert_booking(&self, booking: Booking) {
        self.bookings.write().insert(booking.id, booking);
    }

    pub fn insert_party(&self, party: Party) {
        self.parties.write().insert(party.id, party);
    }

    /// Snapshot of a call record
    pub fn session_record(&self, booking_id: Uuid) -> Option<VideoSessionRecord> {
        self.sessions.read().get(&booking_id).cloned()
    }

    fn update<F>(&self, booking_id: Uuid, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut VideoSessionRecord),
    {
        let mut sessions = self.sessions.write();
        let record = sessions
            .get_mut(&booking_id)
            .ok_or_else(|| StoreError::NotFound(format!("video session for {booking_id}")))?;
        f(record);
        Ok(())
    }
}

#[async_trait]
impl BookingStore for MemoryStore {
    async fn booking(&self, id: Uuid) -> Result<Option<Booking>, StoreError> {
        Ok(self.bookings.read().get(&id).cloned())
    }
}

#[async_trait]
impl PartyDirectory for MemoryStore {
    async fn display_name(&self, party_id: Uuid) -> Result<Option<String>, StoreError> {
        Ok(self
            .parties
            .read()
            .get(&party_id)
            .map(|p| p.display_name.clone()))
    }

    async fn mentor_profile_id(&self, party_id: Uuid) -> Result<Option<Uuid>, StoreError> {
        Ok(self
            .parties
            .read()
            .get(&party_id)
            .and_then(|p| p.mentor_profile_id))
    }
}

#[async_trait]
impl VideoSessionStore for MemoryStore {
    async fn get(&self, booking_id: Uuid) -> Result<Option<VideoSessionRecord>, StoreError> {
        Ok(self.session_record(booking_id))
    }

    async fn create_if_absent(&self, record: VideoSessionRecord) -> Result<bool, StoreError> {
        match self.sessions.write().entry(record.booking_id) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(true)
            }
        }
    }

    async fn record_joined(
        &self,
        booking_id: Uuid,
        role: Role,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.update(booking_id, |r| {
            match role {
                Role::Mentor => r.mentor_joined_at = Some(at),
                Role::User => r.user_joined_at = Some(at),
            }
            r.updated_at = at;
        })
    }

    async fn record_left(
        &self,
        booking_id: Uuid,
        role: Role,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.update(booking_id, |r| {
            match role {
                Role::Mentor => r.mentor_left_at = Some(at),
                Role::User => r.user_left_at = Some(at),
            }
            r.updated_at = at;
        })
    }

    async fn mark_active(&self, booking_id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.update(booking_id, |r| {
            if r.status == VideoSessionStatus::Waiting {
                r.status = VideoSessionStatus::Active;
                r.session_started_at = Some(at);
                r.updated_at = at;
            }
        })
    }

    async fn end(
        &self,
        booking_id: Uuid,
        duration_seconds: i64,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut ended = false;
        self.update(booking_id, |r| {
            if r.status != VideoSessionStatus::Completed {
                r.status = VideoSessionStatus::Completed;
                r.session_ended_at = Some(at);
                r.duration_seconds = duration_seconds;
                r.end_reason = Some(reason.to_string());
                r.updated_at = at;
                ended = true;
            }
        })?;
        Ok(ended)
    }
}
