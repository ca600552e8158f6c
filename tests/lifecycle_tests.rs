//! Join validation and call record bookkeeping

mod common;

use anyhow::Result;
use async_trait::async_trait;
use callhub::config::LifecycleConfig;
use callhub::lifecycle::{
    Booking, BookingStatus, BookingStore, JoinError, LifecycleService, MemoryStore,
    PartyDirectory, StoreError, VideoSessionRecord, VideoSessionStatus, VideoSessionStore,
    END_PARTY_LEFT, END_TIME_LIMIT, REASON_NOT_CONFIRMED, REASON_OUTSIDE_WINDOW,
};
use callhub::protocol::Role;
use callhub::server::Hub;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use chrono_tz::Tz;
use common::Fixture;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[tokio::test]
async fn test_confirmed_booking_in_window_can_join() -> Result<()> {
    let fx = Fixture::new();
    let info = fx
        .lifecycle
        .validate_and_start_session(fx.booking.id, fx.user.id, Role::User, "UTC")
        .await?;

    assert!(info.can_join);
    assert_eq!(info.reason, None);
    assert!(info.window_start.is_some() && info.window_end.is_some());
    assert!(!info.other_party_joined);

    let record = fx.store.session_record(fx.booking.id).expect("record missing");
    assert_eq!(record.status, VideoSessionStatus::Waiting);
    assert_eq!(record.mentor_id, fx.booking.mentor_id);

    // A second check reuses the record
    let again = fx
        .lifecycle
        .validate_and_start_session(fx.booking.id, fx.mentor.id, Role::Mentor, "UTC")
        .await?;
    assert!(again.can_join);
    assert_eq!(fx.store.session_record(fx.booking.id).unwrap().id, record.id);
    Ok(())
}

#[tokio::test]
async fn test_other_party_presence_is_reported() -> Result<()> {
    let fx = Fixture::new();
    let (_mentor, _tasks, _) = fx.join(Role::Mentor).await;

    let info = fx
        .lifecycle
        .validate_and_start_session(fx.booking.id, fx.user.id, Role::User, "UTC")
        .await?;
    assert!(info.other_party_joined);
    assert_eq!(info.other_party_name.as_deref(), Some("Asha Mentor"));
    Ok(())
}

#[tokio::test]
async fn test_unconfirmed_booking_is_ineligible() -> Result<()> {
    let fx = Fixture::new();
    let mut pending = fx.booking.clone();
    pending.status = BookingStatus::Pending;
    fx.store.insert_booking(pending);

    let info = fx
        .lifecycle
        .validate_and_start_session(fx.booking.id, fx.user.id, Role::User, "UTC")
        .await?;
    assert!(!info.can_join);
    assert_eq!(info.reason.as_deref(), Some(REASON_NOT_CONFIRMED));
    assert!(fx.store.session_record(fx.booking.id).is_none());
    Ok(())
}

#[tokio::test]
async fn test_join_outside_window_is_ineligible() -> Result<()> {
    let fx = Fixture::new();
    let mut tomorrow = fx.booking.clone();
    tomorrow.date = tomorrow.date.succ_opt().unwrap();
    fx.store.insert_booking(tomorrow);

    let info = fx
        .lifecycle
        .validate_and_start_session(fx.booking.id, fx.user.id, Role::User, "UTC")
        .await?;
    assert!(!info.can_join);
    assert_eq!(info.reason.as_deref(), Some(REASON_OUTSIDE_WINDOW));
    assert!(fx.store.session_record(fx.booking.id).is_none());
    Ok(())
}

#[tokio::test]
async fn test_booking_times_are_read_in_caller_timezone() -> Result<()> {
    let fx = Fixture::new();
    let kolkata: Tz = "Asia/Kolkata".parse().unwrap();
    let local_start = Utc::now().with_timezone(&kolkata) - ChronoDuration::minutes(5);
    let local_end = local_start + ChronoDuration::minutes(30);

    let booking = Booking {
        date: local_start.date_naive(),
        start_time: local_start.time(),
        end_time: local_end.time(),
        ..fx.booking.clone()
    };
    fx.store.insert_booking(booking);

    let in_kolkata = fx
        .lifecycle
        .validate_and_start_session(fx.booking.id, fx.user.id, Role::User, "Asia/Kolkata")
        .await?;
    assert!(in_kolkata.can_join);

    // The same wall-clock values read as UTC are 5h30 away
    let as_utc = fx
        .lifecycle
        .validate_and_start_session(fx.booking.id, fx.user.id, Role::User, "UTC")
        .await?;
    assert_eq!(as_utc.reason.as_deref(), Some(REASON_OUTSIDE_WINDOW));
    Ok(())
}

#[tokio::test]
async fn test_invalid_input_is_an_error_not_a_reason() {
    let fx = Fixture::new();

    let err = fx
        .lifecycle
        .validate_and_start_session(fx.booking.id, fx.user.id, Role::User, "Moon/Base")
        .await
        .unwrap_err();
    assert!(matches!(err, JoinError::InvalidTimezone(_)));

    let err = fx
        .lifecycle
        .validate_and_start_session(Uuid::new_v4(), fx.user.id, Role::User, "UTC")
        .await
        .unwrap_err();
    assert!(matches!(err, JoinError::BookingNotFound));

    // Claiming the other side's role is refused
    let err = fx
        .lifecycle
        .validate_and_start_session(fx.booking.id, fx.user.id, Role::Mentor, "UTC")
        .await
        .unwrap_err();
    assert!(matches!(err, JoinError::Unauthorized));

    let err = fx
        .lifecycle
        .validate_and_start_session(fx.booking.id, Uuid::new_v4(), Role::User, "UTC")
        .await
        .unwrap_err();
    assert!(matches!(err, JoinError::Unauthorized));
}

#[tokio::test]
async fn test_end_session_is_idempotent() -> Result<()> {
    let fx = Fixture::new();
    fx.validate(Role::User).await;
    let started = Utc::now() - ChronoDuration::seconds(90);
    fx.store.mark_active(fx.booking.id, started).await?;

    let duration = fx.lifecycle.end_session(fx.booking.id, END_PARTY_LEFT).await?;
    assert!((90..95).contains(&duration), "duration was {duration}");

    let again = fx.lifecycle.end_session(fx.booking.id, END_TIME_LIMIT).await?;
    assert_eq!(again, duration);

    let record = fx.store.session_record(fx.booking.id).unwrap();
    assert_eq!(record.status, VideoSessionStatus::Completed);
    assert_eq!(record.duration_seconds, duration);
    assert_eq!(record.end_reason.as_deref(), Some(END_PARTY_LEFT));

    // The booking itself is not touched
    let booking = fx.store.booking(fx.booking.id).await?.unwrap();
    assert_eq!(booking.status, BookingStatus::Confirmed);
    Ok(())
}

#[tokio::test]
async fn test_end_before_start_has_zero_duration() -> Result<()> {
    let fx = Fixture::new();
    fx.validate(Role::Mentor).await;

    assert_eq!(fx.lifecycle.end_session(fx.booking.id, END_PARTY_LEFT).await?, 0);
    assert!(matches!(
        fx.lifecycle.end_session(Uuid::new_v4(), END_PARTY_LEFT).await,
        Err(StoreError::NotFound(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_timestamp_failures_are_swallowed() {
    let fx = Fixture::new();
    // No record exists yet; these only log
    fx.lifecycle.record_joined(fx.booking.id, Role::Mentor).await;
    fx.lifecycle.record_left(fx.booking.id, Role::Mentor).await;
    fx.lifecycle.mark_active(fx.booking.id).await;
    assert!(fx.store.session_record(fx.booking.id).is_none());
}

/// Store whose calls never complete
struct StalledStore;

#[async_trait]
impl BookingStore for StalledStore {
    async fn booking(&self, _id: Uuid) -> Result<Option<Booking>, StoreError> {
        std::future::pending().await
    }
}

#[async_trait]
impl PartyDirectory for StalledStore {
    async fn display_name(&self, _party_id: Uuid) -> Result<Option<String>, StoreError> {
        std::future::pending().await
    }

    async fn mentor_profile_id(&self, _party_id: Uuid) -> Result<Option<Uuid>, StoreError> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn test_stalled_store_times_out() {
    let store = Arc::new(MemoryStore::new());
    let sessions: Arc<dyn VideoSessionStore> = store;
    let lifecycle = LifecycleService::new(
        Arc::new(Hub::new(Duration::from_secs(60))),
        Arc::new(StalledStore),
        sessions,
        Arc::new(StalledStore),
        LifecycleConfig {
            store_timeout_secs: 1,
            ..LifecycleConfig::default()
        },
    );

    let err = lifecycle
        .validate_and_start_session(Uuid::new_v4(), Uuid::new_v4(), Role::User, "UTC")
        .await
        .unwrap_err();
    assert!(matches!(err, JoinError::Store(StoreError::Timeout)));
}

/// Call record store that yields to the scheduler before every call
struct YieldingStore(Arc<MemoryStore>);

#[async_trait]
impl VideoSessionStore for YieldingStore {
    async fn get(&self, booking_id: Uuid) -> Result<Option<VideoSessionRecord>, StoreError> {
        tokio::task::yield_now().await;
        self.0.get(booking_id).await
    }

    async fn create_if_absent(&self, record: VideoSessionRecord) -> Result<bool, StoreError> {
        tokio::task::yield_now().await;
        self.0.create_if_absent(record).await
    }

    async fn record_joined(
        &self,
        booking_id: Uuid,
        role: Role,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        self.0.record_joined(booking_id, role, at).await
    }

    async fn record_left(
        &self,
        booking_id: Uuid,
        role: Role,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        self.0.record_left(booking_id, role, at).await
    }

    async fn mark_active(&self, booking_id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        self.0.mark_active(booking_id, at).await
    }

    async fn end(
        &self,
        booking_id: Uuid,
        duration_seconds: i64,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        tokio::task::yield_now().await;
        self.0.end(booking_id, duration_seconds, reason, at).await
    }
}

#[tokio::test]
async fn test_simultaneous_first_checks_share_one_record() -> Result<()> {
    let fx = Fixture::new();
    let lifecycle = LifecycleService::new(
        Arc::new(Hub::new(Duration::from_secs(60))),
        fx.store.clone(),
        Arc::new(YieldingStore(fx.store.clone())),
        fx.store.clone(),
        LifecycleConfig::default(),
    );

    let (mentor, user) = tokio::join!(
        lifecycle.validate_and_start_session(fx.booking.id, fx.mentor.id, Role::Mentor, "UTC"),
        lifecycle.validate_and_start_session(fx.booking.id, fx.user.id, Role::User, "UTC"),
    );
    assert!(mentor?.can_join);
    assert!(user?.can_join);

    let record = fx.store.session_record(fx.booking.id).expect("record missing");
    assert_eq!(record.status, VideoSessionStatus::Waiting);
    Ok(())
}

#[tokio::test]
async fn test_existing_record_is_kept() -> Result<()> {
    let fx = Fixture::new();
    let first = VideoSessionRecord::waiting(&fx.booking, Utc::now());
    let first_id = first.id;

    assert!(fx.store.create_if_absent(first).await?);
    let second = VideoSessionRecord::waiting(&fx.booking, Utc::now());
    assert!(!fx.store.create_if_absent(second).await?);
    assert_eq!(fx.store.session_record(fx.booking.id).unwrap().id, first_id);
    Ok(())
}
