//! Shared fixtures for the integration suites
#![allow(dead_code)]

use axum::extract::ws::Message;
use callhub::auth::AuthContext;
use callhub::config::{LifecycleConfig, SignalingConfig};
use callhub::lifecycle::{Booking, BookingStatus, LifecycleService, MemoryStore, Party};
use callhub::protocol::{self, Role, SignalMessage};
use callhub::server::{ConnectionTasks, Hub, Registration, Signaling};
use chrono::{Duration as ChronoDuration, Utc};
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use uuid::Uuid;

pub const WAIT: Duration = Duration::from_secs(2);

/// A confirmed booking whose window is open right now in UTC
pub fn booking_around_now(mentor_profile: Uuid, user_id: Uuid) -> Booking {
    let start = Utc::now() - ChronoDuration::minutes(5);
    let end = Utc::now() + ChronoDuration::minutes(25);
    Booking {
        id: Uuid::new_v4(),
        mentor_id: mentor_profile,
        user_id,
        status: BookingStatus::Confirmed,
        date: start.date_naive(),
        start_time: start.time(),
        end_time: end.time(),
    }
}

/// One booking with its two parties wired into a full signaling stack
pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub hub: Arc<Hub>,
    pub lifecycle: Arc<LifecycleService>,
    pub signaling: Arc<Signaling>,
    pub booking: Booking,
    pub mentor: Party,
    pub user: Party,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(SignalingConfig::default())
    }

    pub fn with_config(config: SignalingConfig) -> Self {
        let mentor = Party {
            id: Uuid::new_v4(),
            display_name: "Asha Mentor".to_string(),
            mentor_profile_id: Some(Uuid::new_v4()),
        };
        let user = Party {
            id: Uuid::new_v4(),
            display_name: "Ravi User".to_string(),
            mentor_profile_id: None,
        };
        let booking = booking_around_now(mentor.mentor_profile_id.unwrap(), user.id);

        let store = Arc::new(MemoryStore::new());
        store.insert_booking(booking.clone());
        store.insert_party(mentor.clone());
        store.insert_party(user.clone());

        let hub = Arc::new(Hub::new(config.max_session_duration()));
        let lifecycle = Arc::new(LifecycleService::new(
            Arc::clone(&hub),
            store.clone(),
            store.clone(),
            store.clone(),
            LifecycleConfig::default(),
        ));
        let signaling = Arc::new(Signaling::new(
            Arc::clone(&hub),
            Arc::clone(&lifecycle),
            config,
        ));

        Self {
            store,
            hub,
            lifecycle,
            signaling,
            booking,
            mentor,
            user,
        }
    }

    pub fn party(&self, role: Role) -> &Party {
        match role {
            Role::Mentor => &self.mentor,
            Role::User => &self.user,
        }
    }

    pub fn identity(&self, role: Role) -> AuthContext {
        let party = self.party(role);
        AuthContext {
            booking_id: self.booking.id,
            party_id: party.id,
            display_name: party.display_name.clone(),
            role,
        }
    }

    /// Validate the join, which also creates the call record
    pub async fn validate(&self, role: Role) {
        let info = self
            .lifecycle
            .validate_and_start_session(self.booking.id, self.party(role).id, role, "UTC")
            .await
            .expect("validation failed");
        assert!(info.can_join, "join rejected: {:?}", info.reason);
    }

    /// Validate, register and start both loops over an in-memory transport
    pub async fn join(&self, role: Role) -> (FakeSocket, ConnectionTasks, Uuid) {
        self.validate(role).await;
        let registration = self.signaling.register_connection(self.identity(role)).await;
        let conn_id = registration.client.id();
        let (socket, tasks) = attach(&self.signaling, registration);
        (socket, tasks, conn_id)
    }
}

/// The party's end of an in-memory websocket
pub struct FakeSocket {
    pub to_server: UnboundedSender<Result<Message, axum::Error>>,
    pub from_server: UnboundedReceiver<Message>,
}

impl FakeSocket {
    pub fn send(&self, msg: &SignalMessage) {
        self.send_text(&protocol::encode(msg).expect("encode failed"));
    }

    pub fn send_text(&self, text: &str) {
        self.to_server
            .unbounded_send(Ok(Message::Text(text.to_string().into())))
            .expect("server side gone");
    }

    /// Next signaling message, skipping keepalive pings
    ///
    /// Returns `None` on a close frame or end of stream.
    pub async fn next_signal(&mut self) -> Option<SignalMessage> {
        loop {
            let frame = timeout(WAIT, self.from_server.next())
                .await
                .expect("timed out waiting for a frame")?;
            match frame {
                Message::Text(text) => {
                    return Some(protocol::decode(text.as_str()).expect("server sent bad frame"))
                }
                Message::Ping(_) | Message::Pong(_) => continue,
                Message::Close(_) => return None,
                Message::Binary(_) => panic!("unexpected binary frame"),
            }
        }
    }

    /// Assert nothing but keepalives arrive within `window`
    pub async fn expect_silence(&mut self, window: Duration) {
        loop {
            match timeout(window, self.from_server.next()).await {
                Err(_) => return,
                Ok(Some(Message::Ping(_))) => continue,
                Ok(other) => panic!("expected silence, got {:?}", other),
            }
        }
    }
}

/// Run a registration's loops over an in-memory transport
pub fn attach(signaling: &Arc<Signaling>, registration: Registration) -> (FakeSocket, ConnectionTasks) {
    let (to_server, inbound) = unbounded::<Result<Message, axum::Error>>();
    let (outbound, from_server) = unbounded::<Message>();
    let tasks = signaling.spawn_connection(registration, inbound, outbound);
    (
        FakeSocket {
            to_server,
            from_server,
        },
        tasks,
    )
}
