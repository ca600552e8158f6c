//! Session management - the pair of parties on one appointment

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use super::connection::{Client, Delivery};
use crate::protocol::{Role, SignalMessage};

/// One slot per role
#[derive(Default)]
struct Slots {
    mentor: Option<Arc<Client>>,
    user: Option<Arc<Client>>,
}

impl Slots {
    fn get(&self, role: Role) -> Option<&Arc<Client>> {
        match role {
            Role::Mentor => self.mentor.as_ref(),
            Role::User => self.user.as_ref(),
        }
    }

    fn get_mut(&mut self, role: Role) -> &mut Option<Arc<Client>> {
        match role {
            Role::Mentor => &mut self.mentor,
            Role::User => &mut self.user,
        }
    }
}

/// Live pairing of a mentor and a user on one booking
pub struct Session {
    booking_id: Uuid,

    slots: RwLock<Slots>,

    /// Wall-clock creation time
    started_at: DateTime<Utc>,

    /// Monotonic creation time used for the duration cap
    started: Instant,

    max_duration: Duration,

    /// Set by whichever path ends the session first
    terminated: AtomicBool,
}

impl Session {
    pub fn new(booking_id: Uuid, max_duration: Duration) -> Self {
        Self {
            booking_id,
            slots: RwLock::new(Slots::default()),
            started_at: Utc::now(),
            started: Instant::now(),
            max_duration,
            terminated: AtomicBool::new(false),
        }
    }

    pub fn booking_id(&self) -> Uuid {
        self.booking_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn max_duration(&self) -> Duration {
        self.max_duration
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Whether the session has outlived its duration cap
    pub fn is_expired(&self) -> bool {
        self.elapsed() >= self.max_duration
    }

    /// Current occupant of a role's slot
    pub fn occupant(&self, role: Role) -> Option<Arc<Client>> {
        self.slots.read().get(role).cloned()
    }

    /// The client in the opposite slot from `role`
    pub fn other_party(&self, role: Role) -> Option<Arc<Client>> {
        self.occupant(role.other())
    }

    /// Both occupants as `(mentor, user)` if both slots are filled
    pub fn pair(&self) -> Option<(Arc<Client>, Arc<Client>)> {
        let slots = self.slots.read();
        Some((slots.mentor.clone()?, slots.user.clone()?))
    }

    pub fn both_present(&self) -> bool {
        let slots = self.slots.read();
        slots.mentor.is_some() && slots.user.is_some()
    }

    pub fn is_empty(&self) -> bool {
        let slots = self.slots.read();
        slots.mentor.is_none() && slots.user.is_none()
    }

    /// Whether `client` still occupies its role's slot
    pub fn is_current(&self, client: &Client) -> bool {
        self.slots
            .read()
            .get(client.role())
            .is_some_and(|c| c.id() == client.id())
    }

    /// Put `client` into its role's slot
    ///
    /// Returns the previous occupant if it was a different connection; the
    /// caller is responsible for closing it.
    pub(crate) fn install(&self, client: Arc<Client>) -> Option<Arc<Client>> {
        let mut slots = self.slots.write();
        let slot = slots.get_mut(client.role());
        let previous = slot.replace(client.clone());
        previous.filter(|old| old.id() != client.id())
    }

    /// Empty a role's slot
    ///
    /// With `conn_id` set, the slot is only emptied if that connection still
    /// holds it. Returns whether anything was removed.
    pub(crate) fn vacate(&self, role: Role, conn_id: Option<Uuid>) -> bool {
        let mut slots = self.slots.write();
        let slot = slots.get_mut(role);
        match (slot.as_ref(), conn_id) {
            (None, _) => false,
            (Some(current), Some(id)) if current.id() != id => false,
            _ => {
                *slot = None;
                true
            }
        }
    }

    /// Enqueue a message for a role's current occupant, bypassing its buffer
    pub fn send_to_role(&self, role: Role, msg: SignalMessage) -> bool {
        match self.occupant(role) {
            Some(client) => client.send(msg),
            None => false,
        }
    }

    /// Route a relayed message to a role's current occupant through its buffer
    pub fn deliver_to_role(&self, role: Role, msg: SignalMessage) -> Option<Delivery> {
        self.occupant(role).map(|client| client.deliver(msg))
    }

    /// Enqueue a message for every occupant
    pub fn broadcast(&self, msg: SignalMessage) {
        let occupants: Vec<Arc<Client>> = {
            let slots = self.slots.read();
            slots.mentor.iter().chain(slots.user.iter()).cloned().collect()
        };
        for client in occupants {
            client.send(msg.clone());
        }
    }

    /// Mark the session as ended; returns `true` only for the first caller
    pub fn terminate(&self) -> bool {
        !self.terminated.swap(true, Ordering::AcqRel)
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Terminate and close every occupant
    ///
    /// Occupants stay in their slots until their own teardown removes them.
    /// Returns whether this call terminated the session.
    pub fn close(&self) -> bool {
        let first = self.terminate();
        let occupants: Vec<Arc<Client>> = {
            let slots = self.slots.read();
            slots.mentor.iter().chain(slots.user.iter()).cloned().collect()
        };
        for client in occupants {
            client.close();
        }
        first
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthContext;
    use crate::config::SignalingConfig;
    use crate::protocol::EmptyPayload;

    fn client(booking_id: Uuid, role: Role) -> Arc<Client> {
        let identity = AuthContext {
            booking_id,
            party_id: Uuid::new_v4(),
            display_name: format!("{role} party"),
            role,
        };
        let (client, _rx) = Client::new(identity, &SignalingConfig::default());
        client
    }

    #[test]
    fn test_install_reports_displaced_connection() {
        let booking = Uuid::new_v4();
        let session = Session::new(booking, Duration::from_secs(60));
        let first = client(booking, Role::Mentor);
        let second = client(booking, Role::Mentor);

        assert!(session.install(first.clone()).is_none());
        assert!(session.install(first.clone()).is_none());
        let displaced = session.install(second.clone()).unwrap();
        assert_eq!(displaced.id(), first.id());
        assert!(session.is_current(&second));
        assert!(!session.is_current(&first));
    }

    #[test]
    fn test_guarded_vacate_ignores_stale_connection() {
        let booking = Uuid::new_v4();
        let session = Session::new(booking, Duration::from_secs(60));
        let stale = client(booking, Role::User);
        let current = client(booking, Role::User);
        session.install(current.clone());

        assert!(!session.vacate(Role::User, Some(stale.id())));
        assert!(session.occupant(Role::User).is_some());
        assert!(session.vacate(Role::User, Some(current.id())));
        assert!(session.is_empty());
        assert!(!session.vacate(Role::User, None));
    }

    #[test]
    fn test_close_terminates_once_and_closes_occupants() {
        let booking = Uuid::new_v4();
        let session = Session::new(booking, Duration::from_secs(60));
        let mentor = client(booking, Role::Mentor);
        let user = client(booking, Role::User);
        session.install(mentor.clone());
        session.install(user.clone());
        assert!(session.both_present());

        assert!(session.close());
        assert!(!session.close());
        assert!(session.is_terminated());
        assert!(!mentor.is_connected());
        assert!(!user.is_connected());
        assert!(!session.send_to_role(Role::User, SignalMessage::Pong(EmptyPayload {})));
    }

    #[test]
    fn test_zero_cap_is_expired_immediately() {
        let session = Session::new(Uuid::new_v4(), Duration::ZERO);
        assert!(session.is_expired());
    }
}
