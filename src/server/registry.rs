//! Process-wide registry of live sessions keyed by booking

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::connection::Client;
use super::session::Session;
use crate::protocol::Role;

/// Registry of sessions; at most one live session per booking
pub struct Hub {
    sessions: RwLock<HashMap<Uuid, Arc<Session>>>,
    max_duration: Duration,
}

impl Hub {
    /// Create an empty registry; new sessions get `max_duration` as their cap
    pub fn new(max_duration: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_duration,
        }
    }

    /// Place a client into its booking's session, creating it if needed
    ///
    /// A terminated session still awaiting teardown is replaced by a fresh
    /// one. A different connection already holding the role is closed.
    pub fn add_client(&self, client: Arc<Client>) -> Arc<Session> {
        let booking_id = client.booking_id();
        let (session, displaced) = {
            let mut sessions = self.sessions.write();
            let live = sessions
                .get(&booking_id)
                .filter(|existing| !existing.is_terminated())
                .cloned();
            let session = match live {
                Some(existing) => existing,
                None => {
                    let fresh = Arc::new(Session::new(booking_id, self.max_duration));
                    if sessions.insert(booking_id, fresh.clone()).is_some() {
                        tracing::debug!(%booking_id, "Replaced terminated session");
                    } else {
                        tracing::info!(%booking_id, "Session created");
                    }
                    fresh
                }
            };
            let displaced = session.install(client.clone());
            (session, displaced)
        };

        if let Some(old) = displaced {
            tracing::info!(
                %booking_id,
                role = %client.role(),
                old_conn = %old.id(),
                new_conn = %client.id(),
                "Closing superseded connection"
            );
            old.close();
        }

        session
    }

    pub fn get_session(&self, booking_id: Uuid) -> Option<Arc<Session>> {
        self.sessions.read().get(&booking_id).cloned()
    }

    /// Empty a role's slot regardless of which connection holds it
    pub fn remove_client(&self, booking_id: Uuid, role: Role) -> bool {
        self.remove_where(booking_id, role, None)
    }

    /// Empty a role's slot only if `conn_id` still holds it
    pub fn remove_connection(&self, booking_id: Uuid, role: Role, conn_id: Uuid) -> bool {
        self.remove_where(booking_id, role, Some(conn_id))
    }

    fn remove_where(&self, booking_id: Uuid, role: Role, conn_id: Option<Uuid>) -> bool {
        let mut sessions = self.sessions.write();
        let Some(session) = sessions.get(&booking_id) else {
            return false;
        };

        let removed = session.vacate(role, conn_id);
        if removed && session.is_empty() {
            sessions.remove(&booking_id);
            tracing::info!(%booking_id, "Session removed");
        }
        removed
    }

    /// Snapshot of every live session
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.read().values().cloned().collect()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Close every session and forget them; used at shutdown
    pub fn drain(&self) -> usize {
        let drained: Vec<Arc<Session>> = self.sessions.write().drain().map(|(_, s)| s).collect();
        for session in &drained {
            session.close();
        }
        if !drained.is_empty() {
            tracing::info!(count = drained.len(), "Drained sessions");
        }
        drained.len()
    }
}
