//! Entry points used by the connection-upgrade layer

use axum::extract::ws::Message;
use futures::{Sink, Stream};
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::connection::{run_inbound, run_outbound, Client, InboundExit, LoopTiming, OutboundExit};
use super::dispatch;
use super::registry::Hub;
use super::session::Session;
use crate::auth::AuthContext;
use crate::config::SignalingConfig;
use crate::lifecycle::LifecycleService;
use crate::protocol::SignalMessage;

/// A client placed into its session, with the consumer side of its queue
pub struct Registration {
    pub session: Arc<Session>,
    pub client: Arc<Client>,
    pub outbound: mpsc::Receiver<SignalMessage>,
}

/// Handles to a connection's two loops
pub struct ConnectionTasks {
    pub inbound: JoinHandle<InboundExit>,
    pub outbound: JoinHandle<OutboundExit>,
}

pub struct Signaling {
    hub: Arc<Hub>,
    lifecycle: Arc<LifecycleService>,
    config: SignalingConfig,
}

impl Signaling {
    pub fn new(hub: Arc<Hub>, lifecycle: Arc<LifecycleService>, config: SignalingConfig) -> Self {
        Self {
            hub,
            lifecycle,
            config,
        }
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleService> {
        &self.lifecycle
    }

    pub fn config(&self) -> &SignalingConfig {
        &self.config
    }

    /// Register an authenticated party into its booking's session
    ///
    /// Records the join and, when this completes the pair, sends each side
    /// its ready notice and marks the call active.
    pub async fn register_connection(&self, identity: AuthContext) -> Registration {
        let (client, outbound) = Client::new(identity, &self.config);
        let session = self.hub.add_client(client.clone());

        tracing::info!(
            booking_id = %client.booking_id(),
            role = %client.role(),
            conn_id = %client.id(),
            party = %client.display_name(),
            "Party joined"
        );

        self.lifecycle
            .record_joined(client.booking_id(), client.role())
            .await;

        if dispatch::announce_ready(&session) {
            self.lifecycle.mark_active(session.booking_id()).await;
        }

        Registration {
            session,
            client,
            outbound,
        }
    }

    /// Start the inbound and outbound loops for a registered connection
    ///
    /// When the inbound loop ends, the departure path runs and the client is
    /// closed, which in turn lets the outbound loop drain and exit.
    pub fn spawn_connection<S, E, W>(
        self: &Arc<Self>,
        registration: Registration,
        stream: S,
        sink: W,
    ) -> ConnectionTasks
    where
        S: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
        E: Display + Send + 'static,
        W: Sink<Message> + Unpin + Send + 'static,
        W::Error: Display + Send,
    {
        let Registration {
            session,
            client,
            outbound,
        } = registration;
        let timing = LoopTiming::from(&self.config);

        let outbound = tokio::spawn(run_outbound(client.clone(), outbound, sink, timing));

        let this = Arc::clone(self);
        let inbound = tokio::spawn(async move {
            let exit = run_inbound(client.clone(), session, stream, timing).await;
            this.lifecycle.handle_client_left(&client).await;
            client.close();
            tracing::info!(
                booking_id = %client.booking_id(),
                role = %client.role(),
                conn_id = %client.id(),
                ?exit,
                "Party disconnected"
            );
            exit
        });

        ConnectionTasks { inbound, outbound }
    }

    /// End every session that has outlived its duration cap
    pub async fn sweep_expired(&self) -> usize {
        let mut ended = 0;
        for session in self.hub.sessions() {
            if session.is_expired()
                && !session.is_terminated()
                && self.lifecycle.end_expired(&session).await
            {
                ended += 1;
            }
        }
        ended
    }

    /// Periodically sweep for expired sessions until `shutdown` fires
    pub async fn run_sweeper(self: Arc<Self>, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.sweep_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let ended = self.sweep_expired().await;
                    if ended > 0 {
                        tracing::info!(ended, "Ended sessions past their time limit");
                    }
                }
            }
        }
        tracing::debug!("Session sweeper stopped");
    }

    /// End every live session and empty the registry
    ///
    /// Each call record is completed with `server_shutdown` before the
    /// registry forgets the session.
    pub async fn drain(&self) -> usize {
        for session in self.hub.sessions() {
            self.lifecycle.end_for_shutdown(&session).await;
        }
        self.hub.drain()
    }
}
