//! Client connection actor
//!
//! Each websocket is split into an inbound loop (frames from the party) and an
//! outbound loop (frames to the party). The loops only share the bounded
//! outbound queue and the client's cancellation token; signaling state lives
//! in the client's [`ConnectionState`] under its own lock.

use axum::extract::ws::Message;
use futures::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::dispatch::{self, Dispatch};
use super::session::Session;
use super::state::{BufferOutcome, ConnectionState};
use crate::auth::AuthContext;
use crate::config::SignalingConfig;
use crate::protocol::{self, Role, SignalMessage};

/// Outcome of routing a message to a client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Enqueued on the outbound queue
    Sent,
    /// Held in the client's buffer until it becomes ready
    Buffered,
    /// Queue or buffer full, or client closed
    Dropped,
}

/// Outcome of offering the session-ready notice to a client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyNotice {
    /// Enqueued; `replayed` buffered messages followed it
    Delivered { replayed: usize },
    AlreadySent,
    /// Could not be enqueued; may be retried later
    Dropped,
}

/// A connected party
pub struct Client {
    /// Unique per connection, distinguishes reconnects of the same role
    id: Uuid,

    identity: AuthContext,

    /// Producer side of the outbound queue; taken on close
    sender: Mutex<Option<mpsc::Sender<SignalMessage>>>,

    cancel: CancellationToken,

    closed: AtomicBool,

    state: Mutex<ConnectionState>,

    /// Messages dropped because the outbound queue was full
    dropped: AtomicU64,
}

impl Client {
    /// Create a client and the consumer side of its outbound queue
    pub fn new(
        identity: AuthContext,
        config: &SignalingConfig,
    ) -> (Arc<Self>, mpsc::Receiver<SignalMessage>) {
        let (tx, rx) = mpsc::channel(config.outbound_queue_capacity);
        let client = Arc::new(Self {
            id: Uuid::new_v4(),
            identity,
            sender: Mutex::new(Some(tx)),
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
            state: Mutex::new(ConnectionState::new(config.message_buffer_capacity)),
            dropped: AtomicU64::new(0),
        });
        (client, rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn identity(&self) -> &AuthContext {
        &self.identity
    }

    pub fn booking_id(&self) -> Uuid {
        self.identity.booking_id
    }

    pub fn role(&self) -> Role {
        self.identity.role
    }

    pub fn party_id(&self) -> Uuid {
        self.identity.party_id
    }

    pub fn display_name(&self) -> &str {
        &self.identity.display_name
    }

    /// Enqueue a message without blocking
    ///
    /// Returns `false` if the queue is full or the client is closed. A full
    /// queue drops the message and bumps the drop counter; nothing is retried.
    pub fn send(&self, msg: SignalMessage) -> bool {
        let sender = self.sender.lock();
        let Some(tx) = sender.as_ref() else {
            return false;
        };
        match tx.try_send(msg) {
            Ok(()) => true,
            Err(TrySendError::Full(msg)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    conn_id = %self.id,
                    role = %self.role(),
                    kind = %msg.kind(),
                    "Outbound queue full, dropping message"
                );
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Route a relayed message through the pre-ready buffer
    pub fn deliver(&self, msg: SignalMessage) -> Delivery {
        let mut state = self.state.lock();
        match state.buffer_message(msg) {
            BufferOutcome::Buffered => Delivery::Buffered,
            BufferOutcome::Full => {
                tracing::warn!(conn_id = %self.id, role = %self.role(), "Message buffer full, dropping message");
                Delivery::Dropped
            }
            BufferOutcome::Passthrough(msg) => {
                if self.send(msg) {
                    Delivery::Sent
                } else {
                    Delivery::Dropped
                }
            }
        }
    }

    /// Enqueue the session-ready notice at most once
    ///
    /// On success the client becomes ready and anything buffered for it is
    /// enqueued right behind the notice. The state lock is held throughout so
    /// concurrent relays cannot overtake the replay.
    pub fn deliver_ready_notice(&self, notice: SignalMessage) -> ReadyNotice {
        let mut state = self.state.lock();
        if state.has_ready_notice_sent() {
            return ReadyNotice::AlreadySent;
        }
        if !self.send(notice) {
            return ReadyNotice::Dropped;
        }
        state.set_ready_notice_sent();
        state.set_peer_ready(true);

        let pending = state.flush_buffer();
        let replayed = pending.len();
        for msg in pending {
            self.send(msg);
        }
        ReadyNotice::Delivered { replayed }
    }

    /// Run `f` against the connection state
    pub fn with_state<R>(&self, f: impl FnOnce(&mut ConnectionState) -> R) -> R {
        f(&mut self.state.lock())
    }

    /// Tear the client down: release the outbound queue, then signal cancellation
    ///
    /// Only the first call does anything; returns whether this call did it.
    /// Messages already queued are still written before the outbound loop exits.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        drop(self.sender.lock().take());
        self.cancel.cancel();
        tracing::debug!(conn_id = %self.id, role = %self.role(), "Client closed");
        true
    }

    pub fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    /// Resolves once the client has been closed
    pub async fn closed(&self) {
        self.cancel.cancelled().await
    }

    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Deadlines and intervals used by both loops
#[derive(Debug, Clone, Copy)]
pub struct LoopTiming {
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub ping_interval: Duration,
    pub max_message_size: usize,
}

impl From<&SignalingConfig> for LoopTiming {
    fn from(config: &SignalingConfig) -> Self {
        Self {
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout(),
            ping_interval: config.ping_interval(),
            max_message_size: config.max_message_size,
        }
    }
}

/// Why the outbound loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundExit {
    /// The queue was released and drained; the only clean exit
    QueueClosed,
    Cancelled,
    WriteFailed,
    KeepaliveFailed,
}

/// Why the inbound loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundExit {
    /// The party sent `leave_call`
    Left,
    /// Close frame or end of stream
    Disconnected,
    /// Nothing was received within the read deadline
    DeadlineExpired,
    TransportError,
    /// The client was closed from elsewhere
    Closed,
}

async fn write_frame<W>(sink: &mut W, frame: Message, deadline: Duration) -> Result<(), String>
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    match tokio::time::timeout(deadline, sink.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("write deadline of {:?} exceeded", deadline)),
    }
}

/// Write queued messages to the party and keep the transport alive
///
/// Ends cleanly when the queue is released and drained, sending a close
/// frame. A failed write or keepalive ends it with an error. Either way the
/// client is closed on exit.
pub async fn run_outbound<W>(
    client: Arc<Client>,
    mut receiver: mpsc::Receiver<SignalMessage>,
    mut sink: W,
    timing: LoopTiming,
) -> OutboundExit
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    let mut keepalive =
        tokio::time::interval_at(Instant::now() + timing.ping_interval, timing.ping_interval);

    let exit = loop {
        tokio::select! {
            // Queued messages drain ahead of cancellation
            biased;

            msg = receiver.recv() => match msg {
                Some(msg) => {
                    let text = match protocol::encode(&msg) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::error!(conn_id = %client.id(), "Failed to encode message: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = write_frame(&mut sink, Message::Text(text.into()), timing.write_timeout).await {
                        tracing::warn!(conn_id = %client.id(), "Failed to write message: {}", e);
                        break OutboundExit::WriteFailed;
                    }
                }
                None => {
                    let _ = write_frame(&mut sink, Message::Close(None), timing.write_timeout).await;
                    break OutboundExit::QueueClosed;
                }
            },

            () = client.closed() => break OutboundExit::Cancelled,

            _ = keepalive.tick() => {
                if let Err(e) = write_frame(&mut sink, Message::Ping(Vec::new().into()), timing.write_timeout).await {
                    tracing::warn!(conn_id = %client.id(), "Keepalive ping failed: {}", e);
                    break OutboundExit::KeepaliveFailed;
                }
            }
        }
    };

    client.close();
    tracing::debug!(conn_id = %client.id(), ?exit, "Outbound loop finished");
    exit
}

/// Read frames from the party and dispatch them
///
/// The read deadline restarts on every frame, pongs included, so a peer that
/// answers keepalive pings stays connected while silent at the message layer.
pub async fn run_inbound<S, E>(
    client: Arc<Client>,
    session: Arc<Session>,
    mut stream: S,
    timing: LoopTiming,
) -> InboundExit
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let exit = loop {
        let next = tokio::select! {
            () = client.closed() => break InboundExit::Closed,
            next = tokio::time::timeout(timing.read_timeout, stream.next()) => next,
        };

        let frame = match next {
            Err(_) => {
                tracing::info!(conn_id = %client.id(), "Read deadline expired");
                break InboundExit::DeadlineExpired;
            }
            Ok(None) => break InboundExit::Disconnected,
            Ok(Some(Err(e))) => {
                tracing::warn!(conn_id = %client.id(), "Error reading from client: {}", e);
                break InboundExit::TransportError;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        let outcome = match &frame {
            Message::Text(text) => {
                dispatch::handle_frame(&session, &client, text.as_str(), timing.max_message_size)
            }
            Message::Binary(data) => match std::str::from_utf8(data) {
                Ok(text) => dispatch::handle_frame(&session, &client, text, timing.max_message_size),
                Err(_) => {
                    tracing::warn!(conn_id = %client.id(), len = data.len(), "Ignoring non-UTF8 binary frame");
                    Dispatch::Continue
                }
            },
            Message::Ping(_) | Message::Pong(_) => Dispatch::Continue,
            Message::Close(_) => break InboundExit::Disconnected,
        };

        if outcome == Dispatch::Leave {
            break InboundExit::Left;
        }
    };

    tracing::debug!(conn_id = %client.id(), ?exit, "Inbound loop finished");
    exit
}
