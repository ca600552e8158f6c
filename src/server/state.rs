//! Per-connection signaling state and the pre-ready message buffer

use thiserror::Error;

use crate::protocol::SignalMessage;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("message buffer is full ({capacity} messages)")]
pub struct BufferFull {
    pub capacity: usize,
}

/// Bounded FIFO of envelopes held while a party is not ready
#[derive(Debug)]
pub struct MessageBuffer {
    messages: Vec<SignalMessage>,
    capacity: usize,
}

impl MessageBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            messages: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a message; a full buffer is left untouched
    pub fn add(&mut self, msg: SignalMessage) -> Result<(), BufferFull> {
        if self.messages.len() >= self.capacity {
            return Err(BufferFull {
                capacity: self.capacity,
            });
        }
        self.messages.push(msg);
        Ok(())
    }

    /// Take every buffered message in insertion order, leaving an empty buffer
    pub fn flush(&mut self) -> Vec<SignalMessage> {
        std::mem::take(&mut self.messages)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Result of offering a message to a connection's buffer
#[derive(Debug, PartialEq)]
pub enum BufferOutcome {
    /// Held until the party becomes ready
    Buffered,
    /// Buffering is off; the caller must deliver the message itself
    Passthrough(SignalMessage),
    /// Buffering is on but the buffer is full; the message is dropped
    Full,
}

/// Signaling flags of one connection
///
/// Owned by its client behind a single lock.
#[derive(Debug)]
pub struct ConnectionState {
    peer_ready: bool,
    ready_notice_sent: bool,
    buffer: MessageBuffer,
}

impl ConnectionState {
    pub fn new(buffer_capacity: usize) -> Self {
        Self {
            peer_ready: false,
            ready_notice_sent: false,
            buffer: MessageBuffer::new(buffer_capacity),
        }
    }

    pub fn is_peer_ready(&self) -> bool {
        self.peer_ready
    }

    /// Once ready, messages are no longer buffered
    pub fn set_peer_ready(&mut self, ready: bool) {
        self.peer_ready = ready;
    }

    pub fn is_buffering(&self) -> bool {
        !self.peer_ready
    }

    pub fn buffer_message(&mut self, msg: SignalMessage) -> BufferOutcome {
        if !self.is_buffering() {
            return BufferOutcome::Passthrough(msg);
        }
        match self.buffer.add(msg) {
            Ok(()) => BufferOutcome::Buffered,
            Err(_) => BufferOutcome::Full,
        }
    }

    pub fn flush_buffer(&mut self) -> Vec<SignalMessage> {
        self.buffer.flush()
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn has_ready_notice_sent(&self) -> bool {
        self.ready_notice_sent
    }

    /// Record delivery of the ready notice; returns `false` if already recorded
    pub fn set_ready_notice_sent(&mut self) -> bool {
        if self.ready_notice_sent {
            return false;
        }
        self.ready_notice_sent = true;
        true
    }
}
