//! callhub - signaling relay for two-party scheduled video calls
//!
//! This crate provides:
//! - Pairing of a mentor and a user on one booking into a live session
//! - Relay of SDP offers, answers and ICE candidates between them
//! - Join-window validation and call records through pluggable stores
//!
//! # Architecture
//!
//! Media never passes through the server. Each party holds one websocket,
//! split into an inbound and an outbound loop that share only a bounded
//! queue and a cancellation token. Sessions live in an injected [`server::Hub`].

pub mod auth;
pub mod config;
pub mod lifecycle;
pub mod protocol;
pub mod server;
