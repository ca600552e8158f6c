//! Server module - session registry, connection actors and the HTTP surface

mod connection;
mod dispatch;
mod listener;
mod registry;
mod session;
mod signaling;
mod state;

pub use connection::{
    run_inbound, run_outbound, Client, Delivery, InboundExit, LoopTiming, OutboundExit,
    ReadyNotice,
};
pub use dispatch::{announce_ready, dispatch, handle_frame, Dispatch};
pub use listener::{build_router, AppState, ServerListener};
pub use registry::Hub;
pub use session::Session;
pub use signaling::{ConnectionTasks, Registration, Signaling};
pub use state::{BufferFull, BufferOutcome, ConnectionState, MessageBuffer};
