// src/connection/mod.rs

//! Manages the lifecycle of a single client connection: framing inbound bytes into
//! messages, dispatching them, and writing the outbound queue back to the peer.

mod guard;
mod handle;
mod handler;
mod outbound;

pub use guard::ConnectionGuard;
pub use handle::ConnectionHandle;
pub use handler::{Connection, ConnectionServices};
pub use outbound::OutboundQueue;
