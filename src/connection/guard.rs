// src/connection/guard.rs

//! Defines `ConnectionGuard`, an RAII guard for connection resource management.

use super::handle::ConnectionHandle;
use crate::core::metrics;
use crate::core::protocol::ProtocolState;
use tracing::{debug, info};

/// An RAII guard to ensure connection resources are always cleaned up when the
/// read loop's scope is exited, including by a panic.
pub struct ConnectionGuard {
    handle: ConnectionHandle,
}

impl ConnectionGuard {
    /// Creates a new `ConnectionGuard`.
    pub(crate) fn new(handle: ConnectionHandle) -> Self {
        metrics::CONNECTED_CLIENTS.inc();
        Self { handle }
    }
}

impl Drop for ConnectionGuard {
    /// Stops the write loop, releases every pending waiter, and removes a logged-in
    /// player from the player directory.
    fn drop(&mut self) {
        metrics::CONNECTED_CLIENTS.dec();
        debug!(
            "ConnectionGuard dropping, cleaning up resources for connection {}",
            self.handle.peer()
        );

        self.handle.close();
        self.handle.pending().close();

        if self.handle.protocol_state() != ProtocolState::Play {
            return;
        }
        let Some(uuid) = self.handle.identity() else {
            debug!(
                "Connection {} was in play state without an identity.",
                self.handle.peer()
            );
            return;
        };
        match self.handle.players().remove(&uuid) {
            Some(player) => info!("Player {} left, removed from the game.", player.name),
            None => debug!(
                "Player {} was not in the player directory upon cleanup.",
                uuid
            ),
        }
    }
}
