// src/core/protocol/state.rs

//! The protocol state machine of a connection.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// The protocol version assumed until the handshake negotiates another one.
pub const DEFAULT_PROTOCOL_VERSION: i32 = 498;

/// The phase a connection is in. Packet ids are only meaningful relative to a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ProtocolState {
    #[default]
    Init = 0,
    Status = 1,
    Login = 2,
    Play = 3,
}

impl ProtocolState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolState::Init => "init",
            ProtocolState::Status => "status",
            ProtocolState::Login => "login",
            ProtocolState::Play => "play",
        }
    }

    /// Maps the `next_state` field of a handshake to the state it requests.
    pub fn from_next_state(next_state: i32) -> Option<Self> {
        match next_state {
            1 => Some(ProtocolState::Status),
            2 => Some(ProtocolState::Login),
            _ => None,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => ProtocolState::Status,
            2 => ProtocolState::Login,
            3 => ProtocolState::Play,
            _ => ProtocolState::Init,
        }
    }
}

impl fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `ProtocolState` that can be read by the read loop while a handler advances it.
#[derive(Debug, Default)]
pub struct AtomicProtocolState(AtomicU8);

impl AtomicProtocolState {
    pub fn new(state: ProtocolState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn load(&self) -> ProtocolState {
        ProtocolState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, state: ProtocolState) {
        self.0.store(state as u8, Ordering::Release);
    }
}
