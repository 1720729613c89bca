// src/core/protocol/message.rs

//! Defines `Message`, one framed packet as it leaves the framer.

use bytes::Bytes;
use std::fmt;

/// The name of the message that negotiates protocol version and next state.
pub const HANDSHAKE: &str = "handshake";

/// A single framed inbound message.
#[derive(Clone, PartialEq, Eq)]
pub struct Message {
    /// The symbolic name resolved from the packet id and protocol state.
    pub name: String,
    /// The numeric packet id as it appeared on the wire.
    pub packet_id: i32,
    /// The packet body following the id. This is what pending waiters receive.
    pub body: Bytes,
}

impl Message {
    pub fn new(name: impl Into<String>, packet_id: i32, body: Bytes) -> Self {
        Self {
            name: name.into(),
            packet_id,
            body,
        }
    }

    pub fn is_handshake(&self) -> bool {
        self.name == HANDSHAKE
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("name", &self.name)
            .field("packet_id", &format_args!("{:#04x}", self.packet_id))
            .field("body_len", &self.body.len())
            .finish()
    }
}
