// src/core/protocol/names.rs

//! Maps serverbound packet ids to symbolic names.

use super::message::HANDSHAKE;
use super::state::{DEFAULT_PROTOCOL_VERSION, ProtocolState};
use std::collections::HashMap;

/// The name given to packet ids that have no entry in the table.
pub const UNKNOWN_PACKET: &str = "unknown";

/// A lookup table from `(state, packet_id)` to a packet name, with optional
/// per-protocol-version overrides for ids that moved between releases.
#[derive(Debug, Clone, Default)]
pub struct PacketNames {
    by_state: HashMap<(ProtocolState, i32), String>,
    by_version: HashMap<(i32, ProtocolState, i32), String>,
}

impl PacketNames {
    pub fn new() -> Self {
        Self::default()
    }

    /// The serverbound names of the pre-play states, which are stable across
    /// releases, plus the play packets of the default protocol version.
    pub fn serverbound() -> Self {
        let mut names = Self::new();
        names
            .insert(ProtocolState::Init, 0x00, HANDSHAKE)
            .insert(ProtocolState::Status, 0x00, "status_request")
            .insert(ProtocolState::Status, 0x01, "status_ping")
            .insert(ProtocolState::Login, 0x00, "login_start")
            .insert(ProtocolState::Login, 0x01, "login_encryption_response")
            .insert(ProtocolState::Login, 0x02, "login_plugin_response");

        let v = DEFAULT_PROTOCOL_VERSION;
        names
            .insert_for_version(v, ProtocolState::Play, 0x00, "teleport_confirm")
            .insert_for_version(v, ProtocolState::Play, 0x03, "chat_message")
            .insert_for_version(v, ProtocolState::Play, 0x04, "client_status")
            .insert_for_version(v, ProtocolState::Play, 0x05, "client_settings")
            .insert_for_version(v, ProtocolState::Play, 0x0F, "keep_alive");
        names
    }

    pub fn insert(&mut self, state: ProtocolState, packet_id: i32, name: &str) -> &mut Self {
        self.by_state.insert((state, packet_id), name.to_string());
        self
    }

    pub fn insert_for_version(
        &mut self,
        protocol_version: i32,
        state: ProtocolState,
        packet_id: i32,
        name: &str,
    ) -> &mut Self {
        self.by_version
            .insert((protocol_version, state, packet_id), name.to_string());
        self
    }

    /// Resolves a packet name, preferring a version-specific entry.
    pub fn lookup(&self, protocol_version: i32, state: ProtocolState, packet_id: i32) -> &str {
        self.by_version
            .get(&(protocol_version, state, packet_id))
            .or_else(|| self.by_state.get(&(state, packet_id)))
            .map(String::as_str)
            .unwrap_or(UNKNOWN_PACKET)
    }
}
