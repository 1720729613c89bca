// src/core/builtin.rs

//! Connection-level handlers every server needs regardless of its game logic:
//! protocol negotiation, the server-list status exchange, and offline-mode login.

use crate::config::StatusConfig;
use crate::connection::ConnectionHandle;
use crate::core::LodestoneError;
use crate::core::codec::DecodedArgs;
use crate::core::events::EventRouter;
use crate::core::players::Player;
use crate::core::protocol::wire::write_string;
use crate::core::protocol::{HANDSHAKE, Message, ProtocolState};
use bytes::BytesMut;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

// Clientbound packet ids.
const STATUS_RESPONSE_ID: i32 = 0x00;
const STATUS_PONG_ID: i32 = 0x01;
const LOGIN_SUCCESS_ID: i32 = 0x02;

impl EventRouter {
    /// Registers the built-in handlers on top of any routes already present.
    pub fn with_builtin(self, status: StatusConfig) -> Self {
        let status = Arc::new(status);
        self.on(HANDSHAKE, handle_handshake)
            .on("status_request", move |conn, message, args| {
                handle_status_request(conn, message, args, status.clone())
            })
            .on("status_ping", handle_status_ping)
            .on("login_start", handle_login_start)
    }
}

/// Applies the negotiated protocol version and moves to the requested state.
pub async fn handle_handshake(
    conn: ConnectionHandle,
    _message: Message,
    args: DecodedArgs,
) -> Result<(), LodestoneError> {
    let protocol_version = args.varint(0)?;
    let server_address = args.string(1)?;
    let server_port = args.ushort(2)?;
    let next_state = args.varint(3)?;

    let state = ProtocolState::from_next_state(next_state).ok_or_else(|| {
        LodestoneError::InvalidData(format!("handshake requested unknown state {next_state}"))
    })?;

    conn.set_protocol_version(protocol_version);
    conn.set_protocol_state(state);
    debug!(
        "Session {}: handshake via {}:{} with protocol {}, next state {}.",
        conn.session_id(),
        server_address,
        server_port,
        protocol_version,
        state
    );
    Ok(())
}

/// Answers a server-list status request with a JSON description of the server.
pub async fn handle_status_request(
    conn: ConnectionHandle,
    _message: Message,
    _args: DecodedArgs,
    status: Arc<StatusConfig>,
) -> Result<(), LodestoneError> {
    let response = json!({
        "version": {
            "name": status.version_name,
            "protocol": conn.protocol_version(),
        },
        "players": {
            "max": status.max_players,
            "online": conn.players().online(),
        },
        "description": { "text": status.motd },
    });

    let mut body = BytesMut::new();
    write_string(&mut body, &serde_json::to_string(&response)?);
    conn.send(STATUS_RESPONSE_ID, &body)
}

/// Echoes the ping payload so the client can measure latency.
pub async fn handle_status_ping(
    conn: ConnectionHandle,
    _message: Message,
    args: DecodedArgs,
) -> Result<(), LodestoneError> {
    let payload = args.long(0)?;
    conn.send(STATUS_PONG_ID, &payload.to_be_bytes())
}

/// Completes an offline-mode login: derives a stable identity from the player name,
/// confirms it to the client, registers the player and enters the play state.
pub async fn handle_login_start(
    conn: ConnectionHandle,
    _message: Message,
    args: DecodedArgs,
) -> Result<(), LodestoneError> {
    let name = args.string(0)?.to_string();
    let uuid = offline_uuid(&name);

    // Protocol versions before the 1.16 series send the identity as a hyphenated string.
    let mut body = BytesMut::new();
    write_string(&mut body, &uuid.hyphenated().to_string());
    write_string(&mut body, &name);
    conn.send(LOGIN_SUCCESS_ID, &body)?;

    conn.set_identity(uuid);
    conn.set_display_name(name.clone());
    conn.players().insert(Player::new(uuid, name.clone()));
    conn.set_protocol_state(ProtocolState::Play);
    info!("Player {} ({}) logged in from {}.", name, uuid, conn.peer());
    Ok(())
}

/// The identity an unauthenticated player with `name` is given.
pub fn offline_uuid(name: &str) -> Uuid {
    Uuid::new_v3(
        &Uuid::NAMESPACE_OID,
        format!("OfflinePlayer:{name}").as_bytes(),
    )
}
