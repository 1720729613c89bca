// src/server/initialization.rs

//! Handles the server initialization process: binding the listener and assembling
//! the collaborators every connection is built from.

use super::context::{LogReloadHandle, ServerContext};
use crate::config::Config;
use crate::connection::ConnectionServices;
use crate::core::codec::SchemaCodec;
use crate::core::events::EventRouter;
use crate::core::players::PlayerRegistry;
use crate::core::protocol::{PacketNames, VarIntFramer};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinSet;
use tracing::info;

/// Initializes all server components before starting the main loop.
pub async fn setup(
    config: Config,
    config_path: Option<String>,
    log_reload_handle: LogReloadHandle,
) -> Result<ServerContext> {
    log_startup_info(&config);
    let (shutdown_tx, _) = broadcast::channel(1);

    let players = Arc::new(PlayerRegistry::new());
    let services = default_services(&config, players.clone());

    let listener = TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", config.host, config.port))?;
    info!(
        "Lodestone server listening on {}:{}",
        config.host, config.port
    );
    let connection_permits = Arc::new(Semaphore::new(config.max_clients));

    Ok(ServerContext {
        config: Arc::new(config),
        config_path,
        listener,
        shutdown_tx,
        background_tasks: JoinSet::new(),
        services,
        players,
        connection_permits,
        log_reload_handle,
    })
}

/// The default collaborators: VarInt framing, schema decoding, and the built-in
/// connection-level handlers.
pub fn default_services(config: &Config, players: Arc<PlayerRegistry>) -> ConnectionServices {
    ConnectionServices {
        framer: Arc::new(VarIntFramer::new(
            PacketNames::serverbound(),
            config.connection.max_frame_len,
        )),
        codec: Arc::new(SchemaCodec::serverbound()),
        events: Arc::new(EventRouter::new().with_builtin(config.status.clone())),
        players,
    }
}

/// Logs key configuration parameters at startup.
fn log_startup_info(config: &Config) {
    let conn = &config.connection;
    info!(
        "Accepting up to {} clients; {} handlers in flight per connection.",
        config.max_clients, conn.max_in_flight_handlers
    );
    info!(
        "Default protocol version {}, frame limit {} bytes, read chunk {} bytes.",
        conn.default_protocol_version, conn.max_frame_len, conn.read_chunk_size
    );
}
