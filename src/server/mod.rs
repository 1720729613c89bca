// src/server/mod.rs

use crate::config::Config;
use anyhow::Result;

mod connection_loop;
mod context;
mod initialization;
mod metrics_server;
mod spawner;

pub use context::{LogReloadHandle, ServerContext};
pub use initialization::default_services;

/// The main server startup function, orchestrating all setup phases.
pub async fn run(
    config: Config,
    config_path: Option<String>,
    log_reload_handle: LogReloadHandle,
) -> Result<()> {
    // 1. Bind the listener and assemble the connection collaborators.
    let mut server_context =
        initialization::setup(config, config_path, log_reload_handle).await?;

    // 2. Spawn all background tasks.
    spawner::spawn_all(&mut server_context).await?;

    // 3. Start the main connection acceptance loop. This function will run until shutdown.
    connection_loop::run(server_context).await
}
