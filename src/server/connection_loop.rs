// src/server/connection_loop.rs

//! Contains the main server loop for accepting connections and handling graceful shutdown.

use super::context::ServerContext;
use crate::config::{Config, ConnectionConfig};
use crate::connection::{Connection, ConnectionServices};
use crate::core::metrics;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::{OwnedSemaphorePermit, broadcast};
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::filter::EnvFilter;

const CLIENT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
const BACKGROUND_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// The main server loop that accepts connections and handles graceful shutdown.
pub async fn run(mut ctx: ServerContext) -> Result<()> {
    let mut session_id_counter: u64 = 0;
    let mut client_tasks = JoinSet::new();

    let mut sigint =
        signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
    let mut sighup = signal(SignalKind::hangup()).context("Failed to register SIGHUP handler")?;

    loop {
        tokio::select! {
            biased;

            _ = sigint.recv() => {
                info!("SIGINT received, initiating graceful shutdown.");
                break;
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received, initiating graceful shutdown.");
                break;
            }
            _ = sighup.recv() => {
                reload_log_level(&ctx);
            }

            Some(res) = ctx.background_tasks.join_next() => {
                match res {
                    Ok(Ok(())) => warn!("A background task finished unexpectedly without an error."),
                    Ok(Err(e)) => { error!("CRITICAL: Background task failed: {}. Shutting down.", e); break; }
                    Err(e) => { error!("CRITICAL: Background task panicked: {e:?}. Shutting down."); break; }
                }
            },

            res = ctx.listener.accept() => {
                let (socket, addr) = match res {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        continue;
                    }
                };
                metrics::CONNECTIONS_RECEIVED_TOTAL.inc();

                let Ok(permit) = ctx.connection_permits.clone().try_acquire_owned() else {
                    warn!(
                        "Rejecting connection from {}: max_clients ({}) reached.",
                        addr, ctx.config.max_clients
                    );
                    continue;
                };
                info!("Accepted new connection from: {}", addr);

                session_id_counter = session_id_counter.wrapping_add(1);
                let session_id = session_id_counter;
                let global_shutdown_rx = ctx.shutdown_tx.subscribe();
                let services = ctx.services.clone();
                let settings = ctx.config.connection.clone();

                client_tasks.spawn(async move {
                    serve_client(socket, addr, session_id, services, settings, permit, global_shutdown_rx).await;
                });
            },

            Some(res) = client_tasks.join_next() => {
                if let Err(e) = res
                    && e.is_panic()
                {
                    error!("A client handler panicked: {e:?}");
                }
            },
        }
    }

    info!("Shutting down. Sending signal to all tasks.");
    if ctx.shutdown_tx.send(()).is_err() {
        warn!("No tasks were listening for the shutdown signal.");
    }

    if tokio::time::timeout(CLIENT_SHUTDOWN_GRACE, async {
        while client_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("Timed out waiting for client connections to close; aborting the rest.");
        client_tasks.shutdown().await;
    }
    info!("All client connections closed.");

    info!("Waiting for background tasks to finish...");
    if tokio::time::timeout(BACKGROUND_SHUTDOWN_GRACE, async {
        while ctx.background_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("Timed out waiting for background tasks to finish cleanly.");
    };
    info!("Server shutdown complete.");
    Ok(())
}

/// Runs one accepted client until it disconnects or the server shuts down.
async fn serve_client(
    socket: TcpStream,
    addr: SocketAddr,
    session_id: u64,
    services: ConnectionServices,
    settings: ConnectionConfig,
    _permit: OwnedSemaphorePermit,
    mut global_shutdown_rx: broadcast::Receiver<()>,
) {
    if let Err(e) = socket.set_nodelay(true) {
        warn!("Failed to set TCP_NODELAY for {}: {}", addr, e);
    }
    let connection = Connection::new(socket, addr.to_string(), session_id, services, settings);
    let handle = connection.handle();
    let run = connection.run();
    tokio::pin!(run);

    let result = tokio::select! {
        res = &mut run => res,
        _ = global_shutdown_rx.recv() => {
            info!("Closing connection from {} for server shutdown.", addr);
            handle.close();
            run.await
        }
    };
    if let Err(e) = result {
        warn!("Connection from {} terminated unexpectedly: {}", addr, e);
    }
}

/// Re-reads `log_level` from the config file and applies it to the live filter.
fn reload_log_level(ctx: &ServerContext) {
    let Some(path) = ctx.config_path.as_deref() else {
        info!("SIGHUP received, but the server was started without a config file.");
        return;
    };
    let level = match Config::from_file(path) {
        Ok(config) => config.log_level,
        Err(e) => {
            warn!("SIGHUP received, but reloading '{}' failed: {:#}", path, e);
            return;
        }
    };
    let filter = match EnvFilter::try_new(&level) {
        Ok(filter) => filter,
        Err(e) => {
            warn!("Ignoring invalid log_level '{}': {}", level, e);
            return;
        }
    };
    match ctx.log_reload_handle.reload(filter) {
        Ok(()) => info!("Log level reloaded to '{}'.", level),
        Err(e) => warn!("Failed to apply log level '{}': {}", level, e),
    }
}
