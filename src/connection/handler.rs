// src/connection/handler.rs

//! Defines `Connection`, which manages the full lifecycle of a client connection:
//! the read loop that frames and dispatches inbound messages, and the write loop that
//! drains the outbound queue onto the stream.

use super::guard::ConnectionGuard;
use super::handle::ConnectionHandle;
use crate::config::ConnectionConfig;
use crate::core::LodestoneError;
use crate::core::codec::PacketCodec;
use crate::core::crypto::{Cipher, PlainCipher};
use crate::core::dispatch::Dispatcher;
use crate::core::events::EventDispatcher;
use crate::core::metrics;
use crate::core::players::PlayerDirectory;
use crate::core::protocol::{Framer, Message};
use bytes::{Buf, BytesMut};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// The collaborators a connection consumes. Cloned once per accepted stream.
#[derive(Clone)]
pub struct ConnectionServices {
    pub framer: Arc<dyn Framer>,
    pub codec: Arc<dyn PacketCodec>,
    pub events: Arc<dyn EventDispatcher>,
    pub players: Arc<dyn PlayerDirectory>,
}

/// One client connection over any bidirectional byte stream.
pub struct Connection<S> {
    stream: S,
    handle: ConnectionHandle,
    framer: Arc<dyn Framer>,
    dispatcher: Dispatcher,
    settings: ConnectionConfig,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    /// Creates a new `Connection` with a pass-through cipher.
    pub fn new(
        stream: S,
        peer: impl Into<String>,
        session_id: u64,
        services: ConnectionServices,
        settings: ConnectionConfig,
    ) -> Self {
        Self::with_cipher(
            stream,
            peer,
            session_id,
            services,
            settings,
            Box::new(PlainCipher),
        )
    }

    pub fn with_cipher(
        stream: S,
        peer: impl Into<String>,
        session_id: u64,
        services: ConnectionServices,
        settings: ConnectionConfig,
        cipher: Box<dyn Cipher>,
    ) -> Self {
        let handle = ConnectionHandle::new(
            peer.into(),
            session_id,
            CancellationToken::new(),
            &settings,
            cipher,
            services.players.clone(),
        );
        Self {
            stream,
            handle,
            framer: services.framer,
            dispatcher: Dispatcher::new(services.codec, services.events),
            settings,
        }
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    /// Runs the read loop and the write loop until either side stops, then cleans up.
    ///
    /// Returns an error only for malformed framing; a peer hanging up or a transport
    /// failure ends the connection normally.
    pub async fn run(self) -> Result<(), LodestoneError> {
        let Connection {
            stream,
            handle,
            framer,
            dispatcher,
            settings,
        } = self;
        info!("Session {}: serving {}.", handle.session_id(), handle.peer());

        let (reader, writer) = tokio::io::split(stream);
        let read_loop = ReadLoop {
            reader,
            handle: handle.clone(),
            framer,
            dispatcher,
            settings,
        };
        let (read_result, ()) = tokio::join!(read_loop.run(), write_loop(writer, handle.clone()));

        debug!(
            "Session {}: both loops exited for {}.",
            handle.session_id(),
            handle.peer()
        );
        read_result
    }
}

/// The state owned by the read loop. The accumulation buffer lives on its stack.
struct ReadLoop<R> {
    reader: R,
    handle: ConnectionHandle,
    framer: Arc<dyn Framer>,
    dispatcher: Dispatcher,
    settings: ConnectionConfig,
}

impl<R> ReadLoop<R>
where
    R: AsyncRead + Unpin,
{
    async fn run(mut self) -> Result<(), LodestoneError> {
        let guard = ConnectionGuard::new(self.handle.clone());
        let running = self.handle.running().clone();
        let permits = Arc::new(Semaphore::new(self.settings.max_in_flight_handlers));
        let mut tasks: JoinSet<()> = JoinSet::new();
        let mut buffer = BytesMut::with_capacity(self.settings.read_chunk_size * 2);
        let mut chunk = vec![0u8; self.settings.read_chunk_size];
        let mut run_again = false;

        let result = 'read_loop: loop {
            if !run_again {
                let n = tokio::select! {
                    biased;
                    _ = running.cancelled() => {
                        debug!("Session {}: read loop observed shutdown.", self.handle.session_id());
                        break 'read_loop Ok(());
                    }
                    res = self.reader.read(&mut chunk) => match res {
                        Ok(0) => {
                            info!("Closing connection to {}.", self.handle.peer());
                            break 'read_loop Ok(());
                        }
                        Ok(n) => n,
                        Err(e) => {
                            if is_normal_disconnect(&e) {
                                debug!("Connection from {} closed by peer: {}", self.handle.peer(), e);
                            } else {
                                warn!("Connection error for {}: {}", self.handle.peer(), e);
                            }
                            break 'read_loop Ok(());
                        }
                    }
                };
                metrics::BYTES_RECEIVED_TOTAL.inc_by(n as f64);
                let received = &mut chunk[..n];
                self.handle.decrypt(received);
                buffer.extend_from_slice(received);
            }

            let parsed = self.framer.try_parse_one(
                &buffer,
                self.handle.protocol_version(),
                self.handle.protocol_state(),
            );
            let (message, consumed) = match parsed {
                Ok(Some(parsed)) => parsed,
                Ok(None) => {
                    run_again = false;
                    continue;
                }
                Err(e) => {
                    warn!(
                        "Session {}: malformed data from {}: {}",
                        self.handle.session_id(),
                        self.handle.peer(),
                        e
                    );
                    break 'read_loop Err(e);
                }
            };
            buffer.advance(consumed);
            run_again = !buffer.is_empty();
            metrics::MESSAGES_FRAMED_TOTAL.inc();
            debug!(
                "Session {}: received {:?}",
                self.handle.session_id(),
                message
            );

            reap_finished(&mut tasks);

            if self.resolve_waiter(&message) && !self.settings.matched_also_dispatch {
                continue;
            }

            if message.is_handshake() {
                // Negotiation must finish before the next message is framed.
                self.dispatcher.dispatch(&self.handle, message).await;
                continue;
            }

            // The permit is taken inside the task so the read loop keeps framing, and
            // keeps resolving waiters, while every handler slot is busy.
            let slots = permits.clone();
            let cancelled = running.clone();
            let dispatcher = self.dispatcher.clone();
            let handle = self.handle.clone();
            tasks.spawn(async move {
                let _permit = tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => return,
                    permit = slots.acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return,
                    },
                };
                let _in_flight = InFlightHandler::enter();
                dispatcher.dispatch(&handle, message).await;
            });
        };

        // Stop the write loop and release waiters before draining, since in-flight
        // handlers may be blocked on a waiter.
        self.handle.close();
        self.handle.pending().close();
        self.drain_handlers(&mut tasks).await;

        drop(guard);
        result
    }

    /// Hands the message body to a pending waiter. Returns true if one consumed it.
    fn resolve_waiter(&self, message: &Message) -> bool {
        let resolved = self
            .handle
            .pending()
            .resolve(&message.name, message.body.clone());
        if resolved {
            metrics::WAITERS_RESOLVED_TOTAL.inc();
            debug!(
                "Session {}: message '{}' consumed by a pending waiter.",
                self.handle.session_id(),
                message.name
            );
        }
        resolved
    }

    /// Gives in-flight handlers a grace period, then aborts the rest.
    async fn drain_handlers(&self, tasks: &mut JoinSet<()>) {
        if tasks.is_empty() {
            return;
        }
        let grace = Duration::from_millis(self.settings.handler_drain_timeout_ms);
        let drained = timeout(grace, async {
            while let Some(res) = tasks.join_next().await {
                log_join_error(res);
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                "Session {}: abandoning {} handlers still running after {:?}.",
                self.handle.session_id(),
                tasks.len(),
                grace
            );
            tasks.shutdown().await;
        }
    }
}

/// Drains the outbound queue onto the stream in order until the connection stops.
async fn write_loop<W>(mut writer: W, handle: ConnectionHandle)
where
    W: AsyncWrite + Unpin,
{
    let running = handle.running().clone();
    while let Some(packet) = handle.outbound().next(&running).await {
        debug!(
            "Session {}: sending {} bytes to {}.",
            handle.session_id(),
            packet.len(),
            handle.peer()
        );
        let result = tokio::select! {
            biased;
            _ = running.cancelled() => break,
            res = write_packet(&mut writer, &packet, handle.outbound().is_empty()) => res,
        };
        match result {
            Ok(()) => metrics::BYTES_SENT_TOTAL.inc_by(packet.len() as f64),
            Err(e) => {
                if is_normal_disconnect(&e) {
                    debug!("Connection to {} closed while sending: {}", handle.peer(), e);
                } else {
                    warn!("Send error for {}: {}", handle.peer(), e);
                }
                handle.close();
                break;
            }
        }
    }

    if let Err(e) = writer.shutdown().await {
        debug!(
            "Session {}: error shutting down writer: {}",
            handle.session_id(),
            e
        );
    }
}

async fn write_packet<W>(writer: &mut W, packet: &[u8], flush: bool) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(packet).await?;
    if flush {
        writer.flush().await?;
    }
    Ok(())
}

/// Counts a running handler in `HANDLERS_IN_FLIGHT` until it is dropped, which
/// also covers handlers aborted mid-flight.
struct InFlightHandler;

impl InFlightHandler {
    fn enter() -> Self {
        metrics::HANDLERS_IN_FLIGHT.inc();
        Self
    }
}

impl Drop for InFlightHandler {
    fn drop(&mut self) {
        metrics::HANDLERS_IN_FLIGHT.dec();
    }
}

/// Collects handlers that already finished so the task set does not grow unbounded.
fn reap_finished(tasks: &mut JoinSet<()>) {
    while let Some(res) = tasks.try_join_next() {
        log_join_error(res);
    }
}

fn log_join_error(res: Result<(), tokio::task::JoinError>) {
    if let Err(e) = res
        && e.is_panic()
    {
        error!("A dispatch task panicked: {e:?}");
    }
}

/// Helper function to check for non-critical disconnection errors.
fn is_normal_disconnect(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionAborted
    )
}
