// src/connection/handle.rs

//! Defines `ConnectionHandle`, the shareable view of a connection that handlers use
//! to send packets, wait for replies and advance the protocol state.

use super::outbound::OutboundQueue;
use crate::config::ConnectionConfig;
use crate::core::LodestoneError;
use crate::core::crypto::{Cipher, make_server_id, make_verify_token};
use crate::core::pending::{PendingRequests, PendingWait};
use crate::core::players::{Player, PlayerDirectory};
use crate::core::protocol::{AtomicProtocolState, ProtocolState, encode_packet};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// State shared between the read loop, the write loop and every dispatch task.
pub(crate) struct ConnectionShared {
    peer: String,
    session_id: u64,
    /// Cancelled to stop both loops.
    running: CancellationToken,
    protocol_state: AtomicProtocolState,
    protocol_version: AtomicI32,
    outbound: OutboundQueue,
    pending: PendingRequests,
    /// The read loop decrypts under this lock; producers encrypt and enqueue under it,
    /// so ciphertext order always matches queue order.
    cipher: Mutex<Box<dyn Cipher>>,
    server_id: String,
    verify_token: [u8; 4],
    identity: RwLock<Option<Uuid>>,
    display_name: RwLock<String>,
    players: Arc<dyn PlayerDirectory>,
}

/// A cheap, cloneable handle to one connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    shared: Arc<ConnectionShared>,
}

impl ConnectionHandle {
    pub(crate) fn new(
        peer: String,
        session_id: u64,
        running: CancellationToken,
        settings: &ConnectionConfig,
        cipher: Box<dyn Cipher>,
        players: Arc<dyn PlayerDirectory>,
    ) -> Self {
        Self {
            shared: Arc::new(ConnectionShared {
                peer,
                session_id,
                running,
                protocol_state: AtomicProtocolState::new(ProtocolState::Init),
                protocol_version: AtomicI32::new(settings.default_protocol_version),
                outbound: OutboundQueue::new(),
                pending: PendingRequests::new(),
                cipher: Mutex::new(cipher),
                server_id: make_server_id(),
                verify_token: make_verify_token(),
                identity: RwLock::new(None),
                display_name: RwLock::new(String::new()),
                players,
            }),
        }
    }

    /// The remote address, or another label for in-process streams.
    pub fn peer(&self) -> &str {
        &self.shared.peer
    }

    pub fn session_id(&self) -> u64 {
        self.shared.session_id
    }

    pub fn is_running(&self) -> bool {
        !self.shared.running.is_cancelled()
    }

    /// Initiates shutdown of both loops. Idempotent.
    pub fn close(&self) {
        if !self.shared.running.is_cancelled() {
            debug!("Session {}: close requested.", self.shared.session_id);
            self.shared.running.cancel();
        }
    }

    /// Resolves once the connection has been asked to stop.
    pub async fn closed(&self) {
        self.shared.running.cancelled().await
    }

    pub fn protocol_state(&self) -> ProtocolState {
        self.shared.protocol_state.load()
    }

    pub fn set_protocol_state(&self, state: ProtocolState) {
        let previous = self.protocol_state();
        self.shared.protocol_state.store(state);
        debug!(
            "Session {}: protocol state {} -> {}",
            self.shared.session_id, previous, state
        );
    }

    pub fn protocol_version(&self) -> i32 {
        self.shared.protocol_version.load(Ordering::Acquire)
    }

    pub fn set_protocol_version(&self, version: i32) {
        self.shared.protocol_version.store(version, Ordering::Release);
    }

    pub fn identity(&self) -> Option<Uuid> {
        *self.shared.identity.read()
    }

    pub fn set_identity(&self, uuid: Uuid) {
        *self.shared.identity.write() = Some(uuid);
    }

    pub fn display_name(&self) -> String {
        self.shared.display_name.read().clone()
    }

    pub fn set_display_name(&self, name: impl Into<String>) {
        *self.shared.display_name.write() = name.into();
    }

    pub fn server_id(&self) -> &str {
        &self.shared.server_id
    }

    pub fn verify_token(&self) -> [u8; 4] {
        self.shared.verify_token
    }

    /// The player this connection is logged in as, resolved through the directory.
    pub fn player(&self) -> Option<Arc<Player>> {
        self.identity()
            .and_then(|uuid| self.shared.players.lookup(&uuid))
    }

    pub fn players(&self) -> &Arc<dyn PlayerDirectory> {
        &self.shared.players
    }

    /// Replaces the stream cipher, typically once a shared secret has been agreed.
    /// Packets enqueued before this call stay encrypted with the old cipher.
    pub fn set_cipher(&self, cipher: Box<dyn Cipher>) {
        *self.shared.cipher.lock() = cipher;
    }

    /// Encrypts an already-serialized packet and appends it to the outbound queue.
    pub fn send_packet(&self, packet: Bytes) -> Result<(), LodestoneError> {
        if !self.is_running() {
            return Err(LodestoneError::Closed);
        }
        let mut data = packet.to_vec();
        let mut cipher = self.shared.cipher.lock();
        cipher.encrypt(&mut data);
        self.shared.outbound.push(Bytes::from(data));
        Ok(())
    }

    /// Frames `body` under `packet_id` and sends it.
    pub fn send(&self, packet_id: i32, body: &[u8]) -> Result<(), LodestoneError> {
        self.send_packet(encode_packet(packet_id, body)?)
    }

    /// Suspends until a message named `name` arrives on this connection and returns
    /// its body, or `None` if the connection shuts down first.
    pub async fn wait_for_packet(&self, name: &str) -> Option<Bytes> {
        self.shared.pending.wait_for(name).await
    }

    pub async fn wait_for_packet_timeout(&self, name: &str, timeout: Duration) -> Option<Bytes> {
        self.shared.pending.wait_for_timeout(name, timeout).await
    }

    /// Registers interest in `name` without waiting yet, so a request can be sent
    /// after registering without racing its reply.
    pub fn register_wait(&self, name: &str) -> PendingWait {
        self.shared.pending.register(name)
    }

    pub fn pending_waiters(&self) -> usize {
        self.shared.pending.len()
    }

    pub fn outbound_len(&self) -> usize {
        self.shared.outbound.len()
    }

    pub(crate) fn decrypt(&self, data: &mut [u8]) {
        self.shared.cipher.lock().decrypt(data);
    }

    pub(crate) fn pending(&self) -> &PendingRequests {
        &self.shared.pending
    }

    pub(crate) fn outbound(&self) -> &OutboundQueue {
        &self.shared.outbound
    }

    pub(crate) fn running(&self) -> &CancellationToken {
        &self.shared.running
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("peer", &self.shared.peer)
            .field("session_id", &self.shared.session_id)
            .field("running", &self.is_running())
            .field("state", &self.protocol_state())
            .field("outbound_queue", &self.outbound_len())
            .field("pending_waiters", &self.pending_waiters())
            .finish()
    }
}
