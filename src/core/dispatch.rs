// src/core/dispatch.rs

//! The error boundary for message handling: decode with the codec, hand the result
//! to the event dispatcher, and contain every failure along the way.

use crate::connection::ConnectionHandle;
use crate::core::LodestoneError;
use crate::core::codec::PacketCodec;
use crate::core::events::EventDispatcher;
use crate::core::metrics;
use crate::core::protocol::Message;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error};

/// The outcome of dispatching one message.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// The codec decoded the message and the event dispatcher handled it.
    Handled,
    /// The codec declined the message; nothing further ran.
    Skipped,
    /// Decoding or handling returned an error, which was logged.
    Failed(LodestoneError),
    /// Decoding or handling panicked; the panic was caught and logged.
    Panicked(String),
}

/// Pairs a codec with an event dispatcher.
#[derive(Clone)]
pub struct Dispatcher {
    codec: Arc<dyn PacketCodec>,
    events: Arc<dyn EventDispatcher>,
}

impl Dispatcher {
    pub fn new(codec: Arc<dyn PacketCodec>, events: Arc<dyn EventDispatcher>) -> Self {
        Self { codec, events }
    }

    /// Runs the codec and the event dispatcher for `message`. Never fails: errors and
    /// panics are logged with the connection and message context and reported in the
    /// returned outcome.
    pub async fn dispatch(&self, conn: &ConnectionHandle, message: Message) -> DispatchOutcome {
        metrics::MESSAGES_DISPATCHED_TOTAL
            .with_label_values(&[message.name.as_str()])
            .inc();
        let result = AssertUnwindSafe(self.process(conn, &message))
            .catch_unwind()
            .await;

        match result {
            Ok(Ok(true)) => DispatchOutcome::Handled,
            Ok(Ok(false)) => DispatchOutcome::Skipped,
            Ok(Err(e)) => {
                metrics::HANDLER_FAILURES_TOTAL
                    .with_label_values(&["error"])
                    .inc();
                error!(
                    "Session {} ({}): handler for '{}' (id {:#04x}, {} body bytes) failed in state {}: {}",
                    conn.session_id(),
                    conn.peer(),
                    message.name,
                    message.packet_id,
                    message.body.len(),
                    conn.protocol_state(),
                    e
                );
                DispatchOutcome::Failed(e)
            }
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                metrics::HANDLER_FAILURES_TOTAL
                    .with_label_values(&["panic"])
                    .inc();
                error!(
                    "Session {} ({}): handler for '{}' (id {:#04x}) panicked: {}",
                    conn.session_id(),
                    conn.peer(),
                    message.name,
                    message.packet_id,
                    reason
                );
                DispatchOutcome::Panicked(reason)
            }
        }
    }

    /// Returns `Ok(false)` when the codec declined the message.
    async fn process(
        &self,
        conn: &ConnectionHandle,
        message: &Message,
    ) -> Result<bool, LodestoneError> {
        let Some(args) = self.codec.decode(message).await? else {
            debug!(
                "Session {}: codec skipped message '{}'.",
                conn.session_id(),
                message.name
            );
            return Ok(false);
        };
        self.events.handle(conn, message, args).await?;
        Ok(true)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
