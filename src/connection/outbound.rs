// src/connection/outbound.rs

//! The outbound queue: already-serialized packets waiting for the write loop.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// A multi-producer, single-consumer FIFO of outgoing byte buffers.
///
/// Producers push from any task; the write loop is the only consumer. When the queue
/// is empty the consumer suspends on a `Notify` instead of polling.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    queue: Mutex<VecDeque<Bytes>>,
    notify: Notify,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Default::default()
    }

    /// Appends `packet` to the tail of the queue and wakes the consumer.
    pub fn push(&self, packet: Bytes) {
        self.queue.lock().push_back(packet);
        // `notify_one` stores a permit if the consumer is not waiting yet.
        self.notify.notify_one();
    }

    pub fn pop(&self) -> Option<Bytes> {
        self.queue.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Waits for the next packet. Returns `None` once `running` is cancelled.
    pub async fn next(&self, running: &CancellationToken) -> Option<Bytes> {
        loop {
            if running.is_cancelled() {
                return None;
            }
            if let Some(packet) = self.pop() {
                return Some(packet);
            }
            tokio::select! {
                biased;
                _ = running.cancelled() => return None,
                _ = self.notify.notified() => {}
            }
        }
    }
}
