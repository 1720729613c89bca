// src/core/pending.rs

//! Lets tasks on a connection suspend until a message with a given name arrives.
//!
//! # Core Design: Single Resolution
//!
//! Each waiter owns the receiving half of a `oneshot` channel; the registry owns the
//! sending half (the waker) in a per-name FIFO queue. Whoever pops a waker out of the
//! queue is the only party that can ever resolve it: the read loop pops one to hand
//! over a message body, and the shutdown sweep pops all of them and drops them, which
//! resolves every receiver with "no result". A waker can therefore not be resolved twice,
//! and a waiter can not be left blocked once the registry is closed.

use bytes::Bytes;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::debug;

/// The waker hands the message body directly to the waiting task.
type Waker = oneshot::Sender<Bytes>;

#[derive(Debug)]
struct WaiterInfo {
    id: u64,
    waker: Waker,
}

/// The waker queues shared between the registry and outstanding `PendingWait`s.
#[derive(Debug, Default)]
struct WaiterTable {
    // Key: The message name being waited for.
    // Value: The wakers of tasks waiting for it, in registration order.
    waiters: DashMap<String, VecDeque<WaiterInfo>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl WaiterTable {
    /// Removes a specific waker from the queue for `name`.
    fn remove_waiter(&self, name: &str, id: u64) {
        if let Some(mut queue) = self.waiters.get_mut(name) {
            queue.retain(|info| info.id != id);
        }
        self.waiters.remove_if(name, |_, queue| queue.is_empty());
    }
}

/// The registry of tasks waiting for a named message on one connection.
#[derive(Debug, Default)]
pub struct PendingRequests {
    table: Arc<WaiterTable>,
}

/// A registered wait that has not been awaited yet.
///
/// Registering and awaiting are separate steps so a caller can register, then send
/// the request that provokes the reply, without racing the reply. Dropping it before
/// it resolves withdraws the waiter.
#[derive(Debug)]
pub struct PendingWait {
    id: u64,
    name: String,
    rx: oneshot::Receiver<Bytes>,
    table: Arc<WaiterTable>,
}

impl PendingWait {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Suspends until the waiter is resolved. Returns `None` if the connection shut
    /// down first.
    pub async fn wait(mut self) -> Option<Bytes> {
        (&mut self.rx).await.ok()
    }
}

impl Drop for PendingWait {
    fn drop(&mut self) {
        self.table.remove_waiter(&self.name, self.id);
    }
}

impl PendingRequests {
    pub fn new() -> Self {
        Default::default()
    }

    /// Registers a waiter for `name` and returns the handle to await it on.
    pub fn register(&self, name: &str) -> PendingWait {
        let (tx, rx) = oneshot::channel();
        let id = self.table.next_id.fetch_add(1, Ordering::Relaxed);

        self.table
            .waiters
            .entry(name.to_string())
            .or_default()
            .push_back(WaiterInfo { id, waker: tx });

        // The sweep sets `closed` before draining, so either it drained this waker or
        // we observe the flag here and drop the waker ourselves.
        if self.table.closed.load(Ordering::SeqCst) {
            self.table.remove_waiter(name, id);
        } else {
            debug!("Registered waiter {} for message '{}'.", id, name);
        }

        PendingWait {
            id,
            name: name.to_string(),
            rx,
            table: self.table.clone(),
        }
    }

    /// Registers a waiter and suspends until a message named `name` arrives. If the
    /// returned future is dropped first, the waiter is withdrawn.
    pub async fn wait_for(&self, name: &str) -> Option<Bytes> {
        self.register(name).wait().await
    }

    /// Like `wait_for`, but gives up after `wait_timeout`. A timed-out waiter is removed
    /// so it can not consume a later message.
    pub async fn wait_for_timeout(&self, name: &str, wait_timeout: Duration) -> Option<Bytes> {
        let mut wait = self.register(name);
        match timeout(wait_timeout, &mut wait.rx).await {
            Ok(result) => result.ok(),
            Err(_) => {
                self.table.remove_waiter(name, wait.id);
                // The read loop may have resolved us between the timeout and the removal.
                wait.rx.try_recv().ok()
            }
        }
    }

    /// Hands `payload` to the oldest live waiter for `name`.
    ///
    /// Returns `true` if a waiter consumed the payload. Waiters whose receiving side
    /// was dropped are discarded along the way.
    pub fn resolve(&self, name: &str, payload: Bytes) -> bool {
        let mut payload = payload;
        loop {
            let waiter = match self.table.waiters.get_mut(name) {
                Some(mut queue) => queue.pop_front(),
                None => return false,
            };

            let Some(info) = waiter else {
                self.table.waiters.remove_if(name, |_, queue| queue.is_empty());
                return false;
            };

            match info.waker.send(payload) {
                Ok(()) => {
                    debug!("Resolved waiter {} with message '{}'.", info.id, name);
                    self.table.waiters.remove_if(name, |_, queue| queue.is_empty());
                    return true;
                }
                // The waiting task went away; try the next one.
                Err(returned) => payload = returned,
            }
        }
    }

    /// Resolves every remaining waiter with no result and refuses new ones.
    /// Returns the number of waiters that were released.
    pub fn close(&self) -> usize {
        self.table.closed.store(true, Ordering::SeqCst);
        let mut released = 0;
        self.table.waiters.retain(|_, queue| {
            released += queue.len();
            // Dropping the wakers resolves the receivers.
            queue.clear();
            false
        });
        if released > 0 {
            debug!("Released {} pending waiters on shutdown.", released);
        }
        released
    }

    pub fn is_closed(&self) -> bool {
        self.table.closed.load(Ordering::SeqCst)
    }

    /// The number of registered, unresolved waiters.
    pub fn len(&self) -> usize {
        self.table.waiters.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
