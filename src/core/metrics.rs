// src/core/metrics.rs

//! Defines and registers Prometheus metrics for server monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, TextEncoder, register_counter, register_counter_vec,
    register_gauge,
};

lazy_static! {
    // --- Server-wide Gauges ---
    /// The number of clients currently connected to the server.
    pub static ref CONNECTED_CLIENTS: Gauge =
        register_gauge!("lodestone_connected_clients", "Number of currently connected clients.").unwrap();
    /// The number of players in the player registry.
    pub static ref PLAYERS_ONLINE: Gauge =
        register_gauge!("lodestone_players_online", "Number of logged-in players.").unwrap();
    /// The number of dispatch tasks currently running across all connections.
    pub static ref HANDLERS_IN_FLIGHT: Gauge =
        register_gauge!("lodestone_handlers_in_flight", "Number of message handlers currently running.").unwrap();

    // --- Server-wide Counters ---
    /// The total number of connections accepted by the server since startup.
    pub static ref CONNECTIONS_RECEIVED_TOTAL: Counter =
        register_counter!("lodestone_connections_received_total", "Total number of connections received.").unwrap();
    /// The total number of messages produced by the framer.
    pub static ref MESSAGES_FRAMED_TOTAL: Counter =
        register_counter!("lodestone_messages_framed_total", "Total number of inbound messages framed.").unwrap();
    /// The total number of messages that reached a pending waiter.
    pub static ref WAITERS_RESOLVED_TOTAL: Counter =
        register_counter!("lodestone_waiters_resolved_total", "Total number of pending waiters resolved by a message.").unwrap();
    /// The total number of messages handed to the dispatcher, labeled by message name.
    pub static ref MESSAGES_DISPATCHED_TOTAL: CounterVec =
        register_counter_vec!("lodestone_messages_dispatched_total", "Total number of messages dispatched, labeled by name.", &["name"]).unwrap();
    /// The total number of handler failures, labeled by kind (`error` or `panic`).
    pub static ref HANDLER_FAILURES_TOTAL: CounterVec =
        register_counter_vec!("lodestone_handler_failures_total", "Total number of contained handler failures.", &["kind"]).unwrap();
    /// The total number of bytes read from clients, before decryption.
    pub static ref BYTES_RECEIVED_TOTAL: Counter =
        register_counter!("lodestone_bytes_received_total", "Total number of bytes received from clients.").unwrap();
    /// The total number of bytes written to clients.
    pub static ref BYTES_SENT_TOTAL: Counter =
        register_counter!("lodestone_bytes_sent_total", "Total number of bytes sent to clients.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap_or_default()
}
