// src/core/mod.rs

//! The central module containing the protocol plumbing and the collaborator seams
//! a connection is built from.

pub mod builtin;
pub mod codec;
pub mod crypto;
pub mod dispatch;
pub mod errors;
pub mod events;
pub mod metrics;
pub mod pending;
pub mod players;
pub mod protocol;

pub use errors::LodestoneError;
pub use protocol::Message;
