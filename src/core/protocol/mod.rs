// src/core/protocol/mod.rs

pub mod framer;
pub mod message;
pub mod names;
pub mod state;
pub mod wire;

pub use framer::{
    DEFAULT_MAX_FRAME_LEN, Framer, RawFrame, RawFrameCodec, VarIntFramer, encode_packet,
};
pub use message::{HANDSHAKE, Message};
pub use names::{PacketNames, UNKNOWN_PACKET};
pub use state::{AtomicProtocolState, DEFAULT_PROTOCOL_VERSION, ProtocolState};
