// src/core/protocol/framer.rs

//! Implements length-prefixed framing: `VarInt(length) VarInt(packet_id) body`.
//!
//! The `Framer` trait is what the read loop consumes. `VarIntFramer` is the
//! default implementation; `RawFrameCodec` exposes the same wire format as a
//! `tokio_util::codec` pair for peers that only need ids and bodies.

use super::message::Message;
use super::names::PacketNames;
use super::state::ProtocolState;
use super::wire::{read_varint, varint_len, write_varint};
use crate::core::LodestoneError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// The largest frame length a three-byte VarInt can express.
pub const DEFAULT_MAX_FRAME_LEN: usize = 2_097_151;

/// Parses at most one message from an accumulation buffer.
pub trait Framer: Send + Sync + 'static {
    /// Returns `Ok(None)` when `src` does not yet hold a complete frame,
    /// `Ok(Some((message, consumed)))` on success, and `Err` when the bytes can
    /// never form a valid frame.
    fn try_parse_one(
        &self,
        src: &[u8],
        protocol_version: i32,
        state: ProtocolState,
    ) -> Result<Option<(Message, usize)>, LodestoneError>;
}

/// The default framer. Packet names come from a `PacketNames` table.
#[derive(Debug, Clone)]
pub struct VarIntFramer {
    names: PacketNames,
    max_frame_len: usize,
}

impl Default for VarIntFramer {
    fn default() -> Self {
        Self::new(PacketNames::serverbound(), DEFAULT_MAX_FRAME_LEN)
    }
}

impl VarIntFramer {
    pub fn new(names: PacketNames, max_frame_len: usize) -> Self {
        Self {
            names,
            max_frame_len,
        }
    }

    pub fn names(&self) -> &PacketNames {
        &self.names
    }
}

impl Framer for VarIntFramer {
    fn try_parse_one(
        &self,
        src: &[u8],
        protocol_version: i32,
        state: ProtocolState,
    ) -> Result<Option<(Message, usize)>, LodestoneError> {
        let mut bytes = src;
        match decode_raw(&mut bytes, self.max_frame_len) {
            Ok(frame) => {
                let consumed = src.len() - bytes.len();
                let name = self.names.lookup(protocol_version, state, frame.packet_id);
                Ok(Some((
                    Message::new(name, frame.packet_id, frame.body),
                    consumed,
                )))
            }
            // `IncompleteData` means "need more bytes"; everything else is fatal.
            Err(LodestoneError::IncompleteData) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// A frame reduced to its id and body, with no name resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub packet_id: i32,
    pub body: Bytes,
}

/// Reads one frame from the front of `src`, advancing it only on success.
fn decode_raw(src: &mut &[u8], max_frame_len: usize) -> Result<RawFrame, LodestoneError> {
    let mut cursor = *src;
    let len = read_varint(&mut cursor)?;
    if len <= 0 {
        return Err(LodestoneError::MalformedFrame(format!(
            "frame length must be positive, got {len}"
        )));
    }
    let len = len as usize;
    if len > max_frame_len {
        return Err(LodestoneError::FrameTooLarge {
            len,
            max: max_frame_len,
        });
    }
    if cursor.remaining() < len {
        return Err(LodestoneError::IncompleteData);
    }

    let mut frame = &cursor[..len];
    // The whole frame is present, so a short id is corruption rather than an underrun.
    let packet_id = read_varint(&mut frame).map_err(|e| match e {
        LodestoneError::IncompleteData => {
            LodestoneError::MalformedFrame("frame ends inside the packet id".into())
        }
        other => other,
    })?;
    let body = Bytes::copy_from_slice(frame);
    cursor.advance(len);
    *src = cursor;
    Ok(RawFrame { packet_id, body })
}

/// Serializes a packet into its framed wire form.
///
/// Fails with `FrameTooLarge` when the id and body exceed the largest length a
/// three-byte VarInt prefix can carry.
pub fn encode_packet(packet_id: i32, body: &[u8]) -> Result<Bytes, LodestoneError> {
    let inner_len = varint_len(packet_id) + body.len();
    if inner_len > DEFAULT_MAX_FRAME_LEN {
        return Err(LodestoneError::FrameTooLarge {
            len: inner_len,
            max: DEFAULT_MAX_FRAME_LEN,
        });
    }
    let mut dst = BytesMut::with_capacity(varint_len(inner_len as i32) + inner_len);
    write_varint(&mut dst, inner_len as i32);
    write_varint(&mut dst, packet_id);
    dst.put_slice(body);
    Ok(dst.freeze())
}

/// A `tokio_util::codec` implementation over the same framing, for peers that
/// only care about packet ids and bodies.
#[derive(Debug, Clone)]
pub struct RawFrameCodec {
    max_frame_len: usize,
}

impl Default for RawFrameCodec {
    fn default() -> Self {
        Self {
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl Decoder for RawFrameCodec {
    type Item = RawFrame;
    type Error = LodestoneError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        let mut bytes = &src[..];
        match decode_raw(&mut bytes, self.max_frame_len) {
            Ok(frame) => {
                let len = src.len() - bytes.len();
                src.advance(len);
                Ok(Some(frame))
            }
            Err(LodestoneError::IncompleteData) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl Encoder<RawFrame> for RawFrameCodec {
    type Error = LodestoneError;

    fn encode(&mut self, item: RawFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let inner_len = varint_len(item.packet_id) + item.body.len();
        if inner_len > self.max_frame_len {
            return Err(LodestoneError::FrameTooLarge {
                len: inner_len,
                max: self.max_frame_len,
            });
        }
        write_varint(dst, inner_len as i32);
        write_varint(dst, item.packet_id);
        dst.extend_from_slice(&item.body);
        Ok(())
    }
}
