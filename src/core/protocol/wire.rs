// src/core/protocol/wire.rs

//! Primitive wire types shared by the framer and the packet codec: VarInts,
//! length-prefixed strings and fixed-width big-endian integers.

use crate::core::LodestoneError;
use bytes::{Buf, BufMut, BytesMut};

/// A VarInt never occupies more than five bytes on the wire.
pub const MAX_VARINT_LEN: usize = 5;

/// Reads a VarInt from the front of `src`, advancing it past the consumed bytes.
///
/// Returns `IncompleteData` if `src` ends in the middle of the value, and
/// `MalformedFrame` if the continuation bit is still set after five bytes.
pub fn read_varint(src: &mut &[u8]) -> Result<i32, LodestoneError> {
    let mut value: u32 = 0;
    for i in 0..MAX_VARINT_LEN {
        if !src.has_remaining() {
            return Err(LodestoneError::IncompleteData);
        }
        let byte = src.get_u8();
        value |= u32::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(value as i32);
        }
    }
    Err(LodestoneError::MalformedFrame(
        "VarInt is longer than 5 bytes".into(),
    ))
}

/// Appends `value` to `dst` in VarInt encoding.
pub fn write_varint(dst: &mut BytesMut, value: i32) {
    let mut v = value as u32;
    loop {
        if v & !0x7F == 0 {
            dst.put_u8(v as u8);
            return;
        }
        dst.put_u8(((v & 0x7F) | 0x80) as u8);
        v >>= 7;
    }
}

/// The number of bytes `value` occupies in VarInt encoding.
pub fn varint_len(value: i32) -> usize {
    let v = value as u32;
    match v {
        0..=0x7F => 1,
        0x80..=0x3FFF => 2,
        0x4000..=0x1F_FFFF => 3,
        0x20_0000..=0x0FFF_FFFF => 4,
        _ => 5,
    }
}

/// Reads a VarInt-length-prefixed UTF-8 string of at most `max_chars` characters.
pub fn read_string(src: &mut &[u8], max_chars: usize) -> Result<String, LodestoneError> {
    let len = read_varint(src)?;
    if len < 0 {
        return Err(LodestoneError::InvalidData(format!(
            "negative string length {len}"
        )));
    }
    let len = len as usize;
    // A character is at most four bytes of UTF-8.
    if len > max_chars.saturating_mul(4) {
        return Err(LodestoneError::InvalidData(format!(
            "string of {len} bytes exceeds the {max_chars} character limit"
        )));
    }
    if src.remaining() < len {
        return Err(LodestoneError::IncompleteData);
    }
    let s = String::from_utf8(src[..len].to_vec())?;
    src.advance(len);
    if s.chars().count() > max_chars {
        return Err(LodestoneError::InvalidData(format!(
            "string exceeds the {max_chars} character limit"
        )));
    }
    Ok(s)
}

/// Appends a VarInt-length-prefixed UTF-8 string.
pub fn write_string(dst: &mut BytesMut, s: &str) {
    write_varint(dst, s.len() as i32);
    dst.put_slice(s.as_bytes());
}

pub fn read_bool(src: &mut &[u8]) -> Result<bool, LodestoneError> {
    match read_u8(src)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(LodestoneError::InvalidData(format!(
            "invalid boolean byte {other:#04x}"
        ))),
    }
}

pub fn read_u8(src: &mut &[u8]) -> Result<u8, LodestoneError> {
    ensure_remaining(src, 1)?;
    Ok(src.get_u8())
}

pub fn read_u16(src: &mut &[u8]) -> Result<u16, LodestoneError> {
    ensure_remaining(src, 2)?;
    Ok(src.get_u16())
}

pub fn read_i32(src: &mut &[u8]) -> Result<i32, LodestoneError> {
    ensure_remaining(src, 4)?;
    Ok(src.get_i32())
}

pub fn read_i64(src: &mut &[u8]) -> Result<i64, LodestoneError> {
    ensure_remaining(src, 8)?;
    Ok(src.get_i64())
}

pub fn read_u128(src: &mut &[u8]) -> Result<u128, LodestoneError> {
    ensure_remaining(src, 16)?;
    Ok(src.get_u128())
}

/// Reads a VarInt-length-prefixed byte array of at most `max_len` bytes.
pub fn read_byte_array(src: &mut &[u8], max_len: usize) -> Result<Vec<u8>, LodestoneError> {
    let len = read_varint(src)?;
    if len < 0 || len as usize > max_len {
        return Err(LodestoneError::InvalidData(format!(
            "byte array length {len} outside 0..={max_len}"
        )));
    }
    let len = len as usize;
    ensure_remaining(src, len)?;
    let out = src[..len].to_vec();
    src.advance(len);
    Ok(out)
}

fn ensure_remaining(src: &[u8], needed: usize) -> Result<(), LodestoneError> {
    if src.remaining() < needed {
        Err(LodestoneError::IncompleteData)
    } else {
        Ok(())
    }
}
