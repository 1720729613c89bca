// src/core/codec.rs

//! The packet codec seam: turns a framed `Message` body into decoded arguments.
//!
//! `SchemaCodec` is the default implementation. It knows, per message name, the
//! ordered list of field kinds in the body and nothing about what they mean.

use crate::core::LodestoneError;
use crate::core::protocol::{HANDSHAKE, Message, wire};
use async_trait::async_trait;
use std::collections::HashMap;
use uuid::Uuid;

/// Protocol-level limits on variable-length fields.
const MAX_SERVER_ADDRESS_CHARS: usize = 255;
const MAX_PLAYER_NAME_CHARS: usize = 16;
const MAX_CHAT_CHARS: usize = 256;
const MAX_CRYPTO_ARRAY_LEN: usize = 256;

/// One decoded body field.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Bool(bool),
    Byte(u8),
    UShort(u16),
    Int(i32),
    Long(i64),
    VarInt(i32),
    String(String),
    Uuid(Uuid),
    ByteArray(Vec<u8>),
}

/// The wire type of a body field, with its length limit where one applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Bool,
    Byte,
    UShort,
    Int,
    Long,
    VarInt,
    String(usize),
    Uuid,
    ByteArray(usize),
}

/// The decoded arguments of one message, in body order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DecodedArgs {
    fields: Vec<Field>,
}

impl DecodedArgs {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<&Field, LodestoneError> {
        self.fields.get(index).ok_or_else(|| {
            LodestoneError::InvalidData(format!("missing argument at index {index}"))
        })
    }

    pub fn varint(&self, index: usize) -> Result<i32, LodestoneError> {
        match self.get(index)? {
            Field::VarInt(v) => Ok(*v),
            other => Err(wrong_type(index, "VarInt", other)),
        }
    }

    pub fn long(&self, index: usize) -> Result<i64, LodestoneError> {
        match self.get(index)? {
            Field::Long(v) => Ok(*v),
            other => Err(wrong_type(index, "Long", other)),
        }
    }

    pub fn ushort(&self, index: usize) -> Result<u16, LodestoneError> {
        match self.get(index)? {
            Field::UShort(v) => Ok(*v),
            other => Err(wrong_type(index, "UShort", other)),
        }
    }

    pub fn string(&self, index: usize) -> Result<&str, LodestoneError> {
        match self.get(index)? {
            Field::String(s) => Ok(s),
            other => Err(wrong_type(index, "String", other)),
        }
    }

    pub fn bytes(&self, index: usize) -> Result<&[u8], LodestoneError> {
        match self.get(index)? {
            Field::ByteArray(b) => Ok(b),
            other => Err(wrong_type(index, "ByteArray", other)),
        }
    }
}

fn wrong_type(index: usize, expected: &str, got: &Field) -> LodestoneError {
    LodestoneError::InvalidData(format!(
        "argument {index} is not a {expected}: {got:?}"
    ))
}

/// Decodes the body of a message.
#[async_trait]
pub trait PacketCodec: Send + Sync + 'static {
    /// Returns `Ok(None)` for messages this codec does not decode; those are not
    /// passed on to the event dispatcher.
    async fn decode(&self, message: &Message) -> Result<Option<DecodedArgs>, LodestoneError>;
}

/// A codec driven by a table of per-name field layouts.
#[derive(Debug, Clone, Default)]
pub struct SchemaCodec {
    schemas: HashMap<String, Vec<FieldKind>>,
}

impl SchemaCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Layouts for the serverbound messages named by `PacketNames::serverbound`.
    pub fn serverbound() -> Self {
        let mut codec = Self::new();
        codec
            .register(
                HANDSHAKE,
                &[
                    FieldKind::VarInt,
                    FieldKind::String(MAX_SERVER_ADDRESS_CHARS),
                    FieldKind::UShort,
                    FieldKind::VarInt,
                ],
            )
            .register("status_request", &[])
            .register("status_ping", &[FieldKind::Long])
            .register("login_start", &[FieldKind::String(MAX_PLAYER_NAME_CHARS)])
            .register(
                "login_encryption_response",
                &[
                    FieldKind::ByteArray(MAX_CRYPTO_ARRAY_LEN),
                    FieldKind::ByteArray(MAX_CRYPTO_ARRAY_LEN),
                ],
            )
            .register("teleport_confirm", &[FieldKind::VarInt])
            .register("chat_message", &[FieldKind::String(MAX_CHAT_CHARS)])
            .register("client_status", &[FieldKind::VarInt])
            .register("keep_alive", &[FieldKind::Long]);
        codec
    }

    pub fn register(&mut self, name: &str, layout: &[FieldKind]) -> &mut Self {
        self.schemas.insert(name.to_string(), layout.to_vec());
        self
    }

    pub fn layout(&self, name: &str) -> Option<&[FieldKind]> {
        self.schemas.get(name).map(Vec::as_slice)
    }
}

#[async_trait]
impl PacketCodec for SchemaCodec {
    async fn decode(&self, message: &Message) -> Result<Option<DecodedArgs>, LodestoneError> {
        match self.layout(&message.name) {
            Some(layout) => decode_body(layout, &message.body).map(Some),
            None => Ok(None),
        }
    }
}

/// Decodes `body` according to `layout`. The body must be consumed exactly.
pub fn decode_body(layout: &[FieldKind], body: &[u8]) -> Result<DecodedArgs, LodestoneError> {
    let mut src = body;
    let mut fields = Vec::with_capacity(layout.len());
    for (index, kind) in layout.iter().enumerate() {
        let field = decode_field(*kind, &mut src).map_err(|e| match e {
            // The frame is complete, so running out of bytes is a short body.
            LodestoneError::IncompleteData => LodestoneError::InvalidData(format!(
                "body ends inside field {index} ({kind:?})"
            )),
            other => other,
        })?;
        fields.push(field);
    }
    if !src.is_empty() {
        return Err(LodestoneError::InvalidData(format!(
            "{} trailing bytes after the last field",
            src.len()
        )));
    }
    Ok(DecodedArgs::new(fields))
}

fn decode_field(kind: FieldKind, src: &mut &[u8]) -> Result<Field, LodestoneError> {
    Ok(match kind {
        FieldKind::Bool => Field::Bool(wire::read_bool(src)?),
        FieldKind::Byte => Field::Byte(wire::read_u8(src)?),
        FieldKind::UShort => Field::UShort(wire::read_u16(src)?),
        FieldKind::Int => Field::Int(wire::read_i32(src)?),
        FieldKind::Long => Field::Long(wire::read_i64(src)?),
        FieldKind::VarInt => Field::VarInt(wire::read_varint(src)?),
        FieldKind::String(max) => Field::String(wire::read_string(src, max)?),
        FieldKind::Uuid => Field::Uuid(Uuid::from_u128(wire::read_u128(src)?)),
        FieldKind::ByteArray(max) => Field::ByteArray(wire::read_byte_array(src, max)?),
    })
}
