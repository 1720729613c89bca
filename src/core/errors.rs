// src/core/errors.rs

//! Defines the primary error type for the connection engine.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all failures a connection can observe.
/// Using `thiserror` allows for clean error definitions and automatic `From` trait implementations.
#[derive(Error, Debug, Clone)]
pub enum LodestoneError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    /// The buffer ended before a complete value could be read.
    /// The framer maps this to "need more bytes"; it never reaches the connection.
    #[error("Incomplete data in stream")]
    IncompleteData,

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Frame of {len} bytes exceeds the limit of {max} bytes")]
    FrameTooLarge { len: usize, max: usize },

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Handler failed: {0}")]
    Handler(String),

    #[error("Connection closed")]
    Closed,

    #[error("Internal Error: {0}")]
    Internal(String),
}

impl PartialEq for LodestoneError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (LodestoneError::Io(e1), LodestoneError::Io(e2)) => e1.kind() == e2.kind(),
            (LodestoneError::MalformedFrame(s1), LodestoneError::MalformedFrame(s2)) => s1 == s2,
            (
                LodestoneError::FrameTooLarge { len: l1, max: m1 },
                LodestoneError::FrameTooLarge { len: l2, max: m2 },
            ) => l1 == l2 && m1 == m2,
            (LodestoneError::InvalidData(s1), LodestoneError::InvalidData(s2)) => s1 == s2,
            (LodestoneError::Handler(s1), LodestoneError::Handler(s2)) => s1 == s2,
            (LodestoneError::Internal(s1), LodestoneError::Internal(s2)) => s1 == s2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for LodestoneError {
    fn from(e: std::io::Error) -> Self {
        LodestoneError::Io(Arc::new(e))
    }
}

impl From<std::string::FromUtf8Error> for LodestoneError {
    fn from(e: std::string::FromUtf8Error) -> Self {
        LodestoneError::InvalidData(format!("string is not valid UTF-8: {e}"))
    }
}

impl From<serde_json::Error> for LodestoneError {
    fn from(e: serde_json::Error) -> Self {
        LodestoneError::Internal(format!("JSON serialization failed: {e}"))
    }
}

impl From<anyhow::Error> for LodestoneError {
    fn from(e: anyhow::Error) -> Self {
        LodestoneError::Handler(format!("{e:#}"))
    }
}
