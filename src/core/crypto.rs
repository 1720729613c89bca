// src/core/crypto.rs

//! The cipher seam of a connection and the random artifacts generated for the
//! encryption handshake.

use rand::RngCore;

/// A stateful stream cipher. Both directions transform the buffer in place and
/// advance the cipher state, so calls must happen in stream order.
pub trait Cipher: Send + 'static {
    fn encrypt(&mut self, data: &mut [u8]);
    fn decrypt(&mut self, data: &mut [u8]);
}

/// The cipher in effect before a shared secret has been agreed: bytes pass through unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainCipher;

impl Cipher for PlainCipher {
    fn encrypt(&mut self, _data: &mut [u8]) {}
    fn decrypt(&mut self, _data: &mut [u8]) {}
}

/// Generates the server id sent in an encryption request: 20 lowercase hex characters.
pub fn make_server_id() -> String {
    let mut raw = [0u8; 10];
    rand::thread_rng().fill_bytes(&mut raw);
    hex::encode(raw)
}

/// Generates the 4-byte token the client must echo back encrypted.
pub fn make_verify_token() -> [u8; 4] {
    let mut token = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut token);
    token
}
