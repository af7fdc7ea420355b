//! Line framing and pluggable encryption for the telemetry ingest wire.
//!
//! This crate owns the wire representation shared by the relay server and
//! the operator CLI. A frame is one line: `base64(cipher.encrypt(payload))`
//! followed by `\n`. Framing and encryption are separate concerns: the
//! [`FrameCodec`] does base64 + newline handling and delegates to a boxed
//! [`Cipher`] chosen once at construction, so callers never branch on the
//! algorithm in use.

mod cipher;

pub use cipher::{CbcRandomIv, CbcStatic, ChaChaPoly, Cipher, CipherMode, KeyMaterial};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Frame delimiter on the wire.
pub const DELIMITER: u8 = b'\n';

/// Error returned by [`FrameCodec::decode_frame`] and the cipher strategies.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The line is not valid base64.
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    /// Padding or authentication check failed after decryption.
    #[error("decryption failed")]
    Decrypt,
    /// The cipher refused to encrypt the payload.
    #[error("encryption failed")]
    Encrypt,
    /// The decoded bytes are too short to hold the embedded IV/nonce.
    #[error("ciphertext truncated: {len} bytes, need at least {min}")]
    Truncated { len: usize, min: usize },
    /// `CIPHER_MODE` named a strategy this crate does not provide.
    #[error("unknown cipher mode: {0}")]
    UnknownMode(String),
}

/// Encodes and decodes newline-delimited, base64-wrapped encrypted frames.
pub struct FrameCodec {
    cipher: Box<dyn Cipher>,
}

impl FrameCodec {
    pub fn new(cipher: impl Cipher + 'static) -> Self {
        Self { cipher: Box::new(cipher) }
    }

    /// Build the codec for a configured mode from derived key material.
    #[must_use]
    pub fn from_mode(mode: CipherMode, keys: &KeyMaterial) -> Self {
        match mode {
            CipherMode::CbcStatic => Self::new(CbcStatic::new(keys)),
            CipherMode::CbcRandomIv => Self::new(CbcRandomIv::new(keys)),
            CipherMode::ChaCha20Poly1305 => Self::new(ChaChaPoly::new(keys)),
        }
    }

    /// Name of the active cipher strategy, for startup logging.
    #[must_use]
    pub fn cipher_name(&self) -> &'static str {
        self.cipher.name()
    }

    /// Encrypt `plaintext` into one newline-terminated wire line.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encrypt`] only if the cipher rejects the payload
    /// (AEAD size limits); block-cipher strategies never fail.
    pub fn encode_frame(&self, plaintext: &[u8]) -> Result<Vec<u8>, CodecError> {
        let ciphertext = self.cipher.encrypt(plaintext)?;
        let mut line = STANDARD.encode(ciphertext).into_bytes();
        line.push(DELIMITER);
        Ok(line)
    }

    /// Decode one wire line (with or without its trailing newline).
    ///
    /// Surrounding ASCII whitespace, including `\r\n`, is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Base64`] for malformed text, and
    /// [`CodecError::Decrypt`] / [`CodecError::Truncated`] when the
    /// ciphertext does not authenticate or unpad under the configured key.
    pub fn decode_frame(&self, line: &[u8]) -> Result<Vec<u8>, CodecError> {
        let ciphertext = STANDARD.decode(line.trim_ascii())?;
        self.cipher.decrypt(&ciphertext)
    }
}

impl std::fmt::Debug for FrameCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameCodec")
            .field("cipher", &self.cipher.name())
            .finish()
    }
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
