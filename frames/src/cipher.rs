//! Symmetric cipher strategies behind the [`Cipher`] trait.
//!
//! DESIGN
//! ======
//! - `CbcStatic`: AES-256-CBC with a fixed IV derived from configuration.
//!   Byte-compatible with the existing Python client.
//! - `CbcRandomIv`: AES-256-CBC with a fresh IV per message, sent as the
//!   first 16 bytes of the ciphertext.
//! - `ChaChaPoly`: ChaCha20-Poly1305 AEAD with a fresh 12-byte nonce sent as
//!   the first bytes of the ciphertext.
//!
//! Key derivation is shared: key = SHA-256(secret key), static IV =
//! MD5(secret IV).

use std::str::FromStr;

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use md5::Md5;
use sha2::{Digest, Sha256};

use crate::CodecError;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;
const NONCE_LEN: usize = 12;

/// One symmetric encryption scheme. Implementations own their key material
/// and any per-message IV handling.
pub trait Cipher: Send + Sync {
    /// Stable strategy name, matching the `CIPHER_MODE` value.
    fn name(&self) -> &'static str;

    /// Encrypt a payload. The output is everything the peer needs to decrypt
    /// it besides the shared key.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encrypt`] if the scheme rejects the payload.
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CodecError>;

    /// Reverse [`Cipher::encrypt`].
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decrypt`] on padding or authentication failure
    /// and [`CodecError::Truncated`] if an embedded IV/nonce is missing.
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CodecError>;
}

// =============================================================================
// MODE + KEYS
// =============================================================================

/// Cipher strategy selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CipherMode {
    #[default]
    CbcStatic,
    CbcRandomIv,
    ChaCha20Poly1305,
}

impl CipherMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CbcStatic => "cbc-static",
            Self::CbcRandomIv => "cbc-random-iv",
            Self::ChaCha20Poly1305 => "chacha20poly1305",
        }
    }
}

impl FromStr for CipherMode {
    type Err = CodecError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "cbc-static" | "cbc" => Ok(Self::CbcStatic),
            "cbc-random-iv" => Ok(Self::CbcRandomIv),
            "chacha20poly1305" | "aead" => Ok(Self::ChaCha20Poly1305),
            other => Err(CodecError::UnknownMode(other.to_owned())),
        }
    }
}

/// Key and static IV derived from passphrases.
#[derive(Clone)]
pub struct KeyMaterial {
    key: [u8; KEY_LEN],
    iv: [u8; IV_LEN],
}

impl KeyMaterial {
    /// Derive key = SHA-256(`secret_key`) and iv = MD5(`secret_iv`).
    #[must_use]
    pub fn derive(secret_key: &str, secret_iv: &str) -> Self {
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&Sha256::digest(secret_key.as_bytes()));
        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(&Md5::digest(secret_iv.as_bytes()));
        Self { key, iv }
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyMaterial(<redacted>)")
    }
}

// =============================================================================
// AES-256-CBC
// =============================================================================

fn cbc_encrypt(key: &[u8; KEY_LEN], iv: &[u8; IV_LEN], plaintext: &[u8]) -> Vec<u8> {
    Aes256CbcEnc::new(&(*key).into(), &(*iv).into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

fn cbc_decrypt(key: &[u8; KEY_LEN], iv: &[u8; IV_LEN], ciphertext: &[u8]) -> Result<Vec<u8>, CodecError> {
    Aes256CbcDec::new(&(*key).into(), &(*iv).into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CodecError::Decrypt)
}

/// AES-256-CBC with one IV for every message.
pub struct CbcStatic {
    key: [u8; KEY_LEN],
    iv: [u8; IV_LEN],
}

impl CbcStatic {
    #[must_use]
    pub fn new(keys: &KeyMaterial) -> Self {
        Self { key: keys.key, iv: keys.iv }
    }
}

impl Cipher for CbcStatic {
    fn name(&self) -> &'static str {
        CipherMode::CbcStatic.as_str()
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(cbc_encrypt(&self.key, &self.iv, plaintext))
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CodecError> {
        cbc_decrypt(&self.key, &self.iv, ciphertext)
    }
}

/// AES-256-CBC with a random IV prefixed to each ciphertext.
pub struct CbcRandomIv {
    key: [u8; KEY_LEN],
}

impl CbcRandomIv {
    #[must_use]
    pub fn new(keys: &KeyMaterial) -> Self {
        Self { key: keys.key }
    }
}

impl Cipher for CbcRandomIv {
    fn name(&self) -> &'static str {
        CipherMode::CbcRandomIv.as_str()
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CodecError> {
        let iv: [u8; IV_LEN] = rand::random();
        let body = cbc_encrypt(&self.key, &iv, plaintext);
        let mut out = Vec::with_capacity(IV_LEN + body.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&body);
        Ok(out)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CodecError> {
        // IV plus at least one padded block.
        let min = IV_LEN * 2;
        if ciphertext.len() < min {
            return Err(CodecError::Truncated { len: ciphertext.len(), min });
        }
        let (iv, body) = ciphertext.split_at(IV_LEN);
        let mut iv_arr = [0u8; IV_LEN];
        iv_arr.copy_from_slice(iv);
        cbc_decrypt(&self.key, &iv_arr, body)
    }
}

// =============================================================================
// CHACHA20-POLY1305
// =============================================================================

/// ChaCha20-Poly1305 with a random nonce prefixed to each ciphertext.
pub struct ChaChaPoly {
    aead: ChaCha20Poly1305,
}

impl ChaChaPoly {
    #[must_use]
    pub fn new(keys: &KeyMaterial) -> Self {
        Self { aead: ChaCha20Poly1305::new(Key::from_slice(&keys.key)) }
    }
}

impl Cipher for ChaChaPoly {
    fn name(&self) -> &'static str {
        CipherMode::ChaCha20Poly1305.as_str()
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CodecError> {
        let nonce: [u8; NONCE_LEN] = rand::random();
        let body = self
            .aead
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CodecError::Encrypt)?;
        let mut out = Vec::with_capacity(NONCE_LEN + body.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&body);
        Ok(out)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CodecError> {
        // Nonce plus the 16-byte Poly1305 tag.
        let min = NONCE_LEN + 16;
        if ciphertext.len() < min {
            return Err(CodecError::Truncated { len: ciphertext.len(), min });
        }
        let (nonce, body) = ciphertext.split_at(NONCE_LEN);
        self.aead
            .decrypt(Nonce::from_slice(nonce), body)
            .map_err(|_| CodecError::Decrypt)
    }
}

#[cfg(test)]
#[path = "cipher_test.rs"]
mod tests;
