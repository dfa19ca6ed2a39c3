//! AES-256-GCM sealing for token material at rest.
//!
//! Every credential class uses the same format: a pre-derived 32-byte key and a
//! fresh 96-bit nonce per seal. The sealed value is a single printable string:
//!
//! ```text
//! v1:base64(nonce || ciphertext || tag)
//! ```
//!
//! The version prefix means `open` never has to guess the layout; anything
//! else is rejected as a decryption failure.

use crate::error::{Error, Result};
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, Context};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

/// Size of the encryption key in bytes (256 bits)
const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM)
const NONCE_SIZE: usize = 12;

/// Size of the GCM authentication tag in bytes
const TAG_SIZE: usize = 16;

/// Format marker for sealed values.
const FORMAT_PREFIX: &str = "v1:";

/// Validates that the master key is exactly 32 bytes when base64 decoded.
pub fn validate_key(key_base64: &str) -> anyhow::Result<Vec<u8>> {
    let key_bytes = BASE64
        .decode(key_base64.trim())
        .context("Failed to decode base64 encryption key")?;

    if key_bytes.len() != KEY_SIZE {
        return Err(anyhow!(
            "Encryption key must be {} bytes (256 bits), got {} bytes",
            KEY_SIZE,
            key_bytes.len()
        ));
    }

    Ok(key_bytes)
}

/// Seals plaintext under `key` with a random nonce.
pub fn seal(plaintext: &str, key: &[u8]) -> Result<String> {
    let cipher = cipher_for(key)?;

    // Fresh nonce per call, never reused
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|e| Error::Decryption(format!("encryption failed: {}", e)))?;

    let mut packed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    packed.extend_from_slice(&nonce);
    packed.extend_from_slice(&ciphertext);

    Ok(format!("{}{}", FORMAT_PREFIX, BASE64.encode(&packed)))
}

/// Opens a value produced by [`seal`]. Fails if the format is unknown, the
/// input is malformed, or the tag does not verify.
pub fn open(sealed: &str, key: &[u8]) -> Result<String> {
    let cipher = cipher_for(key)?;

    let encoded = sealed.strip_prefix(FORMAT_PREFIX).ok_or_else(|| {
        Error::Decryption("unrecognised ciphertext format (expected v1)".to_string())
    })?;

    let packed = BASE64
        .decode(encoded)
        .map_err(|e| Error::Decryption(format!("invalid base64: {}", e)))?;

    if packed.len() < NONCE_SIZE + TAG_SIZE {
        return Err(Error::Decryption(format!(
            "sealed value too short: {} bytes",
            packed.len()
        )));
    }

    let (nonce_bytes, ciphertext) = packed.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);

    let plaintext = cipher.decrypt(nonce, ciphertext).map_err(|_| {
        Error::Decryption("authentication failed (wrong key or corrupted data)".to_string())
    })?;

    String::from_utf8(plaintext)
        .map_err(|_| Error::Decryption("decrypted data is not valid UTF-8".to_string()))
}

fn cipher_for(key: &[u8]) -> Result<Aes256Gcm> {
    if key.len() != KEY_SIZE {
        return Err(Error::Config(format!(
            "Encryption key must be {} bytes",
            KEY_SIZE
        )));
    }
    Aes256Gcm::new_from_slice(key).map_err(|e| Error::Config(format!("Failed to create cipher: {}", e)))
}

/// Holds the master key and seals/opens token material with it.
///
/// The key lives in memory only; it is loaded from the environment at startup.
pub struct SecretBox {
    key: Vec<u8>,
}

impl SecretBox {
    /// Builds a box from a base64-encoded 32-byte key.
    pub fn from_base64(key_base64: &str) -> anyhow::Result<Self> {
        let key = validate_key(key_base64).context("Invalid encryption key")?;
        Ok(Self { key })
    }

    /// Mints a new random key, base64-encoded.
    pub fn generate_key() -> String {
        BASE64.encode(Aes256Gcm::generate_key(&mut OsRng))
    }

    pub fn seal(&self, plaintext: &str) -> Result<String> {
        seal(plaintext, &self.key)
    }

    pub fn open(&self, sealed: &str) -> Result<String> {
        open(sealed, &self.key)
    }
}

impl std::fmt::Debug for SecretBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretBox").finish_non_exhaustive()
    }
}
