//! Password-derived authenticated encryption envelope.
//!
//! Binds agent and server with a shared password: PBKDF2-HMAC-SHA256 key
//! derivation, then a Fernet-compatible token (AES-128-CBC + HMAC-SHA256,
//! version byte, timestamp, IV, ciphertext, tag). Tokens are URL-safe
//! base64; the wire format applies a second URL-safe base64 layer on top
//! of the token, matching the agent protocol.
//!
//! Decryption either returns the exact original payload or fails with a
//! `DecryptionError` — a tag mismatch is the only way a wrong key is ever
//! detected, so corrupted data is never silently returned.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use serde_json::Value;
use sha2::Sha256;
use thiserror::Error;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type HmacSha256 = Hmac<Sha256>;

/// PBKDF2 iteration count shared by agent and server.
pub const KDF_ITERATIONS: u32 = 100_000;

/// Fernet token version byte.
const TOKEN_VERSION: u8 = 0x80;

/// version(1) + timestamp(8) + iv(16) + tag(32); ciphertext is at least
/// one block on top of this.
const MIN_TOKEN_LEN: usize = 1 + 8 + 16 + 32;

/// Decryption failure: wrong key, corrupted transport, or non-envelope
/// input. The cause is deliberately coarse — callers only need to know
/// the payload cannot be trusted.
#[derive(Debug, Error)]
pub enum DecryptionError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("malformed token: {0}")]
    Malformed(&'static str),
    #[error("integrity check failed")]
    Integrity,
    #[error("invalid payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Derive a 32-byte key from a password and salt.
///
/// The salt is accepted either as URL-safe base64 (the agent persists it
/// that way) or as a raw convention string whose bytes are used directly.
pub fn derive_key(password: &str, salt: &str) -> [u8; 32] {
    let salt_bytes = general_purpose::URL_SAFE
        .decode(salt)
        .or_else(|_| general_purpose::URL_SAFE_NO_PAD.decode(salt.trim_end_matches('=')))
        .unwrap_or_else(|_| salt.as_bytes().to_vec());

    let mut key = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt_bytes, KDF_ITERATIONS, &mut key);
    key
}

/// Generate a fresh random salt, URL-safe base64 encoded for persistence.
pub fn generate_salt() -> String {
    let mut salt = [0u8; 16];
    OsRng.fill_bytes(&mut salt);
    general_purpose::URL_SAFE.encode(salt)
}

/// Authenticated envelope bound to one (password, salt) pair.
#[derive(Clone)]
pub struct Envelope {
    signing_key: [u8; 16],
    encryption_key: [u8; 16],
}

impl Envelope {
    pub fn new(password: &str, salt: &str) -> Self {
        let key = derive_key(password, salt);
        let mut signing_key = [0u8; 16];
        let mut encryption_key = [0u8; 16];
        signing_key.copy_from_slice(&key[..16]);
        encryption_key.copy_from_slice(&key[16..]);
        Self {
            signing_key,
            encryption_key,
        }
    }

    /// Encrypt a JSON payload into a wire token.
    pub fn encrypt(&self, payload: &Value) -> String {
        let plaintext = payload.to_string().into_bytes();

        let mut iv = [0u8; 16];
        OsRng.fill_bytes(&mut iv);

        let timestamp = Utc::now().timestamp().max(0) as u64;

        let ciphertext = Aes128CbcEnc::new(&self.encryption_key.into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(&plaintext);

        let mut token = Vec::with_capacity(MIN_TOKEN_LEN + ciphertext.len());
        token.push(TOKEN_VERSION);
        token.extend_from_slice(&timestamp.to_be_bytes());
        token.extend_from_slice(&iv);
        token.extend_from_slice(&ciphertext);

        let mut mac =
            HmacSha256::new_from_slice(&self.signing_key).expect("HMAC accepts any key length");
        mac.update(&token);
        token.extend_from_slice(&mac.finalize().into_bytes());

        // Token is base64, then the wire wraps it in base64 once more.
        let fernet_token = general_purpose::URL_SAFE.encode(&token);
        general_purpose::URL_SAFE.encode(fernet_token.as_bytes())
    }

    /// Decrypt a wire token back into the original JSON payload.
    pub fn decrypt(&self, wire_token: &str) -> Result<Value, DecryptionError> {
        let outer = decode_urlsafe(wire_token)?;
        let fernet_token = std::str::from_utf8(&outer)
            .map_err(|_| DecryptionError::Malformed("token is not valid UTF-8"))?;
        let raw = decode_urlsafe(fernet_token)?;

        if raw.len() < MIN_TOKEN_LEN {
            return Err(DecryptionError::Malformed("token too short"));
        }
        if raw[0] != TOKEN_VERSION {
            return Err(DecryptionError::Malformed("unsupported token version"));
        }

        let (body, tag) = raw.split_at(raw.len() - 32);

        let mut mac =
            HmacSha256::new_from_slice(&self.signing_key).expect("HMAC accepts any key length");
        mac.update(body);
        mac.verify_slice(tag)
            .map_err(|_| DecryptionError::Integrity)?;

        let iv = &body[9..25];
        let ciphertext = &body[25..];

        let plaintext = Aes128CbcDec::new_from_slices(&self.encryption_key, iv)
            .map_err(|_| DecryptionError::Malformed("bad IV length"))?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| DecryptionError::Integrity)?;

        Ok(serde_json::from_slice(&plaintext)?)
    }
}

fn decode_urlsafe(data: &str) -> Result<Vec<u8>, DecryptionError> {
    general_purpose::URL_SAFE
        .decode(data)
        .or_else(|_| general_purpose::URL_SAFE_NO_PAD.decode(data.trim_end_matches('=')))
        .map_err(DecryptionError::Base64)
}
