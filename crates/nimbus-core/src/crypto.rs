// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Encryption of provider configs at rest and the API token scheme.
//!
//! Provider config blobs are sealed with XChaCha20-Poly1305 under a
//! process-wide 32-byte key; the ciphertext is prefixed with a fresh
//! 24-byte nonce. API tokens are random 32-byte values; the database stores
//! a per-token salt and the scrypt-derived hash, never the token itself.

use chacha20poly1305::aead::{Aead, KeyInit, OsRng};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use rand::RngCore;
use scrypt::Params;
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Nonce length prefixed to every sealed blob.
const NONCE_LEN: usize = 24;

/// scrypt cost parameters: N = 16384, r = 8, p = 1, 32-byte output.
const SCRYPT_LOG_N: u8 = 14;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;

/// Derived key and token hash length.
pub const KEY_LEN: usize = 32;

/// Salt length for newly minted tokens.
pub const SALT_LEN: usize = 16;

/// Errors from sealing, opening, or token derivation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CryptoError {
    /// Ciphertext is malformed or was produced under a different key.
    #[error("unable to decrypt: invalid ciphertext or wrong key")]
    Decrypt,

    /// Encryption failed.
    #[error("unable to encrypt")]
    Encrypt,

    /// Key derivation failed.
    #[error("key derivation failed: {0}")]
    Derive(String),
}

/// Authenticated encryption under a process-wide key.
#[derive(Clone)]
pub struct SecretBox {
    cipher: XChaCha20Poly1305,
}

impl SecretBox {
    /// Create a secret box from a 32-byte key.
    pub fn new(key: [u8; 32]) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(&key.into()),
        }
    }

    /// Encrypt `plaintext`, returning `nonce || ciphertext`.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = XNonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CryptoError::Encrypt)?;

        let mut out = nonce_bytes.to_vec();
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt a blob produced by [`SecretBox::seal`].
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < NONCE_LEN {
            return Err(CryptoError::Decrypt);
        }

        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let nonce = XNonce::from_slice(nonce_bytes);

        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CryptoError::Decrypt)
    }
}

/// Derive the 32-byte token hash from the raw token bytes and salt.
pub fn derive_token_hash(token: &[u8], salt: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let params = Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, KEY_LEN)
        .map_err(|e| CryptoError::Derive(e.to_string()))?;

    let mut out = vec![0u8; KEY_LEN];
    scrypt::scrypt(token, salt, &params, &mut out)
        .map_err(|e| CryptoError::Derive(e.to_string()))?;
    Ok(out)
}

/// Compare a freshly derived hash against the stored one without
/// short-circuiting.
pub fn hashes_match(derived: &[u8], stored: &[u8]) -> bool {
    derived.ct_eq(stored).into()
}

/// Mint a new API token.
///
/// Returns the hex-encoded token to hand to the caller, plus the salt and
/// hash to store. The plaintext token is not recoverable afterwards.
pub fn generate_token() -> Result<(String, Vec<u8>, Vec<u8>), CryptoError> {
    let mut token = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut token);

    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);

    let hash = derive_token_hash(&token, &salt)?;
    Ok((hex::encode(token), salt.to_vec(), hash))
}
