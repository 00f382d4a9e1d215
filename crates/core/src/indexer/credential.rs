//! Credential encryption for indexer records.
//!
//! API keys are AES-256-GCM encrypted at rest with the process-wide vault
//! secret. The stored form is base64 over `nonce || ciphertext`.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use thiserror::Error;

const NONCE_SIZE: usize = 12;
const KEY_SIZE: usize = 32;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("failed to create cipher: {0}")]
    Cipher(String),
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed")]
    Decrypt,
    #[error("invalid encrypted payload: {0}")]
    InvalidPayload(String),
}

fn cipher(secret: &str) -> Result<Aes256Gcm, CredentialError> {
    // The secret is padded or truncated to the AES-256 key size.
    let mut key = [0u8; KEY_SIZE];
    let bytes = secret.as_bytes();
    let len = bytes.len().min(KEY_SIZE);
    key[..len].copy_from_slice(&bytes[..len]);

    Aes256Gcm::new_from_slice(&key).map_err(|e| CredentialError::Cipher(e.to_string()))
}

/// Encrypt a credential with the vault secret.
pub fn encrypt(secret: &str, plaintext: &str) -> Result<String, CredentialError> {
    let cipher = cipher(secret)?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|_| CredentialError::Encrypt)?;

    let mut payload = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    payload.extend_from_slice(&nonce_bytes);
    payload.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(payload))
}

/// Decrypt a credential with the vault secret.
pub fn decrypt(secret: &str, encrypted: &str) -> Result<String, CredentialError> {
    let cipher = cipher(secret)?;

    let payload = BASE64
        .decode(encrypted)
        .map_err(|e| CredentialError::InvalidPayload(e.to_string()))?;
    if payload.len() < NONCE_SIZE {
        return Err(CredentialError::InvalidPayload(
            "payload too short".to_string(),
        ));
    }

    let (nonce_bytes, ciphertext) = payload.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);

    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CredentialError::Decrypt)?;
    String::from_utf8(plaintext).map_err(|e| CredentialError::InvalidPayload(e.to_string()))
}
