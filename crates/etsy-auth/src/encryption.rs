//! AES-256-GCM encryption for credential values
//!
//! Each stored value is encrypted individually with a fresh random nonce.
//! The stored form is a single base64 string of `nonce || ciphertext`, so
//! the credential document stays a flat string→string JSON map. The master
//! key lives in a separate owner-only key file managed by the store.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngExt;

use crate::error::{Error, Result};

/// Key size in bytes (AES-256)
pub const KEY_SIZE: usize = 32;

/// Nonce size in bytes (96 bits, standard for GCM)
const NONCE_SIZE: usize = 12;

/// Generate a fresh random master key.
pub fn generate_key() -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    rand::rng().fill(&mut key);
    key
}

/// Encrypt a plaintext value under the master key.
///
/// Returns base64(`nonce || ciphertext`). The nonce is random per call, so
/// encrypting the same plaintext twice yields different outputs.
pub fn encrypt(plaintext: &str, key: &[u8]) -> Result<String> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| Error::Crypto(format!("invalid key length: {e}")))?;

    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|e| Error::Crypto(format!("encryption failed: {e}")))?;

    let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(blob))
}

/// Decrypt a value produced by [`encrypt`].
///
/// Fails on wrong key, truncated input, or tampering (GCM authenticates
/// the ciphertext).
pub fn decrypt(encoded: &str, key: &[u8]) -> Result<String> {
    let blob = BASE64
        .decode(encoded)
        .map_err(|e| Error::Crypto(format!("invalid ciphertext encoding: {e}")))?;

    if blob.len() <= NONCE_SIZE {
        return Err(Error::Crypto("ciphertext too short".into()));
    }

    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| Error::Crypto(format!("invalid key length: {e}")))?;

    let (nonce_bytes, ciphertext) = blob.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);
    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| Error::Crypto("decryption failed (wrong key or corrupted data)".into()))?;

    String::from_utf8(plaintext)
        .map_err(|e| Error::Crypto(format!("decrypted value is not UTF-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_matches_plaintext() {
        let key = generate_key();
        let plaintext = "my-secret-access-token-12345";

        let encrypted = encrypt(plaintext, &key).unwrap();
        assert_ne!(encrypted, plaintext);

        let decrypted = decrypt(&encrypted, &key).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn same_plaintext_encrypts_differently() {
        let key = generate_key();
        let a = encrypt("same-value", &key).unwrap();
        let b = encrypt("same-value", &key).unwrap();
        // Random nonces mean distinct ciphertexts
        assert_ne!(a, b);
        assert_eq!(decrypt(&a, &key).unwrap(), "same-value");
        assert_eq!(decrypt(&b, &key).unwrap(), "same-value");
    }

    #[test]
    fn wrong_key_fails() {
        let key = generate_key();
        let other = generate_key();
        let encrypted = encrypt("secret", &key).unwrap();
        assert!(decrypt(&encrypted, &other).is_err());
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = generate_key();
        let encrypted = encrypt("secret", &key).unwrap();

        let mut blob = BASE64.decode(&encrypted).unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        let tampered = BASE64.encode(blob);

        assert!(decrypt(&tampered, &key).is_err());
    }

    #[test]
    fn truncated_input_fails() {
        let key = generate_key();
        assert!(decrypt("", &key).is_err());
        assert!(decrypt(&BASE64.encode([0u8; 4]), &key).is_err());
        assert!(decrypt("not base64 at all!!!", &key).is_err());
    }
}
