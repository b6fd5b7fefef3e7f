//! Symmetric encryption for fields marked `is_encrypted` (spec §4.10).
//!
//! Key material is derived from the externally supplied `cryptPassword` /
//! `cryptSalt` configuration properties via PBKDF2-HMAC-SHA256; the cipher
//! is AES-256-GCM. Ciphertext is stored as base64 text so it still fits the
//! `Text` column shape.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;

use crate::error::{PersistError, Result};

const NONCE_LEN: usize = 12;
const PBKDF2_ROUNDS: u32 = 100_000;

#[derive(Clone)]
pub struct CryptoKey {
    cipher: Aes256Gcm,
}

impl CryptoKey {
    pub fn derive(password: &str, salt: &str) -> Self {
        let mut key_bytes = [0u8; 32];
        pbkdf2_hmac::<Sha256>(password.as_bytes(), salt.as_bytes(), PBKDF2_ROUNDS, &mut key_bytes);
        let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// Encrypts `plaintext`, returning `base64(nonce || ciphertext)`.
    pub fn encrypt(&self, plaintext: &str) -> String {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .expect("AES-GCM encryption of bounded in-memory data cannot fail");
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        BASE64.encode(&out)
    }

    pub fn decrypt(&self, stored: &str) -> Result<String> {
        let raw = BASE64
            .decode(stored)
            .map_err(|e| PersistError::Persistence(format!("bad ciphertext encoding: {e}")))?;
        if raw.len() < NONCE_LEN {
            return Err(PersistError::Persistence("ciphertext too short".into()));
        }
        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| PersistError::Persistence("decryption failed".into()))?;
        String::from_utf8(plaintext)
            .map_err(|e| PersistError::Persistence(format!("decrypted value not utf8: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_round_trip() {
        let key = CryptoKey::derive("hunter2", "some-salt");
        let cipher = key.encrypt("ssn:123-45-6789");
        assert_ne!(cipher, "ssn:123-45-6789");
        let plain = key.decrypt(&cipher).unwrap();
        assert_eq!(plain, "ssn:123-45-6789");
    }

    #[test]
    fn different_keys_cannot_decrypt_each_other() {
        let key_a = CryptoKey::derive("pw-a", "salt");
        let key_b = CryptoKey::derive("pw-b", "salt");
        let cipher = key_a.encrypt("data");
        assert!(key_b.decrypt(&cipher).is_err());
    }

}
