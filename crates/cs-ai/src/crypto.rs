//! AES-256-GCM credential decryption (§4.2).
//!
//! `cs-ai` is the only component that ever sees a plaintext provider API key.
//! Ciphertext is stored `base64(nonce || ciphertext)`; the key comes from
//! deployment config/env, never from the database.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use cs_core::{CsError, Result};

const NONCE_LEN: usize = 12;

#[derive(Clone)]
pub struct EncryptionKey(Key<Aes256Gcm>);

impl EncryptionKey {
    /// `raw` must be exactly 32 bytes (the deployment's `encryptionKey`
    /// config/env value, already decoded from its on-disk representation).
    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        if raw.len() != 32 {
            return Err(CsError::Internal("encryption key must be 32 bytes".to_string()));
        }
        Ok(Self(*Key::<Aes256Gcm>::from_slice(raw)))
    }

    pub fn decrypt_credential(&self, ciphertext_b64: &str) -> Result<String> {
        let raw = BASE64
            .decode(ciphertext_b64)
            .map_err(|e| CsError::Internal(format!("credential is not valid base64: {e}")))?;
        if raw.len() < NONCE_LEN {
            return Err(CsError::Internal("credential ciphertext too short".to_string()));
        }
        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new(&self.0);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CsError::Internal("credential decryption failed".to_string()))?;
        String::from_utf8(plaintext)
            .map_err(|e| CsError::Internal(format!("decrypted credential is not utf8: {e}")))
    }

    /// Used by admin-facing "rotate AI credential" flows and by tests; not on
    /// the adapter's hot path (§4.2 only names decryption as a runtime need).
    pub fn encrypt_credential(&self, plaintext: &str) -> Result<String> {
        use aes_gcm::aead::OsRng;
        use rand::RngCore;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let cipher = Aes256Gcm::new(&self.0);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|_| CsError::Internal("credential encryption failed".to_string()))?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_credential() {
        let key = EncryptionKey::from_bytes(&[7u8; 32]).expect("valid key");
        let ciphertext = key.encrypt_credential("sk-test-12345").expect("encrypt");
        let plaintext = key.decrypt_credential(&ciphertext).expect("decrypt");
        assert_eq!(plaintext, "sk-test-12345");
    }

    #[test]
    fn rejects_short_key() {
        assert!(EncryptionKey::from_bytes(&[1u8; 16]).is_err());
    }

    #[test]
    fn rejects_tampered_ciphertext() {
        let key = EncryptionKey::from_bytes(&[7u8; 32]).expect("valid key");
        let mut ciphertext = key.encrypt_credential("sk-test").expect("encrypt");
        ciphertext.pop();
        ciphertext.push('Q');
        assert!(key.decrypt_credential(&ciphertext).is_err());
    }
}
