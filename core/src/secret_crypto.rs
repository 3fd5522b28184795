//! AEAD encryption of an agent's dispatch auth secret at rest
//! (AES-256-GCM), keyed by `Config::agent_token_encryption_key`. Mirrors
//! `audit_signer::SigningKey`'s shape: an `Unconfigured` variant lets a
//! deployment with no key run with agents that are never dispatched to
//! live (e.g. `DispatchMode::Mock`), since §4's invariant only requires
//! `auth_secret_ciphertext` when both a key is configured and the agent
//! is live-dispatched.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

const NONCE_LEN: usize = 12;

/// Identity hash stored as `Agent::auth_secret_hash`, independent of
/// whether an encryption key is configured to also keep a recoverable
/// ciphertext.
pub fn hash_secret(plaintext: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(plaintext.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Clone)]
pub enum SecretKey {
    Configured(Aes256Gcm),
    Unconfigured,
}

impl SecretKey {
    /// `key_hex` must decode to exactly 32 bytes (AES-256).
    pub fn from_hex(key_hex: &str) -> Result<Self> {
        let bytes = hex::decode(key_hex)
            .map_err(|err| Error::Internal(format!("invalid AGENT_TOKEN_ENCRYPTION_KEY: {err}")))?;
        if bytes.len() != 32 {
            return Err(Error::Internal(
                "AGENT_TOKEN_ENCRYPTION_KEY must decode to 32 bytes".into(),
            ));
        }
        let key = Key::<Aes256Gcm>::from_slice(&bytes);
        Ok(SecretKey::Configured(Aes256Gcm::new(key)))
    }

    pub fn unconfigured() -> Self {
        SecretKey::Unconfigured
    }

    pub fn is_configured(&self) -> bool {
        matches!(self, SecretKey::Configured(_))
    }

    /// Encrypts `plaintext`, returning `hex(nonce || ciphertext)`.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let SecretKey::Configured(cipher) = self else {
            return Err(Error::Internal(
                "cannot encrypt an agent auth secret with no AGENT_TOKEN_ENCRYPTION_KEY configured".into(),
            ));
        };
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| Error::Internal("failed to encrypt agent auth secret".into()))?;
        let mut out = nonce.to_vec();
        out.extend_from_slice(&ciphertext);
        Ok(hex::encode(out))
    }

    pub fn decrypt(&self, ciphertext_hex: &str) -> Result<String> {
        let SecretKey::Configured(cipher) = self else {
            return Err(Error::Internal(
                "cannot decrypt an agent auth secret with no AGENT_TOKEN_ENCRYPTION_KEY configured".into(),
            ));
        };
        let bytes = hex::decode(ciphertext_hex)
            .map_err(|err| Error::Internal(format!("invalid auth secret ciphertext encoding: {err}")))?;
        if bytes.len() < NONCE_LEN {
            return Err(Error::Internal("auth secret ciphertext too short to contain a nonce".into()));
        }
        let (nonce_bytes, ct) = bytes.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = cipher
            .decrypt(nonce, ct)
            .map_err(|_| Error::Internal("failed to decrypt agent auth secret".into()))?;
        String::from_utf8(plaintext)
            .map_err(|err| Error::Internal(format!("decrypted agent auth secret was not valid utf-8: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> SecretKey {
        SecretKey::from_hex(&hex::encode([7u8; 32])).unwrap()
    }

    #[test]
    fn round_trips_a_secret() {
        let key = test_key();
        let ciphertext = key.encrypt("super-secret-token").unwrap();
        assert_eq!(key.decrypt(&ciphertext).unwrap(), "super-secret-token");
    }

    #[test]
    fn two_encryptions_of_the_same_secret_differ() {
        let key = test_key();
        let a = key.encrypt("same-secret").unwrap();
        let b = key.encrypt("same-secret").unwrap();
        assert_ne!(a, b, "nonce reuse would make ciphertexts identical");
    }

    #[test]
    fn unconfigured_key_refuses_to_encrypt_or_decrypt() {
        let key = SecretKey::unconfigured();
        assert!(key.encrypt("secret").is_err());
        assert!(key.decrypt("deadbeef").is_err());
    }

    #[test]
    fn rejects_a_key_of_the_wrong_length() {
        assert!(SecretKey::from_hex(&hex::encode([1u8; 16])).is_err());
    }
}
