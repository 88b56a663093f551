//! Encrypted notification targets.
//!
//! Targets such as Pushover user keys or e-mail addresses may be stored in a
//! public build configuration as `encrypted:<base64(nonce || ciphertext)>`,
//! sealed with AES-256-GCM under SHA-256 of the repository's key.

use crate::sender::NotifyError;
use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};

pub const ENCRYPTED_PREFIX: &str = "encrypted:";

const NONCE_LEN: usize = 12;

pub struct TargetCipher {
    cipher: Aes256Gcm,
}

impl TargetCipher {
    /// Derive the cipher from a repository's key string.
    pub fn from_key(key: &str) -> Result<Self, NotifyError> {
        let digest = Sha256::digest(key.as_bytes());
        let cipher = Aes256Gcm::new_from_slice(&digest)
            .map_err(|e| NotifyError::Decryption(format!("Invalid key: {}", e)))?;
        Ok(Self { cipher })
    }

    pub fn is_encrypted(target: &str) -> bool {
        target.starts_with(ENCRYPTED_PREFIX)
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, NotifyError> {
        let nonce_bytes: [u8; NONCE_LEN] = rand::random();
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|e| NotifyError::Decryption(format!("Encryption failed: {}", e)))?;

        let mut sealed = nonce_bytes.to_vec();
        sealed.extend_from_slice(&ciphertext);
        Ok(format!("{}{}", ENCRYPTED_PREFIX, STANDARD.encode(sealed)))
    }

    /// Decrypt a marker-prefixed target. Plain targets pass through.
    pub fn decrypt(&self, target: &str) -> Result<String, NotifyError> {
        let Some(encoded) = target.strip_prefix(ENCRYPTED_PREFIX) else {
            return Ok(target.to_string());
        };

        let sealed = STANDARD
            .decode(encoded.trim())
            .map_err(|e| NotifyError::Decryption(format!("Invalid encoding: {}", e)))?;
        if sealed.len() <= NONCE_LEN {
            return Err(NotifyError::Decryption("Ciphertext too short".to_string()));
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| NotifyError::Decryption("Authentication failed".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|e| NotifyError::Decryption(format!("Target is not UTF-8: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_then_decrypt() {
        let cipher = TargetCipher::from_key("0b8f2f1e-repo-key").unwrap();
        let sealed = cipher.encrypt("uQiRzpo4DXghDmr9QzzfQu27cmVRsG").unwrap();

        assert!(TargetCipher::is_encrypted(&sealed));
        assert_eq!(cipher.decrypt(&sealed).unwrap(), "uQiRzpo4DXghDmr9QzzfQu27cmVRsG");
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = TargetCipher::from_key("a").unwrap().encrypt("ops@example.org").unwrap();
        let err = TargetCipher::from_key("b").unwrap().decrypt(&sealed).unwrap_err();
        assert!(matches!(err, NotifyError::Decryption(_)));
    }

    #[test]
    fn test_plain_targets_pass_through() {
        let cipher = TargetCipher::from_key("k").unwrap();
        assert_eq!(cipher.decrypt("ops@example.org").unwrap(), "ops@example.org");
    }

    #[test]
    fn test_truncated_ciphertext_fails() {
        let cipher = TargetCipher::from_key("k").unwrap();
        assert!(cipher.decrypt("encrypted:AAAA").is_err());
        assert!(cipher.decrypt("encrypted:!!!").is_err());
    }
}
