use std::fmt;

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit, OsRng, rand_core::RngCore},
};
use anyhow::{Result, anyhow, bail};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};

use crate::keys::key_from_base64;

const NONCE_LEN: usize = 12;

/// Symmetric cipher for platform tokens stored in the database.
///
/// Output format is `base64(nonce || ciphertext)` so a single TEXT column
/// carries everything needed to decrypt.
#[derive(Clone)]
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl TokenCipher {
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    /// Build a cipher from the base64 key held in configuration.
    pub fn from_base64_key(encoded: &str) -> Result<Self> {
        let key = key_from_base64(encoded.trim())?;
        Ok(Self::new(&key))
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| anyhow!("Encryption failed: {}", e))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(out))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<Vec<u8>> {
        let raw = BASE64
            .decode(encoded.trim())
            .map_err(|e| anyhow!("Malformed ciphertext encoding: {}", e))?;

        // 16-byte GCM tag is always present, even for empty plaintext
        if raw.len() < NONCE_LEN + 16 {
            bail!("Ciphertext too short ({} bytes)", raw.len());
        }

        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| anyhow!("Decryption failed: {}", e))
    }

    pub fn encrypt_str(&self, plaintext: &str) -> Result<String> {
        self.encrypt(plaintext.as_bytes())
    }

    pub fn decrypt_str(&self, encoded: &str) -> Result<String> {
        let bytes = self.decrypt(encoded)?;
        String::from_utf8(bytes).map_err(|_| anyhow!("Decrypted token is not valid UTF-8"))
    }
}

impl fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TokenCipher(<redacted>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{generate_key, key_to_base64};

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let cipher = TokenCipher::new(&generate_key());
        let token = b"ya29.a0AfH6SMBx-platform-access-token";

        let encoded = cipher.encrypt(token).unwrap();
        assert!(!encoded.contains("ya29"));

        let decrypted = cipher.decrypt(&encoded).unwrap();
        assert_eq!(decrypted, token);
    }

    #[test]
    fn roundtrip_arbitrary_bytes() {
        let cipher = TokenCipher::new(&generate_key());
        let mut inputs: Vec<Vec<u8>> = vec![vec![], vec![0u8], (0..=255u8).collect()];
        inputs.push(vec![0xFF; 64 * 1024]);

        for input in inputs {
            let encoded = cipher.encrypt(&input).unwrap();
            assert_eq!(cipher.decrypt(&encoded).unwrap(), input);
        }
    }

    #[test]
    fn same_plaintext_uses_fresh_nonce() {
        let cipher = TokenCipher::new(&generate_key());
        let a = cipher.encrypt_str("token").unwrap();
        let b = cipher.encrypt_str("token").unwrap();
        assert_ne!(a, b);
        assert_eq!(cipher.decrypt_str(&a).unwrap(), "token");
        assert_eq!(cipher.decrypt_str(&b).unwrap(), "token");
    }

    #[test]
    fn wrong_key_fails() {
        let encoded = TokenCipher::new(&generate_key()).encrypt(b"secret").unwrap();
        let result = TokenCipher::new(&generate_key()).decrypt(&encoded);
        assert!(result.is_err());
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let cipher = TokenCipher::new(&generate_key());
        let encoded = cipher.encrypt(b"secret").unwrap();

        let mut raw = BASE64.decode(&encoded).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        assert!(cipher.decrypt(&BASE64.encode(raw)).is_err());
    }

    #[test]
    fn malformed_input_is_an_error() {
        let cipher = TokenCipher::new(&generate_key());
        assert!(cipher.decrypt("not base64 !!").is_err());
        assert!(cipher.decrypt(&BASE64.encode([0u8; 8])).is_err());
    }

    #[test]
    fn builds_from_configured_key() {
        let key = generate_key();
        let from_config = TokenCipher::from_base64_key(&format!(" {}\n", key_to_base64(&key))).unwrap();
        let encoded = TokenCipher::new(&key).encrypt(b"shared").unwrap();
        assert_eq!(from_config.decrypt(&encoded).unwrap(), b"shared");
    }

    #[test]
    fn debug_does_not_leak_key() {
        let cipher = TokenCipher::new(&[7u8; 32]);
        assert_eq!(format!("{:?}", cipher), "TokenCipher(<redacted>)");
    }
}
