use aes_gcm::aead::OsRng;
use aes_gcm::aead::rand_core::RngCore;
use anyhow::{Result, bail};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};

/// Generate a random 256-bit key for AES-256-GCM.
pub fn generate_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    key
}

/// Encode a key to base64 for the environment file.
pub fn key_to_base64(key: &[u8; 32]) -> String {
    BASE64.encode(key)
}

/// Decode a base64 key. Anything other than exactly 32 bytes is rejected.
pub fn key_from_base64(encoded: &str) -> Result<[u8; 32]> {
    if encoded.is_empty() {
        bail!("Encryption key is empty");
    }
    let bytes = BASE64.decode(encoded)?;
    let len = bytes.len();
    let key: [u8; 32] = bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("Invalid key length: expected 32 bytes, got {}", len))?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_base64_roundtrip() {
        let key = generate_key();
        assert_eq!(key_from_base64(&key_to_base64(&key)).unwrap(), key);
    }

    #[test]
    fn rejects_short_and_empty_keys() {
        assert!(key_from_base64("").is_err());
        let short = BASE64.encode([1u8; 16]);
        let err = key_from_base64(&short).unwrap_err();
        assert!(err.to_string().contains("got 16"));
    }
}
