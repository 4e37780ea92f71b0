//! Scanvault - Authenticated Encryption
//!
//! AES-256-GCM for all at-rest payloads. Every operation uses a fresh
//! random nonce, stored prepended to the ciphertext.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};

use super::keys::{generate_nonce, VaultKey, NONCE_LEN};
use crate::error::{VaultError, VaultResult};

/// Encrypted data with nonce prepended
pub struct EncryptedData {
    /// Nonce (12 bytes)
    pub nonce: [u8; NONCE_LEN],
    /// Ciphertext with authentication tag
    pub ciphertext: Vec<u8>,
}

impl EncryptedData {
    /// Serialize to bytes (nonce || ciphertext)
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut result = Vec::with_capacity(NONCE_LEN + self.ciphertext.len());
        result.extend_from_slice(&self.nonce);
        result.extend_from_slice(&self.ciphertext);
        result
    }

    /// Deserialize from bytes (nonce || ciphertext || tag)
    pub fn from_bytes(data: &[u8]) -> VaultResult<Self> {
        if data.len() < NONCE_LEN + 16 {
            return Err(VaultError::DecryptionFailed("Data too short".into()));
        }

        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&data[..NONCE_LEN]);

        Ok(Self {
            nonce,
            ciphertext: data[NONCE_LEN..].to_vec(),
        })
    }
}

/// Encrypt data with AES-256-GCM
pub fn encrypt_aes_gcm(key: &VaultKey, plaintext: &[u8]) -> VaultResult<EncryptedData> {
    let cipher = Aes256Gcm::new_from_slice(key.expose())
        .map_err(|e| VaultError::EncryptionFailed(e.to_string()))?;

    let nonce_bytes = generate_nonce();
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| VaultError::EncryptionFailed(e.to_string()))?;

    Ok(EncryptedData {
        nonce: nonce_bytes,
        ciphertext,
    })
}

/// Decrypt data with AES-256-GCM
pub fn decrypt_aes_gcm(key: &VaultKey, encrypted: &EncryptedData) -> VaultResult<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key.expose())
        .map_err(|e| VaultError::DecryptionFailed(e.to_string()))?;

    let nonce = Nonce::from_slice(&encrypted.nonce);

    cipher
        .decrypt(nonce, encrypted.ciphertext.as_slice())
        .map_err(|_| VaultError::DecryptionFailed("Authentication failed".into()))
}

/// Encrypt with an explicit nonce. Used by the password-based export path,
/// where the nonce lives in the file header rather than the body.
pub fn encrypt_aes_gcm_with_nonce(
    key: &VaultKey,
    nonce_bytes: &[u8; NONCE_LEN],
    plaintext: &[u8],
) -> VaultResult<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key.expose())
        .map_err(|e| VaultError::EncryptionFailed(e.to_string()))?;

    cipher
        .encrypt(Nonce::from_slice(nonce_bytes), plaintext)
        .map_err(|e| VaultError::EncryptionFailed(e.to_string()))
}

/// Decrypt with an explicit nonce (counterpart of [`encrypt_aes_gcm_with_nonce`]).
pub fn decrypt_aes_gcm_with_nonce(
    key: &VaultKey,
    nonce_bytes: &[u8; NONCE_LEN],
    ciphertext: &[u8],
) -> VaultResult<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key.expose())
        .map_err(|e| VaultError::DecryptionFailed(e.to_string()))?;

    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| VaultError::DecryptionFailed("Authentication failed".into()))
}

// ═══════════════════════════════════════════════════════════════════════════
// HMAC for content integrity
// ═══════════════════════════════════════════════════════════════════════════

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute HMAC-SHA256 over stored content
pub fn compute_hmac(key: &VaultKey, data: &[u8]) -> [u8; 32] {
    let mut mac =
        <HmacSha256 as Mac>::new_from_slice(key.expose()).expect("HMAC key length is always valid");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// Verify HMAC-SHA256 in constant time
pub fn verify_hmac(key: &VaultKey, data: &[u8], expected: &[u8; 32]) -> bool {
    let mut mac =
        <HmacSha256 as Mac>::new_from_slice(key.expose()).expect("HMAC key length is always valid");
    mac.update(data);
    mac.verify_slice(expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let key = VaultKey::generate();
        let plaintext = b"Scanvault - scanned contract, page 1";

        let encrypted = encrypt_aes_gcm(&key, plaintext).unwrap();
        let decrypted = decrypt_aes_gcm(&key, &encrypted).unwrap();

        assert_eq!(plaintext.as_slice(), decrypted.as_slice());
    }

    #[test]
    fn test_empty_plaintext_roundtrip() {
        let key = VaultKey::generate();
        let encrypted = encrypt_aes_gcm(&key, b"").unwrap();
        let decrypted = decrypt_aes_gcm(&key, &encrypted).unwrap();
        assert!(decrypted.is_empty());
    }

    #[test]
    fn test_wrong_key_fails() {
        let key1 = VaultKey::generate();
        let key2 = VaultKey::generate();

        let encrypted = encrypt_aes_gcm(&key1, b"secret document").unwrap();
        assert!(decrypt_aes_gcm(&key2, &encrypted).is_err());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = VaultKey::generate();
        let mut encrypted = encrypt_aes_gcm(&key, b"secret document").unwrap();
        encrypted.ciphertext[0] ^= 0xFF;

        assert!(decrypt_aes_gcm(&key, &encrypted).is_err());
    }

    #[test]
    fn test_unique_nonce_per_operation() {
        let key = VaultKey::generate();
        let mut seen = std::collections::HashSet::new();

        for _ in 0..128 {
            let encrypted = encrypt_aes_gcm(&key, b"same input").unwrap();
            seen.insert(encrypted.nonce);
        }

        assert_eq!(seen.len(), 128);
    }

    #[test]
    fn test_serialized_layout() {
        let key = VaultKey::generate();
        let encrypted = encrypt_aes_gcm(&key, b"payload").unwrap();
        let bytes = encrypted.to_bytes();

        let parsed = EncryptedData::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.nonce, encrypted.nonce);
        assert_eq!(parsed.ciphertext, encrypted.ciphertext);

        assert!(EncryptedData::from_bytes(&bytes[..NONCE_LEN + 2]).is_err());
    }

    #[test]
    fn test_hmac() {
        let key = VaultKey::generate();
        let data = b"encrypted blob";

        let mac = compute_hmac(&key, data);
        assert!(verify_hmac(&key, data, &mac));
        assert!(!verify_hmac(&key, b"tampered blob", &mac));
    }
}
