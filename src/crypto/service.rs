//! Scanvault - Encryption Service
//!
//! Orchestrates the two encryption regimes: the device-resident key for
//! at-rest data and ephemeral password-derived keys for portable exports.
//! Sensitive key operations pass through the biometric gate first.

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;

use super::aead::{
    compute_hmac, decrypt_aes_gcm, decrypt_aes_gcm_with_nonce, encrypt_aes_gcm,
    encrypt_aes_gcm_with_nonce, verify_hmac, EncryptedData,
};
use super::kdf::{derive_password_key, generate_salt, EXPORT_IV_LEN, EXPORT_SALT_LEN};
use super::keys::{generate_nonce, KeyManager, SecureKeyStore, NONCE_LEN};
use crate::biometrics::BiometricPrompt;
use crate::error::{VaultError, VaultResult};

/// Progress callback: (bytes_processed, bytes_total)
pub type ProgressFn = dyn Fn(u64, u64) + Send + Sync;

/// Encryption Service
///
/// Constructed once at startup and shared by handle. Device-key material
/// lives in the secure key store; `clear_key` renders every device-key
/// ciphertext unrecoverable by design.
pub struct EncryptionService {
    key_store: Arc<dyn SecureKeyStore>,
    biometrics: Arc<dyn BiometricPrompt>,
    keys: RwLock<Option<KeyManager>>,
}

impl EncryptionService {
    /// Load (or provision on first run) the device key and derive subkeys.
    pub fn new(
        key_store: Arc<dyn SecureKeyStore>,
        biometrics: Arc<dyn BiometricPrompt>,
    ) -> VaultResult<Self> {
        let keys = KeyManager::load_or_generate(key_store.as_ref())?;

        Ok(Self {
            key_store,
            biometrics,
            keys: RwLock::new(Some(keys)),
        })
    }

    fn with_keys<T>(&self, f: impl FnOnce(&KeyManager) -> VaultResult<T>) -> VaultResult<T> {
        let guard = self.keys.read();
        match guard.as_ref() {
            Some(keys) => f(keys),
            None => Err(VaultError::KeyUnavailable),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // DEVICE-KEY PATH
    // ═══════════════════════════════════════════════════════════════════════

    /// Encrypt arbitrary bytes with the current device data key.
    pub fn encrypt_bytes(&self, plaintext: &[u8]) -> VaultResult<Vec<u8>> {
        self.with_keys(|keys| {
            Ok(encrypt_aes_gcm(keys.current().data_key(), plaintext)?.to_bytes())
        })
    }

    /// Decrypt bytes produced by [`encrypt_bytes`]. Tries every retained
    /// key epoch, newest first; the GCM tag arbitrates.
    pub fn decrypt_bytes(&self, data: &[u8]) -> VaultResult<Vec<u8>> {
        let encrypted = EncryptedData::from_bytes(data)?;
        self.with_keys(|keys| {
            for epoch in keys.epochs() {
                if let Ok(plaintext) = decrypt_aes_gcm(epoch.data_key(), &encrypted) {
                    return Ok(plaintext);
                }
            }
            Err(VaultError::DecryptionFailed(
                "no key epoch authenticates this ciphertext".into(),
            ))
        })
    }

    /// Encrypt a UTF-8 string; output is hex-encoded.
    pub fn encrypt_text(&self, plaintext: &str) -> VaultResult<String> {
        Ok(hex::encode(self.encrypt_bytes(plaintext.as_bytes())?))
    }

    /// Decrypt hex-encoded output of [`encrypt_text`].
    pub fn decrypt_text(&self, encoded: &str) -> VaultResult<String> {
        let data = hex::decode(encoded)
            .map_err(|e| VaultError::InvalidInput(format!("invalid hex: {e}")))?;
        let plaintext = self.decrypt_bytes(&data)?;
        String::from_utf8(plaintext)
            .map_err(|_| VaultError::DecryptionFailed("plaintext is not valid UTF-8".into()))
    }

    /// Encrypt a file with the device key.
    pub fn encrypt_file(
        &self,
        src: &Path,
        dst: &Path,
        progress: Option<&ProgressFn>,
    ) -> VaultResult<()> {
        let plaintext = std::fs::read(src)?;
        let total = plaintext.len() as u64;
        if let Some(cb) = progress {
            cb(0, total);
        }

        let out = self.encrypt_bytes(&plaintext)?;
        std::fs::write(dst, out)?;

        if let Some(cb) = progress {
            cb(total, total);
        }
        Ok(())
    }

    /// Decrypt a file produced by [`encrypt_file`].
    pub fn decrypt_file(
        &self,
        src: &Path,
        dst: &Path,
        progress: Option<&ProgressFn>,
    ) -> VaultResult<()> {
        let data = std::fs::read(src)?;
        let total = data.len() as u64;
        if let Some(cb) = progress {
            cb(0, total);
        }

        let plaintext = self.decrypt_bytes(&data)?;
        std::fs::write(dst, plaintext)?;

        if let Some(cb) = progress {
            cb(total, total);
        }
        Ok(())
    }

    /// Encrypt document content under its per-document derived key.
    pub fn encrypt_document(&self, doc_id: &str, content: &[u8]) -> VaultResult<Vec<u8>> {
        self.with_keys(|keys| {
            let key = keys.current().derive_doc_key(doc_id)?;
            Ok(encrypt_aes_gcm(&key, content)?.to_bytes())
        })
    }

    /// Decrypt document content, walking retained key epochs.
    pub fn decrypt_document(&self, doc_id: &str, data: &[u8]) -> VaultResult<Vec<u8>> {
        let encrypted = EncryptedData::from_bytes(data)?;
        self.with_keys(|keys| {
            for epoch in keys.epochs() {
                let key = epoch.derive_doc_key(doc_id)?;
                if let Ok(plaintext) = decrypt_aes_gcm(&key, &encrypted) {
                    return Ok(plaintext);
                }
            }
            Err(VaultError::DecryptionFailed(
                "no key epoch authenticates this document".into(),
            ))
        })
    }

    /// Encrypt a metadata record with the index key.
    pub fn seal_metadata(&self, plaintext: &[u8]) -> VaultResult<Vec<u8>> {
        self.with_keys(|keys| {
            Ok(encrypt_aes_gcm(keys.current().index_key(), plaintext)?.to_bytes())
        })
    }

    /// Decrypt a metadata record, walking retained key epochs.
    pub fn open_metadata(&self, data: &[u8]) -> VaultResult<Vec<u8>> {
        let encrypted = EncryptedData::from_bytes(data)?;
        self.with_keys(|keys| {
            for epoch in keys.epochs() {
                if let Ok(plaintext) = decrypt_aes_gcm(epoch.index_key(), &encrypted) {
                    return Ok(plaintext);
                }
            }
            Err(VaultError::DecryptionFailed(
                "no key epoch authenticates this metadata record".into(),
            ))
        })
    }

    /// HMAC over stored content, keyed by the current epoch.
    pub fn content_hmac(&self, data: &[u8]) -> VaultResult<[u8; 32]> {
        self.with_keys(|keys| Ok(compute_hmac(keys.current().hmac_key(), data)))
    }

    /// Verify a content HMAC against every retained epoch.
    pub fn verify_content_hmac(&self, data: &[u8], expected: &[u8; 32]) -> VaultResult<bool> {
        self.with_keys(|keys| {
            Ok(keys
                .epochs()
                .iter()
                .any(|epoch| verify_hmac(epoch.hmac_key(), data, expected)))
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // PASSWORD PATH (portable exports)
    // ═══════════════════════════════════════════════════════════════════════

    /// Encrypt a file with a password-derived key.
    ///
    /// Output layout: `[salt(32)][iv(16)][ciphertext]`. The key is derived
    /// per operation via PBKDF2-HMAC-SHA256 from a fresh salt and discarded
    /// afterwards.
    pub fn encrypt_file_with_password(
        &self,
        src: &Path,
        dst: &Path,
        password: &str,
        progress: Option<&ProgressFn>,
    ) -> VaultResult<()> {
        let plaintext = std::fs::read(src)?;
        let total = plaintext.len() as u64;
        if let Some(cb) = progress {
            cb(0, total);
        }

        let salt = generate_salt();
        let key = derive_password_key(password, &salt);

        // The 16-byte IV field carries the 12-byte GCM nonce plus zero padding.
        let nonce = generate_nonce();
        let mut iv = [0u8; EXPORT_IV_LEN];
        iv[..NONCE_LEN].copy_from_slice(&nonce);

        let ciphertext = encrypt_aes_gcm_with_nonce(&key, &nonce, &plaintext)?;

        let mut out = Vec::with_capacity(EXPORT_SALT_LEN + EXPORT_IV_LEN + ciphertext.len());
        out.extend_from_slice(&salt);
        out.extend_from_slice(&iv);
        out.extend_from_slice(&ciphertext);
        std::fs::write(dst, out)?;

        if let Some(cb) = progress {
            cb(total, total);
        }
        Ok(())
    }

    /// Decrypt a file produced by [`encrypt_file_with_password`].
    ///
    /// A wrong password fails the authentication tag and surfaces as
    /// [`VaultError::DecryptionFailed`]; it never yields silent garbage.
    pub fn decrypt_file_with_password(
        &self,
        src: &Path,
        dst: &Path,
        password: &str,
        progress: Option<&ProgressFn>,
    ) -> VaultResult<()> {
        let data = std::fs::read(src)?;
        let total = data.len() as u64;

        // 16-byte GCM tag minimum after the header
        if data.len() < EXPORT_SALT_LEN + EXPORT_IV_LEN + 16 {
            return Err(VaultError::InvalidInput("export file truncated".into()));
        }
        if let Some(cb) = progress {
            cb(0, total);
        }

        let salt = &data[..EXPORT_SALT_LEN];
        let iv = &data[EXPORT_SALT_LEN..EXPORT_SALT_LEN + EXPORT_IV_LEN];
        let ciphertext = &data[EXPORT_SALT_LEN + EXPORT_IV_LEN..];

        let key = derive_password_key(password, salt);
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&iv[..NONCE_LEN]);

        let plaintext = decrypt_aes_gcm_with_nonce(&key, &nonce, ciphertext).map_err(|_| {
            VaultError::DecryptionFailed("wrong password or corrupted export".into())
        })?;
        std::fs::write(dst, plaintext)?;

        if let Some(cb) = progress {
            cb(total, total);
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // BIOMETRIC GATE
    // ═══════════════════════════════════════════════════════════════════════

    pub fn is_biometric_available(&self) -> bool {
        self.biometrics.is_available()
    }

    /// Precondition for sensitive key operations. With no enrolled
    /// biometrics there is nothing to prompt against and the operation
    /// proceeds; an available prompt that denies or errors aborts.
    pub fn authorize_sensitive_operation(&self, reason: &str) -> VaultResult<()> {
        if !self.biometrics.is_available() {
            return Ok(());
        }
        match self.biometrics.authenticate(reason)? {
            true => Ok(()),
            false => Err(VaultError::BiometricFailed),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // KEY LIFECYCLE
    // ═══════════════════════════════════════════════════════════════════════

    /// Rotate the device key. New writes use the new epoch; retained prior
    /// epochs keep existing ciphertext readable.
    pub fn change_key(&self) -> VaultResult<u64> {
        self.authorize_sensitive_operation("Rotate device encryption key")?;

        let mut guard = self.keys.write();
        match guard.as_mut() {
            Some(keys) => keys.rotate(self.key_store.as_ref()),
            None => Err(VaultError::KeyUnavailable),
        }
    }

    /// Destroy all device key material. Device-key ciphertext becomes
    /// unrecoverable; supports the right-to-erasure flow.
    pub fn clear_key(&self) -> VaultResult<()> {
        self.authorize_sensitive_operation("Erase device encryption key")?;

        let mut guard = self.keys.write();
        match guard.take() {
            Some(keys) => {
                keys.destroy(self.key_store.as_ref())?;
                log::warn!("Device key material destroyed");
                Ok(())
            }
            None => Err(VaultError::KeyUnavailable),
        }
    }

    pub fn current_epoch(&self) -> VaultResult<u64> {
        self.with_keys(|keys| Ok(keys.current_epoch()))
    }
}
