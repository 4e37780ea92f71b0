//! Scanvault - Password Key Derivation
//!
//! PBKDF2-HMAC-SHA256 for the portable backup path. The derived key is
//! ephemeral per export/import and never persisted.

use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;

use super::keys::{VaultKey, KEY_LEN};

/// Iteration count for PBKDF2-HMAC-SHA256
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Salt length for the export header
pub const EXPORT_SALT_LEN: usize = 32;

/// IV field length in the export header. The AES-GCM nonce occupies the
/// first 12 bytes; the remaining 4 are zero padding.
pub const EXPORT_IV_LEN: usize = 16;

/// Derive a 256-bit key from a user password and salt.
pub fn derive_password_key(password: &str, salt: &[u8]) -> VaultKey {
    let mut out = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ITERATIONS, &mut out);
    VaultKey::new(out)
}

/// Generate a fresh random salt for an export operation.
pub fn generate_salt() -> [u8; EXPORT_SALT_LEN] {
    use rand::RngCore;
    let mut salt = [0u8; EXPORT_SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derivation_is_deterministic() {
        let salt = [0x11u8; EXPORT_SALT_LEN];
        let k1 = derive_password_key("Tr0ub4dor&3", &salt);
        let k2 = derive_password_key("Tr0ub4dor&3", &salt);
        assert_eq!(k1.expose(), k2.expose());
    }

    #[test]
    fn test_different_salts_differ() {
        let k1 = derive_password_key("Tr0ub4dor&3", &[0x11u8; EXPORT_SALT_LEN]);
        let k2 = derive_password_key("Tr0ub4dor&3", &[0x22u8; EXPORT_SALT_LEN]);
        assert_ne!(k1.expose(), k2.expose());
    }

    #[test]
    fn test_different_passwords_differ() {
        let salt = generate_salt();
        let k1 = derive_password_key("correct horse", &salt);
        let k2 = derive_password_key("correct horsf", &salt);
        assert_ne!(k1.expose(), k2.expose());
    }

    #[test]
    fn test_empty_password_is_accepted() {
        // Password-length policy lives at the UI boundary, not here.
        let salt = generate_salt();
        let key = derive_password_key("", &salt);
        assert_eq!(key.expose().len(), KEY_LEN);
    }
}
