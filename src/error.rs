//! Scanvault - Error Types

use thiserror::Error;

/// Result type for vault operations
pub type VaultResult<T> = Result<T, VaultError>;

/// Coarse error category surfaced to operator dashboards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed input
    Validation,
    /// Policy violation (tamper detected, auth denied)
    Security,
    /// Encryption/decryption or key derivation failure
    Crypto,
    /// Persistence or I/O failure
    Storage,
    /// Operation exceeded a bound
    Timeout,
}

/// Vault error types
#[derive(Error, Debug)]
pub enum VaultError {
    // ═══════════════════════════════════════════════════════════════
    // CRYPTO ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Device key unavailable - cleared or never provisioned")]
    KeyUnavailable,

    // ═══════════════════════════════════════════════════════════════
    // SECURITY ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Integrity verification failed - content corrupted or tampered: {0}")]
    TamperDetected(String),

    #[error("Biometric authentication failed")]
    BiometricFailed,

    #[error("Biometric authentication error: {0}")]
    BiometricError(String),

    // ═══════════════════════════════════════════════════════════════
    // STORAGE ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("Key store error: {0}")]
    KeyStoreError(String),

    // ═══════════════════════════════════════════════════════════════
    // BACKUP ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Backup failed during {phase}: {message}")]
    BackupFailed { phase: String, message: String },

    #[error("Restore failed during {phase}: {message}")]
    RestoreFailed { phase: String, message: String },

    #[error("Cloud transfer failed: {0}")]
    CloudError(String),

    // ═══════════════════════════════════════════════════════════════
    // VALIDATION / SERIALIZATION ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    // ═══════════════════════════════════════════════════════════════
    // TIMEOUT
    // ═══════════════════════════════════════════════════════════════

    #[error("Operation timed out: {0}")]
    Timeout(String),
}

impl VaultError {
    /// Classify into the coarse operator-facing taxonomy.
    pub fn category(&self) -> ErrorCategory {
        match self {
            VaultError::EncryptionFailed(_)
            | VaultError::DecryptionFailed(_)
            | VaultError::KeyDerivationFailed(_)
            | VaultError::InvalidKeyLength { .. }
            | VaultError::KeyUnavailable => ErrorCategory::Crypto,

            VaultError::TamperDetected(_)
            | VaultError::BiometricFailed
            | VaultError::BiometricError(_) => ErrorCategory::Security,

            VaultError::DatabaseError(_)
            | VaultError::IoError(_)
            | VaultError::DocumentNotFound(_)
            | VaultError::KeyStoreError(_)
            | VaultError::BackupFailed { .. }
            | VaultError::RestoreFailed { .. }
            | VaultError::CloudError(_) => ErrorCategory::Storage,

            VaultError::InvalidInput(_)
            | VaultError::SerializationError(_)
            | VaultError::DeserializationError(_) => ErrorCategory::Validation,

            VaultError::Timeout(_) => ErrorCategory::Timeout,
        }
    }

    /// Check if this is a security-critical error
    pub fn is_security_critical(&self) -> bool {
        matches!(
            self,
            VaultError::TamperDetected(_)
                | VaultError::DecryptionFailed(_)
                | VaultError::BiometricFailed
        )
    }
}

impl From<rusqlite::Error> for VaultError {
    fn from(e: rusqlite::Error) -> Self {
        VaultError::DatabaseError(e.to_string())
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(e: serde_json::Error) -> Self {
        VaultError::SerializationError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_classification() {
        assert_eq!(
            VaultError::DecryptionFailed("bad tag".into()).category(),
            ErrorCategory::Crypto
        );
        assert_eq!(
            VaultError::TamperDetected("entry 7".into()).category(),
            ErrorCategory::Security
        );
        assert_eq!(
            VaultError::DatabaseError("locked".into()).category(),
            ErrorCategory::Storage
        );
        assert_eq!(
            VaultError::InvalidInput("empty".into()).category(),
            ErrorCategory::Validation
        );
        assert_eq!(
            VaultError::Timeout("upload".into()).category(),
            ErrorCategory::Timeout
        );
    }

    #[test]
    fn test_security_critical() {
        assert!(VaultError::TamperDetected("x".into()).is_security_critical());
        assert!(VaultError::BiometricFailed.is_security_critical());
        assert!(!VaultError::Timeout("x".into()).is_security_critical());
    }
}
