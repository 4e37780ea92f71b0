//! # Scanvault
//!
//! Encrypted document scanning vault with a tamper-evident audit trail.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         SCANVAULT                            │
//! │  ┌─────────────┐  ┌──────────────┐  ┌────────────────────┐  │
//! │  │ BIOMETRICS  │  │ DOCUMENT     │  │ BACKUP             │  │
//! │  │ GATE        │  │ VAULT        │  │ EXPORT/IMPORT      │  │
//! │  └──────┬──────┘  └──────┬───────┘  └─────────┬──────────┘  │
//! │         │                │                    │             │
//! │  ┌──────┴────────────────┴────────────────────┴──────────┐  │
//! │  │                 ENCRYPTION SERVICE                     │  │
//! │  │   device key (AES-256-GCM) / PBKDF2 password key       │  │
//! │  └──────────────────────────┬─────────────────────────────┘  │
//! │                             │                                │
//! │  ┌──────────────┐  ┌────────┴────────┐  ┌────────────────┐  │
//! │  │ AUDIT        │  │ AUDIT STORE     │  │ TROUBLESHOOTING│  │
//! │  │ SERVICE      │  │ (chained SQLite)│  │ LOG            │  │
//! │  └──────────────┘  └─────────────────┘  └────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Model
//!
//! - Every audit entry carries a SHA-256 checksum chained to the entry it
//!   follows; retroactive edits are detectable by a full-ledger scan
//! - Concurrent writers fork the chain instead of blocking; forks are a
//!   valid state, not corruption
//! - Documents and metadata encrypted with AES-256-GCM under keys derived
//!   from a device-resident master key
//! - Portable backups encrypted with an ephemeral PBKDF2-derived key;
//!   nothing password-derived is ever persisted

pub mod audit;
pub mod backup;
pub mod biometrics;
pub mod cloud;
pub mod crypto;
pub mod diag_log;
pub mod error;
pub mod gate;
pub mod ocr;
pub mod vault;

pub use audit::{AuditAction, AuditEntry, AuditFilter, AuditLevel, AuditLoggingService, SqliteAuditStore};
pub use backup::{BackupConfig, BackupManager, ExportPhase, ImportPhase};
pub use biometrics::{BiometricGate, BiometricPrompt};
pub use cloud::{CloudStorage, LocalDirStorage};
pub use crypto::EncryptionService;
pub use diag_log::{DiagConfig, TroubleshootingLogger};
pub use error::{ErrorCategory, VaultError, VaultResult};
pub use gate::StorageGate;
pub use ocr::OcrEngine;
pub use vault::DocumentVault;

/// Scanvault version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application id used in backup filenames
pub const APP_ID: &str = "scanvault";
