//! Scanvault - Audit Entry
//!
//! Immutable audit record with a tamper-evident checksum and a link to the
//! entry it follows. Concurrent writers may chain to the same parent, so
//! the ledger forms a DAG rather than a strict list.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Audit verbosity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditLevel {
    /// Navigation-style events
    Verbose,
    /// Notable user actions
    Info,
    /// Persisted-data reads/writes. Never suppressed.
    Compulsory,
}

impl AuditLevel {
    /// Numeric priority used by the level policy
    pub fn priority(&self) -> u8 {
        match self {
            AuditLevel::Verbose => 0,
            AuditLevel::Info => 1,
            AuditLevel::Compulsory => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditLevel::Verbose => "verbose",
            AuditLevel::Info => "info",
            AuditLevel::Compulsory => "compulsory",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "verbose" => Some(AuditLevel::Verbose),
            "info" => Some(AuditLevel::Info),
            "compulsory" => Some(AuditLevel::Compulsory),
            _ => None,
        }
    }
}

/// Audited action kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Read,
    Update,
    Delete,
    Backup,
    Restore,
    Login,
    Logout,
    Navigate,
    KeyRotation,
    KeyErasure,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Read => "read",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
            AuditAction::Backup => "backup",
            AuditAction::Restore => "restore",
            AuditAction::Login => "login",
            AuditAction::Logout => "logout",
            AuditAction::Navigate => "navigate",
            AuditAction::KeyRotation => "key_rotation",
            AuditAction::KeyErasure => "key_erasure",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(AuditAction::Create),
            "read" => Some(AuditAction::Read),
            "update" => Some(AuditAction::Update),
            "delete" => Some(AuditAction::Delete),
            "backup" => Some(AuditAction::Backup),
            "restore" => Some(AuditAction::Restore),
            "login" => Some(AuditAction::Login),
            "logout" => Some(AuditAction::Logout),
            "navigate" => Some(AuditAction::Navigate),
            "key_rotation" => Some(AuditAction::KeyRotation),
            "key_erasure" => Some(AuditAction::KeyErasure),
            _ => None,
        }
    }
}

/// A single immutable entry in the audit ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub level: AuditLevel,
    pub action: AuditAction,
    pub resource_type: String,
    pub resource_id: String,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub details: String,
    pub is_success: bool,
    pub error_message: Option<String>,
    /// SHA-256 over every other field, lowercase hex
    pub checksum: String,
    /// Entry this one follows, if any
    pub previous_entry_id: Option<Uuid>,
    /// Copy of the referenced entry's checksum at creation time
    pub previous_checksum: Option<String>,
}

impl AuditEntry {
    /// Build a new entry and stamp its checksum.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        level: AuditLevel,
        action: AuditAction,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        user_id: impl Into<String>,
        details: impl Into<String>,
        is_success: bool,
        error_message: Option<String>,
        previous_entry_id: Option<Uuid>,
        previous_checksum: Option<String>,
    ) -> Self {
        let mut entry = Self {
            id: Uuid::new_v4(),
            level,
            action,
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            user_id: user_id.into(),
            timestamp: Utc::now(),
            details: details.into(),
            is_success,
            error_message,
            checksum: String::new(),
            previous_entry_id,
            previous_checksum,
        };
        entry.checksum = entry.compute_checksum();
        entry
    }

    /// Canonical digest over every field except `checksum` itself.
    ///
    /// Field order is fixed; a unit separator delimits fields and optionals
    /// contribute a presence byte, so no two field combinations share a
    /// preimage.
    pub fn compute_checksum(&self) -> String {
        const SEP: [u8; 1] = [0x1F];

        let mut hasher = Sha256::new();
        hasher.update(self.id.as_bytes());
        hasher.update(SEP);
        hasher.update(self.level.as_str().as_bytes());
        hasher.update(SEP);
        hasher.update(self.action.as_str().as_bytes());
        hasher.update(SEP);
        hasher.update(self.resource_type.as_bytes());
        hasher.update(SEP);
        hasher.update(self.resource_id.as_bytes());
        hasher.update(SEP);
        hasher.update(self.user_id.as_bytes());
        hasher.update(SEP);
        hasher.update(self.timestamp.to_rfc3339().as_bytes());
        hasher.update(SEP);
        hasher.update(self.details.as_bytes());
        hasher.update(SEP);
        hasher.update([u8::from(self.is_success)]);
        hasher.update(SEP);
        match &self.error_message {
            Some(msg) => {
                hasher.update([1u8]);
                hasher.update(msg.as_bytes());
            }
            None => hasher.update([0u8]),
        }
        hasher.update(SEP);
        match &self.previous_entry_id {
            Some(id) => {
                hasher.update([1u8]);
                hasher.update(id.as_bytes());
            }
            None => hasher.update([0u8]),
        }
        hasher.update(SEP);
        match &self.previous_checksum {
            Some(sum) => {
                hasher.update([1u8]);
                hasher.update(sum.as_bytes());
            }
            None => hasher.update([0u8]),
        }

        hex::encode(hasher.finalize())
    }

    /// Detect in-place tampering of this entry's fields.
    pub fn verify_checksum(&self) -> bool {
        self.compute_checksum() == self.checksum
    }

    /// Validate this entry's link against the checksum of the entry it
    /// claims to follow.
    pub fn verify_chain(&self, expected_previous_checksum: &str) -> bool {
        self.previous_checksum.as_deref() == Some(expected_previous_checksum)
    }
}
