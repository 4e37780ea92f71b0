//! Scanvault - Audit Logging Service
//!
//! Builds chained entries and applies the level policy. One instance is
//! constructed at startup and passed by handle to every caller; session
//! state (minimum level, current user) lives here, not in globals.
//!
//! The read-last/build/insert sequence is deliberately not transactional:
//! concurrent writers may chain to the same parent and fork rather than
//! block. `verify_integrity` treats such forks as valid.

use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use super::entry::{AuditAction, AuditEntry, AuditLevel};
use super::store::AuditStore;
use crate::diag_log::TroubleshootingLogger;
use crate::error::VaultResult;

/// User id recorded while no session is active.
const SYSTEM_USER: &str = "system";

/// Audit Logging Service
pub struct AuditLoggingService {
    store: Arc<dyn AuditStore>,
    min_level: RwLock<AuditLevel>,
    current_user: RwLock<Option<String>>,
    diagnostics: RwLock<Option<Arc<TroubleshootingLogger>>>,
}

impl AuditLoggingService {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self {
            store,
            min_level: RwLock::new(AuditLevel::Info),
            current_user: RwLock::new(None),
            diagnostics: RwLock::new(None),
        }
    }

    /// Attach the optional diagnostic logger. Declared here so callers
    /// never need to downcast the service to a concrete type.
    pub fn attach_diagnostics(&self, logger: Arc<TroubleshootingLogger>) {
        *self.diagnostics.write() = Some(logger);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // SESSION STATE
    // ═══════════════════════════════════════════════════════════════════════

    pub fn min_level(&self) -> AuditLevel {
        *self.min_level.read()
    }

    pub fn set_min_level(&self, level: AuditLevel) {
        *self.min_level.write() = level;
    }

    pub fn current_user(&self) -> Option<String> {
        self.current_user.read().clone()
    }

    /// Record sign-in and bind the session user to subsequent entries.
    pub fn set_user(&self, user_id: impl Into<String>) -> VaultResult<()> {
        let user_id = user_id.into();
        *self.current_user.write() = Some(user_id.clone());
        self.log(
            AuditLevel::Info,
            AuditAction::Login,
            "session",
            &user_id,
            "user signed in",
            true,
            None,
        )?;
        Ok(())
    }

    /// Record sign-out and clear the session user.
    pub fn clear_user(&self) -> VaultResult<()> {
        let user_id = self.current_user.read().clone();
        if let Some(user_id) = user_id {
            self.log(
                AuditLevel::Info,
                AuditAction::Logout,
                "session",
                &user_id,
                "user signed out",
                true,
                None,
            )?;
        }
        *self.current_user.write() = None;
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // LOGGING
    // ═══════════════════════════════════════════════════════════════════════

    fn should_persist(&self, level: AuditLevel) -> bool {
        // Compulsory entries cannot be suppressed by configuration
        level == AuditLevel::Compulsory || level.priority() >= self.min_level().priority()
    }

    /// Build an entry chained to the current ledger head and persist it.
    ///
    /// Returns the id of the persisted entry, or `None` when the level
    /// policy suppressed it.
    pub fn log(
        &self,
        level: AuditLevel,
        action: AuditAction,
        resource_type: &str,
        resource_id: &str,
        details: &str,
        is_success: bool,
        error_message: Option<String>,
    ) -> VaultResult<Option<Uuid>> {
        if !self.should_persist(level) {
            return Ok(None);
        }

        let user_id = self
            .current_user
            .read()
            .clone()
            .unwrap_or_else(|| SYSTEM_USER.to_string());

        let last = self.store.get_last()?;
        let entry = AuditEntry::create(
            level,
            action,
            resource_type,
            resource_id,
            user_id,
            details,
            is_success,
            error_message,
            last.as_ref().map(|e| e.id),
            last.as_ref().map(|e| e.checksum.clone()),
        );

        let id = self.store.insert(&entry)?;

        if let Some(diag) = self.diagnostics.read().as_ref() {
            diag.debug(
                "audit",
                &format!(
                    "{} {} {}/{} success={}",
                    entry.level.as_str(),
                    entry.action.as_str(),
                    entry.resource_type,
                    entry.resource_id,
                    entry.is_success
                ),
            );
        }

        Ok(Some(id))
    }

    /// Persisted-data write. Always `Compulsory`; the mutation kind is the
    /// caller's to name.
    pub fn log_database_write(
        &self,
        action: AuditAction,
        resource_type: &str,
        resource_id: &str,
        details: &str,
        is_success: bool,
        error_message: Option<String>,
    ) -> VaultResult<Option<Uuid>> {
        self.log(
            AuditLevel::Compulsory,
            action,
            resource_type,
            resource_id,
            details,
            is_success,
            error_message,
        )
    }

    /// Persisted-data read. Always `Compulsory`.
    pub fn log_database_read(
        &self,
        resource_type: &str,
        resource_id: &str,
        details: &str,
        is_success: bool,
        error_message: Option<String>,
    ) -> VaultResult<Option<Uuid>> {
        self.log(
            AuditLevel::Compulsory,
            AuditAction::Read,
            resource_type,
            resource_id,
            details,
            is_success,
            error_message,
        )
    }

    /// Notable successful user action.
    pub fn log_info_action(
        &self,
        action: AuditAction,
        resource_type: &str,
        resource_id: &str,
        details: &str,
    ) -> VaultResult<Option<Uuid>> {
        self.log(
            AuditLevel::Info,
            action,
            resource_type,
            resource_id,
            details,
            true,
            None,
        )
    }

    /// Navigation-style event.
    pub fn log_verbose(&self, screen: &str, details: &str) -> VaultResult<Option<Uuid>> {
        self.log(
            AuditLevel::Verbose,
            AuditAction::Navigate,
            "screen",
            screen,
            details,
            true,
            None,
        )
    }
}
