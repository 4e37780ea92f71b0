//! Scanvault - Backup Export/Import
//!
//! Password-protected portable backups of the vault database. The pipeline
//! quiesces storage for its critical section, stages artifacts under a
//! scratch directory, and guarantees on every exit path that storage
//! access resumes and staging files are removed. Each run ends in exactly
//! one terminal audit entry.
//!
//! Cancellation of an in-flight run is not supported; a started pipeline
//! always reaches a terminal state.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;

use crate::audit::{AuditAction, AuditLevel, AuditLoggingService, SqliteAuditStore};
use crate::cloud::CloudStorage;
use crate::crypto::{EncryptionService, ProgressFn};
use crate::error::{VaultError, VaultResult};
use crate::gate::StorageGate;
use crate::vault::DocumentVault;

/// Export pipeline states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportPhase {
    Idle,
    PasswordCollected,
    StorageQuiesced,
    Encrypting,
    Uploading,
    Cleanup,
    StorageResumed,
    Done,
    Failed,
}

/// Import pipeline states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportPhase {
    Idle,
    BackupListed,
    PasswordCollected,
    Downloading,
    Decrypting,
    CurrentBackedUp,
    StorageReplaced,
    StorageResumed,
    Done,
    Failed,
}

/// Storage component that must be flushed before and re-opened after the
/// database file is copied or replaced.
pub trait QuiescedStorage: Send + Sync {
    fn checkpoint(&self) -> VaultResult<()>;
    fn reopen(&self) -> VaultResult<()>;
}

impl QuiescedStorage for SqliteAuditStore {
    fn checkpoint(&self) -> VaultResult<()> {
        SqliteAuditStore::checkpoint(self)
    }

    fn reopen(&self) -> VaultResult<()> {
        SqliteAuditStore::reopen(self)
    }
}

impl QuiescedStorage for DocumentVault {
    fn checkpoint(&self) -> VaultResult<()> {
        DocumentVault::checkpoint(self)
    }

    fn reopen(&self) -> VaultResult<()> {
        DocumentVault::reopen(self)
    }
}

/// Backup configuration
#[derive(Debug, Clone)]
pub struct BackupConfig {
    /// Application id used in the default backup filename
    pub app_id: String,
    /// Scratch directory for staging artifacts
    pub staging_dir: PathBuf,
}

/// Export outcome
#[derive(Debug, Clone)]
pub struct ExportReport {
    pub remote_name: String,
    pub bytes: u64,
    pub phases: Vec<ExportPhase>,
}

/// Import outcome
#[derive(Debug, Clone)]
pub struct ImportReport {
    pub remote_name: String,
    /// Copy of the replaced database, when requested
    pub pre_restore_copy: Option<PathBuf>,
    pub phases: Vec<ImportPhase>,
}

/// Staging files removed on every exit path.
struct TempArtifacts {
    paths: Vec<PathBuf>,
}

impl TempArtifacts {
    fn new() -> Self {
        Self { paths: Vec::new() }
    }

    fn track(&mut self, path: PathBuf) -> PathBuf {
        self.paths.push(path.clone());
        path
    }
}

impl Drop for TempArtifacts {
    fn drop(&mut self) {
        for path in &self.paths {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Backup Export/Import Manager
#[derive(Clone)]
pub struct BackupManager {
    config: BackupConfig,
    db_path: PathBuf,
    gate: Arc<StorageGate>,
    encryption: Arc<EncryptionService>,
    audit: Arc<AuditLoggingService>,
    cloud: Arc<dyn CloudStorage>,
    storages: Vec<Arc<dyn QuiescedStorage>>,
}

impl BackupManager {
    pub fn new(
        config: BackupConfig,
        db_path: PathBuf,
        gate: Arc<StorageGate>,
        encryption: Arc<EncryptionService>,
        audit: Arc<AuditLoggingService>,
        cloud: Arc<dyn CloudStorage>,
        storages: Vec<Arc<dyn QuiescedStorage>>,
    ) -> Self {
        Self {
            config,
            db_path,
            gate,
            encryption,
            audit,
            cloud,
            storages,
        }
    }

    fn default_remote_name(&self) -> String {
        format!(
            "{}_database_backup_{}.db.enc",
            self.config.app_id,
            Utc::now().format("%Y-%m-%d")
        )
    }

    fn emit_backup_entry(&self, remote: &str, outcome: &VaultResult<()>) {
        let (success, error) = match outcome {
            Ok(()) => (true, None),
            Err(e) => (false, Some(e.to_string())),
        };
        let details = if success {
            "encrypted backup exported"
        } else {
            "encrypted backup export failed"
        };
        let _ = self.audit.log(
            AuditLevel::Compulsory,
            AuditAction::Backup,
            "database",
            remote,
            details,
            success,
            error,
        );
    }

    fn emit_restore_entry(&self, remote: &str, outcome: &VaultResult<()>) {
        let (success, error) = match outcome {
            Ok(()) => (true, None),
            Err(e) => (false, Some(e.to_string())),
        };
        let details = if success {
            "encrypted backup restored"
        } else {
            "encrypted backup restore failed"
        };
        let _ = self.audit.log(
            AuditLevel::Compulsory,
            AuditAction::Restore,
            "database",
            remote,
            details,
            success,
            error,
        );
    }

    // ═══════════════════════════════════════════════════════════════════════
    // EXPORT
    // ═══════════════════════════════════════════════════════════════════════

    /// Export the vault database as a password-encrypted backup.
    ///
    /// The key-derivation and encryption work is CPU-bound and runs on the
    /// blocking pool.
    pub async fn export(
        &self,
        password: &str,
        remote_name: Option<String>,
        progress: Option<Arc<ProgressFn>>,
    ) -> VaultResult<ExportReport> {
        let remote = remote_name.unwrap_or_else(|| self.default_remote_name());

        if let Err(e) = self
            .encryption
            .authorize_sensitive_operation("Export encrypted backup")
        {
            self.emit_backup_entry(&remote, &Err(VaultError::BiometricFailed));
            return Err(e);
        }

        let this = self.clone();
        let password = password.to_string();
        let remote_for_task = remote.clone();
        let result = tokio::task::spawn_blocking(move || {
            this.run_export(&password, remote_for_task, progress)
        })
        .await
        .map_err(|e| VaultError::BackupFailed {
            phase: "Encrypting".into(),
            message: format!("worker panicked: {e}"),
        })?;

        match &result {
            Ok(_) => self.emit_backup_entry(&remote, &Ok(())),
            Err(e) => self.emit_backup_entry(&remote, &Err(VaultError::BackupFailed {
                phase: "pipeline".into(),
                message: e.to_string(),
            })),
        }

        result
    }

    fn run_export(
        &self,
        password: &str,
        remote: String,
        progress: Option<Arc<ProgressFn>>,
    ) -> VaultResult<ExportReport> {
        let mut phases = vec![ExportPhase::Idle, ExportPhase::PasswordCollected];

        match self.export_pipeline(password, &remote, progress, &mut phases) {
            Ok(bytes) => {
                phases.push(ExportPhase::Done);
                Ok(ExportReport {
                    remote_name: remote,
                    bytes,
                    phases,
                })
            }
            Err(e) => {
                // The quiesce guard and staging files are scoped; by the
                // time the error surfaces here, access has resumed and
                // artifacts are gone.
                if phases.contains(&ExportPhase::StorageQuiesced) {
                    phases.push(ExportPhase::StorageResumed);
                }
                phases.push(ExportPhase::Failed);
                log::warn!("backup export failed ({:?}): {e}", phases);
                Err(e)
            }
        }
    }

    fn export_pipeline(
        &self,
        password: &str,
        remote: &str,
        progress: Option<Arc<ProgressFn>>,
        phases: &mut Vec<ExportPhase>,
    ) -> VaultResult<u64> {
        std::fs::create_dir_all(&self.config.staging_dir)?;
        let mut temps = TempArtifacts::new();
        let staging_plain = temps.track(self.config.staging_dir.join(format!("{remote}.staging")));
        let staging_enc = temps.track(self.config.staging_dir.join(remote));

        let bytes;
        {
            let _quiesce = self.gate.quiesce();
            phases.push(ExportPhase::StorageQuiesced);

            for storage in &self.storages {
                storage.checkpoint()?;
            }
            std::fs::copy(&self.db_path, &staging_plain)?;

            phases.push(ExportPhase::Encrypting);
            self.encryption.encrypt_file_with_password(
                &staging_plain,
                &staging_enc,
                password,
                progress.as_deref(),
            )?;
            bytes = std::fs::metadata(&staging_enc)?.len();

            phases.push(ExportPhase::Uploading);
            self.cloud.upload(&staging_enc, remote)?;

            phases.push(ExportPhase::Cleanup);
            drop(temps);
        }
        phases.push(ExportPhase::StorageResumed);

        Ok(bytes)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // IMPORT
    // ═══════════════════════════════════════════════════════════════════════

    /// List available backups at the provider, newest name last.
    pub async fn list_backups(&self) -> VaultResult<Vec<String>> {
        let this = self.clone();
        let prefix = format!("{}_database_backup_", this.config.app_id);
        tokio::task::spawn_blocking(move || this.cloud.list(Some(&prefix)))
            .await
            .map_err(|e| VaultError::CloudError(format!("worker panicked: {e}")))?
    }

    /// Download, decrypt and restore a backup over the current database.
    ///
    /// A wrong password fails during `Decrypting`, before storage is
    /// touched; the current data stays intact.
    pub async fn import(
        &self,
        remote_name: &str,
        password: &str,
        keep_current_copy: bool,
        progress: Option<Arc<ProgressFn>>,
    ) -> VaultResult<ImportReport> {
        if let Err(e) = self
            .encryption
            .authorize_sensitive_operation("Restore encrypted backup")
        {
            self.emit_restore_entry(remote_name, &Err(VaultError::BiometricFailed));
            return Err(e);
        }

        let this = self.clone();
        let password = password.to_string();
        let remote = remote_name.to_string();
        let result = tokio::task::spawn_blocking(move || {
            this.run_import(&remote, &password, keep_current_copy, progress)
        })
        .await
        .map_err(|e| VaultError::RestoreFailed {
            phase: "Decrypting".into(),
            message: format!("worker panicked: {e}"),
        })?;

        match &result {
            Ok(_) => self.emit_restore_entry(remote_name, &Ok(())),
            Err(e) => self.emit_restore_entry(remote_name, &Err(VaultError::RestoreFailed {
                phase: "pipeline".into(),
                message: e.to_string(),
            })),
        }

        result
    }

    fn run_import(
        &self,
        remote: &str,
        password: &str,
        keep_current_copy: bool,
        progress: Option<Arc<ProgressFn>>,
    ) -> VaultResult<ImportReport> {
        let mut phases = vec![ImportPhase::Idle];
        let mut pre_restore_copy = None;

        match self.import_pipeline(
            remote,
            password,
            keep_current_copy,
            progress,
            &mut phases,
            &mut pre_restore_copy,
        ) {
            Ok(()) => {
                phases.push(ImportPhase::Done);
                Ok(ImportReport {
                    remote_name: remote.to_string(),
                    pre_restore_copy,
                    phases,
                })
            }
            Err(e) => {
                if phases.contains(&ImportPhase::StorageReplaced) {
                    phases.push(ImportPhase::StorageResumed);
                }
                phases.push(ImportPhase::Failed);
                log::warn!("backup restore failed ({:?}): {e}", phases);
                Err(e)
            }
        }
    }

    fn import_pipeline(
        &self,
        remote: &str,
        password: &str,
        keep_current_copy: bool,
        progress: Option<Arc<ProgressFn>>,
        phases: &mut Vec<ImportPhase>,
        pre_restore_copy: &mut Option<PathBuf>,
    ) -> VaultResult<()> {
        let available = self.cloud.list(None)?;
        if !available.iter().any(|name| name == remote) {
            return Err(VaultError::CloudError(format!("no such backup: {remote}")));
        }
        phases.push(ImportPhase::BackupListed);
        phases.push(ImportPhase::PasswordCollected);

        std::fs::create_dir_all(&self.config.staging_dir)?;
        let mut temps = TempArtifacts::new();
        let staging_enc = temps.track(self.config.staging_dir.join(format!("{remote}.download")));
        let staging_plain = temps.track(self.config.staging_dir.join(format!("{remote}.restore")));

        phases.push(ImportPhase::Downloading);
        self.cloud.download(remote, &staging_enc)?;

        // Wrong password or corrupted ciphertext surfaces here, before the
        // live database is touched.
        phases.push(ImportPhase::Decrypting);
        self.encryption.decrypt_file_with_password(
            &staging_enc,
            &staging_plain,
            password,
            progress.as_deref(),
        )?;

        {
            let _quiesce = self.gate.quiesce();

            for storage in &self.storages {
                storage.checkpoint()?;
            }

            if keep_current_copy {
                let copy = self.db_path.with_extension(format!(
                    "pre_restore_{}.db",
                    Utc::now().format("%Y%m%d%H%M%S")
                ));
                std::fs::copy(&self.db_path, &copy)?;
                *pre_restore_copy = Some(copy);
                phases.push(ImportPhase::CurrentBackedUp);
            }

            std::fs::copy(&staging_plain, &self.db_path)?;
            // Stale WAL/SHM from the replaced database must not shadow the
            // restored file.
            let _ = std::fs::remove_file(wal_path(&self.db_path));
            let _ = std::fs::remove_file(shm_path(&self.db_path));
            phases.push(ImportPhase::StorageReplaced);

            for storage in &self.storages {
                storage.reopen()?;
            }

            drop(temps);
        }
        phases.push(ImportPhase::StorageResumed);

        Ok(())
    }
}

fn wal_path(db: &Path) -> PathBuf {
    let mut name = db.as_os_str().to_os_string();
    name.push("-wal");
    PathBuf::from(name)
}

fn shm_path(db: &Path) -> PathBuf {
    let mut name = db.as_os_str().to_os_string();
    name.push("-shm");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::store::{AuditFilter, AuditStore};
    use crate::biometrics::StaticBiometrics;
    use crate::cloud::LocalDirStorage;
    use crate::crypto::MemoryKeyStore;

    struct Fixture {
        _dirs: Vec<tempfile::TempDir>,
        vault: Arc<DocumentVault>,
        store: Arc<SqliteAuditStore>,
        manager: BackupManager,
        remote_root: PathBuf,
        staging_dir: PathBuf,
    }

    fn fixture_with(cloud: Option<Arc<dyn CloudStorage>>, biometrics: StaticBiometrics) -> Fixture {
        let data_dir = tempfile::tempdir().unwrap();
        let remote_dir = tempfile::tempdir().unwrap();
        let db_path = data_dir.path().join("scanvault.db");
        let staging_dir = data_dir.path().join("staging");
        let remote_root = remote_dir.path().to_path_buf();

        let gate = Arc::new(StorageGate::new());
        let encryption = Arc::new(
            EncryptionService::new(Arc::new(MemoryKeyStore::new()), Arc::new(biometrics)).unwrap(),
        );
        let store = Arc::new(SqliteAuditStore::open(&db_path, Arc::clone(&gate)).unwrap());
        let audit = Arc::new(AuditLoggingService::new(store.clone()));
        let vault = Arc::new(
            DocumentVault::open(
                &db_path,
                Arc::clone(&gate),
                Arc::clone(&encryption),
                Arc::clone(&audit),
            )
            .unwrap(),
        );

        let cloud =
            cloud.unwrap_or_else(|| Arc::new(LocalDirStorage::new(&remote_root).unwrap()));
        let manager = BackupManager::new(
            BackupConfig {
                app_id: "scanvault".into(),
                staging_dir: staging_dir.clone(),
            },
            db_path,
            gate,
            encryption,
            audit,
            cloud,
            vec![
                store.clone() as Arc<dyn QuiescedStorage>,
                vault.clone() as Arc<dyn QuiescedStorage>,
            ],
        );

        Fixture {
            _dirs: vec![data_dir, remote_dir],
            vault,
            store,
            manager,
            remote_root,
            staging_dir,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(None, StaticBiometrics::unavailable())
    }

    fn staging_is_empty(fx: &Fixture) -> bool {
        !fx.staging_dir.exists()
            || std::fs::read_dir(&fx.staging_dir).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn test_export_produces_named_backup() {
        let fx = fixture();
        fx.vault
            .import_document(b"%PDF-1.7 invoice", "invoice.pdf", None)
            .unwrap();

        let report = fx.manager.export("Tr0ub4dor&3", None, None).await.unwrap();

        assert!(report.remote_name.starts_with("scanvault_database_backup_"));
        assert!(report.remote_name.ends_with(".db.enc"));
        assert!(report.bytes > 0);
        assert_eq!(*report.phases.last().unwrap(), ExportPhase::Done);
        assert!(report.phases.contains(&ExportPhase::StorageQuiesced));
        assert!(report.phases.contains(&ExportPhase::StorageResumed));

        assert!(fx.remote_root.join(&report.remote_name).exists());
        assert!(staging_is_empty(&fx));

        // Exactly one backup entry, successful
        let backups = fx
            .store
            .get_entries(&AuditFilter {
                action: Some(AuditAction::Backup),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(backups.len(), 1);
        assert!(backups[0].is_success);
        assert!(fx.store.verify_integrity().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_export_import_roundtrip() {
        let fx = fixture();
        let kept = fx
            .vault
            .import_document(b"%PDF-1.7 keep me", "keep.pdf", None)
            .unwrap();

        let report = fx
            .manager
            .export("Tr0ub4dor&3", Some("roundtrip.db.enc".into()), None)
            .await
            .unwrap();

        // Mutate after the export; the restore rolls it back
        fx.vault
            .import_document(b"%PDF-1.7 extra", "extra.pdf", None)
            .unwrap();
        assert_eq!(fx.vault.count().unwrap(), 2);

        let imported = fx
            .manager
            .import(&report.remote_name, "Tr0ub4dor&3", false, None)
            .await
            .unwrap();
        assert_eq!(*imported.phases.last().unwrap(), ImportPhase::Done);
        assert!(imported.phases.contains(&ImportPhase::StorageReplaced));
        assert!(imported.pre_restore_copy.is_none());

        assert_eq!(fx.vault.count().unwrap(), 1);
        assert_eq!(fx.vault.get_document(&kept).unwrap(), b"%PDF-1.7 keep me");
        assert!(staging_is_empty(&fx));

        // Restore terminal entry on the (restored plus appended) ledger
        let last = fx.store.get_last().unwrap().unwrap();
        assert!(matches!(last.action, AuditAction::Read | AuditAction::Restore));
        let restores = fx
            .store
            .get_entries(&AuditFilter {
                action: Some(AuditAction::Restore),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(restores.len(), 1);
        assert!(restores[0].is_success);
    }

    #[tokio::test]
    async fn test_import_keeps_pre_restore_copy_when_requested() {
        let fx = fixture();
        fx.vault
            .import_document(b"%PDF-1.7 original", "orig.pdf", None)
            .unwrap();
        let report = fx
            .manager
            .export("pw", Some("copy-test.db.enc".into()), None)
            .await
            .unwrap();

        let imported = fx
            .manager
            .import(&report.remote_name, "pw", true, None)
            .await
            .unwrap();

        assert!(imported.phases.contains(&ImportPhase::CurrentBackedUp));
        let copy = imported.pre_restore_copy.unwrap();
        assert!(copy.exists());
    }

    #[tokio::test]
    async fn test_wrong_password_leaves_original_untouched() {
        let fx = fixture();
        let id = fx
            .vault
            .import_document(b"%PDF-1.7 safe", "safe.pdf", None)
            .unwrap();
        fx.manager
            .export("correct", Some("locked.db.enc".into()), None)
            .await
            .unwrap();

        let err = fx
            .manager
            .import("locked.db.enc", "incorrect", false, None)
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::DecryptionFailed(_)));

        // Original data untouched and usable
        assert_eq!(fx.vault.get_document(&id).unwrap(), b"%PDF-1.7 safe");
        assert!(staging_is_empty(&fx));

        let restores = fx
            .store
            .get_entries(&AuditFilter {
                action: Some(AuditAction::Restore),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(restores.len(), 1);
        assert!(!restores[0].is_success);
    }

    #[tokio::test]
    async fn test_flipped_salt_byte_fails_import() {
        let fx = fixture();
        fx.vault
            .import_document(b"%PDF-1.7 data", "d.pdf", None)
            .unwrap();
        fx.manager
            .export("Tr0ub4dor&3", Some("salted.db.enc".into()), None)
            .await
            .unwrap();

        // Flip one byte inside the stored salt
        let remote_file = fx.remote_root.join("salted.db.enc");
        let mut raw = std::fs::read(&remote_file).unwrap();
        raw[3] ^= 0x01;
        std::fs::write(&remote_file, raw).unwrap();

        let err = fx
            .manager
            .import("salted.db.enc", "Tr0ub4dor&3", false, None)
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::DecryptionFailed(_)));
        assert_eq!(fx.vault.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_upload_resumes_storage_and_cleans_staging() {
        struct BrokenUpload;
        impl CloudStorage for BrokenUpload {
            fn upload(&self, _local: &Path, _remote: &str) -> VaultResult<()> {
                Err(VaultError::CloudError("connection refused".into()))
            }
            fn download(&self, _remote: &str, _local: &Path) -> VaultResult<()> {
                Err(VaultError::CloudError("connection refused".into()))
            }
            fn list(&self, _prefix: Option<&str>) -> VaultResult<Vec<String>> {
                Ok(Vec::new())
            }
            fn delete(&self, _remote: &str) -> VaultResult<()> {
                Ok(())
            }
        }

        let fx = fixture_with(
            Some(Arc::new(BrokenUpload) as Arc<dyn CloudStorage>),
            StaticBiometrics::unavailable(),
        );
        fx.vault
            .import_document(b"%PDF-1.7 data", "d.pdf", None)
            .unwrap();

        let err = fx.manager.export("pw", None, None).await.unwrap_err();
        assert!(matches!(err, VaultError::CloudError(_)));
        assert!(staging_is_empty(&fx));

        // Storage resumed: normal operations proceed
        fx.vault
            .import_document(b"%PDF-1.7 after", "after.pdf", None)
            .unwrap();

        let backups = fx
            .store
            .get_entries(&AuditFilter {
                action: Some(AuditAction::Backup),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(backups.len(), 1);
        assert!(!backups[0].is_success);
        assert!(backups[0].error_message.is_some());
    }

    #[tokio::test]
    async fn test_biometric_denial_aborts_export() {
        let fx = fixture_with(None, StaticBiometrics::denying());

        let err = fx.manager.export("pw", None, None).await.unwrap_err();
        assert!(matches!(err, VaultError::BiometricFailed));

        let backups = fx
            .store
            .get_entries(&AuditFilter {
                action: Some(AuditAction::Backup),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(backups.len(), 1);
        assert!(!backups[0].is_success);
    }

    #[tokio::test]
    async fn test_list_backups_filters_by_app_prefix() {
        let fx = fixture();
        fx.manager.export("pw", None, None).await.unwrap();

        // Foreign file at the provider is not a scanvault backup
        std::fs::write(fx.remote_root.join("unrelated.bin"), b"x").unwrap();

        let names = fx.manager.list_backups().await.unwrap();
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with("scanvault_database_backup_"));
    }

    #[tokio::test]
    async fn test_import_unknown_backup_fails_before_touching_storage() {
        let fx = fixture();
        fx.vault
            .import_document(b"%PDF-1.7 data", "d.pdf", None)
            .unwrap();

        let err = fx
            .manager
            .import("ghost.db.enc", "pw", false, None)
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::CloudError(_)));
        assert_eq!(fx.vault.count().unwrap(), 1);
    }
}
