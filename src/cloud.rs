//! Scanvault - Cloud Storage Boundary
//!
//! Vendor mechanics live outside the core; backups only cross this surface
//! as already-encrypted blobs. The local-directory implementation serves
//! USB/NAS targets and tests.

use std::path::{Path, PathBuf};

use crate::error::{VaultError, VaultResult};

/// External storage provider. Methods are blocking; async callers hop
/// through `spawn_blocking`.
pub trait CloudStorage: Send + Sync {
    fn upload(&self, local: &Path, remote: &str) -> VaultResult<()>;
    fn download(&self, remote: &str, local: &Path) -> VaultResult<()>;
    fn list(&self, prefix: Option<&str>) -> VaultResult<Vec<String>>;
    fn delete(&self, remote: &str) -> VaultResult<()>;
}

/// Directory-backed provider (USB drive, mounted NAS share).
pub struct LocalDirStorage {
    root: PathBuf,
}

impl LocalDirStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> VaultResult<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn remote_path(&self, remote: &str) -> PathBuf {
        self.root.join(remote)
    }
}

impl CloudStorage for LocalDirStorage {
    fn upload(&self, local: &Path, remote: &str) -> VaultResult<()> {
        let dst = self.remote_path(remote);
        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(local, &dst)
            .map_err(|e| VaultError::CloudError(format!("upload {remote}: {e}")))?;
        Ok(())
    }

    fn download(&self, remote: &str, local: &Path) -> VaultResult<()> {
        let src = self.remote_path(remote);
        if !src.exists() {
            return Err(VaultError::CloudError(format!("no such backup: {remote}")));
        }
        std::fs::copy(&src, local)
            .map_err(|e| VaultError::CloudError(format!("download {remote}: {e}")))?;
        Ok(())
    }

    fn list(&self, prefix: Option<&str>) -> VaultResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.path().is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if prefix.map(|p| name.starts_with(p)).unwrap_or(true) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn delete(&self, remote: &str) -> VaultResult<()> {
        let path = self.remote_path(remote);
        if path.exists() {
            std::fs::remove_file(&path)
                .map_err(|e| VaultError::CloudError(format!("delete {remote}: {e}")))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_dir_roundtrip() {
        let remote_dir = tempfile::tempdir().unwrap();
        let work_dir = tempfile::tempdir().unwrap();
        let storage = LocalDirStorage::new(remote_dir.path()).unwrap();

        let local = work_dir.path().join("backup.db.enc");
        std::fs::write(&local, b"ciphertext").unwrap();

        storage.upload(&local, "scanvault_backup.db.enc").unwrap();
        assert_eq!(
            storage.list(Some("scanvault_")).unwrap(),
            vec!["scanvault_backup.db.enc"]
        );
        assert!(storage.list(Some("other_")).unwrap().is_empty());

        let restored = work_dir.path().join("restored.db.enc");
        storage
            .download("scanvault_backup.db.enc", &restored)
            .unwrap();
        assert_eq!(std::fs::read(&restored).unwrap(), b"ciphertext");

        storage.delete("scanvault_backup.db.enc").unwrap();
        assert!(storage.list(None).unwrap().is_empty());
    }

    #[test]
    fn test_download_missing_backup_fails() {
        let remote_dir = tempfile::tempdir().unwrap();
        let storage = LocalDirStorage::new(remote_dir.path()).unwrap();
        let err = storage
            .download("missing.db.enc", Path::new("/tmp/never-written"))
            .unwrap_err();
        assert!(matches!(err, VaultError::CloudError(_)));
    }
}
