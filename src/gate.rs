//! Scanvault - Storage Quiesce Gate
//!
//! Backup export/import must mutate the on-disk snapshot with no readers
//! or writers in flight. Normal operations hold shared access; a backup
//! holds exclusive access for its critical section. Both are scoped
//! guards, so access always resumes on every exit path.

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Process-wide gate over the vault's on-disk state.
#[derive(Default)]
pub struct StorageGate {
    lock: RwLock<()>,
}

impl StorageGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared access for a normal storage operation. Blocks while a backup
    /// holds the gate.
    pub fn enter(&self) -> StorageAccess<'_> {
        // Recursive shared acquisition: a vault operation takes the gate
        // and then logs through the audit store, which takes it again.
        StorageAccess {
            _guard: self.lock.read_recursive(),
        }
    }

    /// Exclusive access for a backup critical section.
    pub fn quiesce(&self) -> QuiesceGuard<'_> {
        let guard = self.lock.write();
        log::debug!("storage access quiesced");
        QuiesceGuard { _guard: guard }
    }
}

/// Shared-access token for one storage operation.
pub struct StorageAccess<'a> {
    _guard: RwLockReadGuard<'a, ()>,
}

/// Exclusive-access token. Dropping it resumes normal storage access.
pub struct QuiesceGuard<'a> {
    _guard: RwLockWriteGuard<'a, ()>,
}

impl Drop for QuiesceGuard<'_> {
    fn drop(&mut self) {
        log::debug!("storage access resumed");
    }
}
