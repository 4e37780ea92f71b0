//! Scanvault - Audit Store
//!
//! Append-only SQLite ledger. The store is a dumb, trusted-at-write-time
//! ledger: inserts are atomic and never validated against the chain;
//! validation is a read-time concern (`verify_integrity`).

use std::collections::HashMap;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::entry::{AuditAction, AuditEntry, AuditLevel};
use crate::error::VaultResult;
use crate::gate::StorageGate;

/// Retrieval filter for [`AuditStore::get_entries`].
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub level: Option<AuditLevel>,
    pub action: Option<AuditAction>,
    pub resource_type: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Append-only audit ledger capability.
pub trait AuditStore: Send + Sync {
    /// Atomic append. Chain validity is not checked here.
    fn insert(&self, entry: &AuditEntry) -> VaultResult<Uuid>;

    /// The most recently inserted entry system-wide (insertion order, not
    /// timestamp). Concurrent callers may observe the same entry before
    /// their own inserts land; the resulting forks are expected.
    fn get_last(&self) -> VaultResult<Option<AuditEntry>>;

    /// Filtered retrieval, newest first.
    fn get_entries(&self, filter: &AuditFilter) -> VaultResult<Vec<AuditEntry>>;

    /// Full-scan integrity check. Returns the ids of entries whose checksum
    /// fails, whose parent is missing, or whose stored parent checksum
    /// disagrees. Forks are valid and never flagged. An empty set means
    /// surviving entries are unmodified and correctly linked; it does not
    /// prove nothing was deleted.
    fn verify_integrity(&self) -> VaultResult<HashSet<Uuid>>;

    /// Entry count, optionally restricted to one level.
    fn count(&self, level: Option<AuditLevel>) -> VaultResult<u64>;
}

/// SQLite-backed ledger.
pub struct SqliteAuditStore {
    path: PathBuf,
    conn: Mutex<Connection>,
    gate: Arc<StorageGate>,
}

impl SqliteAuditStore {
    /// Open (creating if needed) the ledger inside the given database file.
    pub fn open<P: AsRef<Path>>(path: P, gate: Arc<StorageGate>) -> VaultResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Self::connect(&path)?;

        Ok(Self {
            path,
            conn: Mutex::new(conn),
            gate,
        })
    }

    fn connect(path: &Path) -> VaultResult<Connection> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=FULL;
            PRAGMA busy_timeout=5000;

            CREATE TABLE IF NOT EXISTS audit_entries (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                level TEXT NOT NULL,
                action TEXT NOT NULL,
                resource_type TEXT NOT NULL,
                resource_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                details TEXT NOT NULL,
                is_success INTEGER NOT NULL,
                error_message TEXT,
                checksum TEXT NOT NULL,
                previous_entry_id TEXT,
                previous_checksum TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_audit_level ON audit_entries(level);
            CREATE INDEX IF NOT EXISTS idx_audit_action ON audit_entries(action);
            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_entries(timestamp);
            "#,
        )?;

        Ok(conn)
    }

    /// Re-open the connection after the database file was replaced
    /// (restore flow).
    pub fn reopen(&self) -> VaultResult<()> {
        let mut conn = self.conn.lock();
        *conn = Self::connect(&self.path)?;
        Ok(())
    }

    /// Flush the WAL into the main database file so a file-level copy sees
    /// every committed entry. Callers hold the quiesce gate.
    pub fn checkpoint(&self) -> VaultResult<()> {
        let conn = self.conn.lock();
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    }

    fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<Option<AuditEntry>> {
        let id: String = row.get("id")?;
        let level: String = row.get("level")?;
        let action: String = row.get("action")?;
        let resource_type: String = row.get("resource_type")?;
        let resource_id: String = row.get("resource_id")?;
        let user_id: String = row.get("user_id")?;
        let timestamp: String = row.get("timestamp")?;
        let details: String = row.get("details")?;
        let is_success: bool = row.get("is_success")?;
        let error_message: Option<String> = row.get("error_message")?;
        let checksum: String = row.get("checksum")?;
        let previous_entry_id: Option<String> = row.get("previous_entry_id")?;
        let previous_checksum: Option<String> = row.get("previous_checksum")?;

        // Any unparseable column means the row cannot be the record that
        // was originally inserted; callers flag it.
        let parsed = (|| {
            Some(AuditEntry {
                id: Uuid::parse_str(&id).ok()?,
                level: AuditLevel::parse(&level)?,
                action: AuditAction::parse(&action)?,
                resource_type,
                resource_id,
                user_id,
                timestamp: DateTime::parse_from_rfc3339(&timestamp)
                    .ok()?
                    .with_timezone(&Utc),
                details,
                is_success,
                error_message,
                checksum,
                previous_entry_id: match previous_entry_id {
                    Some(raw) => Some(Uuid::parse_str(&raw).ok()?),
                    None => None,
                },
                previous_checksum,
            })
        })();

        Ok(parsed)
    }
}

impl AuditStore for SqliteAuditStore {
    fn insert(&self, entry: &AuditEntry) -> VaultResult<Uuid> {
        let _access = self.gate.enter();
        let conn = self.conn.lock();

        conn.execute(
            r#"
            INSERT INTO audit_entries (
                id, level, action, resource_type, resource_id, user_id,
                timestamp, details, is_success, error_message, checksum,
                previous_entry_id, previous_checksum
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                entry.id.to_string(),
                entry.level.as_str(),
                entry.action.as_str(),
                entry.resource_type,
                entry.resource_id,
                entry.user_id,
                entry.timestamp.to_rfc3339(),
                entry.details,
                entry.is_success,
                entry.error_message,
                entry.checksum,
                entry.previous_entry_id.map(|id| id.to_string()),
                entry.previous_checksum,
            ],
        )?;

        Ok(entry.id)
    }

    fn get_last(&self) -> VaultResult<Option<AuditEntry>> {
        let _access = self.gate.enter();
        let conn = self.conn.lock();

        let entry = conn
            .query_row(
                "SELECT * FROM audit_entries ORDER BY seq DESC LIMIT 1",
                [],
                Self::row_to_entry,
            )
            .optional()?;

        Ok(entry.flatten())
    }

    fn get_entries(&self, filter: &AuditFilter) -> VaultResult<Vec<AuditEntry>> {
        let _access = self.gate.enter();
        let conn = self.conn.lock();

        let mut clauses: Vec<&str> = Vec::new();
        let mut args: Vec<String> = Vec::new();

        if let Some(level) = filter.level {
            clauses.push("level = ?");
            args.push(level.as_str().to_string());
        }
        if let Some(action) = filter.action {
            clauses.push("action = ?");
            args.push(action.as_str().to_string());
        }
        if let Some(ref resource_type) = filter.resource_type {
            clauses.push("resource_type = ?");
            args.push(resource_type.clone());
        }
        if let Some(from) = filter.from {
            clauses.push("timestamp >= ?");
            args.push(from.to_rfc3339());
        }
        if let Some(until) = filter.until {
            clauses.push("timestamp <= ?");
            args.push(until.to_rfc3339());
        }

        let mut sql = String::from("SELECT * FROM audit_entries");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY seq DESC");
        sql.push_str(&format!(
            " LIMIT {} OFFSET {}",
            filter.limit.map(|l| l as i64).unwrap_or(-1),
            filter.offset.unwrap_or(0)
        ));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), Self::row_to_entry)?;

        let mut entries = Vec::new();
        for row in rows {
            if let Some(entry) = row? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    fn verify_integrity(&self) -> VaultResult<HashSet<Uuid>> {
        let _access = self.gate.enter();
        let conn = self.conn.lock();

        let mut stmt = conn.prepare("SELECT * FROM audit_entries ORDER BY seq ASC")?;
        let rows = stmt.query_map([], |row| {
            let raw_id: String = row.get("id")?;
            Ok((raw_id, Self::row_to_entry(row)?))
        })?;

        let mut entries: Vec<AuditEntry> = Vec::new();
        let mut violations = HashSet::new();

        for row in rows {
            let (raw_id, parsed) = row?;
            match parsed {
                Some(entry) => entries.push(entry),
                // Row no longer parses as an audit entry at all
                None => {
                    violations.insert(Uuid::parse_str(&raw_id).unwrap_or(Uuid::nil()));
                }
            }
        }

        let checksums: HashMap<Uuid, &str> = entries
            .iter()
            .map(|e| (e.id, e.checksum.as_str()))
            .collect();

        for entry in &entries {
            if !entry.verify_checksum() {
                violations.insert(entry.id);
                continue;
            }
            if let Some(parent_id) = entry.previous_entry_id {
                match checksums.get(&parent_id) {
                    Some(parent_checksum) => {
                        if !entry.verify_chain(parent_checksum) {
                            violations.insert(entry.id);
                        }
                    }
                    // Referenced parent no longer exists
                    None => {
                        violations.insert(entry.id);
                    }
                }
            }
        }

        Ok(violations)
    }

    fn count(&self, level: Option<AuditLevel>) -> VaultResult<u64> {
        let _access = self.gate.enter();
        let conn = self.conn.lock();

        let count: i64 = match level {
            Some(level) => conn.query_row(
                "SELECT COUNT(*) FROM audit_entries WHERE level = ?1",
                params![level.as_str()],
                |row| row.get(0),
            )?,
            None => conn.query_row("SELECT COUNT(*) FROM audit_entries", [], |row| row.get(0))?,
        };

        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store(dir: &tempfile::TempDir) -> SqliteAuditStore {
        SqliteAuditStore::open(dir.path().join("scanvault.db"), Arc::new(StorageGate::new()))
            .unwrap()
    }

    fn entry(previous: Option<&AuditEntry>) -> AuditEntry {
        AuditEntry::create(
            AuditLevel::Compulsory,
            AuditAction::Create,
            "document",
            "doc-1",
            "user-7",
            "imported scan",
            true,
            None,
            previous.map(|p| p.id),
            previous.map(|p| p.checksum.clone()),
        )
    }

    fn tamper(store: &SqliteAuditStore, sql: &str, args: impl rusqlite::Params) {
        store.conn.lock().execute(sql, args).unwrap();
    }

    #[test]
    fn test_insert_and_get_last() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        assert!(store.get_last().unwrap().is_none());

        let a = entry(None);
        store.insert(&a).unwrap();
        let b = entry(Some(&a));
        store.insert(&b).unwrap();

        let last = store.get_last().unwrap().unwrap();
        assert_eq!(last, b);
        assert_eq!(last.previous_entry_id, Some(a.id));
    }

    #[test]
    fn test_single_entry_ledger_is_consistent() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        store.insert(&entry(None)).unwrap();
        assert!(store.verify_integrity().unwrap().is_empty());
    }

    #[test]
    fn test_field_overwrite_is_flagged() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        let a = entry(None);
        store.insert(&a).unwrap();
        let b = entry(Some(&a));
        store.insert(&b).unwrap();

        tamper(
            &store,
            "UPDATE audit_entries SET resource_id = 'doc-999' WHERE id = ?1",
            params![b.id.to_string()],
        );

        let violations = store.verify_integrity().unwrap();
        assert_eq!(violations, HashSet::from([b.id]));
    }

    #[test]
    fn test_previous_checksum_overwrite_is_flagged() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        let a = entry(None);
        store.insert(&a).unwrap();
        let b = entry(Some(&a));
        store.insert(&b).unwrap();

        // The checksum covers previous_checksum, so this fails the entry
        // digest before the link is even compared.
        tamper(
            &store,
            "UPDATE audit_entries SET previous_checksum = 'deadbeef' WHERE id = ?1",
            params![b.id.to_string()],
        );

        let violations = store.verify_integrity().unwrap();
        assert_eq!(violations, HashSet::from([b.id]));
    }

    #[test]
    fn test_parent_mutation_flags_both_sides() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        let a = entry(None);
        store.insert(&a).unwrap();
        let b = entry(Some(&a));
        store.insert(&b).unwrap();

        // Rewriting the parent (including a recomputed checksum) breaks the
        // child's recorded link even though the child itself is untouched.
        let mut forged = a.clone();
        forged.details = "rewritten history".into();
        forged.checksum = forged.compute_checksum();
        tamper(
            &store,
            "UPDATE audit_entries SET details = ?1, checksum = ?2 WHERE id = ?3",
            params![forged.details, forged.checksum, a.id.to_string()],
        );

        let violations = store.verify_integrity().unwrap();
        assert_eq!(violations, HashSet::from([b.id]));
    }

    #[test]
    fn test_missing_parent_is_flagged() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        let a = entry(None);
        store.insert(&a).unwrap();
        let b = entry(Some(&a));
        store.insert(&b).unwrap();

        tamper(
            &store,
            "DELETE FROM audit_entries WHERE id = ?1",
            params![a.id.to_string()],
        );

        let violations = store.verify_integrity().unwrap();
        assert_eq!(violations, HashSet::from([b.id]));
    }

    #[test]
    fn test_forks_are_not_violations() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        let parent = entry(None);
        store.insert(&parent).unwrap();

        // Two writers that both observed `parent` as the last entry
        let left = entry(Some(&parent));
        let right = entry(Some(&parent));
        store.insert(&left).unwrap();
        store.insert(&right).unwrap();

        assert!(store.verify_integrity().unwrap().is_empty());
    }

    #[test]
    fn test_filters_and_ordering() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);

        let a = entry(None);
        store.insert(&a).unwrap();

        let read = AuditEntry::create(
            AuditLevel::Compulsory,
            AuditAction::Read,
            "document",
            "doc-1",
            "user-7",
            "viewed scan",
            true,
            None,
            Some(a.id),
            Some(a.checksum.clone()),
        );
        store.insert(&read).unwrap();

        let nav = AuditEntry::create(
            AuditLevel::Verbose,
            AuditAction::Navigate,
            "screen",
            "settings",
            "user-7",
            "opened settings",
            true,
            None,
            Some(read.id),
            Some(read.checksum.clone()),
        );
        store.insert(&nav).unwrap();

        // Newest first
        let all = store.get_entries(&AuditFilter::default()).unwrap();
        assert_eq!(
            all.iter().map(|e| e.id).collect::<Vec<_>>(),
            vec![nav.id, read.id, a.id]
        );

        let reads = store
            .get_entries(&AuditFilter {
                action: Some(AuditAction::Read),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(reads.len(), 1);
        assert_eq!(reads[0].id, read.id);

        let verbose = store
            .get_entries(&AuditFilter {
                level: Some(AuditLevel::Verbose),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(verbose.len(), 1);

        let limited = store
            .get_entries(&AuditFilter {
                limit: Some(1),
                offset: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].id, read.id);

        assert_eq!(store.count(None).unwrap(), 3);
        assert_eq!(store.count(Some(AuditLevel::Compulsory)).unwrap(), 2);
        assert_eq!(store.count(Some(AuditLevel::Info)).unwrap(), 0);
    }

    #[test]
    fn test_reopen_after_file_replacement() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir);
        store.insert(&entry(None)).unwrap();
        store.checkpoint().unwrap();

        // Simulate a restore replacing the database file
        let replacement = tempfile::tempdir().unwrap();
        let other = SqliteAuditStore::open(
            replacement.path().join("scanvault.db"),
            Arc::new(StorageGate::new()),
        )
        .unwrap();
        let x = entry(None);
        other.insert(&x).unwrap();
        other.checkpoint().unwrap();
        drop(other);
        std::fs::copy(
            replacement.path().join("scanvault.db"),
            dir.path().join("scanvault.db"),
        )
        .unwrap();

        store.reopen().unwrap();
        let last = store.get_last().unwrap().unwrap();
        assert_eq!(last.id, x.id);
        assert_eq!(store.count(None).unwrap(), 1);
    }
}
