//! Scanvault - Document Vault
//!
//! Encrypted storage for scanned documents. Content is encrypted under a
//! per-document derived key, metadata under the index key, and both live
//! in the vault database file. Every persisted-data read/write emits a
//! `compulsory` audit entry.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audit::{AuditAction, AuditLoggingService};
use crate::crypto::EncryptionService;
use crate::error::{VaultError, VaultResult};
use crate::gate::StorageGate;
use crate::ocr::OcrEngine;

/// Document metadata (stored encrypted)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMeta {
    /// Unique ID
    pub id: String,
    /// Original filename
    pub original_name: String,
    /// MIME type detected from content
    pub mime_type: String,
    /// Plaintext size
    pub original_size: u64,
    /// Ciphertext size
    pub encrypted_size: u64,
    /// Import timestamp
    pub imported_at: DateTime<Utc>,
    /// HMAC over the stored ciphertext
    pub hmac: [u8; 32],
    /// Recognized text, if an OCR engine was attached at import
    pub ocr_text: Option<String>,
    /// Recognition confidence reported by the engine
    pub ocr_confidence: Option<f32>,
    /// Tags (user-defined)
    pub tags: Vec<String>,
}

/// Document Vault
pub struct DocumentVault {
    path: PathBuf,
    conn: Mutex<Connection>,
    gate: Arc<StorageGate>,
    encryption: Arc<EncryptionService>,
    audit: Arc<AuditLoggingService>,
}

impl DocumentVault {
    /// Open (creating if needed) the document tables inside the vault
    /// database file.
    pub fn open<P: AsRef<Path>>(
        path: P,
        gate: Arc<StorageGate>,
        encryption: Arc<EncryptionService>,
        audit: Arc<AuditLoggingService>,
    ) -> VaultResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Self::connect(&path)?;

        Ok(Self {
            path,
            conn: Mutex::new(conn),
            gate,
            encryption,
            audit,
        })
    }

    fn connect(path: &Path) -> VaultResult<Connection> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=FULL;
            PRAGMA busy_timeout=5000;

            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                meta BLOB NOT NULL,
                content BLOB NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_documents_created ON documents(created_at);
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

    /// Flush the WAL so a file-level copy of the database sees every
    /// committed row. Callers hold the quiesce gate.
    pub fn checkpoint(&self) -> VaultResult<()> {
        let conn = self.conn.lock();
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // DOCUMENT OPERATIONS
    // ═══════════════════════════════════════════════════════════════════════

    /// Import a scanned document into the vault.
    ///
    /// Content arrives from the capture boundary as raw bytes. Text
    /// recognition is best-effort glue: an engine failure never fails the
    /// import.
    pub fn import_document(
        &self,
        content: &[u8],
        original_name: &str,
        ocr: Option<&dyn OcrEngine>,
    ) -> VaultResult<String> {
        let id = Uuid::new_v4().to_string();

        let result = self.import_inner(&id, content, original_name, ocr);
        match result {
            Ok(()) => {
                self.audit.log_database_write(
                    AuditAction::Create,
                    "document",
                    &id,
                    &format!("imported {original_name}"),
                    true,
                    None,
                )?;
                Ok(id)
            }
            Err(e) => {
                let _ = self.audit.log_database_write(
                    AuditAction::Create,
                    "document",
                    &id,
                    &format!("import of {original_name} failed"),
                    false,
                    Some(e.to_string()),
                );
                Err(e)
            }
        }
    }

    fn import_inner(
        &self,
        id: &str,
        content: &[u8],
        original_name: &str,
        ocr: Option<&dyn OcrEngine>,
    ) -> VaultResult<()> {
        let _access = self.gate.enter();

        let recognized = ocr.and_then(|engine| engine.extract(content).ok());

        let ciphertext = self.encryption.encrypt_document(id, content)?;
        let hmac = self.encryption.content_hmac(&ciphertext)?;

        let meta = DocumentMeta {
            id: id.to_string(),
            original_name: original_name.to_string(),
            mime_type: detect_mime(content).to_string(),
            original_size: content.len() as u64,
            encrypted_size: ciphertext.len() as u64,
            imported_at: Utc::now(),
            hmac,
            ocr_text: recognized.as_ref().map(|r| r.text.clone()),
            ocr_confidence: recognized.as_ref().map(|r| r.confidence),
            tags: Vec::new(),
        };
        let sealed_meta = self.encryption.seal_metadata(&serde_json::to_vec(&meta)?)?;

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO documents (id, meta, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![id, sealed_meta, ciphertext, meta.imported_at.to_rfc3339()],
        )?;

        Ok(())
    }

    /// Get decrypted document content by ID.
    pub fn get_document(&self, id: &str) -> VaultResult<Vec<u8>> {
        let result = self.get_inner(id);
        match result {
            Ok(content) => {
                self.audit
                    .log_database_read("document", id, "content read", true, None)?;
                Ok(content)
            }
            Err(e) => {
                let _ = self.audit.log_database_read(
                    "document",
                    id,
                    "content read failed",
                    false,
                    Some(e.to_string()),
                );
                Err(e)
            }
        }
    }

    fn get_inner(&self, id: &str) -> VaultResult<Vec<u8>> {
        let _access = self.gate.enter();

        let row = {
            let conn = self.conn.lock();
            conn.query_row(
                "SELECT meta, content FROM documents WHERE id = ?1",
                params![id],
                |row| {
                    let meta: Vec<u8> = row.get(0)?;
                    let content: Vec<u8> = row.get(1)?;
                    Ok((meta, content))
                },
            )
            .optional()?
        };
        let (sealed_meta, ciphertext) =
            row.ok_or_else(|| VaultError::DocumentNotFound(id.to_string()))?;

        let meta: DocumentMeta = serde_json::from_slice(&self.encryption.open_metadata(&sealed_meta)?)
            .map_err(|e| VaultError::DeserializationError(e.to_string()))?;

        if !self.encryption.verify_content_hmac(&ciphertext, &meta.hmac)? {
            return Err(VaultError::TamperDetected(format!("document {id}")));
        }

        self.encryption.decrypt_document(id, &ciphertext)
    }

    /// Get document metadata by ID.
    pub fn get_metadata(&self, id: &str) -> VaultResult<DocumentMeta> {
        let result = self.metadata_inner(id);
        match result {
            Ok(meta) => {
                self.audit
                    .log_database_read("document", id, "metadata read", true, None)?;
                Ok(meta)
            }
            Err(e) => {
                let _ = self.audit.log_database_read(
                    "document",
                    id,
                    "metadata read failed",
                    false,
                    Some(e.to_string()),
                );
                Err(e)
            }
        }
    }

    fn metadata_inner(&self, id: &str) -> VaultResult<DocumentMeta> {
        let _access = self.gate.enter();

        let sealed: Option<Vec<u8>> = {
            let conn = self.conn.lock();
            conn.query_row(
                "SELECT meta FROM documents WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?
        };
        let sealed = sealed.ok_or_else(|| VaultError::DocumentNotFound(id.to_string()))?;

        serde_json::from_slice(&self.encryption.open_metadata(&sealed)?)
            .map_err(|e| VaultError::DeserializationError(e.to_string()))
    }

    /// List all documents, newest first. Records that cannot be opened are
    /// skipped rather than failing the whole listing.
    pub fn list_documents(&self) -> VaultResult<Vec<DocumentMeta>> {
        let result = self.list_inner();
        match result {
            Ok(metas) => {
                self.audit.log_database_read(
                    "document",
                    "list",
                    &format!("listed {} documents", metas.len()),
                    true,
                    None,
                )?;
                Ok(metas)
            }
            Err(e) => {
                let _ = self.audit.log_database_read(
                    "document",
                    "list",
                    "listing failed",
                    false,
                    Some(e.to_string()),
                );
                Err(e)
            }
        }
    }

    fn list_inner(&self) -> VaultResult<Vec<DocumentMeta>> {
        let _access = self.gate.enter();
        let conn = self.conn.lock();

        let mut stmt =
            conn.prepare("SELECT meta FROM documents ORDER BY created_at DESC, id DESC")?;
        let rows = stmt.query_map([], |row| {
            let sealed: Vec<u8> = row.get(0)?;
            Ok(sealed)
        })?;

        let mut metas = Vec::new();
        for sealed in rows.flatten() {
            if let Ok(plain) = self.encryption.open_metadata(&sealed) {
                if let Ok(meta) = serde_json::from_slice::<DocumentMeta>(&plain) {
                    metas.push(meta);
                }
            }
        }

        Ok(metas)
    }

    /// Delete a document.
    pub fn delete_document(&self, id: &str) -> VaultResult<()> {
        let result = self.delete_inner(id);
        match result {
            Ok(()) => {
                self.audit.log_database_write(
                    AuditAction::Delete,
                    "document",
                    id,
                    "document deleted",
                    true,
                    None,
                )?;
                Ok(())
            }
            Err(e) => {
                let _ = self.audit.log_database_write(
                    AuditAction::Delete,
                    "document",
                    id,
                    "delete failed",
                    false,
                    Some(e.to_string()),
                );
                Err(e)
            }
        }
    }

    fn delete_inner(&self, id: &str) -> VaultResult<()> {
        let _access = self.gate.enter();
        let conn = self.conn.lock();

        let changed = conn.execute("DELETE FROM documents WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(VaultError::DocumentNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Whole-store erasure of document content (reset flow). The audit
    /// ledger itself is not touched.
    pub fn erase_all(&self) -> VaultResult<usize> {
        let erased = {
            let _access = self.gate.enter();
            let conn = self.conn.lock();
            conn.execute("DELETE FROM documents", [])?
        };

        self.audit.log_database_write(
            AuditAction::Delete,
            "document",
            "*",
            &format!("erased {erased} documents"),
            true,
            None,
        )?;

        Ok(erased)
    }

    /// Number of stored documents.
    pub fn count(&self) -> VaultResult<u64> {
        let _access = self.gate.enter();
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

/// Detect MIME type from content magic bytes.
fn detect_mime(data: &[u8]) -> &'static str {
    if data.len() < 8 {
        return "application/octet-stream";
    }

    match data {
        [0x25, 0x50, 0x44, 0x46, ..] => "application/pdf",
        [0xFF, 0xD8, 0xFF, ..] => "image/jpeg",
        [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, ..] => "image/png",
        [0x49, 0x49, 0x2A, 0x00, ..] | [0x4D, 0x4D, 0x00, 0x2A, ..] => "image/tiff",
        [0x52, 0x49, 0x46, 0x46, ..] if data.len() > 12 && &data[8..12] == b"WEBP" => "image/webp",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::store::{AuditFilter, AuditStore};
    use crate::audit::{AuditLevel, SqliteAuditStore};
    use crate::biometrics::StaticBiometrics;
    use crate::crypto::MemoryKeyStore;
    use crate::ocr::{OcrText, DisabledOcr};

    struct Fixture {
        _dir: tempfile::TempDir,
        vault: DocumentVault,
        store: Arc<SqliteAuditStore>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("scanvault.db");
        let gate = Arc::new(StorageGate::new());
        let encryption = Arc::new(
            EncryptionService::new(
                Arc::new(MemoryKeyStore::new()),
                Arc::new(StaticBiometrics::unavailable()),
            )
            .unwrap(),
        );
        let store = Arc::new(SqliteAuditStore::open(&db, Arc::clone(&gate)).unwrap());
        let audit = Arc::new(AuditLoggingService::new(store.clone()));
        let vault = DocumentVault::open(&db, gate, encryption, audit).unwrap();

        Fixture {
            _dir: dir,
            vault,
            store,
        }
    }

    #[test]
    fn test_import_and_get_roundtrip() {
        let fx = fixture();
        let content = b"%PDF-1.7 scanned contract";

        let id = fx.vault.import_document(content, "contract.pdf", None).unwrap();
        assert_eq!(fx.vault.get_document(&id).unwrap(), content);

        let meta = fx.vault.get_metadata(&id).unwrap();
        assert_eq!(meta.original_name, "contract.pdf");
        assert_eq!(meta.mime_type, "application/pdf");
        assert_eq!(meta.original_size, content.len() as u64);
        assert!(meta.ocr_text.is_none());
    }

    #[test]
    fn test_reads_and_writes_emit_compulsory_entries() {
        let fx = fixture();

        let id = fx
            .vault
            .import_document(b"%PDF-1.7 x", "a.pdf", None)
            .unwrap();
        fx.vault.get_document(&id).unwrap();

        let compulsory = fx.store.count(Some(AuditLevel::Compulsory)).unwrap();
        assert_eq!(compulsory, 2);
        assert!(fx.store.verify_integrity().unwrap().is_empty());

        let entries = fx.store.get_entries(&AuditFilter::default()).unwrap();
        assert_eq!(entries[0].action, AuditAction::Read);
        assert_eq!(entries[1].action, AuditAction::Create);
        assert_eq!(entries[1].resource_id, id);
    }

    #[test]
    fn test_ocr_text_is_captured_when_engine_attached() {
        struct FixedOcr;
        impl OcrEngine for FixedOcr {
            fn extract(&self, _image: &[u8]) -> VaultResult<OcrText> {
                Ok(OcrText {
                    text: "INVOICE 42".into(),
                    confidence: 0.93,
                })
            }
        }

        let fx = fixture();
        let id = fx
            .vault
            .import_document(b"\xFF\xD8\xFF\xE0 jpeg frame", "scan.jpg", Some(&FixedOcr))
            .unwrap();

        let meta = fx.vault.get_metadata(&id).unwrap();
        assert_eq!(meta.mime_type, "image/jpeg");
        assert_eq!(meta.ocr_text.as_deref(), Some("INVOICE 42"));
        assert_eq!(meta.ocr_confidence, Some(0.93));
    }

    #[test]
    fn test_ocr_failure_never_fails_import() {
        struct BrokenOcr;
        impl OcrEngine for BrokenOcr {
            fn extract(&self, _image: &[u8]) -> VaultResult<OcrText> {
                Err(VaultError::Timeout("engine hung".into()))
            }
        }

        let fx = fixture();
        let id = fx
            .vault
            .import_document(b"%PDF-1.7 y", "b.pdf", Some(&BrokenOcr))
            .unwrap();
        assert!(fx.vault.get_metadata(&id).unwrap().ocr_text.is_none());
    }

    #[test]
    fn test_tampered_content_is_detected() {
        let fx = fixture();
        let id = fx
            .vault
            .import_document(b"%PDF-1.7 sensitive", "c.pdf", Some(&DisabledOcr))
            .unwrap();

        fx.vault
            .conn
            .lock()
            .execute(
                "UPDATE documents SET content = ?1 WHERE id = ?2",
                params![vec![0u8; 64], id],
            )
            .unwrap();

        let err = fx.vault.get_document(&id).unwrap_err();
        assert!(matches!(err, VaultError::TamperDetected(_)));

        // The failed read is itself on the ledger
        let last = fx.store.get_last().unwrap().unwrap();
        assert!(!last.is_success);
        assert_eq!(last.action, AuditAction::Read);
    }

    #[test]
    fn test_missing_document_logs_failed_read() {
        let fx = fixture();
        let err = fx.vault.get_document("no-such-id").unwrap_err();
        assert!(matches!(err, VaultError::DocumentNotFound(_)));

        let last = fx.store.get_last().unwrap().unwrap();
        assert!(!last.is_success);
        assert_eq!(last.level, AuditLevel::Compulsory);
    }

    #[test]
    fn test_delete_and_erase_all() {
        let fx = fixture();
        let a = fx.vault.import_document(b"%PDF-1.7 a", "a.pdf", None).unwrap();
        fx.vault.import_document(b"%PDF-1.7 b", "b.pdf", None).unwrap();

        fx.vault.delete_document(&a).unwrap();
        assert!(matches!(
            fx.vault.get_document(&a),
            Err(VaultError::DocumentNotFound(_))
        ));
        assert_eq!(fx.vault.count().unwrap(), 1);

        assert_eq!(fx.vault.erase_all().unwrap(), 1);
        assert_eq!(fx.vault.count().unwrap(), 0);
        assert!(fx.store.verify_integrity().unwrap().is_empty());
    }

    #[test]
    fn test_list_documents() {
        let fx = fixture();
        fx.vault.import_document(b"%PDF-1.7 a", "a.pdf", None).unwrap();
        fx.vault.import_document(b"\xFF\xD8\xFF\xE0", "b.jpg", None).unwrap();

        let metas = fx.vault.list_documents().unwrap();
        assert_eq!(metas.len(), 2);
        let names: Vec<_> = metas.iter().map(|m| m.original_name.as_str()).collect();
        assert!(names.contains(&"a.pdf"));
        assert!(names.contains(&"b.jpg"));
    }

    #[test]
    fn test_mime_detection() {
        assert_eq!(detect_mime(b"%PDF-1.7 ......."), "application/pdf");
        assert_eq!(detect_mime(&[0xFF, 0xD8, 0xFF, 0xE0, 0, 0, 0, 0]), "image/jpeg");
        assert_eq!(
            detect_mime(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]),
            "image/png"
        );
        assert_eq!(detect_mime(b"short"), "application/octet-stream");
        assert_eq!(detect_mime(b"plain text"), "application/octet-stream");
    }
}
