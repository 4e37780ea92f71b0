//! Scanvault - Tamper-Evident Audit Trail
//!
//! Checksum-chained entries over an append-only SQLite ledger.

pub mod entry;
pub mod service;
pub mod store;

pub use entry::{AuditAction, AuditEntry, AuditLevel};
pub use service::AuditLoggingService;
pub use store::{AuditFilter, AuditStore, SqliteAuditStore};
