//! Scanvault - CLI
//!
//! Command-line interface for vault, audit and backup operations.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use scanvault::audit::store::AuditStore;
use scanvault::backup::QuiescedStorage;
use scanvault::biometrics::StaticBiometrics;
use scanvault::crypto::keys::FileKeyStore;
use scanvault::{
    AuditFilter, AuditLoggingService, BackupConfig, BackupManager, DiagConfig, DocumentVault,
    EncryptionService, LocalDirStorage, SqliteAuditStore, StorageGate, TroubleshootingLogger,
    APP_ID,
};

#[derive(Parser)]
#[command(name = "scanvault")]
#[command(version = scanvault::VERSION)]
#[command(about = "Scanvault - Encrypted document vault with a tamper-evident audit trail")]
struct Cli {
    /// Data directory (database, keys, staging)
    #[arg(short, long, default_value = "./scanvault_data")]
    data_dir: PathBuf,

    /// Backup target directory (stands in for the cloud provider)
    #[arg(short, long, default_value = "./scanvault_backups")]
    backup_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import a scanned document
    Import {
        /// Document path
        path: PathBuf,
    },

    /// Export a decrypted document
    Get {
        /// Document ID
        id: String,

        /// Output path
        output: PathBuf,
    },

    /// List all documents
    List,

    /// Delete a document
    Delete {
        /// Document ID
        id: String,
    },

    /// Show recent audit entries
    Audit {
        /// Maximum entries to show
        #[arg(short, long, default_value_t = 20)]
        limit: u64,
    },

    /// Verify audit ledger integrity
    Verify,

    /// Export an encrypted backup
    ExportBackup {
        /// Backup password
        #[arg(short, long)]
        password: String,

        /// Backup filename (defaults to the dated convention)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Restore an encrypted backup
    ImportBackup {
        /// Backup filename
        name: String,

        /// Backup password
        #[arg(short, long)]
        password: String,

        /// Keep a copy of the current database before replacing it
        #[arg(long)]
        keep_current: bool,
    },

    /// List available backups
    ListBackups,

    /// Rotate the device encryption key
    RotateKey,

    /// Destroy the device encryption key (irreversible)
    ClearKey {
        /// Confirm the irreversible erasure
        #[arg(long)]
        yes: bool,
    },
}

struct App {
    vault: Arc<DocumentVault>,
    store: Arc<SqliteAuditStore>,
    audit: Arc<AuditLoggingService>,
    encryption: Arc<EncryptionService>,
    manager: BackupManager,
}

fn build_app(cli: &Cli) -> anyhow::Result<App> {
    let db_path = cli.data_dir.join("scanvault.db");

    let gate = Arc::new(StorageGate::new());
    let key_store = Arc::new(
        FileKeyStore::new(cli.data_dir.join("keys")).context("open key store")?,
    );
    let encryption = Arc::new(
        EncryptionService::new(key_store, Arc::new(StaticBiometrics::unavailable()))
            .context("initialize encryption")?,
    );
    let store = Arc::new(
        SqliteAuditStore::open(&db_path, Arc::clone(&gate)).context("open audit ledger")?,
    );
    let audit = Arc::new(AuditLoggingService::new(store.clone()));

    let diag = Arc::new(TroubleshootingLogger::new(
        cli.data_dir.join("logs").join("diag.log"),
        DiagConfig::default(),
    ));
    audit.attach_diagnostics(diag);

    let vault = Arc::new(
        DocumentVault::open(
            &db_path,
            Arc::clone(&gate),
            Arc::clone(&encryption),
            Arc::clone(&audit),
        )
        .context("open document vault")?,
    );

    let cloud = Arc::new(LocalDirStorage::new(&cli.backup_dir).context("open backup target")?);
    let manager = BackupManager::new(
        BackupConfig {
            app_id: APP_ID.into(),
            staging_dir: cli.data_dir.join("staging"),
        },
        db_path,
        gate,
        Arc::clone(&encryption),
        Arc::clone(&audit),
        cloud,
        vec![
            store.clone() as Arc<dyn QuiescedStorage>,
            vault.clone() as Arc<dyn QuiescedStorage>,
        ],
    );

    Ok(App {
        vault,
        store,
        audit,
        encryption,
        manager,
    })
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let app = build_app(&cli)?;

    match cli.command {
        Commands::Import { path } => {
            let content = std::fs::read(&path)
                .with_context(|| format!("read {}", path.display()))?;
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("unknown");

            let id = app.vault.import_document(&content, name, None)?;
            println!("✅ Document imported with ID: {id}");
        }

        Commands::Get { id, output } => {
            let content = app.vault.get_document(&id)?;
            std::fs::write(&output, &content)?;
            println!("✅ Document exported to: {}", output.display());
        }

        Commands::List => {
            let docs = app.vault.list_documents()?;
            if docs.is_empty() {
                println!("📭 No documents in vault");
            } else {
                println!("📄 Documents in vault ({}):", docs.len());
                println!("{:-<60}", "");
                for doc in docs {
                    println!(
                        "{} - {} ({}, {} bytes)",
                        doc.id, doc.original_name, doc.mime_type, doc.original_size
                    );
                }
            }
        }

        Commands::Delete { id } => {
            app.vault.delete_document(&id)?;
            println!("🗑️ Document deleted: {id}");
        }

        Commands::Audit { limit } => {
            let entries = app.store.get_entries(&AuditFilter {
                limit: Some(limit),
                ..Default::default()
            })?;
            println!("📜 Audit trail (latest {}):", entries.len());
            println!("{:-<72}", "");
            for entry in entries {
                let status = if entry.is_success { "ok" } else { "FAILED" };
                println!(
                    "{} [{}] {} {}/{} user={} {}",
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    entry.level.as_str(),
                    entry.action.as_str(),
                    entry.resource_type,
                    entry.resource_id,
                    entry.user_id,
                    status
                );
            }
        }

        Commands::Verify => {
            let violations = app.store.verify_integrity()?;
            let total = app.store.count(None)?;
            if violations.is_empty() {
                println!("💚 Ledger consistent: {total} entries, no violations");
            } else {
                println!("⚠️ {} of {total} entries violate integrity:", violations.len());
                for id in violations {
                    println!("   - {id}");
                }
            }
        }

        Commands::ExportBackup { password, name } => {
            println!("🔐 Exporting encrypted backup...");
            let report = app.manager.export(&password, name, None).await?;
            println!(
                "✅ Backup exported: {} ({} bytes)",
                report.remote_name, report.bytes
            );
        }

        Commands::ImportBackup {
            name,
            password,
            keep_current,
        } => {
            println!("🔓 Restoring encrypted backup: {name}");
            let report = app.manager.import(&name, &password, keep_current, None).await?;
            if let Some(copy) = report.pre_restore_copy {
                println!("   Previous database kept at: {}", copy.display());
            }
            println!("✅ Backup restored: {}", report.remote_name);
        }

        Commands::ListBackups => {
            let names = app.manager.list_backups().await?;
            if names.is_empty() {
                println!("📭 No backups found");
            } else {
                println!("💾 Available backups:");
                for name in names {
                    println!("   {name}");
                }
            }
        }

        Commands::RotateKey => {
            let epoch = app.encryption.change_key()?;
            app.audit.log_info_action(
                scanvault::AuditAction::KeyRotation,
                "device_key",
                &epoch.to_string(),
                "device key rotated",
            )?;
            println!("🔑 Device key rotated. New epoch: {epoch}");
        }

        Commands::ClearKey { yes } => {
            if !yes {
                anyhow::bail!("refusing to erase key material without --yes");
            }
            app.encryption.clear_key()?;
            app.audit.log_info_action(
                scanvault::AuditAction::KeyErasure,
                "device_key",
                "*",
                "device key destroyed",
            )?;
            println!("🧨 Device key destroyed. Encrypted data is unrecoverable.");
        }
    }

    Ok(())
}
