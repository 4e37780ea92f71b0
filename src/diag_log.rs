//! Scanvault - Troubleshooting Log
//!
//! Diagnostic channel independent of the audit ledger: a rotating JSON-lines
//! file with a bounded in-memory tail for fast export. Advisory only, not
//! tamper-evident. Every failure in here is swallowed — logging must never
//! abort the operation being logged.

use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Diagnostic severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl DiagLevel {
    fn priority(&self) -> u8 {
        match self {
            DiagLevel::Debug => 0,
            DiagLevel::Info => 1,
            DiagLevel::Warn => 2,
            DiagLevel::Error => 3,
        }
    }
}

/// One diagnostic record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagEntry {
    pub timestamp: DateTime<Utc>,
    pub level: DiagLevel,
    pub tag: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
}

/// Logger configuration
#[derive(Debug, Clone)]
pub struct DiagConfig {
    /// Minimum level written to disk and tail
    pub min_level: DiagLevel,
    /// Rotate when the current file exceeds this size
    pub max_file_bytes: u64,
    /// Rotated files older than this are pruned
    pub max_age_days: i64,
    /// Keep at most this many rotated files
    pub keep_rotated: usize,
    /// Bounded in-memory tail length
    pub tail_capacity: usize,
}

impl Default for DiagConfig {
    fn default() -> Self {
        Self {
            min_level: DiagLevel::Debug,
            max_file_bytes: 1024 * 1024,
            max_age_days: 7,
            keep_rotated: 3,
            tail_capacity: 256,
        }
    }
}

/// Troubleshooting Logger
pub struct TroubleshootingLogger {
    path: PathBuf,
    config: DiagConfig,
    tail: Mutex<VecDeque<DiagEntry>>,
}

impl TroubleshootingLogger {
    /// Construction never fails; a logger with an unwritable path simply
    /// keeps its in-memory tail.
    pub fn new<P: AsRef<Path>>(path: P, config: DiagConfig) -> Self {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        Self {
            path,
            config,
            tail: Mutex::new(VecDeque::new()),
        }
    }

    /// Record a diagnostic entry. Never raises.
    pub fn log(
        &self,
        level: DiagLevel,
        tag: &str,
        message: &str,
        error: Option<&str>,
        metadata: Option<HashMap<String, String>>,
    ) {
        if level.priority() < self.config.min_level.priority() {
            return;
        }

        let entry = DiagEntry {
            timestamp: Utc::now(),
            level,
            tag: tag.to_string(),
            message: message.to_string(),
            error: error.map(|e| e.to_string()),
            metadata,
        };

        {
            let mut tail = self.tail.lock();
            tail.push_back(entry.clone());
            while tail.len() > self.config.tail_capacity {
                tail.pop_front();
            }
        }

        match level {
            DiagLevel::Debug => log::debug!("[{}] {}", tag, message),
            DiagLevel::Info => log::info!("[{}] {}", tag, message),
            DiagLevel::Warn => log::warn!("[{}] {}", tag, message),
            DiagLevel::Error => log::error!("[{}] {}", tag, message),
        }

        self.write_line(&entry);
    }

    pub fn debug(&self, tag: &str, message: &str) {
        self.log(DiagLevel::Debug, tag, message, None, None);
    }

    pub fn info(&self, tag: &str, message: &str) {
        self.log(DiagLevel::Info, tag, message, None, None);
    }

    pub fn warn(&self, tag: &str, message: &str) {
        self.log(DiagLevel::Warn, tag, message, None, None);
    }

    pub fn error(&self, tag: &str, message: &str, error: Option<&str>) {
        self.log(DiagLevel::Error, tag, message, error, None);
    }

    /// Snapshot of the bounded in-memory tail, oldest first.
    pub fn tail(&self) -> Vec<DiagEntry> {
        self.tail.lock().iter().cloned().collect()
    }

    fn write_line(&self, entry: &DiagEntry) {
        self.rotate_if_needed();

        let Ok(line) = serde_json::to_string(entry) else {
            return;
        };

        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| writeln!(file, "{line}"));

        // Swallowed: diagnostics must never interrupt the caller
        let _ = result;
    }

    fn rotate_if_needed(&self) {
        let Ok(meta) = std::fs::metadata(&self.path) else {
            return;
        };
        if meta.len() < self.config.max_file_bytes {
            return;
        }

        let rotated = self
            .path
            .with_extension(format!("{}.log", Utc::now().format("%Y%m%d%H%M%S%f")));
        if std::fs::rename(&self.path, &rotated).is_ok() {
            self.prune_rotated();
        }
    }

    fn prune_rotated(&self) {
        let Some(parent) = self.path.parent() else {
            return;
        };
        let Some(stem) = self.path.file_stem().and_then(|s| s.to_str()) else {
            return;
        };
        let Ok(dir) = std::fs::read_dir(parent) else {
            return;
        };

        let current = self.path.file_name();
        let mut rotated: Vec<PathBuf> = dir
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name() != current
                    && p.file_name()
                        .and_then(|n| n.to_str())
                        .map(|n| n.starts_with(stem))
                        .unwrap_or(false)
            })
            .collect();
        rotated.sort();

        // Oldest first: drop by count, then by age
        while rotated.len() > self.config.keep_rotated {
            let _ = std::fs::remove_file(rotated.remove(0));
        }

        let cutoff = Utc::now() - Duration::days(self.config.max_age_days);
        for path in rotated {
            let too_old = std::fs::metadata(&path)
                .and_then(|m| m.modified())
                .map(|t| DateTime::<Utc>::from(t) < cutoff)
                .unwrap_or(false);
            if too_old {
                let _ = std::fs::remove_file(path);
            }
        }
    }
}
