//! Append-only audit trail of what the tool did to the host.
//!
//! Separate from diagnostic logging: one `<YYYY-MM-DD HH:MM:SS>: <message>`
//! line per event, never truncated.

use chrono::Local;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

/// Timestamp format of audit entries
pub const AUDIT_STAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Receives audit events
pub trait AuditSink {
    fn record(&self, message: &str);
}

/// Format one audit line (without newline)
pub fn format_entry(message: &str) -> String {
    format!("{}: {}", Local::now().format(AUDIT_STAMP_FORMAT), message)
}

/// Appends entries to a log file
#[derive(Debug, Clone)]
pub struct FileAuditSink {
    path: PathBuf,
}

impl FileAuditSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{}", line)
    }
}

impl AuditSink for FileAuditSink {
    fn record(&self, message: &str) {
        // A failing audit log must not abort a half-finished mutation
        if let Err(e) = self.append(&format_entry(message)) {
            warn!("Cannot write audit log {}: {}", self.path.display(), e);
        }
    }
}

/// Keeps entries in memory (tests, `--check` previews)
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<String>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded messages, without timestamps
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.entries().iter().any(|e| e.contains(needle))
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, message: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(message.to_string());
        }
    }
}
