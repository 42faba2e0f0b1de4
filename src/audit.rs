//! Audit trail of decisions and merges
//!
//! Decisions are not persisted anywhere else, so the audit log is the only
//! record of why a candidate was created, merged or refreshed.

use crate::document::DocumentId;
use crate::gate::ConsolidationDecision;
use crate::merge::MergeReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit log IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("audit entry serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("audit log lock poisoned")]
    Poisoned,
}

pub type AuditResult<T> = Result<T, AuditError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    Decision {
        decision: ConsolidationDecision,
    },
    Create {
        doc_id: DocumentId,
        revision: u64,
    },
    Merge {
        doc_id: DocumentId,
        revision: u64,
        report: MergeReport,
    },
    Archive {
        doc_id: DocumentId,
        revision: u64,
    },
    /// A document write was undone because indexing failed
    Rollback {
        doc_id: DocumentId,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: AuditEvent,
}

impl AuditEntry {
    pub fn now(event: AuditEvent) -> Self {
        Self {
            at: Utc::now(),
            event,
        }
    }
}

/// Sink for audit entries
pub trait AuditLog: Send + Sync {
    fn record(&self, entry: &AuditEntry) -> AuditResult<()>;
}

/// Append-only JSON-lines file
pub struct JsonlAuditLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlAuditLog {
    pub fn open(path: impl AsRef<Path>) -> AuditResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every entry back, oldest first.
    pub fn read_entries(path: impl AsRef<Path>) -> AuditResult<Vec<AuditEntry>> {
        let reader = BufReader::new(File::open(path)?);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            entries.push(serde_json::from_str(&line)?);
        }
        Ok(entries)
    }
}

impl AuditLog for JsonlAuditLog {
    fn record(&self, entry: &AuditEntry) -> AuditResult<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let mut file = self.file.lock().map_err(|_| AuditError::Poisoned)?;
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }
}

/// In-memory log (tests)
#[derive(Default)]
pub struct MemoryAuditLog {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl AuditLog for MemoryAuditLog {
    fn record(&self, entry: &AuditEntry) -> AuditResult<()> {
        self.entries
            .lock()
            .map_err(|_| AuditError::Poisoned)?
            .push(entry.clone());
        Ok(())
    }
}
