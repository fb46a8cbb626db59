//! Append-only provenance ledger.
//!
//! Every phase and gate transition becomes one JSON object on its own line in
//! `<project>/.appfactory/audit.log`. The log is never truncated or rewritten;
//! there is no query API, the file is for later inspection.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::Result;

/// Directory under the project root holding engine metadata.
pub const METADATA_DIR: &str = ".appfactory";

/// Audit log file name inside [`METADATA_DIR`].
pub const AUDIT_LOG_FILE: &str = "audit.log";

/// One provenance record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub pipeline: String,
    pub phase: String,
    pub status: String,
    pub message: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl AuditEvent {
    pub fn new(
        pipeline: impl Into<String>,
        phase: impl Into<String>,
        status: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            pipeline: pipeline.into(),
            phase: phase.into(),
            status: status.into(),
            message: message.into(),
            data: Map::new(),
        }
    }

    /// Attach one data field.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// Write-only JSON Lines sink.
///
/// Cloning shares the same file and the same write lock, so concurrent
/// appends from clones never interleave within a line.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// The conventional log location for a project root.
    pub fn for_project(project: &Path) -> Self {
        Self::new(project.join(METADATA_DIR).join(AUDIT_LOG_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serialize `event` as one line and append it, creating parent
    /// directories on first use.
    pub async fn append(&self, event: &AuditEvent) -> Result<()> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}
