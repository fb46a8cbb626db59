//! File-based release certificate and the gate that reads it.
//!
//! A verification attempt writes exactly one of two files into the build's
//! metadata directory:
//! - `RUN_CERTIFICATE.json` (`status: "PASS"`)
//! - `RUN_FAILURE.json` (`status: "FAIL"`, with `error`)
//!
//! [`CertificateGate`] classifies whatever is on disk. It never writes, never
//! caches, and treats every I/O or parse problem as not-ok.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{GateError, Result};
use crate::obs;

pub const CERTIFICATE_FILE: &str = "RUN_CERTIFICATE.json";
pub const FAILURE_FILE: &str = "RUN_FAILURE.json";

pub const STATUS_PASS: &str = "PASS";
pub const STATUS_FAIL: &str = "FAIL";

/// Contents of `RUN_CERTIFICATE.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunCertificate {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub project: PathBuf,
    #[serde(default)]
    pub verification_type: String,
    #[serde(default)]
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunCertificate {
    pub fn pass(
        project: impl Into<PathBuf>,
        verification_type: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            status: STATUS_PASS.to_string(),
            timestamp: Utc::now(),
            project: project.into(),
            verification_type: verification_type.into(),
            command: command.into(),
            score: None,
            report_digest: None,
            error: None,
        }
    }

    pub fn with_score(mut self, score: u8) -> Self {
        self.score = Some(score);
        self
    }

    pub fn with_report_digest(mut self, digest: impl Into<String>) -> Self {
        self.report_digest = Some(digest.into());
        self
    }
}

/// Contents of `RUN_FAILURE.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunFailure {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub project: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_type: Option<String>,
    pub command: String,
    #[serde(default)]
    pub error: Option<String>,
}

impl RunFailure {
    pub fn new(
        project: impl Into<PathBuf>,
        command: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            status: STATUS_FAIL.to_string(),
            timestamp: Utc::now(),
            project: project.into(),
            verification_type: None,
            command: command.into(),
            error: Some(error.into()),
        }
    }

    pub fn with_verification_type(mut self, verification_type: impl Into<String>) -> Self {
        self.verification_type = Some(verification_type.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Writers
// ---------------------------------------------------------------------------

/// Remove both outcome files so the next attempt starts clean.
pub fn clear_outcome(metadata_dir: &Path) -> Result<()> {
    for name in [CERTIFICATE_FILE, FAILURE_FILE] {
        match std::fs::remove_file(metadata_dir.join(name)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Write `RUN_CERTIFICATE.json`, replacing any previous outcome.
pub fn write_certificate(metadata_dir: &Path, certificate: &RunCertificate) -> Result<PathBuf> {
    std::fs::create_dir_all(metadata_dir)?;
    clear_outcome(metadata_dir)?;
    let path = metadata_dir.join(CERTIFICATE_FILE);
    std::fs::write(&path, serde_json::to_vec_pretty(certificate)?)?;
    Ok(path)
}

/// Write `RUN_FAILURE.json`, replacing any previous outcome.
pub fn write_failure(metadata_dir: &Path, failure: &RunFailure) -> Result<PathBuf> {
    std::fs::create_dir_all(metadata_dir)?;
    clear_outcome(metadata_dir)?;
    let path = metadata_dir.join(FAILURE_FILE);
    std::fs::write(&path, serde_json::to_vec_pretty(failure)?)?;
    Ok(path)
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

/// `{ok, error?, path}` view of a gate decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GateOutcome {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The file the decision was based on.
    pub path: PathBuf,
}

/// Fail-closed release gate over the metadata directory.
pub struct CertificateGate;

impl CertificateGate {
    /// Classify the on-disk state of `metadata_dir`.
    pub fn check(metadata_dir: &Path) -> GateOutcome {
        let (path, decision) = Self::decide(metadata_dir);
        let outcome = GateOutcome {
            ok: decision.is_ok(),
            error: decision.err().map(|e| e.to_string()),
            path,
        };
        obs::emit_gate_evaluated(
            &outcome.path.display().to_string(),
            outcome.ok,
            outcome.error.as_deref(),
        );
        outcome
    }

    /// The parsed certificate, or the typed reason the gate refuses.
    pub fn evaluate(metadata_dir: &Path) -> std::result::Result<RunCertificate, GateError> {
        Self::decide(metadata_dir).1
    }

    fn decide(metadata_dir: &Path) -> (PathBuf, std::result::Result<RunCertificate, GateError>) {
        let failure_path = metadata_dir.join(FAILURE_FILE);
        let failure_present = match entry_present(&failure_path) {
            Ok(present) => present,
            Err(reason) => return (failure_path, Err(GateError::FailureUnreadable { reason })),
        };
        if failure_present {
            let err = match read_json(&failure_path) {
                Ok(v) => GateError::FailureRecorded {
                    error: v
                        .get("error")
                        .and_then(|e| e.as_str())
                        .map(str::to_string)
                        .unwrap_or_else(|| "Verification failed".to_string()),
                },
                Err(reason) => GateError::FailureUnreadable { reason },
            };
            return (failure_path, Err(err));
        }

        let cert_path = metadata_dir.join(CERTIFICATE_FILE);
        match entry_present(&cert_path) {
            Ok(true) => {}
            Ok(false) => return (cert_path, Err(GateError::CertificateNotFound)),
            Err(reason) => {
                return (cert_path, Err(GateError::CertificateUnreadable { reason }));
            }
        }

        let decision = read_json(&cert_path)
            .map_err(|reason| GateError::CertificateUnreadable { reason })
            .and_then(|v| {
                let status = v
                    .get("status")
                    .and_then(|s| s.as_str())
                    .unwrap_or_default()
                    .to_string();
                if status != STATUS_PASS {
                    return Err(GateError::WrongStatus { status });
                }
                serde_json::from_value::<RunCertificate>(v).map_err(|e| {
                    GateError::CertificateUnreadable {
                        reason: e.to_string(),
                    }
                })
            });
        (cert_path, decision)
    }
}

/// Whether a directory entry exists at `path`, without following symlinks.
/// Only a clean "not found" counts as absent; a dangling link is present.
fn entry_present(path: &Path) -> std::result::Result<bool, String> {
    match std::fs::symlink_metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.to_string()),
    }
}

/// Parse a file as a JSON object; any failure is reported as a string reason.
fn read_json(path: &Path) -> std::result::Result<serde_json::Value, String> {
    let bytes = std::fs::read(path).map_err(|e| e.to_string())?;
    let value: serde_json::Value = serde_json::from_slice(&bytes).map_err(|e| e.to_string())?;
    if !value.is_object() {
        return Err("expected a JSON object".to_string());
    }
    Ok(value)
}
