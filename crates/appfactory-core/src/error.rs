//! Error taxonomy for the pipeline engine.

use crate::phase::{PhaseId, PhaseStatus};

/// Reasons the release gate refuses a build.
///
/// Each variant renders a distinct message so operators can tell a missing
/// certificate from an unreadable one without re-running verification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    /// `RUN_FAILURE.json` is present; its `error` field is surfaced verbatim.
    #[error("{error}")]
    FailureRecorded { error: String },

    #[error("RUN_FAILURE.json exists but unreadable: {reason}")]
    FailureUnreadable { reason: String },

    #[error("RUN_CERTIFICATE.json not found")]
    CertificateNotFound,

    #[error("RUN_CERTIFICATE.json exists but unreadable: {reason}")]
    CertificateUnreadable { reason: String },

    #[error("Certificate status: {status}")]
    WrongStatus { status: String },
}

/// Engine errors.
#[derive(Debug, thiserror::Error)]
pub enum FactoryError {
    #[error("duplicate check id: {0}")]
    DuplicateCheck(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid phase transition for {phase}: {from} -> {to}")]
    InvalidTransition {
        phase: PhaseId,
        from: PhaseStatus,
        to: PhaseStatus,
    },

    #[error("phase {phase} failed: {reason}")]
    PhaseFailed { phase: PhaseId, reason: String },

    #[error("release gate rejected build: {0}")]
    Gate(#[from] GateError),

    #[error("run cancelled before phase {phase}")]
    Cancelled { phase: PhaseId },

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, FactoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_error_messages_are_distinct() {
        assert_eq!(
            GateError::CertificateNotFound.to_string(),
            "RUN_CERTIFICATE.json not found"
        );
        assert_eq!(
            GateError::WrongStatus {
                status: "FAIL".to_string()
            }
            .to_string(),
            "Certificate status: FAIL"
        );
        assert_eq!(
            GateError::FailureRecorded {
                error: "npm test exited with 1".to_string()
            }
            .to_string(),
            "npm test exited with 1"
        );
        assert!(GateError::CertificateUnreadable {
            reason: "eof".to_string()
        }
        .to_string()
        .contains("exists but unreadable"));
    }

    #[test]
    fn test_phase_failed_display() {
        let err = FactoryError::PhaseFailed {
            phase: PhaseId::Install,
            reason: "npm install exited with code 1".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("install"));
        assert!(msg.contains("exited with code 1"));
    }

    #[test]
    fn test_gate_error_converts() {
        let err: FactoryError = GateError::CertificateNotFound.into();
        assert!(err.to_string().contains("RUN_CERTIFICATE.json not found"));
    }
}
