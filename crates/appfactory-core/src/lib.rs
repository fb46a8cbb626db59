//! App Factory Core
//!
//! The pipeline execution and quality-gate engine shared by every generator
//! (mobile app, dApp, mini-app, plugin, chatbot):
//! - `registry`: weighted pass/fail checks
//! - `ralph`: the iterate-until-pass QA loop
//! - `report`: Markdown renderings of a finished loop
//! - `certificate`: the file-based release gate
//! - `audit`: append-only JSON Lines provenance
//! - `phase`: the Inputs -> Scaffold -> Install -> Verify -> Cert-check -> Launch runner

pub mod audit;
pub mod certificate;
pub mod config;
pub mod error;
pub mod model;
pub mod obs;
pub mod phase;
pub mod ralph;
pub mod registry;
pub mod report;
pub mod telemetry;

pub use audit::{AuditEvent, AuditLog, AUDIT_LOG_FILE, METADATA_DIR};
pub use certificate::{
    clear_outcome, write_certificate, write_failure, CertificateGate, GateOutcome, RunCertificate,
    RunFailure, CERTIFICATE_FILE, FAILURE_FILE,
};
pub use config::RalphConfig;
pub use error::{FactoryError, GateError, Result};
pub use model::{
    sort_issues, CheckMeta, CheckResult, E2eFailure, E2eResult, Issue, IterationResult, Report,
    Severity, SkillAuditResult, Verdict,
};
pub use obs::run_span;
pub use phase::{
    run_verification, AuditIterationObserver, Phase, PhaseContext, PhaseId, PhaseRunner,
    PhaseStatus, PipelineRun, PipelineSteps, REPORT_DIR,
};
pub use ralph::{
    completion_promise, compute_score, verdict_for, E2eRunner, IterationObserver, RalphEngine,
    ReportBuilder, SkillAuditRunner,
};
pub use registry::{Check, CheckContext, CheckRegistry, PredicateCheck, DEFAULT_CHECK_TIMEOUT};
pub use report::{
    read_report_artifact, report_digest, write_report_artifacts, ReportArtifacts, ReportGenerator,
};
pub use telemetry::init_tracing;

/// App Factory version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
