//! Sequential phase runner.
//!
//! A pipeline invocation walks a fixed sequence:
//! Inputs -> Scaffold -> Install -> Verify -> Cert-check -> Launch.
//!
//! Every status change is written to the [`AuditLog`]. A failed phase halts
//! the run immediately; there is no rollback and no retry. Verify delegates
//! to the [`RalphEngine`], Cert-check delegates to the [`CertificateGate`],
//! and Launch is unreachable unless the gate accepts the certificate.

use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::watch;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditLog, METADATA_DIR};
use crate::certificate::{self, CertificateGate, RunCertificate, RunFailure};
use crate::error::{FactoryError, Result};
use crate::model::{IterationResult, Report};
use crate::obs;
use crate::ralph::{IterationObserver, RalphEngine};
use crate::registry::CheckContext;
use crate::report::write_report_artifacts;

/// Directory under the metadata dir receiving report artifacts.
pub const REPORT_DIR: &str = "ralph";

/// Verification type recorded in certificates written by the Verify phase.
pub const RALPH_VERIFICATION: &str = "ralph";

// ---------------------------------------------------------------------------
// Phases
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PhaseId {
    Inputs,
    Scaffold,
    Install,
    Verify,
    CertCheck,
    Launch,
}

impl PhaseId {
    /// Execution order.
    pub const ALL: [PhaseId; 6] = [
        PhaseId::Inputs,
        PhaseId::Scaffold,
        PhaseId::Install,
        PhaseId::Verify,
        PhaseId::CertCheck,
        PhaseId::Launch,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PhaseId::Inputs => "inputs",
            PhaseId::Scaffold => "scaffold",
            PhaseId::Install => "install",
            PhaseId::Verify => "verify",
            PhaseId::CertCheck => "cert-check",
            PhaseId::Launch => "launch",
        }
    }
}

impl std::fmt::Display for PhaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    Pending,
    Active,
    Complete,
    Failed,
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseStatus::Pending => "pending",
            PhaseStatus::Active => "active",
            PhaseStatus::Complete => "complete",
            PhaseStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PhaseStatus::Complete | PhaseStatus::Failed)
    }
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    pub id: PhaseId,
    pub name: String,
    pub status: PhaseStatus,
}

impl Phase {
    pub fn new(id: PhaseId) -> Self {
        Self {
            id,
            name: id.name().to_string(),
            status: PhaseStatus::Pending,
        }
    }

    /// Allowed: pending -> active, active -> complete | failed, and
    /// pending -> failed for a phase aborted before it started.
    pub fn transition(&mut self, to: PhaseStatus) -> Result<()> {
        let allowed = matches!(
            (self.status, to),
            (PhaseStatus::Pending, PhaseStatus::Active)
                | (PhaseStatus::Pending, PhaseStatus::Failed)
                | (PhaseStatus::Active, PhaseStatus::Complete)
                | (PhaseStatus::Active, PhaseStatus::Failed)
        );
        if !allowed {
            return Err(FactoryError::InvalidTransition {
                phase: self.id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Handles passed to every external phase step.
#[derive(Debug, Clone)]
pub struct PhaseContext {
    pub run_id: String,
    pub pipeline: String,
    pub project: PathBuf,
    pub metadata_dir: PathBuf,
    /// Values gathered by the Inputs phase.
    pub inputs: Map<String, Value>,
    pub audit: AuditLog,
}

/// The pipeline-specific work the runner sequences.
#[async_trait]
pub trait PipelineSteps: Send + Sync {
    async fn collect_inputs(&self, _ctx: &PhaseContext) -> anyhow::Result<Map<String, Value>> {
        Ok(Map::new())
    }

    async fn scaffold(&self, ctx: &PhaseContext) -> anyhow::Result<()>;

    async fn install(&self, ctx: &PhaseContext) -> anyhow::Result<()>;

    async fn launch(&self, ctx: &PhaseContext) -> anyhow::Result<()>;
}

/// Records each Ralph iteration in the audit log under the verify phase.
#[derive(Debug, Clone)]
pub struct AuditIterationObserver {
    pipeline: String,
    audit: AuditLog,
}

impl AuditIterationObserver {
    pub fn new(pipeline: impl Into<String>, audit: AuditLog) -> Self {
        Self {
            pipeline: pipeline.into(),
            audit,
        }
    }
}

#[async_trait]
impl IterationObserver for AuditIterationObserver {
    async fn on_iteration_start(&self, ctx: &CheckContext) {
        let event = AuditEvent::new(
            &ctx.pipeline,
            PhaseId::Verify.name(),
            "iteration-started",
            format!("Ralph iteration {}", ctx.iteration),
        )
        .with("iteration", ctx.iteration);
        if let Err(e) = self.audit.append(&event).await {
            obs::emit_audit_append_failed(&ctx.pipeline, &e);
        }
    }

    async fn on_iteration_complete(&self, result: &IterationResult) {
        let event = AuditEvent::new(
            &self.pipeline,
            PhaseId::Verify.name(),
            "iteration-complete",
            format!(
                "Ralph iteration {}: {} at {}/100",
                result.iteration, result.verdict, result.score
            ),
        )
        .with("iteration", result.iteration)
        .with("score", result.score)
        .with("verdict", result.verdict.as_str())
        .with("issues", result.issues_to_fix.len());
        if let Err(e) = self.audit.append(&event).await {
            obs::emit_audit_append_failed(&self.pipeline, &e);
        }
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Outcome of a run that reached Launch.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub run_id: String,
    pub pipeline: String,
    pub project: PathBuf,
    pub phases: Vec<Phase>,
    pub report: Report,
    pub certificate: RunCertificate,
    pub duration_ms: u64,
}

/// Sequences the phases of one pipeline invocation.
#[derive(Debug)]
pub struct PhaseRunner {
    run_id: String,
    pipeline: String,
    project: PathBuf,
    metadata_dir: PathBuf,
    audit: AuditLog,
    phases: Vec<Phase>,
    cancel: Option<watch::Receiver<bool>>,
    report: Option<Report>,
}

impl PhaseRunner {
    pub fn new(pipeline: impl Into<String>, project: impl Into<PathBuf>) -> Self {
        let project = project.into();
        Self {
            run_id: Uuid::new_v4().to_string(),
            pipeline: pipeline.into(),
            metadata_dir: project.join(METADATA_DIR),
            audit: AuditLog::for_project(&project),
            project,
            phases: PhaseId::ALL.iter().map(|&id| Phase::new(id)).collect(),
            cancel: None,
            report: None,
        }
    }

    pub fn with_audit_log(mut self, audit: AuditLog) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_metadata_dir(mut self, metadata_dir: impl Into<PathBuf>) -> Self {
        self.metadata_dir = metadata_dir.into();
        self
    }

    /// Abort before the next phase once the receiver observes `true`.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn phase(&self, id: PhaseId) -> &Phase {
        // `phases` always holds every PhaseId in order.
        &self.phases[PhaseId::ALL.iter().position(|p| *p == id).unwrap_or(0)]
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    pub fn metadata_dir(&self) -> &Path {
        &self.metadata_dir
    }

    /// The Ralph report from the Verify phase, if it ran.
    pub fn report(&self) -> Option<&Report> {
        self.report.as_ref()
    }

    /// Execute all phases in order. Stops at the first failure.
    pub async fn run(
        &mut self,
        steps: &dyn PipelineSteps,
        engine: &RalphEngine,
    ) -> Result<PipelineRun> {
        let span = obs::run_span(&self.pipeline, &self.run_id);
        self.run_phases(steps, engine).instrument(span).await
    }

    async fn run_phases(
        &mut self,
        steps: &dyn PipelineSteps,
        engine: &RalphEngine,
    ) -> Result<PipelineRun> {
        let start = Instant::now();
        info!(project = %self.project.display(), "Starting pipeline run");

        self.append(
            AuditEvent::new(&self.pipeline, "run", "started", "Pipeline run started")
                .with("run_id", self.run_id.as_str())
                .with("project", self.project.display().to_string()),
        )
        .await?;

        let mut ctx = PhaseContext {
            run_id: self.run_id.clone(),
            pipeline: self.pipeline.clone(),
            project: self.project.clone(),
            metadata_dir: self.metadata_dir.clone(),
            inputs: Map::new(),
            audit: self.audit.clone(),
        };

        // Inputs
        self.begin(PhaseId::Inputs).await?;
        match steps.collect_inputs(&ctx).await {
            Ok(inputs) => {
                let keys: Vec<&String> = inputs.keys().collect();
                let data = json!({ "inputs": keys });
                ctx.inputs = inputs;
                self.complete(PhaseId::Inputs, "Inputs collected", data).await?;
            }
            Err(e) => return Err(self.fail(PhaseId::Inputs, e.to_string()).await),
        }

        // Scaffold
        self.begin(PhaseId::Scaffold).await?;
        if let Err(e) = steps.scaffold(&ctx).await {
            return Err(self.fail(PhaseId::Scaffold, e.to_string()).await);
        }
        self.complete(PhaseId::Scaffold, "Project scaffolded", Value::Null)
            .await?;

        // Install
        self.begin(PhaseId::Install).await?;
        if let Err(e) = steps.install(&ctx).await {
            return Err(self.fail(PhaseId::Install, e.to_string()).await);
        }
        self.complete(PhaseId::Install, "Dependencies installed", Value::Null)
            .await?;

        // Verify
        self.begin(PhaseId::Verify).await?;
        let report = match self.verify(engine).await {
            Ok(report) => report,
            Err(e) => return Err(self.fail(PhaseId::Verify, e.to_string()).await),
        };
        if !report.passed() {
            let reason = failure_reason(&report);
            return Err(self.fail(PhaseId::Verify, reason).await);
        }
        let data = json!({
            "verdict": report.verdict.as_str(),
            "score": report.final_score,
            "iterations": report.iterations,
        });
        self.complete(PhaseId::Verify, "Verification passed", data)
            .await?;

        // Cert-check: the only release gate. Always re-reads disk.
        self.begin(PhaseId::CertCheck).await?;
        let certificate = match CertificateGate::evaluate(&self.metadata_dir) {
            Ok(certificate) => certificate,
            Err(gate_error) => {
                self.record_failure(PhaseId::CertCheck, &gate_error.to_string())
                    .await?;
                return Err(FactoryError::Gate(gate_error));
            }
        };
        self.complete(
            PhaseId::CertCheck,
            "Certificate accepted",
            json!({ "status": certificate.status, "timestamp": certificate.timestamp }),
        )
        .await?;

        // Launch
        self.begin(PhaseId::Launch).await?;
        if let Err(e) = steps.launch(&ctx).await {
            return Err(self.fail(PhaseId::Launch, e.to_string()).await);
        }
        self.complete(PhaseId::Launch, "Launched", Value::Null).await?;

        let duration_ms = start.elapsed().as_millis() as u64;
        self.append(
            AuditEvent::new(&self.pipeline, "run", "complete", "Pipeline run complete")
                .with("run_id", self.run_id.as_str())
                .with("duration_ms", duration_ms),
        )
        .await?;
        info!(duration_ms, "Pipeline run complete");

        Ok(PipelineRun {
            run_id: self.run_id.clone(),
            pipeline: self.pipeline.clone(),
            project: self.project.clone(),
            phases: self.phases.clone(),
            report,
            certificate,
            duration_ms,
        })
    }

    async fn verify(&mut self, engine: &RalphEngine) -> Result<Report> {
        let report =
            run_verification(engine, &self.pipeline, &self.project, &self.metadata_dir).await?;
        self.report = Some(report.clone());
        Ok(report)
    }

    fn phase_mut(&mut self, id: PhaseId) -> &mut Phase {
        let idx = PhaseId::ALL.iter().position(|p| *p == id).unwrap_or(0);
        &mut self.phases[idx]
    }

    async fn begin(&mut self, id: PhaseId) -> Result<()> {
        if self.cancel.as_ref().is_some_and(|rx| *rx.borrow()) {
            self.phase_mut(id).transition(PhaseStatus::Failed)?;
            obs::emit_phase_transition(&self.pipeline, id.name(), "cancelled");
            self.append(
                AuditEvent::new(&self.pipeline, id.name(), "cancelled", "Run cancelled")
                    .with("run_id", self.run_id.as_str()),
            )
            .await?;
            return Err(FactoryError::Cancelled { phase: id });
        }

        self.phase_mut(id).transition(PhaseStatus::Active)?;
        obs::emit_phase_transition(&self.pipeline, id.name(), PhaseStatus::Active.as_str());
        let event = AuditEvent::new(
            &self.pipeline,
            id.name(),
            PhaseStatus::Active.as_str(),
            format!("Phase {} started", id),
        );
        if let Err(e) = self.append(event).await {
            return Err(self.fail(id, format!("audit log append failed: {}", e)).await);
        }
        Ok(())
    }

    /// Record completion first so a phase is never `complete` without its
    /// audit line; an append failure fails the phase instead.
    async fn complete(&mut self, id: PhaseId, message: &str, data: Value) -> Result<()> {
        let mut event = AuditEvent::new(
            &self.pipeline,
            id.name(),
            PhaseStatus::Complete.as_str(),
            message,
        );
        if let Value::Object(map) = data {
            event.data = map;
        }
        if let Err(e) = self.append(event).await {
            return Err(self.fail(id, format!("audit log append failed: {}", e)).await);
        }
        self.phase_mut(id).transition(PhaseStatus::Complete)?;
        obs::emit_phase_transition(&self.pipeline, id.name(), PhaseStatus::Complete.as_str());
        Ok(())
    }

    /// Mark `id` failed, record it, and build the error that halts the run.
    async fn fail(&mut self, id: PhaseId, reason: String) -> FactoryError {
        match self.record_failure(id, &reason).await {
            Ok(()) => FactoryError::PhaseFailed { phase: id, reason },
            Err(e) => e,
        }
    }

    /// Transition `id` to failed and write the phase and run-level failure
    /// events. Append errors are logged; only an invalid transition is returned.
    async fn record_failure(&mut self, id: PhaseId, reason: &str) -> Result<()> {
        warn!(phase = %id, error = %reason, "Phase failed");
        self.phase_mut(id).transition(PhaseStatus::Failed)?;
        obs::emit_phase_transition(&self.pipeline, id.name(), PhaseStatus::Failed.as_str());
        let event = AuditEvent::new(
            &self.pipeline,
            id.name(),
            PhaseStatus::Failed.as_str(),
            format!("Phase {} failed", id),
        )
        .with("error", reason)
        .with("run_id", self.run_id.as_str());
        if let Err(e) = self.append(event).await {
            obs::emit_audit_append_failed(&self.pipeline, &e);
        }
        let closing = AuditEvent::new(&self.pipeline, "run", "failed", "Pipeline run failed")
            .with("run_id", self.run_id.as_str())
            .with("failed_phase", id.name());
        if let Err(e) = self.append(closing).await {
            obs::emit_audit_append_failed(&self.pipeline, &e);
        }
        Ok(())
    }

    async fn append(&self, event: AuditEvent) -> Result<()> {
        self.audit.append(&event).await
    }
}

/// Run Ralph against `project`, persist its artifacts under
/// `<metadata_dir>/ralph`, and write exactly one outcome file.
pub async fn run_verification(
    engine: &RalphEngine,
    pipeline: &str,
    project: &Path,
    metadata_dir: &Path,
) -> Result<Report> {
    certificate::clear_outcome(metadata_dir)?;

    let report = engine.run(pipeline, project).await;
    let artifacts = write_report_artifacts(&report, &metadata_dir.join(REPORT_DIR))?;
    let command = format!("ralph:{}", pipeline);

    if report.passed() {
        let cert = RunCertificate::pass(project, RALPH_VERIFICATION, command)
            .with_score(report.final_score)
            .with_report_digest(&artifacts.digest);
        certificate::write_certificate(metadata_dir, &cert)?;
    } else {
        let failure = RunFailure::new(project, command, failure_reason(&report))
            .with_verification_type(RALPH_VERIFICATION);
        certificate::write_failure(metadata_dir, &failure)?;
    }
    Ok(report)
}

fn failure_reason(report: &Report) -> String {
    format!(
        "Ralph verdict {}: score {} below threshold {} after {} iteration(s)",
        report.verdict, report.final_score, report.passing_threshold, report.iterations
    )
}
