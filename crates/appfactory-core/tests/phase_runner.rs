//! End-to-end phase sequencing against a temporary project directory.

use std::path::Path;
use std::sync::Mutex;

use appfactory_core::{
    write_certificate, AuditEvent, CertificateGate, CheckMeta, CheckRegistry, FactoryError,
    GateError, PhaseContext, PhaseId, PhaseRunner, PhaseStatus, PipelineSteps, PredicateCheck,
    RalphConfig, RalphEngine, RunCertificate, CERTIFICATE_FILE, FAILURE_FILE, REPORT_DIR,
};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tempfile::TempDir;
use tokio::sync::watch;

#[derive(Default)]
struct FakeSteps {
    calls: Mutex<Vec<&'static str>>,
    fail_install: bool,
}

impl FakeSteps {
    fn record(&self, step: &'static str) {
        self.calls.lock().unwrap().push(step);
    }

    fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PipelineSteps for FakeSteps {
    async fn collect_inputs(&self, _ctx: &PhaseContext) -> anyhow::Result<Map<String, Value>> {
        self.record("inputs");
        let mut inputs = Map::new();
        inputs.insert("app_name".to_string(), json!("demo"));
        Ok(inputs)
    }

    async fn scaffold(&self, ctx: &PhaseContext) -> anyhow::Result<()> {
        self.record("scaffold");
        assert_eq!(ctx.inputs["app_name"], "demo");
        std::fs::write(ctx.project.join("package.json"), "{}")?;
        Ok(())
    }

    async fn install(&self, _ctx: &PhaseContext) -> anyhow::Result<()> {
        self.record("install");
        if self.fail_install {
            anyhow::bail!("npm install exited with code 1");
        }
        Ok(())
    }

    async fn launch(&self, _ctx: &PhaseContext) -> anyhow::Result<()> {
        self.record("launch");
        Ok(())
    }
}

fn engine(passing: bool) -> RalphEngine {
    let registry = CheckRegistry::new()
        .with_check(PredicateCheck::new(
            CheckMeta::new("package-json", "package.json exists", "structure").points(60),
            |ctx| async move { Ok::<bool, anyhow::Error>(ctx.build_path.join("package.json").exists()) },
        ))
        .unwrap()
        .with_check(PredicateCheck::constant(
            CheckMeta::new("tests", "tests pass", "quality").points(40),
            passing,
        ))
        .unwrap();
    let config = RalphConfig::default()
        .with_threshold(90)
        .with_max_iterations(2);
    RalphEngine::new(config, registry).unwrap()
}

fn audit_events(dir: &Path) -> Vec<AuditEvent> {
    let content = std::fs::read_to_string(dir.join(".appfactory/audit.log")).unwrap();
    content
        .lines()
        .map(|l| serde_json::from_str(l).expect("each line is one JSON object"))
        .collect()
}

#[tokio::test]
async fn successful_run_reaches_launch() {
    let project = TempDir::new().unwrap();
    let steps = FakeSteps::default();
    let mut runner = PhaseRunner::new("mobile-app", project.path());

    let run = runner.run(&steps, &engine(true)).await.unwrap();

    assert_eq!(steps.calls(), vec!["inputs", "scaffold", "install", "launch"]);
    assert!(run
        .phases
        .iter()
        .all(|p| p.status == PhaseStatus::Complete));
    assert_eq!(run.report.final_score, 100);
    assert_eq!(run.certificate.status, "PASS");
    assert_eq!(run.certificate.score, Some(100));
    assert!(run.certificate.report_digest.is_some());

    let meta = project.path().join(".appfactory");
    assert!(meta.join(CERTIFICATE_FILE).exists());
    assert!(!meta.join(FAILURE_FILE).exists());
    assert!(meta.join(REPORT_DIR).join("PROGRESS.md").exists());
    assert!(CertificateGate::check(&meta).ok);

    let events = audit_events(project.path());
    assert_eq!(events.first().unwrap().status, "started");
    assert_eq!(events.last().unwrap().status, "complete");
    assert_eq!(events.last().unwrap().phase, "run");
    let launch: Vec<&str> = events
        .iter()
        .filter(|e| e.phase == "launch")
        .map(|e| e.status.as_str())
        .collect();
    assert_eq!(launch, vec!["active", "complete"]);
}

#[tokio::test]
async fn failed_phase_halts_run() {
    let project = TempDir::new().unwrap();
    let steps = FakeSteps {
        fail_install: true,
        ..Default::default()
    };
    let mut runner = PhaseRunner::new("dapp", project.path());

    let err = runner.run(&steps, &engine(true)).await.unwrap_err();
    match err {
        FactoryError::PhaseFailed { phase, reason } => {
            assert_eq!(phase, PhaseId::Install);
            assert!(reason.contains("npm install"));
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(steps.calls(), vec!["inputs", "scaffold", "install"]);
    assert_eq!(runner.phase(PhaseId::Install).status, PhaseStatus::Failed);
    for later in [PhaseId::Verify, PhaseId::CertCheck, PhaseId::Launch] {
        assert_eq!(runner.phase(later).status, PhaseStatus::Pending);
    }
    assert!(runner.report().is_none());

    let events = audit_events(project.path());
    let failed = events
        .iter()
        .find(|e| e.status == "failed")
        .expect("failure recorded");
    assert_eq!(failed.phase, "install");
    assert_eq!(failed.data["error"], "npm install exited with code 1");
    let closing = events.last().unwrap();
    assert_eq!((closing.phase.as_str(), closing.status.as_str()), ("run", "failed"));
    assert_eq!(closing.data["failed_phase"], "install");
}

#[tokio::test]
async fn failing_verdict_writes_failure_and_blocks_launch() {
    let project = TempDir::new().unwrap();
    let steps = FakeSteps::default();
    let mut runner = PhaseRunner::new("plugin", project.path());

    let err = runner.run(&steps, &engine(false)).await.unwrap_err();
    assert!(matches!(
        err,
        FactoryError::PhaseFailed {
            phase: PhaseId::Verify,
            ..
        }
    ));
    assert!(!steps.calls().contains(&"launch"));

    let report = runner.report().expect("verify ran");
    assert_eq!(report.final_score, 60);
    assert_eq!(report.iterations, 2);

    let meta = project.path().join(".appfactory");
    assert!(meta.join(FAILURE_FILE).exists());
    assert!(!meta.join(CERTIFICATE_FILE).exists());
    let outcome = CertificateGate::check(&meta);
    assert!(!outcome.ok);
    assert!(outcome
        .error
        .unwrap()
        .starts_with("Ralph verdict FAIL: score 60 below threshold 90"));
}

#[tokio::test]
async fn stale_certificate_is_cleared_before_verify() {
    let project = TempDir::new().unwrap();
    let meta = project.path().join(".appfactory");
    write_certificate(&meta, &RunCertificate::pass(project.path(), "ralph", "old")).unwrap();

    let mut runner = PhaseRunner::new("chatbot", project.path());
    let _ = runner.run(&FakeSteps::default(), &engine(false)).await;

    assert!(!meta.join(CERTIFICATE_FILE).exists());
    assert!(!CertificateGate::check(&meta).ok);
}

#[tokio::test]
async fn cancelled_run_records_event_and_stops() {
    let project = TempDir::new().unwrap();
    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();

    let steps = FakeSteps::default();
    let mut runner = PhaseRunner::new("mini-app", project.path()).with_cancellation(rx);
    let err = runner.run(&steps, &engine(true)).await.unwrap_err();

    assert!(matches!(
        err,
        FactoryError::Cancelled {
            phase: PhaseId::Inputs
        }
    ));
    assert!(steps.calls().is_empty());

    let events = audit_events(project.path());
    let last = events.last().unwrap();
    assert_eq!(last.status, "cancelled");
    assert_eq!(last.phase, "inputs");
}

#[tokio::test]
async fn every_audit_line_names_the_pipeline() {
    let project = TempDir::new().unwrap();
    let mut runner = PhaseRunner::new("mobile-app", project.path());
    runner.run(&FakeSteps::default(), &engine(true)).await.unwrap();

    let events = audit_events(project.path());
    assert!(events.iter().all(|e| e.pipeline == "mobile-app"));
    let run_ids: Vec<&Value> = events
        .iter()
        .filter_map(|e| e.data.get("run_id"))
        .collect();
    assert!(run_ids.iter().all(|id| id.as_str() == Some(runner.run_id())));
}

#[test]
fn gate_rejection_wraps_into_factory_error() {
    let dir = TempDir::new().unwrap();
    let err = CertificateGate::evaluate(dir.path()).unwrap_err();
    assert_eq!(err, GateError::CertificateNotFound);

    let wrapped: FactoryError = err.into();
    assert!(wrapped.to_string().contains("RUN_CERTIFICATE.json not found"));
}
