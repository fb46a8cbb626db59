//! Integration tests for manifest-driven pipeline runs in a temp project.

use appfactory_checks::{CheckSpec, CommandSpec, PipelineManifest, Probe, SkillCommand};
use appfactory_core::{
    AuditIterationObserver, CertificateGate, CheckContext, FactoryError, PhaseId, PhaseRunner,
    Verdict, CERTIFICATE_FILE, FAILURE_FILE,
};
use std::sync::Arc;
use tempfile::TempDir;

fn sh(name: &str, script: &str) -> CommandSpec {
    CommandSpec::new(name, ["sh", "-c", script]).with_timeout(30)
}

/// Scaffold writes package.json and a marker the command check inspects.
fn manifest(test_script: &str) -> PipelineManifest {
    let mut manifest = PipelineManifest::new("mini-app");
    manifest.scaffold = Some(sh(
        "scaffold",
        r#"printf '{"name":"demo","dependencies":{"vite":"5.0.0"}}' > package.json"#,
    ));
    manifest.install = Some(sh("install", "mkdir -p node_modules"));
    manifest.launch = Some(sh("launch", "touch launched"));
    manifest.checks = vec![
        CheckSpec::new(
            "package-json",
            "package.json present",
            "structure",
            20,
            Probe::FileExists {
                path: "package.json".into(),
            },
        )
        .mandatory(),
        CheckSpec::new(
            "vite-dep",
            "Vite dependency declared",
            "dependencies",
            30,
            Probe::ContentMatch {
                path: "package.json".into(),
                pattern: r#""vite"\s*:"#.to_string(),
            },
        ),
        CheckSpec::new(
            "tests",
            "tests pass",
            "quality",
            50,
            Probe::Command {
                command: vec!["sh".to_string(), "-c".to_string(), test_script.to_string()],
                timeout_secs: 30,
            },
        ),
    ];
    manifest.ralph = manifest.ralph.with_threshold(90).with_max_iterations(2);
    manifest
}

#[tokio::test]
async fn test_passing_manifest_launches() {
    let project = TempDir::new().unwrap();
    let manifest = manifest("exit 0");

    let mut runner = PhaseRunner::new(&manifest.pipeline, project.path());
    let engine = manifest
        .build_engine()
        .expect("engine")
        .with_observer(Arc::new(AuditIterationObserver::new(
            &manifest.pipeline,
            runner.audit_log().clone(),
        )));

    let run = runner
        .run(&manifest.steps(), &engine)
        .await
        .expect("pipeline failed");

    assert_eq!(run.report.verdict, Verdict::Pass);
    assert_eq!(run.report.final_score, 100);
    assert!(project.path().join("launched").exists());
    assert!(project.path().join("node_modules").is_dir());

    let meta = project.path().join(".appfactory");
    assert!(meta.join(CERTIFICATE_FILE).exists());
    assert!(CertificateGate::check(&meta).ok);

    let audit = std::fs::read_to_string(meta.join("audit.log")).unwrap();
    assert!(audit.contains("\"iteration-complete\""));
}

#[tokio::test]
async fn test_failing_checks_block_launch() {
    let project = TempDir::new().unwrap();
    let manifest = manifest("echo 'expected 2 to equal 3' >&2; exit 1");

    let mut runner = PhaseRunner::new(&manifest.pipeline, project.path());
    let engine = manifest.build_engine().unwrap();
    let err = runner.run(&manifest.steps(), &engine).await.unwrap_err();

    assert!(matches!(
        err,
        FactoryError::PhaseFailed {
            phase: PhaseId::Verify,
            ..
        }
    ));
    assert!(!project.path().join("launched").exists());

    let report = runner.report().unwrap();
    assert_eq!(report.final_score, 50);
    assert_eq!(report.iterations, 2);
    let tests_issue = report
        .remaining_issues
        .iter()
        .find(|i| i.category == "quality")
        .expect("failing command produces an issue");
    assert!(tests_issue.message.contains("tests pass"));

    let meta = project.path().join(".appfactory");
    assert!(meta.join(FAILURE_FILE).exists());
    assert!(!CertificateGate::check(&meta).ok);
}

#[tokio::test]
async fn test_failing_install_halts_before_verify() {
    let project = TempDir::new().unwrap();
    let mut manifest = manifest("exit 0");
    manifest.install = Some(sh("install", "exit 7"));

    let mut runner = PhaseRunner::new(&manifest.pipeline, project.path());
    let engine = manifest.build_engine().unwrap();
    let err = runner.run(&manifest.steps(), &engine).await.unwrap_err();

    match err {
        FactoryError::PhaseFailed { phase, reason } => {
            assert_eq!(phase, PhaseId::Install);
            assert!(reason.contains("exited with code 7"), "{reason}");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(runner.report().is_none());
    assert!(!project
        .path()
        .join(".appfactory")
        .join(CERTIFICATE_FILE)
        .exists());
}

#[tokio::test]
async fn test_declared_skill_audit_and_e2e_run_with_default_ralph_config() {
    let project = TempDir::new().unwrap();
    let mut manifest = manifest("exit 0");
    manifest.ralph = Default::default();
    manifest.skill_audits = vec![SkillCommand {
        skill: "a11y".to_string(),
        command: sh("a11y", "echo 'missing alt text' >&2; exit 1"),
    }];
    manifest.e2e = Some(sh("e2e", "exit 0"));
    assert!(!manifest.ralph.run_skill_audits);
    assert!(!manifest.ralph.run_e2e);

    let engine = manifest.build_engine().unwrap();
    assert!(engine.config().run_skill_audits);
    assert!(engine.config().run_e2e);

    let ctx = CheckContext::new(project.path(), &manifest.pipeline, 1);
    let result = engine.run_iteration(&ctx).await;

    assert_eq!(result.skill_audits.len(), 1);
    assert!(!result.skill_audits[0].passed);
    let issue = result
        .issues_to_fix
        .iter()
        .find(|i| i.category == "a11y")
        .expect("failing skill audit produces an issue");
    assert!(issue.message.contains("missing alt text"), "{}", issue.message);
    assert!(result.e2e.expect("e2e ran").passed);
}

#[tokio::test]
async fn test_manifest_round_trips_through_disk() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("pipeline.json");
    let original = manifest("exit 0");
    std::fs::write(&path, serde_json::to_string_pretty(&original).unwrap()).unwrap();

    let loaded = PipelineManifest::load(&path).unwrap();
    assert_eq!(loaded, original);
}
