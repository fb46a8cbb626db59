//! Ralph: the iterate-until-pass QA loop.
//!
//! Each iteration runs the [`CheckRegistry`], then optional skill audits,
//! then an optional end-to-end suite, scores the checks and decides a
//! verdict. The loop stops on the first PASS or when `max_iterations` is
//! reached. Nothing inside the loop repairs the build; an external actor
//! does that between iterations through an [`IterationObserver`].
//!
//! Only checks move the numeric score. Skill-audit violations and E2E
//! failures are surfaced as Issues.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::config::RalphConfig;
use crate::error::Result;
use crate::model::{
    sort_issues, CheckResult, E2eResult, Issue, IterationResult, Report, Severity,
    SkillAuditResult, Verdict,
};
use crate::obs;
use crate::registry::{CheckContext, CheckRegistry};

// ---------------------------------------------------------------------------
// Collaborator seams
// ---------------------------------------------------------------------------

/// Audits a build against skill rule sets (accessibility, performance, ...).
#[async_trait]
pub trait SkillAuditRunner: Send + Sync {
    async fn audit(&self, ctx: &CheckContext) -> anyhow::Result<Vec<SkillAuditResult>>;
}

/// Runs the end-to-end suite for a build.
#[async_trait]
pub trait E2eRunner: Send + Sync {
    async fn run(&self, ctx: &CheckContext) -> anyhow::Result<E2eResult>;
}

/// Before/after hooks around every iteration.
#[async_trait]
pub trait IterationObserver: Send + Sync {
    async fn on_iteration_start(&self, _ctx: &CheckContext) {}

    async fn on_iteration_complete(&self, _result: &IterationResult) {}
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// `round(100 * earned / total)` over all check results; `0` when no points
/// are registered.
pub fn compute_score(results: &[CheckResult]) -> u8 {
    let total: u64 = results.iter().map(|r| u64::from(r.points)).sum();
    if total == 0 {
        return 0;
    }
    let earned: u64 = results.iter().map(|r| u64::from(r.earned_points())).sum();
    // Round half up in integer arithmetic.
    ((200 * earned + total) / (2 * total)) as u8
}

pub fn verdict_for(score: u8, passing_threshold: u8) -> Verdict {
    if score >= passing_threshold {
        Verdict::Pass
    } else {
        Verdict::Fail
    }
}

/// The proof-of-PASS string embedded in a passing report.
pub fn completion_promise(
    pipeline: &str,
    build_path: &Path,
    score: u8,
    passing_threshold: u8,
    at: DateTime<Utc>,
) -> String {
    format!(
        "<promise>RALPH PASS: pipeline={} build={} score={}/100 threshold={} at={}</promise>",
        pipeline,
        build_path.display(),
        score,
        passing_threshold,
        at.to_rfc3339()
    )
}

fn skill_audit_issues(audits: &[SkillAuditResult]) -> Vec<Issue> {
    let mut issues = Vec::new();
    for audit in audits {
        if audit.violations.is_empty() && !audit.passed {
            issues.push(Issue::new(
                Severity::Medium,
                "skill-audit",
                format!("Skill audit {} failed (score {})", audit.skill, audit.score),
            ));
        }
        issues.extend(audit.violations.iter().cloned());
    }
    issues
}

fn e2e_issues(e2e: &E2eResult) -> Vec<Issue> {
    let mut issues: Vec<Issue> = e2e
        .failures
        .iter()
        .map(|f| Issue::new(Severity::High, "e2e", format!("{}: {}", f.test, f.message)))
        .collect();
    if issues.is_empty() && !e2e.passed {
        issues.push(Issue::new(
            Severity::High,
            "e2e",
            format!("E2E suite failed ({}/{} passed)", e2e.passed_count, e2e.total),
        ));
    }
    issues
}

// ---------------------------------------------------------------------------
// Report assembly
// ---------------------------------------------------------------------------

/// Accumulates iterations; consumed by [`finalize`](Self::finalize).
#[derive(Debug)]
pub struct ReportBuilder {
    pipeline: String,
    build_path: PathBuf,
    passing_threshold: u8,
    max_iterations: u32,
    started_at: DateTime<Utc>,
    started: Instant,
    history: Vec<IterationResult>,
}

impl ReportBuilder {
    pub fn new(pipeline: &str, build_path: &Path, config: &RalphConfig) -> Self {
        Self {
            pipeline: pipeline.to_string(),
            build_path: build_path.to_path_buf(),
            passing_threshold: config.passing_threshold,
            max_iterations: config.max_iterations,
            started_at: Utc::now(),
            started: Instant::now(),
            history: Vec::new(),
        }
    }

    pub fn push(&mut self, result: IterationResult) {
        self.history.push(result);
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn finalize(self) -> Report {
        let finished_at = Utc::now();
        let (verdict, final_score, remaining_issues) = match self.history.last() {
            Some(last) if last.verdict == Verdict::Pass => {
                (Verdict::Pass, last.score, last.issues_to_fix.clone())
            }
            Some(last) => (Verdict::Fail, last.score, last.issues_to_fix.clone()),
            None => (Verdict::Fail, 0, Vec::new()),
        };
        let completion_promise = (verdict == Verdict::Pass).then(|| {
            completion_promise(
                &self.pipeline,
                &self.build_path,
                final_score,
                self.passing_threshold,
                finished_at,
            )
        });

        Report {
            pipeline: self.pipeline,
            build_path: self.build_path,
            verdict,
            final_score,
            passing_threshold: self.passing_threshold,
            max_iterations: self.max_iterations,
            iterations: self.history.len() as u32,
            history: self.history,
            remaining_issues,
            completion_promise,
            started_at: self.started_at,
            finished_at,
            duration_ms: self.started.elapsed().as_millis() as u64,
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Drives the Ralph loop for one build.
pub struct RalphEngine {
    config: RalphConfig,
    registry: CheckRegistry,
    skill_audits: Option<Arc<dyn SkillAuditRunner>>,
    e2e: Option<Arc<dyn E2eRunner>>,
    observers: Vec<Arc<dyn IterationObserver>>,
}

impl std::fmt::Debug for RalphEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RalphEngine")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("skill_audits", &self.skill_audits.is_some())
            .field("e2e", &self.e2e.is_some())
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl RalphEngine {
    /// Validates `config` and applies its timeout/concurrency to `registry`.
    pub fn new(config: RalphConfig, registry: CheckRegistry) -> Result<Self> {
        config.validate()?;
        let registry = registry
            .with_timeout(config.check_timeout())
            .with_concurrency(config.concurrent_checks);
        Ok(Self {
            config,
            registry,
            skill_audits: None,
            e2e: None,
            observers: Vec::new(),
        })
    }

    pub fn with_skill_audits(mut self, runner: Arc<dyn SkillAuditRunner>) -> Self {
        self.skill_audits = Some(runner);
        self
    }

    pub fn with_e2e(mut self, runner: Arc<dyn E2eRunner>) -> Self {
        self.e2e = Some(runner);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn IterationObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn config(&self) -> &RalphConfig {
        &self.config
    }

    pub fn registry(&self) -> &CheckRegistry {
        &self.registry
    }

    /// Iterate until PASS or the iteration budget runs out.
    pub async fn run(&self, pipeline: &str, build_path: &Path) -> Report {
        let mut builder = ReportBuilder::new(pipeline, build_path, &self.config);
        let mut previous: Option<Arc<IterationResult>> = None;

        for iteration in 1..=self.config.max_iterations {
            let ctx = CheckContext::new(build_path, pipeline, iteration)
                .with_previous(previous.clone());

            obs::emit_iteration_started(pipeline, iteration);
            for observer in &self.observers {
                observer.on_iteration_start(&ctx).await;
            }

            let result = self.run_iteration(&ctx).await;

            obs::emit_iteration_completed(
                pipeline,
                iteration,
                result.score,
                result.verdict.as_str(),
                result.issues_to_fix.len(),
            );
            for observer in &self.observers {
                observer.on_iteration_complete(&result).await;
            }

            let passed = result.verdict == Verdict::Pass;
            let shared = Arc::new(result);
            builder.push(shared.as_ref().clone());
            previous = Some(shared);
            if passed {
                break;
            }
        }

        let report = builder.finalize();
        obs::emit_ralph_finished(
            pipeline,
            report.verdict.as_str(),
            report.final_score,
            report.iterations,
        );
        report
    }

    /// One pass: checks, skill audits, E2E, score, verdict.
    pub async fn run_iteration(&self, ctx: &CheckContext) -> IterationResult {
        let start = Instant::now();

        let check_results = self.registry.run(ctx).await;
        let skill_audits = if self.config.run_skill_audits {
            self.run_skill_audits(ctx).await
        } else {
            Vec::new()
        };
        let e2e = if self.config.run_e2e {
            Some(self.run_e2e(ctx).await)
        } else {
            None
        };

        let score = compute_score(&check_results);
        let verdict = verdict_for(score, self.config.passing_threshold);

        let mut issues_to_fix: Vec<Issue> = check_results
            .iter()
            .flat_map(|r| r.issues.iter().cloned())
            .collect();
        issues_to_fix.extend(skill_audit_issues(&skill_audits));
        if let Some(e2e) = &e2e {
            issues_to_fix.extend(e2e_issues(e2e));
        }
        sort_issues(&mut issues_to_fix);

        IterationResult {
            iteration: ctx.iteration,
            check_results,
            skill_audits,
            e2e,
            score,
            verdict,
            issues_to_fix,
            timestamp: Utc::now(),
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn run_skill_audits(&self, ctx: &CheckContext) -> Vec<SkillAuditResult> {
        let Some(runner) = &self.skill_audits else {
            return vec![SkillAuditResult::stub_pass()];
        };
        match with_timeout(self.config.check_timeout(), runner.audit(ctx)).await {
            Ok(results) => results,
            Err(e) => {
                warn!(pipeline = %ctx.pipeline, error = %e, "skill audit runner failed");
                vec![SkillAuditResult {
                    skill: "skill-audit".to_string(),
                    passed: false,
                    score: 0,
                    violations: vec![Issue::new(
                        Severity::High,
                        "skill-audit",
                        format!("Skill audit runner failed: {}", e),
                    )],
                }]
            }
        }
    }

    async fn run_e2e(&self, ctx: &CheckContext) -> E2eResult {
        let Some(runner) = &self.e2e else {
            return E2eResult::stub_pass();
        };
        match with_timeout(self.config.check_timeout(), runner.run(ctx)).await {
            Ok(result) => result,
            Err(e) => {
                warn!(pipeline = %ctx.pipeline, error = %e, "e2e runner failed");
                E2eResult {
                    passed: false,
                    total: 0,
                    passed_count: 0,
                    failed_count: 0,
                    failures: vec![crate::model::E2eFailure {
                        test: "e2e-runner".to_string(),
                        message: e.to_string(),
                    }],
                }
            }
        }
    }
}

async fn with_timeout<T>(
    timeout: Duration,
    fut: impl std::future::Future<Output = anyhow::Result<T>>,
) -> anyhow::Result<T> {
    if timeout.is_zero() {
        return fut.await;
    }
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| anyhow::anyhow!("timed out after {}s", timeout.as_secs()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CheckMeta;

    fn result(points: u32, passed: bool) -> CheckResult {
        CheckResult {
            check_id: format!("c{}", points),
            name: "c".to_string(),
            category: "build".to_string(),
            mandatory: false,
            points,
            passed,
            message: String::new(),
            issues: Vec::new(),
            duration_ms: 0,
        }
    }

    #[test]
    fn test_score_rounds_half_up() {
        // 2/3 = 66.67 -> 67
        assert_eq!(compute_score(&[result(2, true), result(1, false)]), 67);
        // 1/8 = 12.5 -> 13
        assert_eq!(compute_score(&[result(1, true), result(7, false)]), 13);
        assert_eq!(compute_score(&[result(50, true), result(50, false)]), 50);
    }

    #[test]
    fn test_score_zero_points_is_zero() {
        assert_eq!(compute_score(&[]), 0);
        assert_eq!(compute_score(&[result(0, true)]), 0);
    }

    #[test]
    fn test_verdict_boundary() {
        assert_eq!(verdict_for(70, 70), Verdict::Pass);
        assert_eq!(verdict_for(69, 70), Verdict::Fail);
    }

    #[test]
    fn test_completion_promise_embeds_run_identity() {
        let at = Utc::now();
        let promise = completion_promise("dapp", Path::new("/builds/dapp"), 98, 97, at);
        assert!(promise.contains("pipeline=dapp"));
        assert!(promise.contains("/builds/dapp"));
        assert!(promise.contains("threshold=97"));
        assert!(promise.contains(&at.to_rfc3339()));
    }

    #[test]
    fn test_e2e_failure_without_details_still_produces_issue() {
        let e2e = E2eResult {
            passed: false,
            total: 4,
            passed_count: 3,
            failed_count: 1,
            failures: Vec::new(),
        };
        let issues = e2e_issues(&e2e);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::High);
    }

    #[test]
    fn test_empty_builder_finalizes_as_fail() {
        let builder = ReportBuilder::new("plugin", Path::new("."), &RalphConfig::default());
        let report = builder.finalize();
        assert_eq!(report.verdict, Verdict::Fail);
        assert_eq!(report.iterations, 0);
        assert!(report.completion_promise.is_none());
    }

    #[tokio::test]
    async fn test_engine_rejects_invalid_config() {
        let config = RalphConfig::default().with_max_iterations(0);
        assert!(RalphEngine::new(config, CheckRegistry::new()).is_err());
    }

    #[tokio::test]
    async fn test_run_iteration_keeps_context_number() {
        let registry = CheckRegistry::new()
            .with_check(crate::registry::PredicateCheck::constant(
                CheckMeta::new("a", "a", "build").points(10),
                true,
            ))
            .unwrap();
        let engine = RalphEngine::new(RalphConfig::default().with_threshold(50), registry).unwrap();
        let ctx = CheckContext::new("/tmp", "chatbot", 7);
        let result = engine.run_iteration(&ctx).await;
        assert_eq!(result.iteration, 7);
        assert_eq!(result.score, 100);
        assert_eq!(result.verdict, Verdict::Pass);
        assert!(result.e2e.is_none());
        assert!(result.skill_audits.is_empty());
    }
}
