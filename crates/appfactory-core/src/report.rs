//! Human-readable artifacts rendered from a finalized [`Report`].
//!
//! Three renderings:
//! - `PROGRESS.md`: full per-iteration log
//! - `LOOP.md`: one table row per iteration
//! - `QA_NOTES.md`: remaining issues grouped by category, passed checks as strengths
//!
//! [`ReportGenerator`] only builds strings. [`write_report_artifacts`] is the
//! persistence helper callers may use.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{FactoryError, Result};
use crate::model::{Issue, IterationResult, Report};

pub const PROGRESS_FILE: &str = "PROGRESS.md";
pub const LOOP_FILE: &str = "LOOP.md";
pub const QA_NOTES_FILE: &str = "QA_NOTES.md";
pub const REPORT_JSON_FILE: &str = "report.json";
pub const REPORT_DIGEST_FILE: &str = "report.digest";

/// Pure formatting over a finalized report.
pub struct ReportGenerator<'a> {
    report: &'a Report,
}

impl<'a> ReportGenerator<'a> {
    pub fn new(report: &'a Report) -> Self {
        Self { report }
    }

    /// Full progress log, one section per iteration.
    pub fn progress_log(&self) -> String {
        let r = self.report;
        let mut md = format!("# Ralph Progress: {}\n\n", r.pipeline);
        let _ = writeln!(md, "- Build: `{}`", r.build_path.display());
        let _ = writeln!(md, "- Verdict: **{}**", r.verdict);
        let _ = writeln!(
            md,
            "- Final score: {}/100 (threshold {})",
            r.final_score, r.passing_threshold
        );
        let _ = writeln!(md, "- Iterations: {}/{}", r.iterations, r.max_iterations);
        let _ = writeln!(md, "- Started: {}", r.started_at.to_rfc3339());
        let _ = writeln!(md, "- Finished: {}", r.finished_at.to_rfc3339());
        let _ = writeln!(md, "- Duration: {}ms", r.duration_ms);

        for it in &r.history {
            render_iteration(&mut md, it);
        }

        md.push_str("\n## Completion\n\n");
        match &r.completion_promise {
            Some(promise) => {
                let _ = writeln!(md, "{}", promise);
            }
            None => md.push_str("No completion promise: the loop did not reach the threshold.\n"),
        }
        md
    }

    /// Condensed table: one row per iteration.
    pub fn loop_table(&self) -> String {
        let r = self.report;
        let mut md = format!("# Ralph Loop: {}\n\n", r.pipeline);
        md.push_str("| Iteration | Score | Verdict | Passed | Failed | Issues | Duration |\n");
        md.push_str("|-----------|-------|---------|--------|--------|--------|----------|\n");
        for it in &r.history {
            let _ = writeln!(
                md,
                "| {} | {} | {} | {} | {} | {} | {}ms |",
                it.iteration,
                it.score,
                it.verdict,
                it.passed_checks().count(),
                it.failed_checks().count(),
                it.issues_to_fix.len(),
                it.duration_ms
            );
        }
        let _ = writeln!(
            md,
            "\n**Result:** {} at {}/100 after {} iteration(s) (threshold {})",
            r.verdict, r.final_score, r.iterations, r.passing_threshold
        );
        md
    }

    /// QA notes: strengths and remaining issues grouped by category.
    pub fn qa_notes(&self) -> String {
        let r = self.report;
        let mut md = format!("# QA Notes: {}\n\n", r.pipeline);
        let _ = writeln!(
            md,
            "Verdict **{}** with score {}/100 (threshold {}).",
            r.verdict, r.final_score, r.passing_threshold
        );

        md.push_str("\n## Strengths\n\n");
        let strengths: Vec<_> = r
            .last_iteration()
            .map(|it| it.passed_checks().collect())
            .unwrap_or_default();
        if strengths.is_empty() {
            md.push_str("None recorded.\n");
        }
        for check in strengths {
            let _ = writeln!(
                md,
                "- {} ({}, {} pts)",
                check.name, check.category, check.points
            );
        }

        md.push_str("\n## Remaining Issues\n");
        if r.remaining_issues.is_empty() {
            md.push_str("\nNo remaining issues.\n");
            return md;
        }
        let mut by_category: BTreeMap<&str, Vec<&Issue>> = BTreeMap::new();
        for issue in &r.remaining_issues {
            by_category.entry(issue.category.as_str()).or_default().push(issue);
        }
        for (category, issues) in by_category {
            let _ = writeln!(md, "\n### {}\n", category);
            for issue in issues {
                let _ = writeln!(md, "- {}", issue_line(issue));
            }
        }
        md
    }
}

fn render_iteration(md: &mut String, it: &IterationResult) {
    let _ = writeln!(md, "\n## Iteration {}\n", it.iteration);
    let _ = writeln!(md, "- Score: {}/100, verdict {}", it.score, it.verdict);
    let _ = writeln!(
        md,
        "- Checks passed: {}/{}",
        it.passed_checks().count(),
        it.check_results.len()
    );
    let _ = writeln!(md, "- Timestamp: {}", it.timestamp.to_rfc3339());
    let _ = writeln!(md, "- Duration: {}ms", it.duration_ms);

    md.push_str("\n### Checks\n\n");
    if it.check_results.is_empty() {
        md.push_str("No checks registered.\n");
    }
    for check in &it.check_results {
        let mark = if check.passed { "x" } else { " " };
        let _ = writeln!(
            md,
            "- [{}] {} ({}/{} pts): {}",
            mark,
            check.name,
            check.earned_points(),
            check.points,
            check.message
        );
    }

    if !it.skill_audits.is_empty() {
        md.push_str("\n### Skill Audits\n\n");
        for audit in &it.skill_audits {
            let status = if audit.passed { "pass" } else { "fail" };
            let _ = writeln!(
                md,
                "- {}: {} (score {}, {} violation(s))",
                audit.skill,
                status,
                audit.score,
                audit.violations.len()
            );
        }
    }

    if let Some(e2e) = &it.e2e {
        md.push_str("\n### E2E\n\n");
        let _ = writeln!(
            md,
            "- {}/{} passed, {} failed",
            e2e.passed_count, e2e.total, e2e.failed_count
        );
        for failure in &e2e.failures {
            let _ = writeln!(md, "  - {}: {}", failure.test, failure.message);
        }
    }

    if !it.issues_to_fix.is_empty() {
        md.push_str("\n### Issues to Fix\n\n");
        for (i, issue) in it.issues_to_fix.iter().enumerate() {
            let _ = writeln!(md, "{}. {}", i + 1, issue_line(issue));
        }
    }
}

fn issue_line(issue: &Issue) -> String {
    let mut line = format!("**{}** [{}] {}", issue.severity, issue.category, issue.message);
    if let Some(file) = &issue.file {
        match issue.line {
            Some(n) => {
                let _ = write!(line, " (`{}:{}`)", file, n);
            }
            None => {
                let _ = write!(line, " (`{}`)", file);
            }
        }
    }
    if let Some(fix) = &issue.fix {
        let _ = write!(line, ". Fix: {}", fix);
    }
    line
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// Paths written by [`write_report_artifacts`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportArtifacts {
    pub progress: PathBuf,
    pub loop_table: PathBuf,
    pub qa_notes: PathBuf,
    pub json: PathBuf,
    pub digest: String,
}

/// SHA-256 hex digest of the report's JSON serialization.
pub fn report_digest(report: &Report) -> Result<String> {
    let json = serde_json::to_vec_pretty(report)?;
    Ok(hex::encode(Sha256::digest(&json)))
}

/// Persist all renderings plus `report.json` and its digest under `dir`.
pub fn write_report_artifacts(report: &Report, dir: &Path) -> Result<ReportArtifacts> {
    std::fs::create_dir_all(dir)?;
    let generator = ReportGenerator::new(report);

    let progress = dir.join(PROGRESS_FILE);
    let loop_table = dir.join(LOOP_FILE);
    let qa_notes = dir.join(QA_NOTES_FILE);
    let json_path = dir.join(REPORT_JSON_FILE);

    std::fs::write(&progress, generator.progress_log())?;
    std::fs::write(&loop_table, generator.loop_table())?;
    std::fs::write(&qa_notes, generator.qa_notes())?;

    let json = serde_json::to_vec_pretty(report)?;
    let digest = hex::encode(Sha256::digest(&json));
    std::fs::write(&json_path, &json)?;
    std::fs::write(dir.join(REPORT_DIGEST_FILE), digest.as_bytes())?;

    Ok(ReportArtifacts {
        progress,
        loop_table,
        qa_notes,
        json: json_path,
        digest,
    })
}

/// Read `report.json` from `dir`, verifying it against `report.digest`.
pub fn read_report_artifact(dir: &Path) -> Result<Report> {
    let json = std::fs::read(dir.join(REPORT_JSON_FILE))?;
    let expected = std::fs::read_to_string(dir.join(REPORT_DIGEST_FILE))?;
    let actual = hex::encode(Sha256::digest(&json));
    if expected.trim() != actual {
        return Err(FactoryError::DigestMismatch {
            expected: expected.trim().to_string(),
            actual,
        });
    }
    Ok(serde_json::from_slice(&json)?)
}
