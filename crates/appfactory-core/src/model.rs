//! Value types shared by the registry, the Ralph loop and the report layer.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Issues
// ---------------------------------------------------------------------------

/// Issue severity. Declaration order is the fix order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    /// Sort rank: critical(0) < high(1) < medium(2) < low(3).
    pub fn rank(self) -> u8 {
        match self {
            Severity::Critical => 0,
            Severity::High => 1,
            Severity::Medium => 2,
            Severity::Low => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A severity-tagged diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: Severity,
    pub category: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix: Option<String>,
}

impl Issue {
    pub fn new(severity: Severity, category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            category: category.into(),
            message: message.into(),
            file: None,
            line: None,
            fix: None,
        }
    }

    pub fn with_file(mut self, file: impl Into<String>, line: Option<u32>) -> Self {
        self.file = Some(file.into());
        self.line = line;
        self
    }

    pub fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.fix = Some(fix.into());
        self
    }
}

/// Stable sort by severity rank; equal ranks keep their relative order.
pub fn sort_issues(issues: &mut [Issue]) {
    issues.sort_by_key(|i| i.severity.rank());
}

// ---------------------------------------------------------------------------
// Check results
// ---------------------------------------------------------------------------

/// Static description of a registered check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckMeta {
    pub id: String,
    pub name: String,
    pub category: String,
    pub description: String,
    pub mandatory: bool,
    pub points: u32,
}

impl CheckMeta {
    pub fn new(id: impl Into<String>, name: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category: category.into(),
            description: String::new(),
            mandatory: false,
            points: 0,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    pub fn points(mut self, points: u32) -> Self {
        self.points = points;
        self
    }
}

/// Outcome of one check in one iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub check_id: String,
    pub name: String,
    pub category: String,
    pub mandatory: bool,
    pub points: u32,
    pub passed: bool,
    pub message: String,
    pub issues: Vec<Issue>,
    pub duration_ms: u64,
}

impl CheckResult {
    /// Points awarded for this result.
    pub fn earned_points(&self) -> u32 {
        if self.passed {
            self.points
        } else {
            0
        }
    }
}

// ---------------------------------------------------------------------------
// Skill audits and E2E
// ---------------------------------------------------------------------------

/// Result of auditing the build against one skill's rule set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillAuditResult {
    pub skill: String,
    pub passed: bool,
    pub score: u8,
    pub violations: Vec<Issue>,
}

impl SkillAuditResult {
    pub fn stub_pass() -> Self {
        Self {
            skill: "stub".to_string(),
            passed: true,
            score: 100,
            violations: Vec::new(),
        }
    }
}

/// A single failing end-to-end test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct E2eFailure {
    pub test: String,
    pub message: String,
}

/// Aggregate end-to-end suite outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct E2eResult {
    pub passed: bool,
    pub total: u32,
    pub passed_count: u32,
    pub failed_count: u32,
    pub failures: Vec<E2eFailure>,
}

impl E2eResult {
    pub fn stub_pass() -> Self {
        Self {
            passed: true,
            total: 0,
            passed_count: 0,
            failed_count: 0,
            failures: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Iterations and reports
// ---------------------------------------------------------------------------

/// PASS/FAIL/PENDING outcome of one iteration or a whole report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    Fail,
    Pending,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Pass => "PASS",
            Verdict::Fail => "FAIL",
            Verdict::Pending => "PENDING",
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything observed in one pass of the Ralph loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationResult {
    pub iteration: u32,
    pub check_results: Vec<CheckResult>,
    pub skill_audits: Vec<SkillAuditResult>,
    pub e2e: Option<E2eResult>,
    pub score: u8,
    pub verdict: Verdict,
    pub issues_to_fix: Vec<Issue>,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
}

impl IterationResult {
    pub fn passed_checks(&self) -> impl Iterator<Item = &CheckResult> {
        self.check_results.iter().filter(|r| r.passed)
    }

    pub fn failed_checks(&self) -> impl Iterator<Item = &CheckResult> {
        self.check_results.iter().filter(|r| !r.passed)
    }
}

/// Final outcome of a Ralph run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub pipeline: String,
    pub build_path: PathBuf,
    pub verdict: Verdict,
    pub final_score: u8,
    pub passing_threshold: u8,
    pub max_iterations: u32,
    /// Number of iterations actually executed.
    pub iterations: u32,
    pub history: Vec<IterationResult>,
    pub remaining_issues: Vec<Issue>,
    pub completion_promise: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl Report {
    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Pass
    }

    pub fn last_iteration(&self) -> Option<&IterationResult> {
        self.history.last()
    }
}
