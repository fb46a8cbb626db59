//! Skill-audit and E2E runners backed by subprocesses.
//!
//! A tool may print a JSON report on stdout, which is used verbatim.
//! Otherwise the exit code decides: 0 is a pass, anything else is a failure
//! carrying the tail of the tool's output.

use appfactory_core::{
    CheckContext, E2eFailure, E2eResult, E2eRunner, Issue, Severity, SkillAuditResult,
    SkillAuditRunner,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::runner::{CommandResult, CommandRunner, CommandSpec};

const OUTPUT_TAIL_LINES: usize = 20;

/// One skill audit: a named rule set checked by a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillCommand {
    pub skill: String,
    #[serde(flatten)]
    pub command: CommandSpec,
}

/// JSON a skill-audit tool may emit.
#[derive(Debug, Deserialize)]
struct SkillReport {
    passed: bool,
    #[serde(default)]
    score: Option<u8>,
    #[serde(default)]
    violations: Vec<Issue>,
}

/// Runs every configured skill command in order.
#[derive(Debug, Clone, Default)]
pub struct CommandSkillAuditRunner {
    skills: Vec<SkillCommand>,
}

impl CommandSkillAuditRunner {
    pub fn new(skills: Vec<SkillCommand>) -> Self {
        Self { skills }
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }
}

#[async_trait]
impl SkillAuditRunner for CommandSkillAuditRunner {
    async fn audit(&self, ctx: &CheckContext) -> anyhow::Result<Vec<SkillAuditResult>> {
        let mut results = Vec::with_capacity(self.skills.len());
        for skill in &self.skills {
            debug!(skill = %skill.skill, "Running skill audit");
            let output = CommandRunner::execute(&skill.command, &ctx.build_path).await?;
            results.push(skill_result(&skill.skill, &output));
        }
        Ok(results)
    }
}

fn skill_result(skill: &str, output: &CommandResult) -> SkillAuditResult {
    if let Ok(report) = serde_json::from_str::<SkillReport>(output.stdout.trim()) {
        return SkillAuditResult {
            skill: skill.to_string(),
            passed: report.passed,
            score: report.score.unwrap_or(if report.passed { 100 } else { 0 }).min(100),
            violations: report.violations,
        };
    }

    let passed = output.passed();
    let violations = if passed {
        Vec::new()
    } else {
        vec![Issue::new(
            Severity::High,
            skill,
            format!(
                "Skill audit '{}' exited with code {}: {}",
                skill,
                output.exit_code,
                output.output_tail(OUTPUT_TAIL_LINES)
            ),
        )]
    };
    SkillAuditResult {
        skill: skill.to_string(),
        passed,
        score: if passed { 100 } else { 0 },
        violations,
    }
}

/// JSON an E2E tool may emit.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct E2eReport {
    passed: bool,
    total: u32,
    #[serde(alias = "passed_count")]
    passed_count: u32,
    #[serde(alias = "failed_count")]
    failed_count: u32,
    #[serde(default)]
    failures: Vec<E2eFailureReport>,
}

#[derive(Debug, Deserialize)]
struct E2eFailureReport {
    test: String,
    #[serde(default)]
    message: String,
}

/// Runs one E2E command per iteration.
#[derive(Debug, Clone)]
pub struct CommandE2eRunner {
    command: CommandSpec,
}

impl CommandE2eRunner {
    pub fn new(command: CommandSpec) -> Self {
        Self { command }
    }
}

#[async_trait]
impl E2eRunner for CommandE2eRunner {
    async fn run(&self, ctx: &CheckContext) -> anyhow::Result<E2eResult> {
        let output = CommandRunner::execute(&self.command, &ctx.build_path).await?;
        Ok(e2e_result(&self.command, &output))
    }
}

fn e2e_result(command: &CommandSpec, output: &CommandResult) -> E2eResult {
    match serde_json::from_str::<E2eReport>(output.stdout.trim()) {
        Ok(report) => E2eResult {
            passed: report.passed,
            total: report.total,
            passed_count: report.passed_count,
            failed_count: report.failed_count,
            failures: report
                .failures
                .into_iter()
                .map(|f| E2eFailure {
                    test: f.test,
                    message: f.message,
                })
                .collect(),
        },
        Err(_) if output.passed() => E2eResult {
            passed: true,
            total: 1,
            passed_count: 1,
            failed_count: 0,
            failures: Vec::new(),
        },
        Err(_) => {
            warn!(command = %command.display(), exit_code = output.exit_code, "E2E run failed");
            E2eResult {
                passed: false,
                total: 1,
                passed_count: 0,
                failed_count: 1,
                failures: vec![E2eFailure {
                    test: command.name.clone(),
                    message: output.output_tail(OUTPUT_TAIL_LINES),
                }],
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(exit_code: i32, stdout: &str, stderr: &str) -> CommandResult {
        CommandResult {
            name: "tool".to_string(),
            exit_code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            duration_ms: 5,
            success: exit_code == 0,
        }
    }

    #[test]
    fn test_skill_result_from_json() {
        let json = r#"{"passed": false, "score": 70, "violations": [
            {"severity": "medium", "category": "accessibility", "message": "missing label"}
        ]}"#;
        let result = skill_result("a11y", &output(1, json, ""));
        assert!(!result.passed);
        assert_eq!(result.score, 70);
        assert_eq!(result.violations.len(), 1);
        assert_eq!(result.violations[0].severity, Severity::Medium);
    }

    #[test]
    fn test_skill_result_from_exit_code() {
        let ok = skill_result("lint", &output(0, "all good", ""));
        assert!(ok.passed);
        assert_eq!(ok.score, 100);
        assert!(ok.violations.is_empty());

        let bad = skill_result("lint", &output(2, "", "3 problems"));
        assert!(!bad.passed);
        assert_eq!(bad.violations.len(), 1);
        assert!(bad.violations[0].message.contains("3 problems"));
    }

    #[test]
    fn test_e2e_result_from_json() {
        let json = r#"{"passed": false, "total": 3, "passedCount": 2, "failedCount": 1,
            "failures": [{"test": "checkout", "message": "timeout"}]}"#;
        let cmd = CommandSpec::new("e2e", ["npx", "playwright", "test"]);
        let result = e2e_result(&cmd, &output(1, json, ""));
        assert_eq!(result.total, 3);
        assert_eq!(result.failures[0].test, "checkout");
    }

    #[test]
    fn test_e2e_result_from_exit_code() {
        let cmd = CommandSpec::new("e2e", ["npm", "run", "e2e"]);
        assert!(e2e_result(&cmd, &output(0, "ok", "")).passed);

        let failed = e2e_result(&cmd, &output(1, "", "login spec failed"));
        assert!(!failed.passed);
        assert_eq!(failed.failed_count, 1);
        assert_eq!(failed.failures[0].test, "e2e");
        assert!(failed.failures[0].message.contains("login spec failed"));
    }

    #[tokio::test]
    async fn test_skill_runner_executes_in_build_dir() {
        let dir = tempfile::tempdir().unwrap();
        let runner = CommandSkillAuditRunner::new(vec![SkillCommand {
            skill: "structure".to_string(),
            command: CommandSpec::new("structure", ["true"]),
        }]);
        let ctx = CheckContext::new(dir.path(), "chatbot", 1);
        let results = runner.audit(&ctx).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].passed);
    }
}
