//! Subprocess execution with per-command timeout.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

/// A command line plus its execution limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Human-readable name used in logs and issues.
    pub name: String,

    /// Command to execute (first element is executable).
    pub command: Vec<String>,

    /// Timeout in seconds. `0` disables the timeout.
    #[serde(default)]
    pub timeout_secs: u64,

    /// Working directory relative to the project root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new<S: Into<String>>(name: impl Into<String>, command: impl IntoIterator<Item = S>) -> Self {
        Self {
            name: name.into(),
            command: command.into_iter().map(Into::into).collect(),
            timeout_secs: 0,
            cwd: None,
        }
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn in_dir(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Shell-style rendering for logs and certificates.
    pub fn display(&self) -> String {
        self.command.join(" ")
    }
}

/// Captured outcome of one command.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub name: String,

    /// Exit code (`-1` when terminated by a signal).
    pub exit_code: i32,

    pub stdout: String,

    pub stderr: String,

    pub duration_ms: u64,

    pub success: bool,
}

impl CommandResult {
    /// Whether the command exited 0.
    pub fn passed(&self) -> bool {
        self.success && self.exit_code == 0
    }

    /// Last `lines` lines of stderr, falling back to stdout when stderr is empty.
    pub fn output_tail(&self, lines: usize) -> String {
        let source = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        let all: Vec<&str> = source.lines().collect();
        let start = all.len().saturating_sub(lines);
        all[start..].join("\n")
    }
}

/// Runs [`CommandSpec`]s under a project root.
pub struct CommandRunner;

impl CommandRunner {
    /// Execute `spec` with `root` (joined with `spec.cwd`) as working directory.
    ///
    /// A non-zero exit is an `Ok` result with `success == false`; spawn
    /// failures and timeouts are errors. The child is killed on timeout.
    pub async fn execute(spec: &CommandSpec, root: &Path) -> anyhow::Result<CommandResult> {
        let start = Instant::now();

        if spec.command.is_empty() {
            anyhow::bail!("Command {} is empty", spec.name);
        }

        let exe = &spec.command[0];
        let args = &spec.command[1..];
        let cwd = match &spec.cwd {
            Some(dir) => root.join(dir),
            None => root.to_path_buf(),
        };

        debug!(command = %spec.display(), cwd = %cwd.display(), "Spawning command");
        let child = Command::new(exe)
            .args(args)
            .current_dir(&cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| anyhow::anyhow!("Failed to spawn {}: {}", spec.display(), e))?;

        let output = if spec.timeout_secs > 0 {
            tokio::time::timeout(
                Duration::from_secs(spec.timeout_secs),
                child.wait_with_output(),
            )
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "Command {} timed out after {} seconds",
                    spec.name,
                    spec.timeout_secs
                )
            })??
        } else {
            child.wait_with_output().await?
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let exit_code = output.status.code().unwrap_or(-1);

        Ok(CommandResult {
            name: spec.name.clone(),
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms,
            success: output.status.success(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(exit_code: i32, stdout: &str, stderr: &str) -> CommandResult {
        CommandResult {
            name: "npm_test".to_string(),
            exit_code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            duration_ms: 100,
            success: exit_code == 0,
        }
    }

    #[test]
    fn test_command_result_passed() {
        assert!(result(0, "", "").passed());
        assert!(!result(1, "", "error").passed());
    }

    #[test]
    fn test_output_tail_prefers_stderr() {
        let r = result(1, "out", "a\nb\nc\nd");
        assert_eq!(r.output_tail(2), "c\nd");
        let r = result(1, "x\ny", "  ");
        assert_eq!(r.output_tail(5), "x\ny");
    }

    #[tokio::test]
    async fn test_execute_simple_command() {
        let dir = tempfile::tempdir().unwrap();
        let spec = CommandSpec::new("echo_test", ["echo", "hello"]).with_timeout(60);

        let result = CommandRunner::execute(&spec, dir.path())
            .await
            .expect("execute failed");
        assert!(result.passed());
        assert!(result.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_execute_failing_command() {
        let dir = tempfile::tempdir().unwrap();
        let spec = CommandSpec::new("false_test", ["false"]);

        let result = CommandRunner::execute(&spec, dir.path())
            .await
            .expect("execute failed");
        assert!(!result.success);
        assert_ne!(result.exit_code, 0);
    }

    #[tokio::test]
    async fn test_execute_runs_in_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("app")).unwrap();
        std::fs::write(dir.path().join("app/marker.txt"), "").unwrap();
        let spec = CommandSpec::new("ls", ["ls"]).in_dir("app");

        let result = CommandRunner::execute(&spec, dir.path()).await.unwrap();
        assert!(result.stdout.contains("marker.txt"));
    }

    #[tokio::test]
    async fn test_execute_timeout_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let spec = CommandSpec::new("sleepy", ["sleep", "5"]).with_timeout(1);

        let err = CommandRunner::execute(&spec, dir.path()).await.unwrap_err();
        assert!(err.to_string().contains("timed out after 1 seconds"));
    }

    #[tokio::test]
    async fn test_empty_command_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let spec = CommandSpec::new("empty", Vec::<String>::new());
        assert!(CommandRunner::execute(&spec, dir.path()).await.is_err());
    }
}
