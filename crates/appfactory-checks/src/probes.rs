//! Concrete [`Check`] implementations probing a build directory.

use std::path::PathBuf;

use appfactory_core::{Check, CheckContext, CheckMeta};
use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use crate::runner::{CommandRunner, CommandSpec};

/// Passes when `path` (relative to the build) exists.
#[derive(Debug, Clone)]
pub struct FileExistsCheck {
    meta: CheckMeta,
    path: PathBuf,
}

impl FileExistsCheck {
    pub fn new(meta: CheckMeta, path: impl Into<PathBuf>) -> Self {
        Self {
            meta,
            path: path.into(),
        }
    }
}

#[async_trait]
impl Check for FileExistsCheck {
    fn meta(&self) -> &CheckMeta {
        &self.meta
    }

    async fn verify(&self, ctx: &CheckContext) -> anyhow::Result<bool> {
        let target = ctx.build_path.join(&self.path);
        Ok(tokio::fs::try_exists(&target).await?)
    }
}

/// Passes when the file at `path` contains a match for `pattern`.
///
/// A missing file fails the check rather than erroring.
#[derive(Debug, Clone)]
pub struct ContentMatchCheck {
    meta: CheckMeta,
    path: PathBuf,
    pattern: Regex,
}

impl ContentMatchCheck {
    pub fn new(meta: CheckMeta, path: impl Into<PathBuf>, pattern: Regex) -> Self {
        Self {
            meta,
            path: path.into(),
            pattern,
        }
    }
}

#[async_trait]
impl Check for ContentMatchCheck {
    fn meta(&self) -> &CheckMeta {
        &self.meta
    }

    async fn verify(&self, ctx: &CheckContext) -> anyhow::Result<bool> {
        let target = ctx.build_path.join(&self.path);
        let content = match tokio::fs::read_to_string(&target).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %target.display(), "Content check target missing");
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };
        Ok(self.pattern.is_match(&content))
    }
}

/// Passes when the command exits 0 inside the build directory.
#[derive(Debug, Clone)]
pub struct CommandCheck {
    meta: CheckMeta,
    command: CommandSpec,
}

impl CommandCheck {
    pub fn new(meta: CheckMeta, command: CommandSpec) -> Self {
        Self { meta, command }
    }
}

#[async_trait]
impl Check for CommandCheck {
    fn meta(&self) -> &CheckMeta {
        &self.meta
    }

    async fn verify(&self, ctx: &CheckContext) -> anyhow::Result<bool> {
        let result = CommandRunner::execute(&self.command, &ctx.build_path).await?;
        if !result.passed() {
            debug!(
                check = %self.meta.id,
                exit_code = result.exit_code,
                output = %result.output_tail(10),
                "Command check failed"
            );
        }
        Ok(result.passed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(id: &str) -> CheckMeta {
        CheckMeta::new(id, id, "structure").points(10)
    }

    #[tokio::test]
    async fn test_file_exists() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.json"), "{}").unwrap();
        let ctx = CheckContext::new(dir.path(), "mobile-app", 1);

        assert!(FileExistsCheck::new(meta("a"), "app.json")
            .verify(&ctx)
            .await
            .unwrap());
        assert!(!FileExistsCheck::new(meta("b"), "missing.json")
            .verify(&ctx)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_content_match() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("package.json"),
            r#"{"dependencies": {"expo": "~51.0.0"}}"#,
        )
        .unwrap();
        let ctx = CheckContext::new(dir.path(), "mobile-app", 1);

        let expo = ContentMatchCheck::new(
            meta("expo"),
            "package.json",
            Regex::new(r#""expo"\s*:"#).unwrap(),
        );
        assert!(expo.verify(&ctx).await.unwrap());

        let hardhat = ContentMatchCheck::new(
            meta("hardhat"),
            "package.json",
            Regex::new("hardhat").unwrap(),
        );
        assert!(!hardhat.verify(&ctx).await.unwrap());
    }

    #[tokio::test]
    async fn test_content_match_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = CheckContext::new(dir.path(), "dapp", 1);
        let check = ContentMatchCheck::new(meta("x"), "nope.txt", Regex::new(".").unwrap());
        assert!(!check.verify(&ctx).await.unwrap());
    }

    #[tokio::test]
    async fn test_command_check_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = CheckContext::new(dir.path(), "plugin", 1);

        let ok = CommandCheck::new(meta("true"), CommandSpec::new("true", ["true"]));
        assert!(ok.verify(&ctx).await.unwrap());

        let bad = CommandCheck::new(meta("false"), CommandSpec::new("false", ["false"]));
        assert!(!bad.verify(&ctx).await.unwrap());
    }

    #[tokio::test]
    async fn test_command_check_spawn_failure_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = CheckContext::new(dir.path(), "plugin", 1);
        let check = CommandCheck::new(
            meta("ghost"),
            CommandSpec::new("ghost", ["appfactory-no-such-binary"]),
        );
        assert!(check.verify(&ctx).await.is_err());
    }
}
