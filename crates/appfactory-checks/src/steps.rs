//! [`PipelineSteps`] driven by optional subprocess commands.

use appfactory_core::{PhaseContext, PipelineSteps};
use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::info;

use crate::runner::{CommandRunner, CommandSpec};

const FAILURE_TAIL_LINES: usize = 20;

/// Runs each phase's command in the project root. Phases without a command
/// succeed without doing anything.
#[derive(Debug, Clone, Default)]
pub struct CommandSteps {
    inputs: Map<String, Value>,
    scaffold: Option<CommandSpec>,
    install: Option<CommandSpec>,
    launch: Option<CommandSpec>,
}

impl CommandSteps {
    pub fn new(inputs: Map<String, Value>) -> Self {
        Self {
            inputs,
            ..Default::default()
        }
    }

    pub fn with_scaffold(mut self, command: Option<CommandSpec>) -> Self {
        self.scaffold = command;
        self
    }

    pub fn with_install(mut self, command: Option<CommandSpec>) -> Self {
        self.install = command;
        self
    }

    pub fn with_launch(mut self, command: Option<CommandSpec>) -> Self {
        self.launch = command;
        self
    }

    async fn run(
        &self,
        phase: &str,
        command: Option<&CommandSpec>,
        ctx: &PhaseContext,
    ) -> anyhow::Result<()> {
        let Some(command) = command else {
            info!(phase, "No command configured, skipping");
            return Ok(());
        };

        info!(phase, command = %command.display(), "Running phase command");
        let result = CommandRunner::execute(command, &ctx.project).await?;
        if !result.passed() {
            anyhow::bail!(
                "{} exited with code {}: {}",
                command.display(),
                result.exit_code,
                result.output_tail(FAILURE_TAIL_LINES)
            );
        }
        info!(phase, duration_ms = result.duration_ms, "Phase command succeeded");
        Ok(())
    }
}

#[async_trait]
impl PipelineSteps for CommandSteps {
    async fn collect_inputs(&self, _ctx: &PhaseContext) -> anyhow::Result<Map<String, Value>> {
        Ok(self.inputs.clone())
    }

    async fn scaffold(&self, ctx: &PhaseContext) -> anyhow::Result<()> {
        self.run("scaffold", self.scaffold.as_ref(), ctx).await
    }

    async fn install(&self, ctx: &PhaseContext) -> anyhow::Result<()> {
        self.run("install", self.install.as_ref(), ctx).await
    }

    async fn launch(&self, ctx: &PhaseContext) -> anyhow::Result<()> {
        self.run("launch", self.launch.as_ref(), ctx).await
    }
}
