//! Declarative JSON pipeline definition.
//!
//! A manifest names the pipeline, the commands driving each external phase,
//! the weighted checks Ralph scores, and the loop configuration:
//!
//! ```json
//! {
//!   "pipeline": "mobile-app",
//!   "install": { "name": "npm_install", "command": ["npm", "install"], "timeout_secs": 600 },
//!   "checks": [
//!     { "kind": "file_exists", "id": "package-json", "name": "package.json present",
//!       "category": "structure", "points": 10, "mandatory": true, "path": "package.json" },
//!     { "kind": "command", "id": "tests", "name": "npm test", "category": "quality",
//!       "points": 90, "command": ["npm", "test"] }
//!   ],
//!   "ralph": { "passing_threshold": 97 }
//! }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use appfactory_core::{CheckMeta, CheckRegistry, FactoryError, RalphConfig, RalphEngine};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::audits::{CommandE2eRunner, CommandSkillAuditRunner, SkillCommand};
use crate::probes::{CommandCheck, ContentMatchCheck, FileExistsCheck};
use crate::runner::CommandSpec;
use crate::steps::CommandSteps;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid manifest: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("check {check}: invalid pattern: {source}")]
    InvalidPattern {
        check: String,
        #[source]
        source: regex::Error,
    },

    #[error("check {0}: empty command")]
    EmptyCommand(String),

    #[error(transparent)]
    Factory(#[from] FactoryError),
}

/// How a check probes the build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Probe {
    FileExists {
        path: PathBuf,
    },
    ContentMatch {
        path: PathBuf,
        pattern: String,
    },
    Command {
        command: Vec<String>,
        #[serde(default)]
        timeout_secs: u64,
    },
}

/// One weighted check in a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckSpec {
    pub id: String,
    pub name: String,
    pub category: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub mandatory: bool,
    pub points: u32,
    #[serde(flatten)]
    pub probe: Probe,
}

impl CheckSpec {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        category: impl Into<String>,
        points: u32,
        probe: Probe,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category: category.into(),
            description: String::new(),
            mandatory: false,
            points,
            probe,
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

    fn meta(&self) -> CheckMeta {
        let mut meta = CheckMeta::new(&self.id, &self.name, &self.category)
            .describe(&self.description)
            .points(self.points);
        if self.mandatory {
            meta = meta.mandatory();
        }
        meta
    }
}

/// A complete pipeline definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineManifest {
    pub pipeline: String,

    /// Values handed to the steps by the Inputs phase.
    #[serde(default)]
    pub inputs: Map<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scaffold: Option<CommandSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install: Option<CommandSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch: Option<CommandSpec>,

    #[serde(default)]
    pub checks: Vec<CheckSpec>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skill_audits: Vec<SkillCommand>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e2e: Option<CommandSpec>,

    #[serde(default)]
    pub ralph: RalphConfig,
}

impl PipelineManifest {
    pub fn new(pipeline: impl Into<String>) -> Self {
        Self {
            pipeline: pipeline.into(),
            inputs: Map::new(),
            scaffold: None,
            install: None,
            launch: None,
            checks: Vec::new(),
            skill_audits: Vec::new(),
            e2e: None,
            ralph: RalphConfig::default(),
        }
    }

    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ManifestError> {
        Ok(serde_json::from_str(content)?)
    }

    /// Sum of check weights.
    pub fn total_points(&self) -> u32 {
        self.checks.iter().map(|c| c.points).sum()
    }

    /// Instantiate every check in manifest order.
    pub fn build_registry(&self) -> Result<CheckRegistry, ManifestError> {
        let mut registry = CheckRegistry::new();
        for spec in &self.checks {
            let meta = spec.meta();
            match &spec.probe {
                Probe::FileExists { path } => {
                    registry.register(Arc::new(FileExistsCheck::new(meta, path)))?
                }
                Probe::ContentMatch { path, pattern } => {
                    let pattern =
                        Regex::new(pattern).map_err(|source| ManifestError::InvalidPattern {
                            check: spec.id.clone(),
                            source,
                        })?;
                    registry.register(Arc::new(ContentMatchCheck::new(meta, path, pattern)))?
                }
                Probe::Command {
                    command,
                    timeout_secs,
                } => {
                    if command.is_empty() {
                        return Err(ManifestError::EmptyCommand(spec.id.clone()));
                    }
                    let command =
                        CommandSpec::new(&spec.id, command.iter()).with_timeout(*timeout_secs);
                    registry.register(Arc::new(CommandCheck::new(meta, command)))?
                }
            }
        }
        Ok(registry)
    }

    /// Registry plus any configured skill-audit and E2E runners. Declaring a
    /// runner enables its stage.
    pub fn build_engine(&self) -> Result<RalphEngine, ManifestError> {
        let mut config = self.ralph.clone();
        config.run_skill_audits |= !self.skill_audits.is_empty();
        config.run_e2e |= self.e2e.is_some();
        let mut engine = RalphEngine::new(config, self.build_registry()?)?;
        if !self.skill_audits.is_empty() {
            engine = engine.with_skill_audits(Arc::new(CommandSkillAuditRunner::new(
                self.skill_audits.clone(),
            )));
        }
        if let Some(e2e) = &self.e2e {
            engine = engine.with_e2e(Arc::new(CommandE2eRunner::new(e2e.clone())));
        }
        Ok(engine)
    }

    /// Command-driven steps for the external phases.
    pub fn steps(&self) -> CommandSteps {
        CommandSteps::new(self.inputs.clone())
            .with_scaffold(self.scaffold.clone())
            .with_install(self.install.clone())
            .with_launch(self.launch.clone())
    }
}
