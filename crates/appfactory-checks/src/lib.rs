//! App Factory Checks
//!
//! Concrete collaborators for the core engine:
//! - Build probes (file exists, content pattern, command exit code)
//! - A subprocess runner with per-command timeout
//! - Skill-audit and E2E runners backed by subprocesses
//! - JSON pipeline manifests and the built-in presets
//! - Command-driven scaffold/install/launch steps

pub mod audits;
pub mod manifest;
pub mod presets;
pub mod probes;
pub mod runner;
pub mod steps;

// Re-export key types
pub use audits::{CommandE2eRunner, CommandSkillAuditRunner, SkillCommand};
pub use manifest::{CheckSpec, ManifestError, PipelineManifest, Probe};
pub use presets::BuiltinPipeline;
pub use probes::{CommandCheck, ContentMatchCheck, FileExistsCheck};
pub use runner::{CommandResult, CommandRunner, CommandSpec};
pub use steps::CommandSteps;
