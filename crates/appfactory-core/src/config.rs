//! Ralph loop configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FactoryError, Result};

fn default_max_iterations() -> u32 {
    20
}

fn default_passing_threshold() -> u8 {
    97
}

fn default_check_timeout_secs() -> u64 {
    60
}

/// Tunables for one Ralph run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RalphConfig {
    /// Upper bound on iterations; the report never exceeds it.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Minimum score (0-100) for a PASS verdict.
    #[serde(default = "default_passing_threshold")]
    pub passing_threshold: u8,

    /// Per-check timeout in seconds. `0` disables the timeout.
    #[serde(default = "default_check_timeout_secs")]
    pub check_timeout_secs: u64,

    /// Run checks within an iteration concurrently.
    #[serde(default)]
    pub concurrent_checks: bool,

    #[serde(default)]
    pub run_skill_audits: bool,

    #[serde(default)]
    pub run_e2e: bool,
}

impl Default for RalphConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            passing_threshold: default_passing_threshold(),
            check_timeout_secs: default_check_timeout_secs(),
            concurrent_checks: false,
            run_skill_audits: false,
            run_e2e: false,
        }
    }
}

impl RalphConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(FactoryError::InvalidConfig(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        // 0 would let an unchecked build (score 0) pass.
        if !(1..=100).contains(&self.passing_threshold) {
            return Err(FactoryError::InvalidConfig(format!(
                "passing_threshold must be within 1..=100, got {}",
                self.passing_threshold
            )));
        }
        Ok(())
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs)
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_threshold(mut self, passing_threshold: u8) -> Self {
        self.passing_threshold = passing_threshold;
        self
    }
}
