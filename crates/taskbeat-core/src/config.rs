//! YAML configuration: the `tasks:` mapping handed to the scheduler
//! and the command the CLI's runner shells out to.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::error;

use crate::models::{RawTaskConfig, TaskConfigError, TaskSpec};

/// The `runner:` section: the command invoked per firing, with the
/// task query appended as the final argument.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RunnerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct AppConfig {
    /// Task id -> raw task entry. BTreeMap keeps registration order
    /// deterministic.
    #[serde(default)]
    pub tasks: BTreeMap<String, RawTaskConfig>,
    #[serde(default)]
    pub runner: Option<RunnerConfig>,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// Validate every task entry. Invalid entries are logged and
    /// skipped; they never abort the valid ones.
    pub fn validate_tasks(&self) -> (Vec<TaskSpec>, Vec<(String, TaskConfigError)>) {
        let mut specs = Vec::new();
        let mut rejected = Vec::new();

        for (id, raw) in &self.tasks {
            match TaskSpec::validate(id, raw) {
                Ok(spec) => specs.push(spec),
                Err(e) => {
                    error!(task_id = %id, error = %e, "Invalid task config, skipping");
                    rejected.push((id.clone(), e));
                }
            }
        }

        (specs, rejected)
    }
}
