//! Subprocess-backed runner: each firing invokes the configured
//! command with the task query appended as the final argument.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use taskbeat_core::{RunnerConfig, TaskRunner};
use tokio::process::Command;

pub struct CommandRunner {
    command: String,
    args: Vec<String>,
}

impl CommandRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            command: config.command,
            args: config.args,
        }
    }
}

#[async_trait]
impl TaskRunner for CommandRunner {
    async fn run(&self, query: &str) -> Result<String> {
        let output = Command::new(&self.command)
            .args(&self.args)
            .arg(query)
            .output()
            .await
            .with_context(|| format!("failed to launch runner command '{}'", self.command))?;

        if !output.status.success() {
            bail!(
                "runner command exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_command_runner_passes_query_as_argument() {
        let runner = CommandRunner::new(RunnerConfig {
            command: "echo".to_string(),
            args: vec!["answering:".to_string()],
        });

        let output = runner.run("what is new").await.unwrap();
        assert_eq!(output, "answering: what is new");
    }

    #[tokio::test]
    async fn test_command_runner_reports_failure() {
        let runner = CommandRunner::new(RunnerConfig {
            command: "false".to_string(),
            args: Vec::new(),
        });

        assert!(runner.run("q").await.is_err());
    }
}
