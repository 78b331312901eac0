//! Run commands on the orchestrator host itself.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{skip_remaining, CommandExecutor, ExecutionError};
use crate::types::{CommandOutcome, ExecutionReport};

/// Executes each command with `sh -c` on the local machine.
#[derive(Debug, Clone)]
pub struct LocalExecutor {
    shell: String,
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }
}

impl LocalExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn run_one(&self, command: &str) -> Result<CommandOutcome, ExecutionError> {
        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                ExecutionError::Transport(format!("failed to spawn {}: {e}", self.shell))
            })?;

        Ok(CommandOutcome {
            command: command.to_string(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            // Killed by signal: no code, still a failure that ran
            exit_status: Some(output.status.code().unwrap_or(-1)),
        })
    }
}

#[async_trait]
impl CommandExecutor for LocalExecutor {
    fn target(&self) -> String {
        "localhost".to_string()
    }

    async fn run(
        &self,
        commands: &[String],
        halt_on_failure: bool,
    ) -> Result<ExecutionReport, ExecutionError> {
        let mut outcomes = Vec::with_capacity(commands.len());

        for (index, command) in commands.iter().enumerate() {
            debug!(command = %command, "Running local command");
            let outcome = self.run_one(command).await?;
            let failed = !outcome.succeeded();
            outcomes.push(outcome);

            if failed && halt_on_failure {
                warn!(command = %command, "Command failed, halting remaining steps");
                skip_remaining(&mut outcomes, commands, index + 1);
                break;
            }
        }

        Ok(ExecutionReport {
            target: self.target(),
            outcomes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmds(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[tokio::test]
    async fn test_runs_in_order_and_captures_output() {
        let report = LocalExecutor::new()
            .run(&cmds(&["echo one", "echo two >&2"]), true)
            .await
            .unwrap();

        assert_eq!(report.target, "localhost");
        assert!(report.succeeded());
        assert_eq!(report.outcomes[0].stdout, "one\n");
        assert_eq!(report.outcomes[1].stderr, "two\n");
    }

    #[tokio::test]
    async fn test_halts_on_first_failure() {
        let report = LocalExecutor::new()
            .run(&cmds(&["echo a", "exit 3", "echo never"]), true)
            .await
            .unwrap();

        assert!(!report.succeeded());
        assert_eq!(report.outcomes.len(), 3);
        assert_eq!(report.outcomes[1].exit_status, Some(3));
        assert!(report.outcomes[2].was_skipped());
        assert_eq!(report.first_failure().unwrap().command, "exit 3");
    }

    #[tokio::test]
    async fn test_continue_on_failure_runs_everything() {
        let report = LocalExecutor::new()
            .run(&cmds(&["false", "echo still"]), false)
            .await
            .unwrap();

        assert!(!report.succeeded());
        assert_eq!(report.outcomes[1].stdout, "still\n");
        assert_eq!(report.outcomes[1].exit_status, Some(0));
    }
}
