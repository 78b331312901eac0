//! Command execution on the remediation target.

pub mod local;
pub mod ssh;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{CommandOutcome, ExecutionReport};

pub use local::LocalExecutor;
pub use ssh::{SshAuth, SshExecutor, SshTarget};

/// Failures that prevent a report from being produced.
///
/// A command exiting non-zero is not an error here; it is recorded in the
/// report and judged by the caller.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// Could not reach the target
    #[error("failed to connect to {target}: {message}")]
    Connect { target: String, message: String },

    /// Target refused our credentials
    #[error("authentication to {target} failed: {message}")]
    Auth { target: String, message: String },

    /// Run exceeded its deadline
    #[error("execution timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Transport broke mid-run
    #[error("execution transport error: {0}")]
    Transport(String),
}

/// Runs command sequences on one fixed target.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Identity of the target, for reports.
    fn target(&self) -> String;

    /// Run `commands` in order.
    ///
    /// With `halt_on_failure`, the first non-zero exit stops the run and
    /// the remaining commands are reported as skipped.
    async fn run(
        &self,
        commands: &[String],
        halt_on_failure: bool,
    ) -> Result<ExecutionReport, ExecutionError>;
}

/// Mark every command from `from` onward as skipped.
pub(crate) fn skip_remaining(
    outcomes: &mut Vec<CommandOutcome>,
    commands: &[String],
    from: usize,
) {
    outcomes.extend(commands.iter().skip(from).map(|c| CommandOutcome::skipped(c)));
}
