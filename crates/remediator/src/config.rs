//! Remediation policy configuration.
//!
//! Deployment values (URLs, credentials) come from flags and the
//! environment; behavioural knobs live in an optional JSON policy file.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::plan::{CommandFilter, PlanError, DEFAULT_COMMAND_PATTERNS};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Pattern(#[from] PlanError),
}

/// What to do when a vetted procedure exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VettedPolicy {
    /// Vetted plans still go through the approval gate
    #[default]
    RequireApproval,
    /// Vetted plans run immediately
    AutoExecute,
}

impl VettedPolicy {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RequireApproval => "require_approval",
            Self::AutoExecute => "auto_execute",
        }
    }
}

/// Behavioural policy for the remediation workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemediationPolicy {
    pub vetted_policy: VettedPolicy,
    /// Approval window for pending requests
    pub request_ttl_secs: u64,
    pub expire_sweep_interval_secs: u64,
    pub dedup_window_mins: u64,
    /// Allow-list regexes for advisor-derived commands
    pub command_patterns: Vec<String>,
    /// Stop at the first non-zero exit
    pub halt_on_failure: bool,
    pub execution_timeout_secs: u64,
    pub lookup_timeout_secs: u64,
    pub notify_timeout_secs: u64,
    pub advisor_timeout_secs: u64,
    /// Enables `PUT /api/procedures/{incident}`
    pub allow_procedure_writes: bool,
}

impl Default for RemediationPolicy {
    fn default() -> Self {
        Self {
            vetted_policy: VettedPolicy::default(),
            request_ttl_secs: 3600,
            expire_sweep_interval_secs: 60,
            dedup_window_mins: 30,
            command_patterns: DEFAULT_COMMAND_PATTERNS
                .iter()
                .map(ToString::to_string)
                .collect(),
            halt_on_failure: true,
            execution_timeout_secs: 60,
            lookup_timeout_secs: 10,
            notify_timeout_secs: 10,
            advisor_timeout_secs: 30,
            allow_procedure_writes: false,
        }
    }
}

impl RemediationPolicy {
    /// Load a policy file, filling unspecified fields with defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let policy: Self = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        policy.validate()?;
        Ok(policy)
    }

    /// Reject values the workflow cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let zero = [
            ("request_ttl_secs", self.request_ttl_secs),
            ("expire_sweep_interval_secs", self.expire_sweep_interval_secs),
            ("execution_timeout_secs", self.execution_timeout_secs),
            ("lookup_timeout_secs", self.lookup_timeout_secs),
            ("notify_timeout_secs", self.notify_timeout_secs),
            ("advisor_timeout_secs", self.advisor_timeout_secs),
        ]
        .into_iter()
        .find(|(_, v)| *v == 0);
        if let Some((name, _)) = zero {
            return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
        }
        if self.command_patterns.is_empty() {
            return Err(ConfigError::Invalid(
                "command_patterns must contain at least one pattern".to_string(),
            ));
        }
        self.command_filter()?;
        Ok(())
    }

    /// Compile the allow-list filter.
    pub fn command_filter(&self) -> Result<CommandFilter, ConfigError> {
        Ok(CommandFilter::new(self.command_patterns.as_slice())?)
    }

    #[must_use]
    pub fn request_ttl(&self) -> chrono::Duration {
        i64::try_from(self.request_ttl_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    #[must_use]
    pub fn dedup_window(&self) -> chrono::Duration {
        i64::try_from(self.dedup_window_mins)
            .ok()
            .and_then(chrono::Duration::try_minutes)
            .unwrap_or(chrono::Duration::MAX)
    }

    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.expire_sweep_interval_secs)
    }

    #[must_use]
    pub const fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }

    #[must_use]
    pub const fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.lookup_timeout_secs)
    }

    #[must_use]
    pub const fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.notify_timeout_secs)
    }

    #[must_use]
    pub const fn advisor_timeout(&self) -> Duration {
        Duration::from_secs(self.advisor_timeout_secs)
    }
}
