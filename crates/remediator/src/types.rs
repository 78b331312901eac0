//! Core data model for remediation requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::RemediationError;
use crate::plan::PlanError;

/// Opaque single-use capability naming one pending remediation.
///
/// Generated from 122 bits of OS randomness (UUID v4), rendered as 32
/// lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Generate a fresh unguessable id.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Parse an id received from a caller.
    ///
    /// Returns `None` for anything that cannot have been issued by
    /// [`RequestId::generate`].
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let well_formed = raw.len() == 32
            && raw
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        well_formed.then(|| Self(raw.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a plan came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanOrigin {
    /// Stored, pre-approved procedure
    Vetted,
    /// Derived from advisor output
    AiSuggested,
}

impl PlanOrigin {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Vetted => "vetted",
            Self::AiSuggested => "ai_suggested",
        }
    }

    /// Human label used on cards.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Vetted => "Vetted procedure",
            Self::AiSuggested => "AI suggestion (unvetted)",
        }
    }
}

/// Lifecycle status of a remediation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
    Executed,
    Failed,
    Expired,
}

impl RequestStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Executed => "executed",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }

    /// Terminal states are never left again.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Rejected | Self::Executed | Self::Failed | Self::Expired
        )
    }

    /// Allowed edges of the request state machine.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (
                Self::Pending,
                Self::Approved | Self::Rejected | Self::Expired
            ) | (Self::Approved, Self::Executed | Self::Failed)
        )
    }
}

/// Ordered, non-empty command list. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CommandPlan(Vec<String>);

impl CommandPlan {
    /// Validate a command list.
    ///
    /// Commands are trimmed; a blank command or an empty list is rejected.
    pub fn new(commands: Vec<String>) -> Result<Self, PlanError> {
        if commands.is_empty() {
            return Err(PlanError::Empty);
        }
        let mut normalized = Vec::with_capacity(commands.len());
        for (index, cmd) in commands.into_iter().enumerate() {
            let cmd = cmd.trim();
            if cmd.is_empty() {
                return Err(PlanError::BlankCommand { index });
            }
            normalized.push(cmd.to_string());
        }
        Ok(Self(normalized))
    }

    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for CommandPlan {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let commands = Vec::<String>::deserialize(deserializer)?;
        Self::new(commands).map_err(serde::de::Error::custom)
    }
}

/// Alert context carried alongside a request for reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentContext {
    /// Raw severity label (`critical`, `warning`, ...)
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub summary: Option<String>,
    /// Affected instance label
    #[serde(default)]
    pub instance: Option<String>,
    /// Risk note from the vetted procedure
    #[serde(default)]
    pub risk: Option<String>,
    /// Upstream analysis delivered with a precomputed plan
    #[serde(default)]
    pub ai_summary: Option<String>,
    #[serde(default)]
    pub ai_explanation: Option<String>,
}

/// Approve or reject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
        }
    }
}

/// Result of running one command on the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub command: String,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    /// `None` when the command never ran
    pub exit_status: Option<i32>,
}

impl CommandOutcome {
    /// A command not run because an earlier one failed.
    #[must_use]
    pub fn skipped(command: &str) -> Self {
        Self {
            command: command.to_string(),
            stdout: String::new(),
            stderr: String::new(),
            exit_status: None,
        }
    }

    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.exit_status == Some(0)
    }

    #[must_use]
    pub fn was_skipped(&self) -> bool {
        self.exit_status.is_none()
    }
}

/// Per-command results for one execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Target host identity
    pub target: String,
    pub outcomes: Vec<CommandOutcome>,
}

impl ExecutionReport {
    /// Every command ran and exited 0.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        !self.outcomes.is_empty() && self.outcomes.iter().all(CommandOutcome::succeeded)
    }

    /// First command that ran and exited non-zero.
    #[must_use]
    pub fn first_failure(&self) -> Option<&CommandOutcome> {
        self.outcomes
            .iter()
            .find(|o| !o.was_skipped() && !o.succeeded())
    }
}

/// What happened when a request was executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionResult {
    Completed(ExecutionReport),
    Error { message: String },
}

/// One pending or resolved remediation decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemediationRequest {
    pub request_id: RequestId,
    pub incident_key: String,
    pub origin: PlanOrigin,
    commands: CommandPlan,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub context: IncidentContext,
    #[serde(default)]
    pub result: Option<ExecutionResult>,
}

impl RemediationRequest {
    /// Create a new PENDING request with a fresh id.
    #[must_use]
    pub fn new(
        incident_key: impl Into<String>,
        commands: CommandPlan,
        origin: PlanOrigin,
        context: IncidentContext,
    ) -> Self {
        Self {
            request_id: RequestId::generate(),
            incident_key: incident_key.into(),
            origin,
            commands,
            status: RequestStatus::Pending,
            created_at: Utc::now(),
            context,
            result: None,
        }
    }

    /// Rebuild a stored request (registry backends).
    #[must_use]
    pub fn restore(
        request_id: RequestId,
        incident_key: String,
        origin: PlanOrigin,
        commands: CommandPlan,
        created_at: DateTime<Utc>,
        context: IncidentContext,
    ) -> Self {
        Self {
            request_id,
            incident_key,
            origin,
            commands,
            status: RequestStatus::Pending,
            created_at,
            context,
            result: None,
        }
    }

    #[must_use]
    pub fn commands(&self) -> &[String] {
        self.commands.as_slice()
    }

    #[must_use]
    pub fn plan(&self) -> &CommandPlan {
        &self.commands
    }

    /// Whether the request is older than `max_age` at `now`.
    #[must_use]
    pub fn is_older_than(&self, max_age: chrono::Duration, now: DateTime<Utc>) -> bool {
        now - self.created_at > max_age
    }

    /// Move to `next`, enforcing the state machine.
    pub fn advance(&mut self, next: RequestStatus) -> Result<(), RemediationError> {
        if !self.status.can_transition_to(next) {
            return Err(RemediationError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Attach an execution result and move to EXECUTED or FAILED.
    pub fn complete(&mut self, result: ExecutionResult) -> Result<(), RemediationError> {
        let next = match &result {
            ExecutionResult::Completed(report) if report.succeeded() => RequestStatus::Executed,
            _ => RequestStatus::Failed,
        };
        self.advance(next)?;
        self.result = Some(result);
        Ok(())
    }
}
