//! Error taxonomy for the remediation workflow.

use thiserror::Error;

use crate::plan::PlanError;
use crate::registry::RegistryError;
use crate::types::{RequestId, RequestStatus};

/// Conditions surfaced by the workflow entry points.
///
/// Collaborator failures never escape as faults: the workflow turns them
/// into one of these conditions plus a human-visible notification. A
/// failed or timed-out command run is not an error at all; it is a
/// FAILED request with its report.
#[derive(Debug, Error)]
pub enum RemediationError {
    /// Malformed or incomplete alert/decision payload
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Empty or unparsable command list
    #[error("invalid plan: {0}")]
    InvalidPlan(#[from] PlanError),

    /// Suggested commands yielded nothing matching the allow-list filter
    #[error("no automatic action available: no suggested command passed the allow-list")]
    NoActionableCommands,

    /// Advisor not configured or unreachable
    #[error("remediation advisor unavailable: {0}")]
    AdvisorUnavailable(String),

    /// Procedure repository not configured or unreachable
    #[error("procedure repository unavailable: {0}")]
    RepositoryUnavailable(String),

    /// Decision references a consumed, unknown or swept request
    #[error("request already resolved or unknown")]
    AlreadyResolvedOrUnknown,

    /// Decision arrived after the request's approval window closed
    #[error("request {0} expired before a decision arrived")]
    Expired(RequestId),

    /// Registry store failure (fatal for the single request)
    #[error("registry failure: {0}")]
    Registry(#[from] RegistryError),

    /// Internal state machine violation
    #[error("invalid status transition {from:?} -> {to:?}")]
    InvalidTransition { from: RequestStatus, to: RequestStatus },
}

impl RemediationError {
    /// Stable machine-readable code for responses and logs.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::InvalidPlan(_) => "invalid_plan",
            Self::NoActionableCommands => "no_actionable_commands",
            Self::AdvisorUnavailable(_) => "advisor_unavailable",
            Self::RepositoryUnavailable(_) => "repository_unavailable",
            Self::AlreadyResolvedOrUnknown => "already_resolved_or_unknown",
            Self::Expired(_) => "expired",
            Self::Registry(_) => "registry_error",
            Self::InvalidTransition { .. } => "internal_error",
        }
    }
}
