//! Approval-gated incident remediation.
//!
//! An alert arrives, a plan is chosen (a vetted procedure first, an AI
//! suggestion filtered through a command allow-list otherwise), a human
//! approves it from a chat card, and the plan runs exactly once against
//! the configured target.
//!
//! The single-use guarantee lives in [`registry::RemediationRegistry::consume`]:
//! whichever decision removes the pending request owns its execution.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod advisor;
pub mod alert;
pub mod config;
pub mod dedup;
pub mod error;
pub mod executor;
pub mod plan;
pub mod procedures;
pub mod registry;
pub mod report;
pub mod server;
pub mod types;
pub mod workflow;

pub use config::{ConfigError, RemediationPolicy, VettedPolicy};
pub use error::RemediationError;
pub use types::{Decision, PlanOrigin, RemediationRequest, RequestId, RequestStatus};
pub use workflow::RemediationWorkflow;
