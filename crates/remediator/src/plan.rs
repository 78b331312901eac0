//! Plan normalization and advisor command extraction.
//!
//! Advisor output is free text. Only lines that match the configured
//! allow-list patterns become commands; everything else is discarded.
//! This is a filter, not a shell parser: a line is taken verbatim or not
//! at all.

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::CommandPlan;

/// Default allow-list: privilege-escalated statements only.
pub const DEFAULT_COMMAND_PATTERNS: &[&str] = &[r"^sudo\s+\S"];

/// Errors building or validating a plan.
#[derive(Debug, Error)]
pub enum PlanError {
    /// No commands at all
    #[error("command list is empty")]
    Empty,

    /// A command that is only whitespace
    #[error("command #{index} is blank")]
    BlankCommand { index: usize },

    /// Procedure document could not be understood
    #[error("unparsable procedure document: {0}")]
    Unparsable(String),

    /// Allow-list pattern does not compile
    #[error("invalid command pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Allow-list filter for advisor-derived commands.
#[derive(Debug, Clone)]
pub struct CommandFilter {
    patterns: Vec<Regex>,
}

impl CommandFilter {
    /// Compile a filter from regex patterns matched against trimmed lines.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, PlanError> {
        let mut compiled = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            let pattern = pattern.as_ref();
            let regex = Regex::new(pattern).map_err(|source| PlanError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })?;
            compiled.push(regex);
        }
        Ok(Self { patterns: compiled })
    }

    /// Whether a single trimmed line is an allowed command.
    #[must_use]
    pub fn allows(&self, line: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(line))
    }

    /// Extract allowed commands from advisor text, preserving order.
    #[must_use]
    pub fn extract(&self, text: &str) -> Vec<String> {
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && self.allows(line))
            .map(ToString::to_string)
            .collect()
    }
}

impl Default for CommandFilter {
    fn default() -> Self {
        Self {
            patterns: DEFAULT_COMMAND_PATTERNS
                .iter()
                .filter_map(|p| Regex::new(p).ok())
                .collect(),
        }
    }
}

/// A vetted remediation procedure (SOP).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Procedure {
    pub commands: CommandPlan,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Raw stored document. Accepts both the flat `commands` list and the
/// `plan: [{cmd}]` step list.
#[derive(Debug, Deserialize)]
struct ProcedureDocument {
    #[serde(default)]
    commands: Option<Vec<String>>,
    #[serde(default)]
    plan: Option<Vec<PlanStep>>,
    #[serde(default)]
    risk: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlanStep {
    cmd: String,
}

impl Procedure {
    /// Normalize a stored procedure document.
    ///
    /// Blank entries are dropped; a document left with no commands is
    /// rejected.
    pub fn from_document(document: serde_json::Value) -> Result<Self, PlanError> {
        let doc: ProcedureDocument = serde_json::from_value(document)
            .map_err(|e| PlanError::Unparsable(e.to_string()))?;

        let raw = match (doc.commands, doc.plan) {
            (Some(commands), _) => commands,
            (None, Some(steps)) => steps.into_iter().map(|s| s.cmd).collect(),
            (None, None) => {
                return Err(PlanError::Unparsable(
                    "document has neither 'commands' nor 'plan'".to_string(),
                ))
            }
        };

        let commands = raw
            .into_iter()
            .filter(|c| !c.trim().is_empty())
            .collect::<Vec<_>>();

        Ok(Self {
            commands: CommandPlan::new(commands)?,
            risk: doc.risk.filter(|s| !s.is_empty()),
            description: doc.description.filter(|s| !s.is_empty()),
        })
    }

    /// Parse a procedure from JSON bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, PlanError> {
        let value: serde_json::Value =
            serde_json::from_slice(bytes).map_err(|e| PlanError::Unparsable(e.to_string()))?;
        Self::from_document(value)
    }

    /// Canonical stored form.
    #[must_use]
    pub fn to_document(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}
