//! Channel-neutral notification message.
//!
//! A [`Notification`] carries everything a human needs to judge a
//! remediation: a title, key facts, the exact command list and, when a
//! decision is required, the callback actions. Channels decide how to
//! render it but must never shorten the command list.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity levels for alerts and notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational - normal operations
    Info,
    /// Warning - something needs attention
    Warning,
    /// Critical - immediate action required
    Critical,
}

impl Severity {
    /// Map an alert `severity` label onto a notification severity.
    ///
    /// Unknown labels are treated as informational.
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        match label.to_ascii_lowercase().as_str() {
            "critical" | "page" | "error" => Self::Critical,
            "warning" | "warn" => Self::Warning,
            _ => Self::Info,
        }
    }

    /// Hex theme color (without `#`) for this severity.
    #[must_use]
    pub const fn theme_color(&self) -> &'static str {
        match self {
            Self::Info => "0076D7",
            Self::Warning => "F39C12",
            Self::Critical => "E74C3C",
        }
    }

    /// Get display name for this severity.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "Info",
            Self::Warning => "Warning",
            Self::Critical => "Critical",
        }
    }
}

/// A single name/value pair shown on a card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fact {
    pub name: String,
    pub value: String,
}

/// An actionable button that posts a JSON body back to the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackAction {
    /// Button label
    pub name: String,
    /// Absolute URL the channel posts to
    pub target: String,
    /// JSON body posted to `target`
    pub body: serde_json::Value,
}

impl CallbackAction {
    /// Create an HTTP POST callback action.
    pub fn post(
        name: impl Into<String>,
        target: impl Into<String>,
        body: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            body,
        }
    }
}

/// Structured message delivered to every enabled channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub severity: Severity,
    #[serde(default)]
    pub facts: Vec<Fact>,
    /// Commands rendered verbatim, in order
    #[serde(default)]
    pub commands: Vec<String>,
    /// Free text (advisor output, execution report, error)
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub actions: Vec<CallbackAction>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    /// Start a notification with a title and severity.
    pub fn new(title: impl Into<String>, severity: Severity) -> Self {
        Self {
            title: title.into(),
            severity,
            facts: vec![],
            commands: vec![],
            body: None,
            actions: vec![],
            timestamp: Utc::now(),
        }
    }

    /// Append a fact.
    #[must_use]
    pub fn fact(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.facts.push(Fact {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    /// Set the command list.
    #[must_use]
    pub fn commands(mut self, commands: &[String]) -> Self {
        self.commands = commands.to_vec();
        self
    }

    /// Set the free-text body.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Append a callback action.
    #[must_use]
    pub fn action(mut self, action: CallbackAction) -> Self {
        self.actions.push(action);
        self
    }

    /// Whether this notification asks a human for a decision.
    #[must_use]
    pub fn is_actionable(&self) -> bool {
        !self.actions.is_empty()
    }

    /// Look up a fact value by name.
    #[must_use]
    pub fn fact_value(&self, name: &str) -> Option<&str> {
        self.facts
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }
}

/// Render commands as a fenced shell block, one command per line.
#[must_use]
pub fn command_block(commands: &[String]) -> String {
    let mut out = String::from("```bash\n");
    for cmd in commands {
        out.push_str(cmd);
        out.push('\n');
    }
    out.push_str("```");
    out
}
