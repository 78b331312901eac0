//! Notifications for each workflow transition.
//!
//! Every card names the incident and shows the command list verbatim.
//! Approval cards carry two actions that post back to our own callback
//! endpoint and nowhere else.

use notify::{CallbackAction, Notification, Severity};
use reqwest::Url;
use serde_json::json;
use std::fmt::Write as _;

use crate::config::ConfigError;
use crate::types::{CommandOutcome, Decision, ExecutionResult, IncidentContext, RemediationRequest};

/// Path of the decision callback under the callback base.
pub const CALLBACK_PATH: &str = "api/approval_callback";

/// The orchestrator's own externally reachable base address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackBase {
    base: Url,
}

impl CallbackBase {
    /// Parse an absolute http(s) base address.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let mut base = Url::parse(raw.trim())
            .map_err(|e| ConfigError::Invalid(format!("callback base URL '{raw}': {e}")))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "callback base URL must be http or https, got '{}'",
                base.scheme()
            )));
        }
        if base.query().is_some() || base.fragment().is_some() {
            return Err(ConfigError::Invalid(
                "callback base URL must not carry a query or fragment".to_string(),
            ));
        }
        // Url::join replaces the last segment unless the path ends in '/'
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self { base })
    }

    /// Absolute URL of the decision callback.
    #[must_use]
    pub fn decision_url(&self) -> String {
        self.base
            .join(CALLBACK_PATH)
            .map_or_else(|_| format!("{}{CALLBACK_PATH}", self.base), |u| u.to_string())
    }
}

fn alert_severity(context: &IncidentContext) -> Severity {
    context
        .severity
        .as_deref()
        .map_or(Severity::Info, Severity::from_label)
}

fn with_context(
    mut notification: Notification,
    incident_key: &str,
    context: &IncidentContext,
) -> Notification {
    notification = notification.fact("Incident", incident_key);
    if let Some(severity) = &context.severity {
        notification = notification.fact("Severity", severity);
    }
    if let Some(instance) = &context.instance {
        notification = notification.fact("Instance", instance);
    }
    // Description already falls back to the summary
    if let Some(summary) = context.summary.as_deref().map(str::trim) {
        if !summary.is_empty() && summary != context.description.trim() {
            notification = notification.fact("Summary", summary);
        }
    }
    if !context.description.is_empty() {
        notification = notification.fact("Description", &context.description);
    }
    if let Some(ai_summary) = &context.ai_summary {
        notification = notification.fact("AI summary", ai_summary);
    }
    if let Some(risk) = &context.risk {
        notification = notification.fact("Risk", risk);
    }
    notification
}

fn with_request(notification: Notification, request: &RemediationRequest) -> Notification {
    with_context(notification, &request.incident_key, &request.context)
        .fact("Plan origin", request.origin.label())
        .fact("Request", request.request_id.as_str())
        .commands(request.commands())
}

fn decision_action(
    label: &str,
    decision: Decision,
    request: &RemediationRequest,
    callback: &CallbackBase,
) -> CallbackAction {
    CallbackAction::post(
        label,
        callback.decision_url(),
        json!({
            "decision": decision.as_str(),
            "request_id": request.request_id.as_str(),
        }),
    )
}

/// Card asking a human to approve or reject a pending request.
#[must_use]
pub fn approval_request(request: &RemediationRequest, callback: &CallbackBase) -> Notification {
    let title = format!("{} remediation approval", request.incident_key);
    let mut card = with_request(Notification::new(title, alert_severity(&request.context)), request)
        .action(decision_action("Approve", Decision::Approve, request, callback))
        .action(decision_action("Reject", Decision::Reject, request, callback));
    if let Some(explanation) = &request.context.ai_explanation {
        card = card.body(explanation);
    }
    card
}

/// Terminal report for an executed or failed request.
///
/// `auto` marks runs started by policy without a human decision.
#[must_use]
pub fn execution_outcome(request: &RemediationRequest, auto: bool) -> Notification {
    let succeeded = matches!(
        request.result,
        Some(ExecutionResult::Completed(ref report)) if report.succeeded()
    );

    let title = match (auto, succeeded) {
        (true, true) => format!("{} auto-remediated", request.incident_key),
        (true, false) => format!("{} auto-remediation failed", request.incident_key),
        (false, true) => format!("{} remediation executed", request.incident_key),
        (false, false) => format!("{} remediation failed", request.incident_key),
    };
    let severity = if succeeded { Severity::Info } else { Severity::Critical };

    let mut notification = with_request(Notification::new(title, severity), request)
        .fact("Status", request.status.as_str());

    match &request.result {
        Some(ExecutionResult::Completed(report)) => {
            notification = notification
                .fact("Target", &report.target)
                .body(render_outcomes(&report.outcomes));
        }
        Some(ExecutionResult::Error { message }) => {
            notification = notification.body(format!("Execution error: {message}"));
        }
        None => {}
    }
    notification
}

/// A human rejected the plan.
#[must_use]
pub fn rejected(request: &RemediationRequest) -> Notification {
    let title = format!("{} remediation rejected", request.incident_key);
    with_request(Notification::new(title, Severity::Info), request)
        .fact("Status", request.status.as_str())
        .body("Rejected by operator. No commands were run.")
}

/// The approval window closed before a decision.
#[must_use]
pub fn expired(request: &RemediationRequest) -> Notification {
    let title = format!("{} remediation expired", request.incident_key);
    with_request(Notification::new(title, Severity::Warning), request)
        .fact("Status", request.status.as_str())
        .body("No decision arrived within the approval window. No commands were run.")
}

/// Advisor answered but nothing passed the command filter.
#[must_use]
pub fn no_actionable_commands(
    incident_key: &str,
    context: &IncidentContext,
    advisor_text: &str,
) -> Notification {
    let title = format!("{incident_key}: no automatic action available");
    with_context(Notification::new(title, Severity::Warning), incident_key, context)
        .fact("Plan origin", "AI suggestion (unvetted)")
        .body(advisor_text)
}

/// Neither a procedure nor advice could be obtained.
#[must_use]
pub fn no_plan(incident_key: &str, context: &IncidentContext, reason: &str) -> Notification {
    let title = format!("{incident_key}: no remediation plan");
    with_context(Notification::new(title, alert_severity(context)), incident_key, context)
        .body(format!(
            "No plan could be produced. Manual investigation required.\n\n{reason}"
        ))
}

/// A stored procedure exists but is not a usable plan.
#[must_use]
pub fn invalid_procedure(
    incident_key: &str,
    context: &IncidentContext,
    error: &str,
) -> Notification {
    let title = format!("{incident_key}: vetted procedure is invalid");
    with_context(Notification::new(title, Severity::Warning), incident_key, context)
        .fact("Plan origin", "Vetted procedure")
        .body(format!("The stored procedure could not be used: {error}"))
}

/// Per-command result listing.
#[must_use]
pub fn render_outcomes(outcomes: &[CommandOutcome]) -> String {
    let mut out = String::new();
    for (index, outcome) in outcomes.iter().enumerate() {
        let _ = write!(out, "{}. `{}`", index + 1, outcome.command);
        match outcome.exit_status {
            None => out.push_str(" skipped\n"),
            Some(code) => {
                let _ = writeln!(out, " exit {code}");
                if !outcome.stdout.trim().is_empty() {
                    let _ = writeln!(out, "stdout:\n```\n{}\n```", outcome.stdout.trim_end());
                }
                if !outcome.stderr.trim().is_empty() {
                    let _ = writeln!(out, "stderr:\n```\n{}\n```", outcome.stderr.trim_end());
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CommandPlan, ExecutionReport, PlanOrigin, RequestStatus};

    fn request(cmds: &[&str]) -> RemediationRequest {
        RemediationRequest::new(
            "disk-full",
            CommandPlan::new(cmds.iter().map(ToString::to_string).collect()).unwrap(),
            PlanOrigin::AiSuggested,
            IncidentContext {
                severity: Some("critical".to_string()),
                description: "root partition at 98%".to_string(),
                ..IncidentContext::default()
            },
        )
    }

    #[test]
    fn test_callback_base_joins_fixed_path() {
        let base = CallbackBase::parse("https://remediator.example.com").unwrap();
        assert_eq!(base.decision_url(), "https://remediator.example.com/api/approval_callback");

        let nested = CallbackBase::parse("https://example.com/ops").unwrap();
        assert_eq!(nested.decision_url(), "https://example.com/ops/api/approval_callback");

        assert!(CallbackBase::parse("not a url").is_err());
        assert!(CallbackBase::parse("ftp://example.com").is_err());
        assert!(CallbackBase::parse("https://example.com/?next=evil").is_err());
    }

    #[test]
    fn test_approval_card_carries_id_and_commands() {
        let req = request(&["sudo rm -rf /tmp/cache/*", "df -h /"]);
        let base = CallbackBase::parse("https://remediator.example.com/").unwrap();
        let card = approval_request(&req, &base);

        assert_eq!(card.title, "disk-full remediation approval");
        assert_eq!(card.severity, Severity::Critical);
        assert_eq!(card.commands, ["sudo rm -rf /tmp/cache/*", "df -h /"]);
        assert_eq!(card.fact_value("Request"), Some(req.request_id.as_str()));
        assert_eq!(card.fact_value("Plan origin"), Some("AI suggestion (unvetted)"));

        assert_eq!(card.actions.len(), 2);
        for (action, decision) in card.actions.iter().zip(["approve", "reject"]) {
            assert_eq!(action.target, "https://remediator.example.com/api/approval_callback");
            assert_eq!(action.body["decision"], decision);
            assert_eq!(action.body["request_id"], req.request_id.as_str());
        }
    }

    #[test]
    fn test_failed_outcome_lists_each_command() {
        let mut req = request(&["echo a", "false", "echo c"]);
        req.advance(RequestStatus::Approved).unwrap();
        req.complete(ExecutionResult::Completed(ExecutionReport {
            target: "azureuser@vm:22".to_string(),
            outcomes: vec![
                CommandOutcome {
                    command: "echo a".to_string(),
                    stdout: "a\n".to_string(),
                    stderr: String::new(),
                    exit_status: Some(0),
                },
                CommandOutcome {
                    command: "false".to_string(),
                    stdout: String::new(),
                    stderr: "boom".to_string(),
                    exit_status: Some(1),
                },
                CommandOutcome::skipped("echo c"),
            ],
        }))
        .unwrap();

        let card = execution_outcome(&req, false);
        assert_eq!(card.title, "disk-full remediation failed");
        assert_eq!(card.fact_value("Status"), Some("failed"));
        assert!(!card.is_actionable());

        let body = card.body.unwrap();
        assert!(body.contains("1. `echo a` exit 0"));
        assert!(body.contains("2. `false` exit 1"));
        assert!(body.contains("stderr:\n```\nboom\n```"));
        assert!(body.contains("3. `echo c` skipped"));
    }

    #[test]
    fn test_no_actionable_carries_advisor_text() {
        let ctx = IncidentContext::default();
        let card = no_actionable_commands("disk-full", &ctx, "Check the disk manually.");
        assert_eq!(card.body.as_deref(), Some("Check the disk manually."));
        assert!(card.commands.is_empty());
        assert!(!card.is_actionable());
    }

    #[test]
    fn test_summary_annotation_is_shown() {
        let ctx = IncidentContext {
            summary: Some("Disk almost full on vm-1".to_string()),
            description: "root partition at 98%".to_string(),
            ..IncidentContext::default()
        };
        let card = no_plan("disk-full", &ctx, "advisor down");
        assert_eq!(card.fact_value("Summary"), Some("Disk almost full on vm-1"));
        assert_eq!(card.fact_value("Description"), Some("root partition at 98%"));

        // Summary-only alerts already show it as the description
        let summary_only = IncidentContext {
            summary: Some("CPU above 90%".to_string()),
            description: "CPU above 90%".to_string(),
            ..IncidentContext::default()
        };
        let card = no_plan("cpu-high", &summary_only, "advisor down");
        assert_eq!(card.fact_value("Summary"), None);
        assert_eq!(card.fact_value("Description"), Some("CPU above 90%"));
    }

    #[test]
    fn test_approval_card_shows_upstream_analysis() {
        let mut req = request(&["sudo journalctl --vacuum-size=200M"]);
        req.context.ai_summary = Some("journald filled /var".to_string());
        req.context.ai_explanation = Some("Vacuum the journal to 200M.".to_string());

        let base = CallbackBase::parse("https://remediator.example.com").unwrap();
        let card = approval_request(&req, &base);
        assert_eq!(card.fact_value("AI summary"), Some("journald filled /var"));
        assert_eq!(card.body.as_deref(), Some("Vacuum the journal to 200M."));
        assert_eq!(card.actions.len(), 2);
    }
}
