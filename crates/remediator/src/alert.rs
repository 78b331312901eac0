//! Alertmanager webhook envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::RemediationError;
use crate::types::IncidentContext;

/// Alertmanager webhook payload.
///
/// Reference: <https://prometheus.io/docs/alerting/latest/configuration/#webhook_config>
///
/// Only `alerts` is required; the group fields are informational.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertEnvelope {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub group_key: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub receiver: String,
    #[serde(default)]
    pub common_labels: HashMap<String, String>,
    #[serde(default)]
    pub common_annotations: HashMap<String, String>,
    #[serde(default)]
    pub external_url: String,
    pub alerts: Vec<Alert>,
}

impl AlertEnvelope {
    /// Reject envelopes that cannot be processed at all.
    pub fn validate(&self) -> Result<(), RemediationError> {
        if self.alerts.is_empty() {
            return Err(RemediationError::InvalidInput(
                "alert envelope contains no alerts".to_string(),
            ));
        }
        for (index, alert) in self.alerts.iter().enumerate() {
            if alert.incident_key().is_none() {
                return Err(RemediationError::InvalidInput(format!(
                    "alert #{index} is missing labels.alertname"
                )));
            }
            if let Some(plan) = &alert.ai {
                plan.validate()
                    .map_err(|m| RemediationError::InvalidInput(format!("alert #{index}: {m}")))?;
            }
        }
        Ok(())
    }
}

/// Analysis and commands produced upstream, e.g. by an enrichment step
/// in front of the orchestrator. Treated as an unvetted AI suggestion.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PrecomputedPlan {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub commands: Vec<String>,
}

impl PrecomputedPlan {
    fn validate(&self) -> Result<(), String> {
        if self.summary.trim().is_empty() {
            return Err("ai.summary is required".to_string());
        }
        if self.explanation.trim().is_empty() {
            return Err("ai.explanation is required".to_string());
        }
        if self.commands.iter().all(|c| c.trim().is_empty()) {
            return Err("ai.commands must be a non-empty list".to_string());
        }
        Ok(())
    }
}

fn default_status() -> String {
    "firing".to_string()
}

/// Individual alert.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    /// "firing" or "resolved"
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    #[serde(default)]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub generator_url: String,
    /// Stable identity of the alert series
    #[serde(default)]
    pub fingerprint: String,
    /// Precomputed remediation, used when no vetted procedure exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai: Option<PrecomputedPlan>,
}

impl Alert {
    /// The incident key (`labels.alertname`), if present and non-blank.
    #[must_use]
    pub fn incident_key(&self) -> Option<&str> {
        self.labels
            .get("alertname")
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }

    #[must_use]
    pub fn severity(&self) -> Option<&str> {
        self.labels.get("severity").map(String::as_str)
    }

    #[must_use]
    pub fn instance(&self) -> Option<&str> {
        self.labels.get("instance").map(String::as_str)
    }

    #[must_use]
    pub fn summary(&self) -> Option<&str> {
        self.annotations.get("summary").map(String::as_str)
    }

    /// Free-text description, falling back to the summary.
    #[must_use]
    pub fn description(&self) -> &str {
        self.annotations
            .get("description")
            .or_else(|| self.annotations.get("summary"))
            .map_or("", String::as_str)
    }

    #[must_use]
    pub fn is_firing(&self) -> bool {
        self.status.eq_ignore_ascii_case("firing")
    }

    /// Key identifying one delivery of this alert for de-duplication.
    #[must_use]
    pub fn delivery_key(&self) -> String {
        if !self.fingerprint.is_empty() {
            return self.fingerprint.clone();
        }
        let started = self
            .starts_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_default();
        format!("{}|{started}", self.incident_key().unwrap_or_default())
    }

    /// Facts carried alongside a request.
    #[must_use]
    pub fn context(&self) -> IncidentContext {
        IncidentContext {
            severity: self.severity().map(ToString::to_string),
            description: self.description().to_string(),
            summary: self.summary().map(ToString::to_string),
            instance: self.instance().map(ToString::to_string),
            risk: None,
            ai_summary: self.ai.as_ref().map(|p| p.summary.trim().to_string()),
            ai_explanation: self.ai.as_ref().map(|p| p.explanation.trim().to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(value: serde_json::Value) -> AlertEnvelope {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_parse_minimal_envelope() {
        let env = envelope(json!({
            "alerts": [{
                "labels": {"alertname": "disk-full", "severity": "critical", "instance": "vm-1"},
                "annotations": {"description": "root partition at 98%"}
            }]
        }));
        env.validate().unwrap();

        let alert = &env.alerts[0];
        assert!(alert.is_firing());
        assert_eq!(alert.incident_key(), Some("disk-full"));
        assert_eq!(alert.description(), "root partition at 98%");

        let ctx = alert.context();
        assert_eq!(ctx.severity.as_deref(), Some("critical"));
        assert_eq!(ctx.instance.as_deref(), Some("vm-1"));
    }

    #[test]
    fn test_validate_rejects_empty_and_nameless() {
        let empty = envelope(json!({"alerts": []}));
        assert!(matches!(empty.validate(), Err(RemediationError::InvalidInput(_))));

        let nameless = envelope(json!({"alerts": [{"labels": {"alertname": "  "}}]}));
        assert!(matches!(nameless.validate(), Err(RemediationError::InvalidInput(_))));

        assert!(serde_json::from_value::<AlertEnvelope>(json!({"status": "firing"})).is_err());
    }

    #[test]
    fn test_delivery_key_prefers_fingerprint() {
        let env = envelope(json!({
            "alerts": [
                {"labels": {"alertname": "disk-full"}, "fingerprint": "abc123"},
                {"labels": {"alertname": "disk-full"}, "startsAt": "2026-01-14T10:00:00Z"}
            ]
        }));
        assert_eq!(env.alerts[0].delivery_key(), "abc123");
        assert_eq!(env.alerts[1].delivery_key(), "disk-full|2026-01-14T10:00:00+00:00");
    }

    #[test]
    fn test_description_falls_back_to_summary() {
        let env = envelope(json!({
            "alerts": [{
                "status": "resolved",
                "labels": {"alertname": "cpu-high"},
                "annotations": {"summary": "CPU above 90%"}
            }]
        }));
        assert!(!env.alerts[0].is_firing());
        assert_eq!(env.alerts[0].description(), "CPU above 90%");
    }

    #[test]
    fn test_precomputed_plan_is_carried() {
        let env = envelope(json!({
            "alerts": [{
                "labels": {"alertname": "log-growth"},
                "ai": {
                    "summary": "journald filled /var",
                    "explanation": "Vacuum the journal to 200M.",
                    "commands": ["sudo journalctl --vacuum-size=200M"]
                }
            }]
        }));
        env.validate().unwrap();

        let alert = &env.alerts[0];
        let plan = alert.ai.as_ref().unwrap();
        assert_eq!(plan.commands, ["sudo journalctl --vacuum-size=200M"]);

        let ctx = alert.context();
        assert_eq!(ctx.ai_summary.as_deref(), Some("journald filled /var"));
        assert_eq!(ctx.ai_explanation.as_deref(), Some("Vacuum the journal to 200M."));
        let plain = envelope(json!({"alerts": [{"labels": {"alertname": "x"}}]}));
        assert!(plain.alerts[0].ai.is_none());
    }

    #[test]
    fn test_incomplete_precomputed_plan_is_invalid() {
        for ai in [
            json!({"explanation": "e", "commands": ["sudo true"]}),
            json!({"summary": "s", "commands": ["sudo true"]}),
            json!({"summary": "s", "explanation": "e"}),
            json!({"summary": "s", "explanation": "e", "commands": ["  "]}),
        ] {
            let env = envelope(json!({
                "alerts": [{"labels": {"alertname": "disk-full"}, "ai": ai}]
            }));
            assert!(matches!(env.validate(), Err(RemediationError::InvalidInput(_))));
        }
    }
}
