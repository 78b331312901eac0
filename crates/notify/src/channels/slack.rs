//! Slack webhook notification channel.
//!
//! Slack incoming webhooks cannot post arbitrary JSON back to a service,
//! so callback actions are listed as text with their target and body.
//! Teams remains the channel of record for one-click approvals.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::webhook_client;
use crate::error::ChannelError;
use crate::message::{command_block, Notification, Severity};
use crate::NotifyChannel;

/// Environment variable for Slack webhook URL.
const ENV_SLACK_WEBHOOK_URL: &str = "SLACK_WEBHOOK_URL";

/// Slack webhook notification channel.
pub struct SlackChannel {
    webhook_url: Option<String>,
    client: reqwest::Client,
}

impl SlackChannel {
    /// Create a new Slack channel from environment variables.
    #[must_use]
    pub fn from_env(timeout: Duration) -> Self {
        let webhook_url = std::env::var(ENV_SLACK_WEBHOOK_URL)
            .ok()
            .filter(|s| !s.is_empty());

        if webhook_url.is_some() {
            debug!("Slack notifications enabled");
        } else {
            debug!("Slack notifications disabled (SLACK_WEBHOOK_URL not set)");
        }

        Self {
            webhook_url,
            client: webhook_client(timeout),
        }
    }

    /// Create a Slack channel with a specific webhook URL.
    #[must_use]
    pub fn new(webhook_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            webhook_url: Some(webhook_url.into()),
            client: webhook_client(timeout),
        }
    }

    /// Format a notification as a Slack webhook payload.
    fn format_payload(notification: &Notification) -> SlackPayload {
        let color = match notification.severity {
            Severity::Info => "#3498db",     // Blue
            Severity::Warning => "#f39c12",  // Orange
            Severity::Critical => "#e74c3c", // Red
        };

        let mut fields: Vec<SlackField> = notification
            .facts
            .iter()
            .map(|f| SlackField {
                title: f.name.clone(),
                value: f.value.clone(),
                short: true,
            })
            .collect();

        for action in &notification.actions {
            fields.push(SlackField {
                title: action.name.clone(),
                value: format!("POST `{}` with `{}`", action.target, action.body),
                short: false,
            });
        }

        let attachment = SlackAttachment {
            fallback: notification.title.clone(),
            color: color.to_string(),
            author_name: Some("Remediator".to_string()),
            title: notification.title.clone(),
            text: Self::format_text(notification),
            fields,
            footer: Some(format!(
                "{} | {}",
                notification.severity.as_str(),
                notification.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
            )),
            ts: Some(notification.timestamp.timestamp()),
        };

        SlackPayload {
            attachments: vec![attachment],
        }
    }

    fn format_text(notification: &Notification) -> String {
        let mut text = notification.body.clone().unwrap_or_default();
        if !notification.commands.is_empty() {
            if !text.is_empty() {
                text.push_str("\n\n");
            }
            text.push_str("*Commands*\n");
            text.push_str(&command_block(&notification.commands));
        }
        text
    }
}

#[async_trait]
impl NotifyChannel for SlackChannel {
    fn name(&self) -> &'static str {
        "slack"
    }

    fn enabled(&self) -> bool {
        self.webhook_url.is_some()
    }

    async fn send(&self, notification: &Notification) -> Result<(), ChannelError> {
        let webhook_url = self
            .webhook_url
            .as_ref()
            .ok_or_else(|| ChannelError::NotConfigured(ENV_SLACK_WEBHOOK_URL.to_string()))?;

        let payload = Self::format_payload(notification);

        debug!(channel = "slack", title = %notification.title, "Sending notification");

        let response = self.client.post(webhook_url).json(&payload).send().await?;

        if response.status().is_success() {
            debug!(channel = "slack", "Notification sent successfully");
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();

            warn!(
                channel = "slack",
                status = %status,
                body = %body,
                "Slack webhook request failed"
            );

            Err(ChannelError::Rejected {
                channel: "slack",
                status: status.as_u16(),
                body,
            })
        }
    }
}

// =============================================================================
// Slack API types
// =============================================================================

#[derive(Debug, Serialize)]
struct SlackPayload {
    attachments: Vec<SlackAttachment>,
}

#[derive(Debug, Serialize)]
struct SlackAttachment {
    fallback: String,
    color: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    author_name: Option<String>,
    title: String,
    text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    fields: Vec<SlackField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    footer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ts: Option<i64>,
}

#[derive(Debug, Serialize)]
struct SlackField {
    title: String,
    value: String,
    short: bool,
}
