//! Microsoft Teams incoming-webhook channel.
//!
//! Renders notifications as legacy `MessageCard` payloads. Callback
//! actions become `HttpPOST` actions so the approve/reject buttons post
//! their JSON body straight back to the orchestrator.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::webhook_client;
use crate::error::ChannelError;
use crate::message::{command_block, Notification};
use crate::NotifyChannel;

/// Environment variable for the Teams webhook URL.
const ENV_TEAMS_WEBHOOK_URL: &str = "TEAMS_WEBHOOK_URL";

/// Microsoft Teams webhook notification channel.
pub struct TeamsChannel {
    webhook_url: Option<String>,
    client: reqwest::Client,
}

impl TeamsChannel {
    /// Create a new Teams channel from environment variables.
    #[must_use]
    pub fn from_env(timeout: Duration) -> Self {
        let webhook_url = std::env::var(ENV_TEAMS_WEBHOOK_URL)
            .ok()
            .filter(|s| !s.is_empty());

        if webhook_url.is_some() {
            debug!("Teams notifications enabled");
        } else {
            debug!("Teams notifications disabled (TEAMS_WEBHOOK_URL not set)");
        }

        Self {
            webhook_url,
            client: webhook_client(timeout),
        }
    }

    /// Create a Teams channel with a specific webhook URL.
    #[must_use]
    pub fn new(webhook_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            webhook_url: Some(webhook_url.into()),
            client: webhook_client(timeout),
        }
    }

    /// Format a notification as a `MessageCard`.
    pub fn format_card(notification: &Notification) -> Result<MessageCard, ChannelError> {
        let mut text = String::new();
        if let Some(body) = &notification.body {
            text.push_str(body);
        }
        if !notification.commands.is_empty() {
            if !text.is_empty() {
                text.push_str("\n\n");
            }
            text.push_str("**Commands**\n\n");
            text.push_str(&command_block(&notification.commands));
        }

        let mut potential_action = Vec::with_capacity(notification.actions.len());
        for action in &notification.actions {
            potential_action.push(CardAction {
                action_type: "HttpPOST",
                name: action.name.clone(),
                target: action.target.clone(),
                body: serde_json::to_string(&action.body)?,
                headers: vec![CardHeader {
                    name: "Content-Type",
                    value: "application/json",
                }],
            });
        }

        Ok(MessageCard {
            card_type: "MessageCard",
            context: "http://schema.org/extensions",
            summary: notification.title.clone(),
            theme_color: notification.severity.theme_color(),
            title: notification.title.clone(),
            sections: vec![CardSection {
                facts: notification
                    .facts
                    .iter()
                    .map(|f| CardFact {
                        name: f.name.clone(),
                        value: f.value.clone(),
                    })
                    .collect(),
                text: (!text.is_empty()).then_some(text),
            }],
            potential_action,
        })
    }
}

#[async_trait]
impl NotifyChannel for TeamsChannel {
    fn name(&self) -> &'static str {
        "teams"
    }

    fn enabled(&self) -> bool {
        self.webhook_url.is_some()
    }

    async fn send(&self, notification: &Notification) -> Result<(), ChannelError> {
        let webhook_url = self
            .webhook_url
            .as_ref()
            .ok_or_else(|| ChannelError::NotConfigured(ENV_TEAMS_WEBHOOK_URL.to_string()))?;

        let card = Self::format_card(notification)?;

        debug!(channel = "teams", title = %notification.title, "Sending notification");

        let response = self.client.post(webhook_url).json(&card).send().await?;

        if response.status().is_success() {
            debug!(channel = "teams", "Notification sent successfully");
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();

            warn!(
                channel = "teams",
                status = %status,
                body = %body,
                "Teams webhook request failed"
            );

            Err(ChannelError::Rejected {
                channel: "teams",
                status: status.as_u16(),
                body,
            })
        }
    }
}

// =============================================================================
// Teams MessageCard types
// =============================================================================

#[derive(Debug, Serialize)]
pub struct MessageCard {
    #[serde(rename = "@type")]
    card_type: &'static str,
    #[serde(rename = "@context")]
    context: &'static str,
    summary: String,
    #[serde(rename = "themeColor")]
    theme_color: &'static str,
    title: String,
    sections: Vec<CardSection>,
    #[serde(rename = "potentialAction", skip_serializing_if = "Vec::is_empty")]
    potential_action: Vec<CardAction>,
}

#[derive(Debug, Serialize)]
struct CardSection {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    facts: Vec<CardFact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
struct CardFact {
    name: String,
    value: String,
}

#[derive(Debug, Serialize)]
struct CardAction {
    #[serde(rename = "@type")]
    action_type: &'static str,
    name: String,
    target: String,
    body: String,
    headers: Vec<CardHeader>,
}

#[derive(Debug, Serialize)]
struct CardHeader {
    name: &'static str,
    value: &'static str,
}
