//! AI remediation advisor.
//!
//! The advisor is side-effect free: it only returns text. Turning that
//! text into commands is the allow-list filter's job.

use async_trait::async_trait;
use handlebars::Handlebars;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Default chat-completions endpoint base.
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Default model.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

const TEMPERATURE: f32 = 0.2;

const SYSTEM_PROMPT: &str = "You are a senior Site Reliability Engineer.";

const USER_TEMPLATE: &str = "Incident: {{incident}}
Description: {{description}}

Provide:
1. Root cause
2. Step-by-step Linux remediation commands
3. Safety warnings

Put every command on its own line, prefixed with sudo, with no numbering or markdown.";

/// Advisor failures.
#[derive(Debug, Error)]
pub enum AdvisorError {
    /// No credential configured
    #[error("advisor not configured: {0}")]
    Unavailable(String),

    /// Call made but failed or returned nothing usable
    #[error("advisor call failed: {0}")]
    Failed(String),
}

/// Produces free-text remediation guidance for an incident.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemediationAdvisor: Send + Sync {
    async fn suggest(&self, incident_key: &str, description: &str) -> Result<String, AdvisorError>;
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Serialize)]
struct PromptData<'a> {
    incident: &'a str,
    description: &'a str,
}

/// OpenAI chat-completions advisor.
pub struct OpenAiAdvisor {
    client: Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
    prompts: Handlebars<'static>,
}

impl std::fmt::Debug for OpenAiAdvisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiAdvisor")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("configured", &self.is_configured())
            .finish_non_exhaustive()
    }
}

impl OpenAiAdvisor {
    /// Build an advisor. A missing or empty `api_key` yields an advisor
    /// that always reports [`AdvisorError::Unavailable`].
    pub fn new(
        api_key: Option<String>,
        model: Option<String>,
        base_url: Option<String>,
        timeout: Duration,
    ) -> Result<Self, AdvisorError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AdvisorError::Failed(format!("failed to build HTTP client: {e}")))?;

        let mut prompts = Handlebars::new();
        prompts.register_escape_fn(handlebars::no_escape);
        prompts
            .register_template_string("user", USER_TEMPLATE)
            .map_err(|e| AdvisorError::Failed(format!("invalid prompt template: {e}")))?;

        Ok(Self {
            client,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            prompts,
        })
    }

    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn render_prompt(&self, incident_key: &str, description: &str) -> Result<String, AdvisorError> {
        self.prompts
            .render(
                "user",
                &PromptData {
                    incident: incident_key,
                    description,
                },
            )
            .map_err(|e| AdvisorError::Failed(format!("failed to render prompt: {e}")))
    }
}

#[async_trait]
impl RemediationAdvisor for OpenAiAdvisor {
    async fn suggest(&self, incident_key: &str, description: &str) -> Result<String, AdvisorError> {
        let Some(api_key) = &self.api_key else {
            return Err(AdvisorError::Unavailable("OPENAI_API_KEY is not set".to_string()));
        };

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: self.render_prompt(incident_key, description)?,
                },
            ],
            temperature: TEMPERATURE,
        };

        debug!(model = %self.model, incident = %incident_key, "Requesting remediation advice");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AdvisorError::Failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AdvisorError::Failed(format!("OpenAI API returned {status}: {body}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| AdvisorError::Failed(format!("unreadable OpenAI response: {e}")))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| AdvisorError::Failed("OpenAI returned no content".to_string()))?;

        info!(incident = %incident_key, chars = text.len(), "Received remediation advice");
        Ok(text)
    }
}
