//! Procedures stored in a GitHub repository, read through the contents API.

use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use super::{is_safe_key, ProcedureRepository, RepositoryError};
use crate::plan::Procedure;

const USER_AGENT: &str = concat!("remediator/", env!("CARGO_PKG_VERSION"));

/// GitHub contents API response for a single file.
#[derive(Debug, Deserialize)]
struct ContentResponse {
    /// Base64, wrapped with newlines
    content: Option<String>,
    sha: Option<String>,
}

#[derive(Debug, Serialize)]
struct PutContentRequest<'a> {
    message: String,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

/// Repository rooted at a contents API directory URL, e.g.
/// `https://api.github.com/repos/acme/sops/contents/sops`.
#[derive(Clone)]
pub struct GitHubProcedureRepository {
    client: Client,
    api_base: String,
    token: Option<String>,
}

impl std::fmt::Debug for GitHubProcedureRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubProcedureRepository")
            .field("api_base", &self.api_base)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

impl GitHubProcedureRepository {
    #[must_use]
    pub fn new(api_base: impl Into<String>, token: Option<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    /// The key is pushed as one escaped path segment, never spliced as text.
    fn url_for(&self, incident_key: &str) -> Result<Url, RepositoryError> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|e| RepositoryError::Unavailable(format!("invalid GitHub API base: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| RepositoryError::Unavailable("GitHub API base cannot be a base".into()))?
            .pop_if_empty()
            .push(&format!("{incident_key}.json"));
        Ok(url)
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .request(method, url)
            .header("Accept", "application/vnd.github.v3+json")
            .header("User-Agent", USER_AGENT);
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("token {token}"));
        }
        request
    }

    /// Fetch the raw file, `None` on 404.
    async fn fetch(&self, incident_key: &str) -> Result<Option<ContentResponse>, RepositoryError> {
        let url = self.url_for(incident_key)?;
        debug!(url = %url, "Fetching procedure from GitHub");

        let response = self
            .request(reqwest::Method::GET, url)
            .send()
            .await
            .map_err(|e| RepositoryError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RepositoryError::Unavailable(format!(
                "GitHub API returned {status}: {body}"
            )));
        }

        response
            .json::<ContentResponse>()
            .await
            .map(Some)
            .map_err(|e| RepositoryError::Unavailable(format!("unreadable GitHub response: {e}")))
    }
}

fn decode_content(content: &str) -> Result<Vec<u8>, RepositoryError> {
    let clean: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(clean)
        .map_err(|e| RepositoryError::Unavailable(format!("invalid base64 content: {e}")))
}

#[async_trait]
impl ProcedureRepository for GitHubProcedureRepository {
    async fn lookup(&self, incident_key: &str) -> Result<Option<Procedure>, RepositoryError> {
        if !is_safe_key(incident_key) {
            return Ok(None);
        }

        let Some(file) = self.fetch(incident_key).await? else {
            debug!(incident = %incident_key, "No procedure in GitHub");
            return Ok(None);
        };
        let content = file
            .content
            .ok_or_else(|| {
                RepositoryError::Unavailable("GitHub response has no content".to_string())
            })?;

        let procedure = Procedure::from_slice(&decode_content(&content)?)?;
        info!(
            incident = %incident_key,
            commands = procedure.commands.len(),
            "Found vetted procedure"
        );
        Ok(Some(procedure))
    }

    async fn save(&self, incident_key: &str, procedure: &Procedure) -> Result<(), RepositoryError> {
        if !is_safe_key(incident_key) {
            return Err(RepositoryError::InvalidKey(incident_key.to_string()));
        }

        let existing_sha = self.fetch(incident_key).await?.and_then(|f| f.sha);
        let document = serde_json::to_vec_pretty(&procedure.to_document())
            .map_err(|e| RepositoryError::Unavailable(e.to_string()))?;

        let body = PutContentRequest {
            message: format!("Add SOP for {incident_key}"),
            content: base64::engine::general_purpose::STANDARD.encode(document),
            sha: existing_sha.as_deref(),
        };

        let response = self
            .request(reqwest::Method::PUT, self.url_for(incident_key)?)
            .json(&body)
            .send()
            .await
            .map_err(|e| RepositoryError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(RepositoryError::Unavailable(format!(
                "GitHub API returned {status}: {text}"
            )));
        }

        info!(
            incident = %incident_key,
            updated = existing_sha.is_some(),
            "Saved procedure to GitHub"
        );
        Ok(())
    }
}
