use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::store::{DocumentStore, StoreError};

/// Stores documents as files in a GitHub repository through the contents API.
///
/// Every write needs the blob `sha` of the file being replaced, so a save is
/// a read followed by a conditional write. A concurrent writer that got in
/// first makes our `sha` stale and the write is rejected.
pub struct GitHubStore {
    client: Client,
    api_url: String,
    repo: String,
    token: String,
    branch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    sha: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Serialize)]
struct PutContents<'a> {
    message: String,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    branch: Option<&'a str>,
}

impl GitHubStore {
    pub fn new(
        api_url: impl Into<String>,
        repo: impl Into<String>,
        token: impl Into<String>,
        branch: Option<String>,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("Newsroom/1.0 (Briefing Publisher)")
            .build()?;

        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            repo: repo.into(),
            token: token.into(),
            branch,
        })
    }

    fn contents_url(&self, path: &str) -> String {
        format!("{}/repos/{}/contents/{}", self.api_url, self.repo, path)
    }

    async fn get_contents(&self, path: &str) -> Result<Option<ContentsResponse>, StoreError> {
        let mut request = self
            .client
            .get(self.contents_url(path))
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json");
        if let Some(branch) = &self.branch {
            request = request.query(&[("ref", branch)]);
        }

        let response = request.send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.json().await?)),
            status => Err(StoreError::Revision {
                path: path.to_string(),
                status: status.as_u16(),
            }),
        }
    }

    pub fn decode_content(encoded: &str) -> Option<String> {
        // The API wraps base64 at 60 columns.
        let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
        let bytes = STANDARD.decode(compact).ok()?;
        String::from_utf8(bytes).ok()
    }
}

#[async_trait::async_trait]
impl DocumentStore for GitHubStore {
    async fn load(&self, path: &str) -> Option<Value> {
        let contents = match self.get_contents(path).await {
            Ok(Some(contents)) => contents,
            Ok(None) => return None,
            Err(e) => {
                warn!("Failed to load '{}': {}", path, e);
                return None;
            }
        };

        let Some(text) = Self::decode_content(&contents.content) else {
            warn!("'{}' is not valid base64 UTF-8", path);
            return None;
        };

        match serde_json::from_str(&text) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("'{}' is not valid JSON: {}", path, e);
                None
            }
        }
    }

    async fn save(&self, path: &str, document: &Value) -> Result<(), StoreError> {
        let text = serde_json::to_string_pretty(document)?;
        let current = self.get_contents(path).await?;
        let sha = current.as_ref().map(|c| c.sha.as_str());

        let body = PutContents {
            message: format!("Update {}", path),
            content: STANDARD.encode(text.as_bytes()),
            sha,
            branch: self.branch.as_deref(),
        };

        let response = self
            .client
            .put(self.contents_url(path))
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!("Write to '{}' rejected with status {}", path, status);
            return Err(StoreError::Rejected {
                path: path.to_string(),
                status: status.as_u16(),
            });
        }

        info!(
            "Saved '{}' ({})",
            path,
            if sha.is_some() { "updated" } else { "created" }
        );
        Ok(())
    }
}
