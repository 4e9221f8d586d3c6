use std::fmt::Write as _;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::fetcher::Article;

/// Turns a batch of articles into a markdown briefing.
#[async_trait::async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, articles: &[Article]) -> Result<String>;
}

/// Summarizer backed by the Gemini `generateContent` endpoint.
pub struct GeminiSummarizer {
    base_url: String,
    api_key: String,
    model: String,
    client: Client,
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<RequestContent>,
}

#[derive(Debug, Serialize)]
struct RequestContent {
    role: &'static str,
    parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
struct RequestPart {
    text: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl GeminiSummarizer {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }

    pub async fn generate(&self, prompt: String) -> Result<String> {
        let body = GenerateRequest {
            contents: vec![RequestContent {
                role: "user",
                parts: vec![RequestPart { text: prompt }],
            }],
        };

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .context("Gemini HTTP request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Gemini API error {}: {}", status, body);
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .context("Failed to parse Gemini response")?;

        let text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| {
                c.parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .context("Gemini response has no candidates")?;

        if text.trim().is_empty() {
            anyhow::bail!("Gemini returned an empty briefing");
        }
        Ok(text)
    }
}

#[async_trait::async_trait]
impl Summarizer for GeminiSummarizer {
    async fn summarize(&self, articles: &[Article]) -> Result<String> {
        if articles.is_empty() {
            anyhow::bail!("No articles to summarize");
        }
        info!(
            "Summarizing {} articles with {}",
            articles.len(),
            self.model
        );
        self.generate(build_prompt(articles)).await
    }
}

/// Prompt asking for a markdown briefing over `articles`, grouped by topic.
pub fn build_prompt(articles: &[Article]) -> String {
    let mut prompt = String::from(
        r#"You are the editor of a personal morning newsroom. Write today's news briefing from the articles below.

INSTRUCTIONS:
1. Group related stories into a few topical sections with `##` headings.
2. For each story give a one or two sentence summary and name its source in parentheses.
3. Link to the original article with a markdown link when a link is given.
4. Finish with a short "Key takeaways" section of 3-5 bullets.
5. Output markdown only, with no preamble.

ARTICLES:
"#,
    );

    for (i, article) in articles.iter().enumerate() {
        let _ = writeln!(prompt, "\n[{}] {}: {}", i + 1, article.source, article.title);
        if let Some(summary) = &article.summary {
            let _ = writeln!(prompt, "Summary: {}", summary);
        }
        if let Some(link) = &article.link {
            let _ = writeln!(prompt, "Link: {}", link);
        }
    }

    prompt
}
