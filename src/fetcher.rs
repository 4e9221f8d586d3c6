use std::time::Duration;

use feed_rs::parser;
use reqwest::Client;
use scraper::Html;
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::documents::Feed;

const SUMMARY_MAX_CHARS: usize = 400;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Parse error: {0}")]
    Parse(#[from] feed_rs::parser::ParseFeedError),
}

/// One entry pulled from a feed, tagged with the feed's name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Article {
    pub source: String,
    pub title: String,
    pub summary: Option<String>,
    pub link: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedFailure {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct FetchReport {
    /// Articles in configured feed order
    pub articles: Vec<Article>,
    pub failures: Vec<FeedFailure>,
}

pub struct Fetcher {
    client: Client,
    max_entries_per_feed: usize,
}

impl Fetcher {
    pub fn new(max_entries_per_feed: usize) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("Newsroom/1.0 (RSS Aggregator)")
            .build()?;

        Ok(Self {
            client,
            max_entries_per_feed,
        })
    }

    /// Fetches every feed in turn. A broken feed is logged and recorded in
    /// `failures`; it never stops the others.
    pub async fn fetch_all(&self, feeds: &[Feed]) -> FetchReport {
        info!("Fetching {} feeds", feeds.len());
        let mut report = FetchReport::default();

        for feed in feeds {
            match self.fetch_feed(feed).await {
                Ok(articles) => {
                    info!("Got {} articles from '{}'", articles.len(), feed.name);
                    report.articles.extend(articles);
                }
                Err(e) => {
                    error!("Failed to fetch feed '{}': {}", feed.name, e);
                    report.failures.push(FeedFailure {
                        name: feed.name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        report
    }

    pub async fn fetch_feed(&self, feed: &Feed) -> Result<Vec<Article>, FetchError> {
        info!("Fetching feed: {} ({})", feed.name, feed.url);

        let response = self.client.get(&feed.url).send().await?;
        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }
        let bytes = response.bytes().await?;

        Self::parse_entries(&feed.name, &bytes, self.max_entries_per_feed)
    }

    pub fn parse_entries(
        source: &str,
        bytes: &[u8],
        limit: usize,
    ) -> Result<Vec<Article>, FetchError> {
        let parsed = parser::parse(bytes)?;

        let articles = parsed
            .entries
            .into_iter()
            .take(limit)
            .map(|entry| {
                let title = entry
                    .title
                    .map(|t| collapse_whitespace(&t.content))
                    .filter(|t| !t.is_empty())
                    .unwrap_or_else(|| "Untitled".to_string());

                let summary = entry
                    .summary
                    .map(|s| s.content)
                    .or_else(|| entry.content.and_then(|c| c.body))
                    .map(|s| clean_summary(&s))
                    .filter(|s| !s.is_empty());

                let link = entry
                    .links
                    .into_iter()
                    .map(|l| l.href)
                    .find(|href| is_web_link(href));

                Article {
                    source: source.to_string(),
                    title,
                    summary,
                    link,
                }
            })
            .collect();

        Ok(articles)
    }
}

/// Strips markup from a feed summary and bounds its length.
pub fn clean_summary(html: &str) -> String {
    let text = collapse_whitespace(&html_to_text(html));
    truncate_chars(&text, SUMMARY_MAX_CHARS)
}

/// Visible text of an HTML fragment with entities decoded. Text nodes are
/// joined with a space so adjacent block elements don't run together.
pub fn html_to_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    fragment
        .root_element()
        .text()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Article links must be absolute http(s); anything else is dropped.
pub fn is_web_link(href: &str) -> bool {
    Url::parse(href)
        .map(|url| matches!(url.scheme(), "http" | "https"))
        .unwrap_or(false)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", text[..idx].trim_end()),
        None => text.to_string(),
    }
}
