//! The "fetch and analyze" run behind the admin trigger button.

use thiserror::Error;
use tracing::{info, warn};

use crate::documents::Feed;
use crate::fetcher::{FeedFailure, Fetcher};
use crate::summarizer::Summarizer;

/// Each variant is a different stage breaking, so the admin can tell them apart.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("No feeds configured.")]
    NoFeeds,
    /// Fetching left nothing to summarize: every feed either failed or was empty.
    #[error(
        "None of the {feed_count} configured feeds returned any articles ({} could not be fetched).",
        .failures.len()
    )]
    NoArticles {
        feed_count: usize,
        failures: Vec<FeedFailure>,
    },
    #[error("Summarization failed: {0:#}")]
    Summarization(anyhow::Error),
}

#[derive(Debug)]
pub struct Analysis {
    /// Markdown briefing returned by the summarizer
    pub report: String,
    pub article_count: usize,
    /// Feeds skipped during this run
    pub failures: Vec<FeedFailure>,
}

pub async fn fetch_and_analyze(
    feeds: &[Feed],
    fetcher: &Fetcher,
    summarizer: &dyn Summarizer,
) -> Result<Analysis, PipelineError> {
    if feeds.is_empty() {
        return Err(PipelineError::NoFeeds);
    }

    let fetched = fetcher.fetch_all(feeds).await;
    if fetched.articles.is_empty() {
        warn!(
            "No articles from {} feeds ({} failed), nothing to summarize",
            feeds.len(),
            fetched.failures.len()
        );
        return Err(PipelineError::NoArticles {
            feed_count: feeds.len(),
            failures: fetched.failures,
        });
    }

    info!(
        "Fetched {} articles ({} feeds skipped)",
        fetched.articles.len(),
        fetched.failures.len()
    );

    let report = summarizer
        .summarize(&fetched.articles)
        .await
        .map_err(PipelineError::Summarization)?;

    Ok(Analysis {
        report,
        article_count: fetched.articles.len(),
        failures: fetched.failures,
    })
}
