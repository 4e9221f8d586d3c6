use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::warn;

use crate::store::{DocumentStore, StoreError};

pub const BRIEFINGS_PATH: &str = "news_data.json";
pub const FEEDS_PATH: &str = "feeds.json";
pub const STATS_PATH: &str = "stats.json";

pub const LAST_VISIT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feed {
    pub name: String,
    pub url: String,
}

impl Feed {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// Briefings keyed by `YYYY-MM-DD`.
pub type Briefings = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub total_visits: u64,
    pub last_visit: String,
}

impl Stats {
    pub fn empty(last_visit: &str) -> Self {
        Self {
            total_visits: 0,
            last_visit: last_visit.to_string(),
        }
    }
}

/// Dates of the stored briefings, most recent first.
pub fn dates_newest_first(briefings: &Briefings) -> Vec<String> {
    briefings.keys().rev().cloned().collect()
}

/// Removes every feed called `name`, keeping the others in order.
/// Returns how many were removed.
pub fn remove_feeds_named(feeds: &mut Vec<Feed>, name: &str) -> usize {
    let before = feeds.len();
    feeds.retain(|f| f.name != name);
    before - feeds.len()
}

/// Typed access to the three documents the newsroom keeps.
///
/// Each read goes back to the store; nothing is cached between requests.
/// Mutations are load-modify-save on a single document.
#[derive(Clone)]
pub struct Documents {
    store: Arc<dyn DocumentStore>,
}

impl Documents {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Loads and decodes a document. Absent and mistyped documents are both `None`.
    pub async fn load<T: DeserializeOwned>(&self, path: &str) -> Option<T> {
        let value = self.store.load(path).await?;
        match serde_json::from_value(value) {
            Ok(doc) => Some(doc),
            Err(e) => {
                warn!("Ignoring '{}' with unexpected shape: {}", path, e);
                None
            }
        }
    }

    pub async fn save<T: Serialize>(&self, path: &str, doc: &T) -> Result<(), StoreError> {
        let value = serde_json::to_value(doc)?;
        self.store.save(path, &value).await
    }

    pub async fn get_briefings(&self) -> Briefings {
        self.load(BRIEFINGS_PATH).await.unwrap_or_default()
    }

    /// Stores `report` under `date`, replacing any briefing already there.
    pub async fn publish_briefing(&self, date: &str, report: &str) -> Result<(), StoreError> {
        let mut briefings = self.get_briefings().await;
        briefings.insert(date.to_string(), report.to_string());
        self.save(BRIEFINGS_PATH, &briefings).await
    }

    pub async fn get_feeds(&self) -> Vec<Feed> {
        self.load(FEEDS_PATH).await.unwrap_or_default()
    }

    pub async fn add_feed(&self, feed: Feed) -> Result<Vec<Feed>, StoreError> {
        let mut feeds = self.get_feeds().await;
        feeds.push(feed);
        self.save(FEEDS_PATH, &feeds).await?;
        Ok(feeds)
    }

    pub async fn delete_feed(&self, name: &str) -> Result<Vec<Feed>, StoreError> {
        let mut feeds = self.get_feeds().await;
        remove_feeds_named(&mut feeds, name);
        self.save(FEEDS_PATH, &feeds).await?;
        Ok(feeds)
    }

    /// `default_last_visit` fills `last_visit` when no stats exist yet.
    pub async fn get_stats(&self, default_last_visit: &str) -> Stats {
        self.load(STATS_PATH)
            .await
            .unwrap_or_else(|| Stats::empty(default_last_visit))
    }

    /// Counts one visit at `now` and persists the result.
    pub async fn record_visit(&self, now: NaiveDateTime) -> Result<Stats, StoreError> {
        let mut stats = self.get_stats("").await;
        stats.total_visits += 1;
        stats.last_visit = now.format(LAST_VISIT_FORMAT).to_string();
        self.save(STATS_PATH, &stats).await?;
        Ok(stats)
    }
}
