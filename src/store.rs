use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Could not read revision of {path}: status {status}")]
    Revision { path: String, status: u16 },
    #[error("Write to {path} rejected: status {status}")]
    Rejected { path: String, status: u16 },
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Store unavailable")]
    Unavailable,
}

/// A keyed store of JSON documents.
///
/// `load` folds every failure into `None`; callers substitute their own
/// default. `save` replaces the whole document.
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    async fn load(&self, path: &str) -> Option<Value>;

    async fn save(&self, path: &str, document: &Value) -> Result<(), StoreError>;
}

/// In-process store holding serialized documents, used for tests and local runs.
#[derive(Default)]
pub struct MemoryStore {
    files: RwLock<HashMap<String, String>>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `save` fail until switched back.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Stores raw text under `path`, bypassing serialization.
    pub async fn put_raw(&self, path: &str, content: &str) {
        self.files
            .write()
            .await
            .insert(path.to_string(), content.to_string());
    }
}

#[async_trait::async_trait]
impl DocumentStore for MemoryStore {
    async fn load(&self, path: &str) -> Option<Value> {
        let files = self.files.read().await;
        let content = files.get(path)?;
        serde_json::from_str(content).ok()
    }

    async fn save(&self, path: &str, document: &Value) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        let content = serde_json::to_string_pretty(document)?;
        self.files.write().await.insert(path.to_string(), content);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
