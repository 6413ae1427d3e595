//! Rules, laws and keywords screened against uploaded documents.
//!
//! Held in memory; the job pipeline only needs a snapshot of the current
//! lists at the moment of matching.

pub mod routes;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::warn;

use crate::config::CorpusConfig;
use crate::matching::Corpora;
use crate::types::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorpusKind {
    Rules,
    Laws,
    Keywords,
}

impl std::fmt::Display for CorpusKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CorpusKind::Rules => write!(f, "rules"),
            CorpusKind::Laws => write!(f, "laws"),
            CorpusKind::Keywords => write!(f, "keywords"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusEntry {
    pub id: u64,
    pub text: String,
}

#[derive(Debug, Default)]
struct CorpusLists {
    next_id: u64,
    rules: Vec<CorpusEntry>,
    laws: Vec<CorpusEntry>,
    keywords: Vec<CorpusEntry>,
}

impl CorpusLists {
    fn list_mut(&mut self, kind: CorpusKind) -> &mut Vec<CorpusEntry> {
        match kind {
            CorpusKind::Rules => &mut self.rules,
            CorpusKind::Laws => &mut self.laws,
            CorpusKind::Keywords => &mut self.keywords,
        }
    }

    fn list(&self, kind: CorpusKind) -> &[CorpusEntry] {
        match kind {
            CorpusKind::Rules => &self.rules,
            CorpusKind::Laws => &self.laws,
            CorpusKind::Keywords => &self.keywords,
        }
    }
}

#[derive(Clone, Default)]
pub struct CorpusStore {
    inner: Arc<RwLock<CorpusLists>>,
}

impl CorpusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-filled from configuration; blank seeds are skipped.
    pub async fn from_config(config: &CorpusConfig) -> Self {
        let store = Self::new();
        let seeds = [
            (CorpusKind::Rules, &config.seed_rules),
            (CorpusKind::Laws, &config.seed_laws),
            (CorpusKind::Keywords, &config.seed_keywords),
        ];
        for (kind, texts) in seeds {
            for text in texts {
                if let Err(e) = store.add(kind, text).await {
                    warn!(kind = %kind, error = %e, "Skipping corpus seed");
                }
            }
        }
        store
    }

    pub async fn list(&self, kind: CorpusKind) -> Vec<CorpusEntry> {
        let guard = self.inner.read().await;
        guard.list(kind).to_vec()
    }

    pub async fn add(&self, kind: CorpusKind, text: &str) -> AppResult<CorpusEntry> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AppError::InvalidRequest(format!("{} entry text must not be empty", kind)));
        }

        let mut guard = self.inner.write().await;
        guard.next_id += 1;
        let entry = CorpusEntry {
            id: guard.next_id,
            text: text.to_string(),
        };
        guard.list_mut(kind).push(entry.clone());
        Ok(entry)
    }

    /// Returns false when no entry with `id` exists in that corpus.
    pub async fn remove(&self, kind: CorpusKind, id: u64) -> bool {
        let mut guard = self.inner.write().await;
        let list = guard.list_mut(kind);
        let before = list.len();
        list.retain(|e| e.id != id);
        list.len() != before
    }

    pub async fn snapshot(&self) -> Corpora {
        let guard = self.inner.read().await;
        let texts = |kind: CorpusKind| -> Vec<String> {
            guard.list(kind).iter().map(|e| e.text.clone()).collect()
        };
        Corpora {
            rules: texts(CorpusKind::Rules),
            laws: texts(CorpusKind::Laws),
            keywords: texts(CorpusKind::Keywords),
        }
    }
}
