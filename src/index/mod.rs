//! Embedding-keyed semantic index over chunked transcripts.

use crate::config::SearchConfig;
use crate::domain::{IndexEntry, SearchFilters, SearchHit, TranscriptSegment};
use crate::error::SearchError;
use crate::services::Embedder;
use crate::store::DurableStore;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Semantic retrieval over indexed transcript segments.
///
/// Indexing and querying use the same external embedding capability. A
/// failed or slow query-time embedding degrades to keyword matching over
/// segment text instead of failing the request.
pub struct SearchIndex {
    store: Arc<dyn DurableStore>,
    embedder: Arc<dyn Embedder>,
    config: SearchConfig,
}

impl SearchIndex {
    pub fn new(
        store: Arc<dyn DurableStore>,
        embedder: Arc<dyn Embedder>,
        config: SearchConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    /// Embed and upsert entries for the given segments. Called by the
    /// indexing stage; failures propagate so the stage can retry.
    pub async fn index_segments(
        &self,
        segments: &[TranscriptSegment],
        faculty: &str,
        subject: &str,
        date: DateTime<Utc>,
    ) -> Result<usize> {
        for segment in segments {
            let embedding = self
                .embedder
                .embed(&segment.text)
                .await
                .context("embedding call failed")?;
            self.store
                .put_index_entry(IndexEntry {
                    segment_id: segment.id,
                    embedding,
                    text: segment.text.clone(),
                    faculty: faculty.to_string(),
                    subject: subject.to_string(),
                    date,
                })
                .await?;
        }
        info!(count = segments.len(), "indexed transcript segments");
        Ok(segments.len())
    }

    /// Top-K entries by descending similarity, ties broken by more recent
    /// date. Structured filters are applied before ranking.
    pub async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>, SearchError> {
        let entries = self.store.index_entries(filters).await?;

        let budget = Duration::from_millis(self.config.embed_timeout_ms);
        let query_vector = match tokio::time::timeout(budget, self.embedder.embed(query)).await {
            Ok(Ok(vector)) => Some(vector),
            Ok(Err(e)) => {
                let fault = SearchError::IndexUnavailable {
                    reason: e.to_string(),
                };
                warn!("{fault}, falling back to keyword match");
                None
            }
            Err(_) => {
                let fault = SearchError::IndexUnavailable {
                    reason: format!(
                        "query embedding exceeded {}ms budget",
                        self.config.embed_timeout_ms
                    ),
                };
                warn!("{fault}, falling back to keyword match");
                None
            }
        };

        let mut hits: Vec<SearchHit> = match query_vector {
            Some(vector) => entries
                .iter()
                .map(|entry| to_hit(entry, cosine_similarity(&vector, &entry.embedding)))
                .collect(),
            None => entries
                .iter()
                .filter_map(|entry| {
                    let score = keyword_score(query, &entry.text);
                    (score > 0.0).then(|| to_hit(entry, score))
                })
                .collect(),
        };

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.date.cmp(&a.date))
        });
        hits.truncate(self.config.top_k);
        Ok(hits)
    }
}

fn to_hit(entry: &IndexEntry, score: f64) -> SearchHit {
    SearchHit {
        segment_id: entry.segment_id,
        score,
        text: entry.text.clone(),
        faculty: entry.faculty.clone(),
        subject: entry.subject.clone(),
        date: entry.date,
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Term-frequency match count, case-insensitive.
fn keyword_score(query: &str, text: &str) -> f64 {
    let haystack = text.to_lowercase();
    query
        .to_lowercase()
        .split_whitespace()
        .map(|term| haystack.matches(term).count() as f64)
        .sum()
}
