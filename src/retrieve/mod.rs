// src/retrieve/mod.rs
//! Static retrieval: embed the query, over-fetch nearest neighbours from the
//! vector index, then narrow to the classified category.

pub mod openai;
pub mod pinecone;

use async_trait::async_trait;
use metrics::counter;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::types::{Candidate, Origin};

/// Neighbours requested per answer slot.
pub const OVERFETCH_FACTOR: usize = 3;
/// Matches kept per answer slot after filtering.
pub const KEEP_FACTOR: usize = 2;

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> PipelineResult<Vec<f32>>;
}

/// Metadata stored next to each vector.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MatchMetadata {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub source_url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub lastmod: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexMatch {
    pub id: String,
    pub score: f32,
    pub metadata: MatchMetadata,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub total_vectors: u64,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn name(&self) -> &str;
    async fn query(&self, vector: &[f32], top_k: usize) -> PipelineResult<Vec<IndexMatch>>;
    /// Cheap reachability probe used by `/health`.
    async fn stats(&self) -> PipelineResult<IndexStats>;
}

pub struct StaticRetriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
}

impl StaticRetriever {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>) -> Self {
        Self { embedder, index }
    }

    pub fn index_name(&self) -> &str {
        self.index.name()
    }

    pub async fn index_stats(&self) -> PipelineResult<IndexStats> {
        self.index.stats().await
    }

    /// Ranked candidates for `text`. Fails only when embedding or the index
    /// query fails; an empty result is not an error.
    pub async fn retrieve(
        &self,
        text: &str,
        top_k: usize,
        category: &str,
    ) -> PipelineResult<Vec<Candidate>> {
        let top_k = top_k.max(1);
        let vector = self.embedder.embed(text).await.map_err(|e| {
            counter!("retrieval_errors_total", "stage" => "embed").increment(1);
            warn!(target: "pipeline", error = %e, "embedding failed");
            as_retrieval(e)
        })?;

        let matches = self
            .index
            .query(&vector, top_k * OVERFETCH_FACTOR)
            .await
            .map_err(|e| {
                counter!("retrieval_errors_total", "stage" => "index").increment(1);
                warn!(target: "pipeline", index = self.index.name(), error = %e, "vector query failed");
                as_retrieval(e)
            })?;

        let total = matches.len();
        let ranked = filter_and_rank(matches, category, top_k * KEEP_FACTOR);
        debug!(
            target: "pipeline",
            total,
            kept = ranked.len(),
            category,
            "static retrieval"
        );
        Ok(ranked.into_iter().map(to_candidate).collect())
    }
}

fn as_retrieval(e: PipelineError) -> PipelineError {
    match e {
        PipelineError::Retrieval(_) => e,
        other => PipelineError::Retrieval(other.to_string()),
    }
}

/// Prefer matches of `category` when there are any; otherwise keep all.
/// Then take `keep` and order by score, best first.
pub fn filter_and_rank(matches: Vec<IndexMatch>, category: &str, keep: usize) -> Vec<IndexMatch> {
    let wanted = category.trim().to_ascii_lowercase();
    let in_category = !wanted.is_empty()
        && matches
            .iter()
            .any(|m| m.metadata.category.trim().eq_ignore_ascii_case(&wanted));

    let mut pool: Vec<IndexMatch> = if in_category {
        matches
            .into_iter()
            .filter(|m| m.metadata.category.trim().eq_ignore_ascii_case(&wanted))
            .collect()
    } else {
        matches
    };
    pool.truncate(keep);
    pool.sort_by(|a, b| b.score.total_cmp(&a.score));
    pool
}

fn to_candidate(m: IndexMatch) -> Candidate {
    let md = m.metadata;
    let title = md
        .title
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| {
            if !md.topic.trim().is_empty() {
                md.topic.clone()
            } else {
                md.category.replace('_', " ")
            }
        });
    Candidate {
        url: md.source_url,
        title,
        snippet: md.content,
        category: md.category,
        topic: md.topic,
        lastmod: md.lastmod,
        origin: Origin::Index,
        score: m.score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(id: &str, score: f32, category: &str) -> IndexMatch {
        IndexMatch {
            id: id.into(),
            score,
            metadata: MatchMetadata {
                content: format!("content {id}"),
                category: category.into(),
                ..Default::default()
            },
        }
    }

    #[test]
    fn category_matches_win_when_present() {
        let ms = vec![m("a", 0.9, "noise"), m("b", 0.5, "parking"), m("c", 0.7, "Parking")];
        let out = filter_and_rank(ms, "parking", 10);
        let ids: Vec<_> = out.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);
    }

    #[test]
    fn falls_back_to_all_matches_and_caps() {
        let ms = vec![m("a", 0.2, "noise"), m("b", 0.8, "noise"), m("c", 0.5, "noise")];
        let out = filter_and_rank(ms, "parking", 2);
        let ids: Vec<_> = out.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }
}
