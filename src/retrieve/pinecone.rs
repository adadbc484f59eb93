// src/retrieve/pinecone.rs
//! Pinecone data-plane query and stats over REST.
//!
//! Only the index name is configured normally; its data-plane host is looked
//! up once through the control plane and then reused.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::info;

use super::{IndexMatch, IndexStats, MatchMetadata, VectorIndex};
use crate::error::{PipelineError, PipelineResult};

pub const PINECONE_CONTROL_URL: &str = "https://api.pinecone.io";
const API_VERSION: &str = "2024-07";

pub struct PineconeIndex {
    http: reqwest::Client,
    api_key: String,
    name: String,
    control_url: String,
    host: OnceCell<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryReq<'a> {
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
}

#[derive(Deserialize)]
struct QueryResp {
    #[serde(default)]
    matches: Vec<RawMatch>,
}

#[derive(Deserialize)]
struct RawMatch {
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<MatchMetadata>,
}

#[derive(Deserialize)]
struct StatsResp {
    #[serde(rename = "totalVectorCount", default)]
    total_vector_count: u64,
}

#[derive(Deserialize)]
struct DescribeResp {
    host: String,
}

impl PineconeIndex {
    pub fn new(http: reqwest::Client, api_key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            http,
            api_key: api_key.into(),
            name: name.into(),
            control_url: PINECONE_CONTROL_URL.to_string(),
            host: OnceCell::new(),
        }
    }

    /// Skip the control-plane lookup.
    pub fn with_host(self, host: impl Into<String>) -> Self {
        let host = normalize_host(&host.into());
        Self {
            host: OnceCell::new_with(Some(host)),
            ..self
        }
    }

    async fn host(&self) -> PipelineResult<&str> {
        let host = self
            .host
            .get_or_try_init(|| async {
                let resp = self
                    .http
                    .get(format!("{}/indexes/{}", self.control_url, self.name))
                    .header("Api-Key", &self.api_key)
                    .header("X-Pinecone-API-Version", API_VERSION)
                    .send()
                    .await
                    .map_err(|e| PipelineError::Retrieval(format!("index lookup failed: {e}")))?;
                if !resp.status().is_success() {
                    return Err(PipelineError::Retrieval(format!(
                        "index lookup for '{}' returned {}",
                        self.name,
                        resp.status()
                    )));
                }
                let body: DescribeResp = resp
                    .json()
                    .await
                    .map_err(|e| PipelineError::Retrieval(format!("bad index description: {e}")))?;
                let host = normalize_host(&body.host);
                info!(target: "pipeline", index = %self.name, %host, "resolved vector index host");
                Ok(host)
            })
            .await?;
        Ok(host.as_str())
    }
}

fn normalize_host(raw: &str) -> String {
    let h = raw.trim().trim_end_matches('/');
    if h.starts_with("http://") || h.starts_with("https://") {
        h.to_string()
    } else {
        format!("https://{h}")
    }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    fn name(&self) -> &str {
        &self.name
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> PipelineResult<Vec<IndexMatch>> {
        let host = self.host().await?;
        let resp = self
            .http
            .post(format!("{host}/query"))
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .json(&QueryReq {
                vector,
                top_k,
                include_metadata: true,
            })
            .send()
            .await
            .map_err(|e| PipelineError::Retrieval(format!("vector query failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(PipelineError::Retrieval(format!(
                "vector query returned {}",
                resp.status()
            )));
        }
        let body: QueryResp = resp
            .json()
            .await
            .map_err(|e| PipelineError::Retrieval(format!("bad query response: {e}")))?;
        Ok(body
            .matches
            .into_iter()
            .map(|m| IndexMatch {
                id: m.id,
                score: m.score,
                metadata: m.metadata.unwrap_or_default(),
            })
            .collect())
    }

    async fn stats(&self) -> PipelineResult<IndexStats> {
        let host = self.host().await?;
        let resp = self
            .http
            .post(format!("{host}/describe_index_stats"))
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| PipelineError::Retrieval(format!("index stats failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(PipelineError::Retrieval(format!(
                "index stats returned {}",
                resp.status()
            )));
        }
        let body: StatsResp = resp
            .json()
            .await
            .map_err(|e| PipelineError::Retrieval(format!("bad index stats: {e}")))?;
        Ok(IndexStats {
            total_vectors: body.total_vector_count,
        })
    }
}
