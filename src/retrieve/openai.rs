// src/retrieve/openai.rs
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::Embedder;
use crate::error::{PipelineError, PipelineResult};
use crate::llm::openai::OPENAI_BASE_URL;

/// OpenAI embeddings endpoint (`text-embedding-3-small` by default).
pub struct OpenAiEmbedder {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Serialize)]
struct EmbedReq<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbedResp {
    data: Vec<EmbedDatum>,
}

#[derive(Deserialize)]
struct EmbedDatum {
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(http: reqwest::Client, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http,
            api_key: api_key.into(),
            model: model.into(),
            base_url: OPENAI_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> PipelineResult<Vec<f32>> {
        let resp = self
            .http
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&EmbedReq {
                model: &self.model,
                input: text,
            })
            .send()
            .await
            .map_err(|e| PipelineError::Retrieval(format!("embedding request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(PipelineError::Retrieval(format!(
                "embedding API error ({})",
                resp.status()
            )));
        }
        let body: EmbedResp = resp
            .json()
            .await
            .map_err(|e| PipelineError::Retrieval(format!("bad embedding response: {e}")))?;
        body.data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| PipelineError::Retrieval("embedding response had no vector".into()))
    }
}
