// src/llm/openai.rs
//! OpenAI Chat Completions adapter (streaming and one-shot).

use async_trait::async_trait;
use futures::{future, stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use super::{Generator, Prompt, SseDecoder, SseFrame, TokenStream};
use crate::error::{PipelineError, PipelineResult};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Build the shared reqwest client for provider calls.
pub fn provider_http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        ))
        .connect_timeout(Duration::from_secs(4))
        .timeout(timeout)
        .build()
}

#[derive(Serialize)]
struct Msg<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatReq<'a> {
    model: &'a str,
    messages: Vec<Msg<'a>>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResp {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMsg,
}

#[derive(Deserialize)]
struct ChoiceMsg {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChunkResp {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Deserialize, Default)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
}

pub struct OpenAiChat {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiChat {
    pub fn new(http: reqwest::Client, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http,
            api_key: api_key.into(),
            model: model.into(),
            base_url: OPENAI_BASE_URL.to_string(),
            temperature: 0.2,
            max_tokens: 800,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    async fn send(&self, prompt: &Prompt, stream: bool) -> PipelineResult<reqwest::Response> {
        let req = ChatReq {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: &prompt.system,
                },
                Msg {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream,
        };
        let resp = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .map_err(|e| PipelineError::Generation(format!("request to OpenAI failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(PipelineError::Generation(format!(
                "OpenAI API error ({status}): {}",
                truncate(&body, 300)
            )));
        }
        Ok(resp)
    }
}

/// Text delta carried by one streamed chunk, if any.
fn parse_chunk(payload: &str) -> Option<PipelineResult<String>> {
    let chunk: ChunkResp = match serde_json::from_str(payload) {
        Ok(c) => c,
        Err(e) => {
            debug!(target: "pipeline", error = %e, "skipping unparseable stream chunk");
            return None;
        }
    };
    if let Some(err) = chunk.error {
        return Some(Err(PipelineError::Generation(err.message)));
    }
    chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|s| !s.is_empty())
        .map(Ok)
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[async_trait]
impl Generator for OpenAiChat {
    fn provider_name(&self) -> &str {
        "openai"
    }

    async fn stream(&self, prompt: &Prompt) -> PipelineResult<TokenStream> {
        info!(target: "pipeline", model = %self.model, "starting OpenAI stream");
        let resp = self.send(prompt, true).await?;

        let tokens = resp
            .bytes_stream()
            .scan(SseDecoder::default(), |dec, chunk| {
                if dec.is_done() {
                    return future::ready(None);
                }
                let items: Vec<PipelineResult<String>> = match chunk {
                    Ok(bytes) => dec
                        .push(&bytes)
                        .into_iter()
                        .filter_map(|frame| match frame {
                            SseFrame::Data(payload) => parse_chunk(&payload),
                            SseFrame::Done => None,
                        })
                        .collect(),
                    Err(e) => vec![Err(PipelineError::Generation(format!(
                        "stream interrupted: {e}"
                    )))],
                };
                future::ready(Some(stream::iter(items)))
            })
            .flatten();

        Ok(Box::pin(tokens))
    }

    async fn complete(&self, prompt: &Prompt) -> PipelineResult<String> {
        let resp = self.send(prompt, false).await?;
        let body: ChatResp = resp
            .json()
            .await
            .map_err(|e| PipelineError::Generation(format!("bad OpenAI response: {e}")))?;
        Ok(body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }
}
