// src/llm/mod.rs
//! Generation and translation seams.
//!
//! The pipeline only sees [`Generator`] and [`Translator`]; the OpenAI
//! adapter lives in [`openai`]. Tests plug in scripted generators.

pub mod openai;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;

use crate::error::{PipelineError, PipelineResult};
use crate::types::Language;

/// Incremental answer text. An `Err` item ends generation.
pub type TokenStream = Pin<Box<dyn Stream<Item = PipelineResult<String>> + Send>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

#[async_trait]
pub trait Generator: Send + Sync {
    fn provider_name(&self) -> &str;

    /// Start a streaming completion.
    async fn stream(&self, prompt: &Prompt) -> PipelineResult<TokenStream>;

    /// Whole completion. Defaults to draining [`Generator::stream`].
    async fn complete(&self, prompt: &Prompt) -> PipelineResult<String> {
        let mut s = self.stream(prompt).await?;
        let mut out = String::new();
        while let Some(chunk) = s.next().await {
            out.push_str(&chunk?);
        }
        Ok(out)
    }
}

#[async_trait]
pub trait Translator: Send + Sync {
    async fn to_english(&self, text: &str, from: Language) -> PipelineResult<String>;
}

/// Translation through any [`Generator`].
pub struct GeneratorTranslator {
    generator: Arc<dyn Generator>,
}

impl GeneratorTranslator {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl Translator for GeneratorTranslator {
    async fn to_english(&self, text: &str, from: Language) -> PipelineResult<String> {
        if from == Language::En {
            return Ok(text.to_string());
        }
        let prompt = Prompt {
            system: "You translate municipal service questions into English. Output only the translation, nothing else.".into(),
            user: format!("Translate this {} text to English:\n\n{text}", from.display_name()),
        };
        let out = self.generator.complete(&prompt).await?;
        let out = out.trim().trim_matches('"').trim().to_string();
        if out.is_empty() {
            return Err(PipelineError::Classification("empty translation".into()));
        }
        Ok(out)
    }
}

/// One decoded server-sent-events frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    Data(String),
    /// `data: [DONE]`
    Done,
}

/// Incremental `text/event-stream` decoder.
///
/// Network chunks can split a line (or a UTF-8 sequence) anywhere, so bytes
/// are buffered until a newline arrives. Only `data:` fields are surfaced.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        let mut out = Vec::new();
        if self.done {
            return out;
        }
        self.buf.extend_from_slice(chunk);
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            let Some(payload) = line.strip_prefix("data:") else {
                continue;
            };
            let payload = payload.trim_start();
            if payload == "[DONE]" {
                self.done = true;
                self.buf.clear();
                out.push(SseFrame::Done);
                break;
            }
            if !payload.is_empty() {
                out.push(SseFrame::Data(payload.to_string()));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_handles_split_lines_and_done() {
        let mut d = SseDecoder::default();
        assert!(d.push(b"data: {\"a\":").is_empty());
        let frames = d.push(b"1}\n\n: keep-alive\ndata: {\"b\":2}\r\n");
        assert_eq!(
            frames,
            vec![
                SseFrame::Data("{\"a\":1}".into()),
                SseFrame::Data("{\"b\":2}".into())
            ]
        );
        let frames = d.push(b"data: [DONE]\n\ndata: {\"late\":true}\n");
        assert_eq!(frames, vec![SseFrame::Done]);
        assert!(d.is_done());
        assert!(d.push(b"data: x\n").is_empty());
    }

    #[test]
    fn decoder_keeps_utf8_split_across_chunks() {
        let mut d = SseDecoder::default();
        let bytes = "data: déneigement\n".as_bytes();
        // split inside the two-byte 'é'
        assert!(d.push(&bytes[..8]).is_empty());
        assert_eq!(d.push(&bytes[8..]), vec![SseFrame::Data("déneigement".into())]);
    }
}
