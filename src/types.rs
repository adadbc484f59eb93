// src/types.rs
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

pub const DEFAULT_TOP_K: usize = 5;
pub const MAX_TOP_K: usize = 10;

/// Answer language requested by the client. The corpus is English.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Fr,
}

impl Language {
    pub fn code(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Fr => "fr",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Language::En => "English",
            Language::Fr => "French",
        }
    }
}

/// Validated user query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub text: String,
    pub language: Language,
    pub top_k: usize,
}

impl Query {
    /// Trims the text and clamps `top_k` into `1..=MAX_TOP_K`.
    pub fn new(text: &str, language: Language, top_k: Option<usize>) -> PipelineResult<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Err(PipelineError::Classification("query text is empty".into()));
        }
        Ok(Self {
            text: text.to_string(),
            language,
            top_k: top_k.unwrap_or(DEFAULT_TOP_K).clamp(1, MAX_TOP_K),
        })
    }
}

/// Where a candidate source came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Curated,
    Sitemap,
    Pattern,
    Index,
    /// Injected by the official-link guarantee.
    Fallback,
}

/// A possible source for the answer. Built per request, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub url: String,
    pub title: String,
    pub snippet: String,
    pub category: String,
    pub topic: String,
    pub lastmod: Option<String>,
    pub origin: Origin,
    /// Similarity score for index matches; 0 for live sources.
    pub score: f32,
}

impl Candidate {
    pub fn live(url: impl Into<String>, title: impl Into<String>, category: &str, origin: Origin) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            snippet: String::new(),
            category: category.to_string(),
            topic: String::new(),
            lastmod: None,
            origin,
            score: 0.0,
        }
    }
}
