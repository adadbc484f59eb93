// src/assemble.rs
//! Turns raw candidates into the client result list and the numbered
//! citation blocks given to the generator.

use chrono::{DateTime, NaiveDate};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

use crate::fetch::{collapse_ws, truncate_chars};
use crate::sources::title_from_url;
use crate::sources::urls::{canonicalize_url, is_allowlisted};
use crate::types::{Candidate, Origin};

/// Results sent to the client.
pub const CLIENT_MAX: usize = 6;
/// Results that become citation blocks in the prompt.
pub const CONTEXT_MAX: usize = 3;
/// Characters of content per client result.
pub const CLIENT_CONTENT_MAX: usize = 500;
/// Content shorter than this is treated as navigation chrome.
pub const MIN_CONTENT_CHARS: usize = 40;

/// One entry of the `results` event / `/query` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultItem {
    pub source_url: String,
    pub title: String,
    pub category: String,
    pub topic: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lastmod: Option<String>,
    /// `Updated March 5, 2025`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CitationBlock {
    pub index: usize,
    pub title: String,
    pub url: String,
    pub snippet: String,
}

impl CitationBlock {
    pub fn render(&self) -> String {
        if self.snippet.is_empty() {
            format!("[{}] {} — URL: {}", self.index, self.title, self.url)
        } else {
            format!(
                "[{}] {} — URL: {} — {}",
                self.index, self.title, self.url, self.snippet
            )
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssembledContext {
    pub citations: Vec<CitationBlock>,
    pub results: Vec<ResultItem>,
}

impl AssembledContext {
    pub fn context_text(&self) -> String {
        self.citations
            .iter()
            .map(CitationBlock::render)
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn first_url(&self) -> Option<&str> {
        self.results.first().map(|r| r.source_url.as_str())
    }
}

/// Curated page used when nothing retrieved carries a usable link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfficialLink {
    pub url: String,
    pub category: String,
}

pub struct ResultAssembler {
    allowlist: Vec<String>,
}

impl ResultAssembler {
    pub fn new(allowlist: Vec<String>) -> Self {
        Self { allowlist }
    }

    pub fn assemble(&self, candidates: Vec<Candidate>, official: Option<&OfficialLink>) -> AssembledContext {
        let total = candidates.len();
        let mut seen = HashSet::new();
        let mut kept: Vec<Candidate> = Vec::new();
        let mut reusable: Option<Candidate> = None;

        for mut c in candidates {
            c.url = c.url.trim().to_string();
            if c.url.is_empty() {
                continue;
            }
            if !is_allowlisted(&c.url, &self.allowlist) {
                counter!("allowlist_dropped_total", "stage" => "assemble").increment(1);
                continue;
            }
            c.category = display_label(&c.category);
            c.topic = display_label(&c.topic);
            c.snippet = clean_text(&c.snippet);

            if is_boilerplate(&c.snippet) {
                if reusable.is_none() {
                    reusable = Some(c);
                }
                continue;
            }
            if !seen.insert(canonicalize_url(&c.url)) {
                continue;
            }
            kept.push(c);
        }

        if kept.is_empty() {
            let injected = reusable
                .map(|mut c| {
                    c.snippet.clear();
                    c.origin = Origin::Fallback;
                    c
                })
                .or_else(|| {
                    official
                        .filter(|o| is_allowlisted(&o.url, &self.allowlist))
                        .map(|o| {
                            Candidate::live(
                                &o.url,
                                title_from_url(&o.url),
                                &display_label(&o.category),
                                Origin::Fallback,
                            )
                        })
                });
            if let Some(c) = injected {
                counter!("official_link_injected_total").increment(1);
                kept.push(c);
            }
        }

        kept.truncate(CLIENT_MAX);
        let citations = kept
            .iter()
            .take(CONTEXT_MAX)
            .enumerate()
            .map(|(i, c)| CitationBlock {
                index: i + 1,
                title: display_title(c),
                url: c.url.clone(),
                snippet: c.snippet.clone(),
            })
            .collect();
        let results: Vec<ResultItem> = kept.into_iter().map(to_result).collect();

        debug!(target: "pipeline", total, kept = results.len(), "results assembled");
        AssembledContext { citations, results }
    }
}

fn to_result(c: Candidate) -> ResultItem {
    let title = display_title(&c);
    let updated = c.lastmod.as_deref().and_then(freshness_label);
    ResultItem {
        source_url: c.url,
        title,
        category: c.category,
        topic: c.topic,
        content: truncate_chars(&c.snippet, CLIENT_CONTENT_MAX),
        lastmod: c.lastmod,
        updated,
    }
}

fn display_title(c: &Candidate) -> String {
    let t = c.title.trim();
    if !t.is_empty() {
        return t.to_string();
    }
    if !c.topic.is_empty() {
        return c.topic.replace('_', " ");
    }
    if !c.category.is_empty() {
        return c.category.replace('_', " ");
    }
    title_from_url(&c.url)
}

/// `Road_Closures ` -> `road closures`
fn display_label(s: &str) -> String {
    s.trim().to_lowercase().replace('_', " ")
}

fn clean_text(s: &str) -> String {
    collapse_ws(&html_escape::decode_html_entities(s))
}

/// Navigation chrome scraped along with real content.
pub fn is_boilerplate(content: &str) -> bool {
    let lower = content.to_lowercase();
    let len = content.chars().count();
    lower.contains("section menu")
        || (lower.contains("learn more") && len < 100)
        || len < MIN_CONTENT_CHARS
}

/// `Updated March 5, 2025` from an RFC 3339 timestamp or a plain date.
pub fn freshness_label(lastmod: &str) -> Option<String> {
    let s = lastmod.trim();
    let date = DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.date_naive())
        .ok()
        .or_else(|| s.get(..10).and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()))?;
    Some(format!("Updated {}", date.format("%B %-d, %Y")))
}
