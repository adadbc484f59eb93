// src/fetch.rs
//! Live page fetching and readable-text extraction.
//!
//! Fetch failures never fail the request: a candidate whose page cannot be
//! read (timeout, transport error, non-2xx) is simply dropped.

use async_trait::async_trait;
use futures::future::join_all;
use metrics::{counter, histogram};
use scraper::{Html, Node, Selector};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};
use crate::sources::urls::is_allowlisted;
use crate::types::Candidate;

/// Characters of page text kept per candidate.
pub const SNIPPET_MAX_CHARS: usize = 1500;

/// Elements whose text never counts as page content.
const SKIP_TAGS: &[&str] = &[
    "script", "style", "nav", "header", "footer", "noscript", "aside", "form", "template",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub status: u16,
    pub body: String,
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Raw page body. Non-2xx statuses are errors.
    async fn get(&self, url: &str) -> PipelineResult<FetchedPage>;
}

pub struct HttpPageFetcher {
    client: reqwest::Client,
}

impl HttpPageFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn get(&self, url: &str) -> PipelineResult<FetchedPage> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PipelineError::fetch(url, e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(PipelineError::fetch(url, format!("status {status}")));
        }
        let body = resp.text().await.map_err(|e| PipelineError::fetch(url, e))?;
        Ok(FetchedPage {
            status: status.as_u16(),
            body,
        })
    }
}

pub struct ContentFetcher {
    pages: Arc<dyn PageFetcher>,
    timeout: Duration,
    allowlist: Vec<String>,
}

impl ContentFetcher {
    pub fn new(pages: Arc<dyn PageFetcher>, timeout: Duration, allowlist: Vec<String>) -> Self {
        Self {
            pages,
            timeout,
            allowlist,
        }
    }

    /// Fetch every candidate concurrently and fill in its snippet (and title
    /// when empty). Input order is preserved; failed fetches are dropped.
    pub async fn fetch_all(&self, candidates: Vec<Candidate>) -> Vec<Candidate> {
        let total = candidates.len();
        let fetched = join_all(candidates.into_iter().map(|c| self.fetch_one(c))).await;

        let out: Vec<Candidate> = fetched
            .into_iter()
            .filter_map(|r| match r {
                Ok(c) => Some(c),
                Err(e) => {
                    counter!("fetch_dropped_total", "kind" => e.kind()).increment(1);
                    debug!(target: "fetch", error = %e, "candidate dropped");
                    None
                }
            })
            .collect();
        debug!(target: "fetch", total, kept = out.len(), "live fetch finished");
        out
    }

    async fn fetch_one(&self, mut c: Candidate) -> PipelineResult<Candidate> {
        // selection already filters; re-check so nothing else can reach the network
        if !is_allowlisted(&c.url, &self.allowlist) {
            return Err(PipelineError::AllowlistViolation(c.url));
        }
        let started = Instant::now();
        let page = tokio::time::timeout(self.timeout, self.pages.get(&c.url))
            .await
            .map_err(|_| PipelineError::fetch(&c.url, "timed out"))??;
        histogram!("fetch_ms").record(started.elapsed().as_secs_f64() * 1000.0);

        let (title, text) = extract_readable_text(&page.body);
        if c.title.trim().is_empty() {
            if let Some(t) = title {
                c.title = t;
            }
        }
        c.snippet = text;
        Ok(c)
    }
}

/// Page `<title>` and the visible text of its main content, whitespace
/// collapsed and capped at [`SNIPPET_MAX_CHARS`].
pub fn extract_readable_text(html: &str) -> (Option<String>, String) {
    let doc = Html::parse_document(html);

    let title = Selector::parse("title")
        .ok()
        .and_then(|sel| doc.select(&sel).next().map(|el| el.text().collect::<String>()))
        .map(|t| collapse_ws(&t))
        .filter(|t| !t.is_empty());

    let root = ["main", "article", "body"].iter().find_map(|tag| {
        Selector::parse(tag)
            .ok()
            .and_then(|sel| doc.select(&sel).next())
    });
    let Some(root) = root else {
        return (title, String::new());
    };

    let mut raw = String::new();
    for node in root.descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        // Only wrappers inside the content root count; a page-wide <form>
        // around <main> must not hide the main text.
        let skipped = node
            .ancestors()
            .take_while(|a| a.id() != root.id())
            .any(|a| {
                a.value()
                    .as_element()
                    .is_some_and(|el| SKIP_TAGS.contains(&el.name()))
            });
        if skipped {
            continue;
        }
        raw.push_str(text);
        raw.push(' ');
    }

    (title, truncate_chars(&collapse_ws(&raw), SNIPPET_MAX_CHARS))
}

pub(crate) fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub(crate) fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].trim_end().to_string(),
        None => s.to_string(),
    }
}
