// tests/common/mod.rs
//
// Stub collaborators and a pipeline harness shared by integration tests.
// Nothing here touches the network.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::{stream, StreamExt};
use parking_lot::Mutex;

use kingston_311_router::config::Catalog;
use kingston_311_router::error::{PipelineError, PipelineResult};
use kingston_311_router::fetch::{FetchedPage, PageFetcher};
use kingston_311_router::llm::{Generator, Prompt, TokenStream, Translator};
use kingston_311_router::retrieve::{Embedder, IndexMatch, IndexStats, MatchMetadata, VectorIndex};
use kingston_311_router::sitemap::{SitemapCache, SitemapEntry, SitemapFetcher};
use kingston_311_router::stream::StreamEvent;
use kingston_311_router::types::Language;
use kingston_311_router::{Pipeline, PipelineParts};

pub const SITE: &str = "https://www.cityofkingston.ca";

pub fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 6).unwrap()
}

pub fn allowlist() -> Vec<String> {
    vec!["cityofkingston.ca".to_string()]
}

/* ---------- sitemap ---------- */

pub struct StaticSitemap {
    pub entries: Vec<SitemapEntry>,
    pub fail: bool,
    pub delay: Duration,
    pub calls: AtomicUsize,
    pub fetch_dropped: Arc<AtomicBool>,
}

impl StaticSitemap {
    pub fn new(entries: Vec<SitemapEntry>) -> Self {
        Self {
            entries,
            fail: false,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            fetch_dropped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(vec![])
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SitemapFetcher for StaticSitemap {
    async fn fetch(&self) -> anyhow::Result<Vec<SitemapEntry>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _guard = DropFlag(self.fetch_dropped.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            anyhow::bail!("sitemap unavailable");
        }
        Ok(self.entries.clone())
    }
}

pub fn entry(path: &str) -> SitemapEntry {
    SitemapEntry {
        url: format!("{SITE}{path}"),
        last_modified: Some("2025-03-03T09:00:00+00:00".into()),
    }
}

/* ---------- pages ---------- */

/// Serves a readable page for every URL except those listed as failing.
#[derive(Default)]
pub struct FixedPages {
    pub failing: HashSet<String>,
    pub all_fail: bool,
    pub requested: Mutex<Vec<String>>,
}

#[async_trait]
impl PageFetcher for FixedPages {
    async fn get(&self, url: &str) -> PipelineResult<FetchedPage> {
        self.requested.lock().push(url.to_string());
        if self.all_fail || self.failing.contains(url) {
            return Err(PipelineError::fetch(url, "status 404 Not Found"));
        }
        Ok(FetchedPage {
            status: 200,
            body: format!(
                "<html><head><title>City page</title></head><body><nav>Section menu</nav>\
<main><h1>Update</h1><p>Current service information published by the City of Kingston for {url}.</p></main></body></html>"
            ),
        })
    }
}

/* ---------- retrieval ---------- */

pub struct StubEmbedder {
    pub fail: bool,
}

#[async_trait]
impl Embedder for StubEmbedder {
    async fn embed(&self, _text: &str) -> PipelineResult<Vec<f32>> {
        if self.fail {
            return Err(PipelineError::Retrieval("embedding service down".into()));
        }
        Ok(vec![0.1, 0.2, 0.3])
    }
}

pub struct StubIndex {
    pub matches: Vec<IndexMatch>,
    pub fail: bool,
    pub last_top_k: AtomicUsize,
}

impl StubIndex {
    pub fn new(matches: Vec<IndexMatch>) -> Self {
        Self {
            matches,
            fail: false,
            last_top_k: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl VectorIndex for StubIndex {
    fn name(&self) -> &str {
        "kingston-policies"
    }

    async fn query(&self, _vector: &[f32], top_k: usize) -> PipelineResult<Vec<IndexMatch>> {
        self.last_top_k.store(top_k, Ordering::SeqCst);
        if self.fail {
            return Err(PipelineError::Retrieval("index unreachable".into()));
        }
        Ok(self.matches.clone())
    }

    async fn stats(&self) -> PipelineResult<IndexStats> {
        if self.fail {
            return Err(PipelineError::Retrieval("index unreachable".into()));
        }
        Ok(IndexStats {
            total_vectors: self.matches.len() as u64,
        })
    }
}

pub fn index_match(id: &str, score: f32, category: &str, path: &str, content: &str) -> IndexMatch {
    IndexMatch {
        id: id.into(),
        score,
        metadata: MatchMetadata {
            content: content.into(),
            category: category.into(),
            topic: category.replace('_', " "),
            source_url: if path.starts_with("http") {
                path.to_string()
            } else {
                format!("{SITE}{path}")
            },
            title: None,
            lastmod: Some("2025-02-10".into()),
        },
    }
}

pub fn parking_matches() -> Vec<IndexMatch> {
    vec![
        index_match(
            "p1",
            0.91,
            "parking",
            "/roads-parking-and-transportation/parking/residential-parking-permits/",
            "Residential parking permits let residents park on-street in permit zones. Apply online through the City's parking portal.",
        ),
        index_match(
            "p2",
            0.84,
            "parking",
            "/roads-parking-and-transportation/parking/monthly-parking/",
            "Monthly parking permits are available for municipal lots; fees vary by lot and are billed monthly.",
        ),
        index_match(
            "x1",
            0.80,
            "parking",
            "https://parking-scams.example.com/kingston/",
            "Cheap parking permits for Kingston, pay by gift card today and skip the line.",
        ),
        index_match(
            "w1",
            0.70,
            "waste_collection",
            "/garbage-and-recycling/",
            "Garbage and recycling are collected weekly; check the calendar for your day.",
        ),
    ]
}

/* ---------- generation ---------- */

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

pub struct ScriptedGenerator {
    pub tokens: Vec<String>,
    pub fail_at_start: bool,
    /// Emit this many tokens, then an error.
    pub fail_after: Option<usize>,
    /// Never finish after the scripted tokens.
    pub hang: bool,
    /// Replaces the script on every call after the first.
    pub retry: Option<String>,
    pub prompts: Mutex<Vec<Prompt>>,
    pub stream_dropped: Arc<AtomicBool>,
}

impl ScriptedGenerator {
    pub fn new(tokens: &[&str]) -> Self {
        Self {
            tokens: tokens.iter().map(|s| s.to_string()).collect(),
            fail_at_start: false,
            fail_after: None,
            hang: false,
            retry: None,
            prompts: Mutex::new(Vec::new()),
            stream_dropped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().len()
    }

    pub fn last_prompt(&self) -> Option<Prompt> {
        self.prompts.lock().last().cloned()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn provider_name(&self) -> &str {
        "scripted"
    }

    async fn stream(&self, prompt: &Prompt) -> PipelineResult<TokenStream> {
        let earlier = {
            let mut prompts = self.prompts.lock();
            prompts.push(prompt.clone());
            prompts.len() - 1
        };
        if self.fail_at_start {
            return Err(PipelineError::Generation("model unavailable".into()));
        }
        let mut items: Vec<PipelineResult<String>> = match (&self.retry, earlier) {
            (Some(retry), n) if n > 0 => vec![Ok(retry.clone())],
            _ => self.tokens.iter().cloned().map(Ok).collect(),
        };
        if let Some(n) = self.fail_after {
            items.truncate(n);
            items.push(Err(PipelineError::Generation("stream reset".into())));
        }
        let guard = DropFlag(self.stream_dropped.clone());
        let base = stream::iter(items);
        let s: TokenStream = if self.hang {
            Box::pin(base.chain(stream::pending()))
        } else {
            Box::pin(base)
        };
        Ok(Box::pin(s.map(move |item| {
            let _keep = &guard;
            item
        })))
    }
}

/// Returns a canned English text per input, echoing anything unknown.
#[derive(Default)]
pub struct MapTranslator {
    pub map: HashMap<String, String>,
    pub calls: AtomicUsize,
}

#[async_trait]
impl Translator for MapTranslator {
    async fn to_english(&self, text: &str, _from: Language) -> PipelineResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.map.get(text).cloned().unwrap_or_else(|| text.to_string()))
    }
}

/* ---------- harness ---------- */

pub struct Harness {
    pub sitemap: Arc<StaticSitemap>,
    pub pages: Arc<FixedPages>,
    pub embed_fails: bool,
    pub index: Arc<StubIndex>,
    pub generator: Arc<ScriptedGenerator>,
    pub translator: Arc<MapTranslator>,
}

impl Default for Harness {
    fn default() -> Self {
        Self {
            sitemap: Arc::new(StaticSitemap::new(vec![
                entry("/news/road-closure-princess-street-watermain/"),
                entry("/recreation/arenas/"),
                entry("/kingston-transit/routes-and-schedules/route-2/"),
            ])),
            pages: Arc::new(FixedPages::default()),
            embed_fails: false,
            index: Arc::new(StubIndex::new(parking_matches())),
            generator: Arc::new(ScriptedGenerator::new(&[
                "Residential permits ",
                "are issued by zone [1].",
            ])),
            translator: Arc::new(MapTranslator::default()),
        }
    }
}

impl Harness {
    pub fn build(&self) -> Arc<Pipeline> {
        let sitemap = Arc::new(SitemapCache::new(
            self.sitemap.clone(),
            Duration::from_secs(3600),
        ));
        Arc::new(
            Pipeline::new(PipelineParts {
                catalog: Arc::new(Catalog::default_seed()),
                sitemap,
                pages: self.pages.clone(),
                embedder: Arc::new(StubEmbedder {
                    fail: self.embed_fails,
                }),
                index: self.index.clone(),
                generator: self.generator.clone(),
                translator: self.translator.clone(),
                allowed_domains: allowlist(),
                fetch_timeout: Duration::from_secs(2),
            })
            .with_today(today()),
        )
    }
}

/* ---------- event helpers ---------- */

pub async fn collect_events(
    stream: impl futures::Stream<Item = StreamEvent>,
) -> Vec<StreamEvent> {
    stream.collect().await
}

pub fn texts(events: &[StreamEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Text { content } => Some(content.as_str()),
            _ => None,
        })
        .collect()
}

pub fn results_count(events: &[StreamEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, StreamEvent::Results { .. }))
        .count()
}

/// At most one `Results`, before any `Text`; exactly one terminal event, last.
pub fn assert_well_formed(events: &[StreamEvent]) {
    assert!(!events.is_empty(), "no events");
    assert!(results_count(events) <= 1, "more than one results event: {events:?}");
    let terminals = events.iter().filter(|e| e.is_terminal()).count();
    assert_eq!(terminals, 1, "expected exactly one terminal event: {events:?}");
    assert!(events.last().unwrap().is_terminal(), "terminal event not last");
    if let Some(r) = events
        .iter()
        .position(|e| matches!(e, StreamEvent::Results { .. }))
    {
        let first_text = events
            .iter()
            .position(|e| matches!(e, StreamEvent::Text { .. }));
        if let Some(t) = first_text {
            assert!(r < t, "results after text: {events:?}");
        }
    }
}
