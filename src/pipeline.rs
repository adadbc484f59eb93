// src/pipeline.rs
//! Per-request orchestration: classify, gather sources, assemble, generate.
//!
//! Everything a request touches is owned by [`Pipeline`] and shared behind
//! `Arc`; the only mutable shared state is the sitemap snapshot. Each stream
//! runs in its own task and stops as soon as the client goes away.

use chrono::{Local, NaiveDate};
use futures::StreamExt;
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::assemble::{OfficialLink, ResultAssembler, ResultItem};
use crate::classify::{Classification, QueryClassifier, Route};
use crate::config::{Bucket, Catalog};
use crate::error::{PipelineError, PipelineResult};
use crate::fetch::{ContentFetcher, PageFetcher};
use crate::llm::{Generator, Translator};
use crate::prompt::{
    answer_prompt, check_answer, collection_reply, fallback_reply, forms_link_suffix,
    greeting_reply, strict_prompt, CONTACT_311,
};
use crate::retrieve::{Embedder, IndexStats, StaticRetriever, VectorIndex};
use crate::sitemap::SitemapCache;
use crate::sources::DynamicSourceSelector;
use crate::stream::{EventSink, Phase, SinkClosed, StreamEvent};
use crate::telemetry::anon_hash;
use crate::types::{Candidate, Query};

/// Buffered events per stream before the producer waits on the client.
pub const STREAM_BUFFER: usize = 64;

/// Collaborators needed to build a [`Pipeline`].
pub struct PipelineParts {
    pub catalog: Arc<Catalog>,
    pub sitemap: Arc<SitemapCache>,
    pub pages: Arc<dyn PageFetcher>,
    pub embedder: Arc<dyn Embedder>,
    pub index: Arc<dyn VectorIndex>,
    pub generator: Arc<dyn Generator>,
    pub translator: Arc<dyn Translator>,
    pub allowed_domains: Vec<String>,
    pub fetch_timeout: Duration,
}

pub struct Pipeline {
    catalog: Arc<Catalog>,
    classifier: QueryClassifier,
    sitemap: Arc<SitemapCache>,
    selector: DynamicSourceSelector,
    fetcher: ContentFetcher,
    retriever: StaticRetriever,
    assembler: ResultAssembler,
    generator: Arc<dyn Generator>,
    translator: Arc<dyn Translator>,
    today: Option<NaiveDate>,
}

/// Sources a generated answer was grounded on.
#[derive(Debug, Clone)]
struct Grounding {
    context: String,
    first_url: Option<String>,
}

/// Collected form of one answer, for the non-streaming endpoint.
#[derive(Debug, Clone)]
pub struct AnswerOutcome {
    pub answer: String,
    pub results: Vec<ResultItem>,
    pub classification: Classification,
    /// Set when generation failed.
    pub error: Option<String>,
}

impl AnswerOutcome {
    pub fn requires_address(&self) -> bool {
        matches!(
            self.classification.route,
            Route::CollectionLookup { address: None }
        )
    }

    pub fn workflow_state(&self) -> Option<&'static str> {
        match &self.classification.route {
            Route::CollectionLookup { address: None } => Some("WAITING_FOR_ADDRESS"),
            Route::CollectionLookup { address: Some(_) } => Some("ADDRESS_RECEIVED"),
            _ => None,
        }
    }
}

impl Pipeline {
    pub fn new(parts: PipelineParts) -> Self {
        let PipelineParts {
            catalog,
            sitemap,
            pages,
            embedder,
            index,
            generator,
            translator,
            allowed_domains,
            fetch_timeout,
        } = parts;
        Self {
            classifier: QueryClassifier::new(catalog.clone()),
            catalog,
            sitemap,
            selector: DynamicSourceSelector::new(allowed_domains.clone()),
            fetcher: ContentFetcher::new(pages, fetch_timeout, allowed_domains.clone()),
            retriever: StaticRetriever::new(embedder, index),
            assembler: ResultAssembler::new(allowed_domains),
            generator,
            translator,
            today: None,
        }
    }

    /// Pin the date used for "latest item" URL patterns.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn sitemap(&self) -> &SitemapCache {
        &self.sitemap
    }

    pub fn index_name(&self) -> &str {
        self.retriever.index_name()
    }

    pub fn generator_name(&self) -> &str {
        self.generator.provider_name()
    }

    /// Vector index reachability, for health reporting.
    pub async fn index_stats(&self) -> PipelineResult<IndexStats> {
        self.retriever.index_stats().await
    }

    fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Local::now().date_naive())
    }

    /// Run the query on its own task and hand back the event stream.
    /// Dropping the stream cancels the work at its next emission.
    pub fn spawn_stream(self: Arc<Self>, query: Query) -> ReceiverStream<StreamEvent> {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        tokio::spawn(async move {
            let mut sink = EventSink::new(tx);
            self.run(&query, &mut sink).await;
        });
        ReceiverStream::new(rx)
    }

    /// Run to completion and collect the events. A generated answer that
    /// claims its sources are missing, or drifts into another service, is
    /// regenerated once with a stricter prompt.
    pub async fn answer(&self, query: &Query) -> AnswerOutcome {
        let (tx, mut rx) = mpsc::channel(STREAM_BUFFER);
        let produce = async move {
            let mut sink = EventSink::new(tx);
            self.run_grounded(query, &mut sink).await
        };
        let collect = async {
            let mut answer = String::new();
            let mut results = Vec::new();
            let mut error = None;
            while let Some(ev) = rx.recv().await {
                match ev {
                    StreamEvent::Results { results: r } => results = r,
                    StreamEvent::Text { content } => answer.push_str(&content),
                    StreamEvent::Error { content } => error = Some(content),
                    StreamEvent::Done => {}
                }
            }
            (answer, results, error)
        };
        let ((classification, grounding), (mut answer, results, error)) =
            tokio::join!(produce, collect);
        if let (None, Some(g)) = (&error, &grounding) {
            answer = self.revise(query, &classification, g, answer).await;
        }
        AnswerOutcome {
            answer,
            results,
            classification,
            error,
        }
    }

    async fn revise(
        &self,
        query: &Query,
        cls: &Classification,
        grounding: &Grounding,
        answer: String,
    ) -> String {
        let Some(issue) = check_answer(&answer, &cls.category) else {
            return answer;
        };
        counter!("answer_regenerations_total", "reason" => issue.as_str()).increment(1);
        info!(target: "pipeline", reason = issue.as_str(), category = %cls.category, "regenerating answer");
        let prompt = strict_prompt(
            issue,
            &query.text,
            &cls.category,
            &grounding.context,
            query.language,
        );
        match self.generator.complete(&prompt).await {
            Ok(retry) if !retry.trim().is_empty() => {
                let mut retry = retry.trim().to_string();
                if let Some(suffix) = forms_link_suffix(&retry, grounding.first_url.as_deref()) {
                    retry.push_str(&suffix);
                }
                retry
            }
            Ok(_) => answer,
            Err(e) => {
                warn!(target: "pipeline", error = %e, "regeneration failed; keeping first answer");
                answer
            }
        }
    }

    /// Classify and answer into `sink`. Returns the classification even when
    /// the client disconnected midway.
    pub async fn run(&self, query: &Query, sink: &mut EventSink) -> Classification {
        self.run_grounded(query, sink).await.0
    }

    async fn run_grounded(
        &self,
        query: &Query,
        sink: &mut EventSink,
    ) -> (Classification, Option<Grounding>) {
        let qid = anon_hash(&query.text);
        sink.enter(Phase::Routing);
        let cls = self
            .classifier
            .classify(query, self.translator.as_ref())
            .await;
        counter!("queries_total", "route" => cls.route.label()).increment(1);
        info!(
            target: "pipeline",
            %qid,
            route = cls.route.label(),
            bucket = cls.bucket.as_str(),
            category = %cls.category,
            lang = query.language.code(),
            detected = cls.detected_language.code(),
            "query routed"
        );

        match self.respond(query, &cls, sink).await {
            Ok(grounding) => (cls, grounding),
            Err(SinkClosed) => {
                counter!("stream_cancelled_total").increment(1);
                debug!(target: "pipeline", %qid, phase = sink.phase().as_str(), "client went away");
                (cls, None)
            }
        }
    }

    async fn respond(
        &self,
        query: &Query,
        cls: &Classification,
        sink: &mut EventSink,
    ) -> Result<Option<Grounding>, SinkClosed> {
        match &cls.route {
            Route::Greeting => {
                sink.text(greeting_reply(query.language)).await?;
                sink.done().await?;
                Ok(None)
            }
            Route::CollectionLookup { address } => {
                let calendar = &self.catalog.collection_calendar_url;
                sink.results(vec![ResultItem {
                    source_url: calendar.clone(),
                    title: "Waste Collection Calendar".into(),
                    category: "waste collection".into(),
                    topic: "collection calendar".into(),
                    content: "Enter your address to see your garbage, recycling and green bin collection days.".into(),
                    lastmod: None,
                    updated: None,
                }])
                .await?;
                sink.text(collection_reply(address.as_deref(), calendar, query.language))
                    .await?;
                sink.done().await?;
                Ok(None)
            }
            Route::Dynamic { bucket } => {
                sink.enter(Phase::Retrieving);
                let candidates = tokio::select! {
                    biased;
                    _ = sink.closed() => return Err(SinkClosed),
                    c = self.live_candidates(*bucket, &cls.retrieval_text) => c,
                };
                self.generate(query, cls, candidates, sink).await
            }
            Route::Static { category } => {
                sink.enter(Phase::Retrieving);
                let retrieved = tokio::select! {
                    biased;
                    _ = sink.closed() => return Err(SinkClosed),
                    r = self.retriever.retrieve(&cls.retrieval_text, query.top_k, category) => r,
                };
                match retrieved {
                    Ok(candidates) => self.generate(query, cls, candidates, sink).await,
                    Err(e) => {
                        warn!(target: "pipeline", error = %e, "retrieval failed; answering with fallback");
                        sink.text(fallback_reply(query.language)).await?;
                        sink.done().await?;
                        Ok(None)
                    }
                }
            }
        }
    }

    async fn live_candidates(&self, bucket: Bucket, text: &str) -> Vec<Candidate> {
        let Some(spec) = self.catalog.bucket(bucket) else {
            warn!(target: "pipeline", bucket = bucket.as_str(), "bucket missing from catalog");
            return Vec::new();
        };
        let entries = self.sitemap.entries().await;
        let selected = self.selector.select(spec, text, &entries, self.today());
        self.fetcher.fetch_all(selected).await
    }

    fn official_link(&self, cls: &Classification) -> Option<OfficialLink> {
        let url = if cls.bucket.is_dynamic() {
            self.catalog
                .bucket(cls.bucket)
                .and_then(|b| b.hubs.first().cloned())
        } else {
            self.catalog
                .category(&cls.category)
                .map(|c| c.official_url.clone())
        }?;
        Some(OfficialLink {
            url,
            category: cls.category.clone(),
        })
    }

    async fn generate(
        &self,
        query: &Query,
        cls: &Classification,
        candidates: Vec<Candidate>,
        sink: &mut EventSink,
    ) -> Result<Option<Grounding>, SinkClosed> {
        let official = self.official_link(cls);
        let ctx = self.assembler.assemble(candidates, official.as_ref());
        sink.results(ctx.results.clone()).await?;

        if ctx.citations.is_empty() {
            sink.text(fallback_reply(query.language)).await?;
            sink.done().await?;
            return Ok(None);
        }

        sink.enter(Phase::Generating);
        let prompt = answer_prompt(
            &query.text,
            &cls.category,
            &ctx.context_text(),
            query.language,
            &self.catalog.collection_calendar_url,
        );
        let mut tokens = match self.generator.stream(&prompt).await {
            Ok(t) => t,
            Err(e) => return fail(e, sink).await.map(|_| None),
        };

        let mut answer = String::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = sink.closed() => return Err(SinkClosed),
                n = tokens.next() => n,
            };
            match next {
                Some(Ok(delta)) => {
                    answer.push_str(&delta);
                    sink.text(delta).await?;
                }
                Some(Err(e)) => return fail(e, sink).await.map(|_| None),
                None => break,
            }
        }

        if let Some(suffix) = forms_link_suffix(&answer, ctx.first_url()) {
            sink.text(suffix).await?;
        }
        sink.done().await?;
        Ok(Some(Grounding {
            context: ctx.context_text(),
            first_url: ctx.first_url().map(str::to_string),
        }))
    }
}

async fn fail(e: PipelineError, sink: &mut EventSink) -> Result<(), SinkClosed> {
    counter!("generation_errors_total").increment(1);
    warn!(target: "pipeline", error = %e, kind = e.kind(), "generation failed");
    sink.error(format!(
        "Sorry, I couldn't generate an answer right now. Please try again or contact 311 at {CONTACT_311}."
    ))
    .await
}
