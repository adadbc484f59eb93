// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod assemble;
pub mod classify;
pub mod config;
pub mod error;
pub mod fetch;
pub mod llm;
pub mod metrics;
pub mod pipeline;
pub mod prompt;
pub mod retrieve;
pub mod sitemap;
pub mod sources;
pub mod stream;
pub mod telemetry;
pub mod types;

pub use crate::api::{router, AppState};
pub use crate::error::{PipelineError, PipelineResult};
pub use crate::pipeline::{Pipeline, PipelineParts};

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::{Catalog, Settings};
use crate::fetch::HttpPageFetcher;
use crate::llm::openai::{provider_http_client, OpenAiChat};
use crate::llm::GeneratorTranslator;
use crate::retrieve::openai::OpenAiEmbedder;
use crate::retrieve::pinecone::PineconeIndex;
use crate::sitemap::{HttpSitemapFetcher, SitemapCache};

/// Chat completions stream for a while; everything else should be quick.
const CHAT_TIMEOUT: Duration = Duration::from_secs(60);
const API_TIMEOUT: Duration = Duration::from_secs(15);
const SITEMAP_TIMEOUT: Duration = Duration::from_secs(20);

/// Wire the production pipeline (OpenAI + Pinecone + live City pages).
pub fn build_pipeline(settings: &Settings) -> Result<Arc<Pipeline>> {
    let catalog = Arc::new(
        Catalog::load(settings.catalog_path.as_deref()).context("loading routing catalog")?,
    );

    let chat_http = provider_http_client(CHAT_TIMEOUT).context("building chat http client")?;
    let api_http = provider_http_client(API_TIMEOUT).context("building api http client")?;
    let sitemap_http =
        provider_http_client(SITEMAP_TIMEOUT).context("building sitemap http client")?;
    let page_http =
        provider_http_client(settings.fetch_timeout).context("building page http client")?;

    let generator = Arc::new(OpenAiChat::new(
        chat_http,
        &settings.openai_api_key,
        &settings.chat_model,
    ));
    let embedder = Arc::new(OpenAiEmbedder::new(
        api_http.clone(),
        &settings.openai_api_key,
        &settings.embed_model,
    ));
    let mut index = PineconeIndex::new(api_http, &settings.pinecone_api_key, &settings.index_name);
    if let Some(host) = &settings.index_host {
        index = index.with_host(host);
    }

    let sitemap = Arc::new(SitemapCache::new(
        Arc::new(HttpSitemapFetcher::new(sitemap_http, &settings.sitemap_url)),
        settings.sitemap_ttl,
    )
    .with_refresh_timeout(SITEMAP_TIMEOUT));

    info!(
        index = %settings.index_name,
        chat_model = %settings.chat_model,
        embed_model = %settings.embed_model,
        domains = ?settings.allowed_domains,
        buckets = catalog.buckets.len(),
        categories = catalog.categories.len(),
        "pipeline configured"
    );

    Ok(Arc::new(Pipeline::new(PipelineParts {
        catalog,
        sitemap,
        pages: Arc::new(HttpPageFetcher::new(page_http)),
        embedder,
        index: Arc::new(index),
        translator: Arc::new(GeneratorTranslator::new(generator.clone())),
        generator,
        allowed_domains: settings.allowed_domains.clone(),
        fetch_timeout: settings.fetch_timeout,
    })))
}
