// src/sitemap.rs
//! Process-wide sitemap snapshot with TTL refresh.
//!
//! The cache is an owned object (shared behind `Arc`) rather than a global,
//! so tests can inject their own [`SitemapFetcher`].
//!
//! Refresh is single-flight: while one caller is fetching, every other caller
//! gets the previous snapshot immediately (possibly empty) instead of waiting
//! or starting a second fetch. Failures keep the last-known-good snapshot.
//! A whole refresh, child sitemaps included, is bounded by one timeout.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures::future::join_all;
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Child sitemaps followed from a `<sitemapindex>`.
const MAX_CHILD_SITEMAPS: usize = 10;
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(60);
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SitemapEntry {
    pub url: String,
    pub last_modified: Option<String>,
}

#[async_trait]
pub trait SitemapFetcher: Send + Sync {
    async fn fetch(&self) -> Result<Vec<SitemapEntry>>;
}

/* ----------------------------
XML parsing
---------------------------- */

#[derive(Debug, Deserialize)]
struct UrlSet {
    #[serde(rename = "url", default)]
    urls: Vec<LocTag>,
}

#[derive(Debug, Deserialize)]
struct SitemapIndex {
    #[serde(rename = "sitemap", default)]
    sitemaps: Vec<LocTag>,
}

#[derive(Debug, Deserialize)]
struct LocTag {
    loc: String,
    #[serde(default)]
    lastmod: Option<String>,
}

/// Parsed sitemap document.
#[derive(Debug, PartialEq, Eq)]
pub enum SitemapDoc {
    Urls(Vec<SitemapEntry>),
    /// A `<sitemapindex>` listing child sitemap URLs.
    Index(Vec<String>),
}

pub fn parse_sitemap(xml: &str) -> Result<SitemapDoc> {
    if xml.contains("<sitemapindex") {
        let idx: SitemapIndex =
            quick_xml::de::from_str(xml).context("parsing sitemap index xml")?;
        let children = idx
            .sitemaps
            .into_iter()
            .map(|s| s.loc.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        return Ok(SitemapDoc::Index(children));
    }
    if !xml.contains("<urlset") {
        bail!("document is neither <urlset> nor <sitemapindex>");
    }
    let set: UrlSet = quick_xml::de::from_str(xml).context("parsing sitemap urlset xml")?;
    let entries = set
        .urls
        .into_iter()
        .filter_map(|u| {
            let url = u.loc.trim().to_string();
            if url.is_empty() {
                return None;
            }
            let last_modified = u
                .lastmod
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty());
            Some(SitemapEntry { url, last_modified })
        })
        .collect();
    Ok(SitemapDoc::Urls(entries))
}

/* ----------------------------
HTTP fetcher
---------------------------- */

pub struct HttpSitemapFetcher {
    client: reqwest::Client,
    url: String,
}

impl HttpSitemapFetcher {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    async fn get_text(&self, url: &str) -> Result<String> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("requesting sitemap {url}"))?
            .error_for_status()
            .with_context(|| format!("sitemap status {url}"))?;
        resp.text()
            .await
            .with_context(|| format!("reading sitemap body {url}"))
    }
}

#[async_trait]
impl SitemapFetcher for HttpSitemapFetcher {
    async fn fetch(&self) -> Result<Vec<SitemapEntry>> {
        let body = self.get_text(&self.url).await?;
        match parse_sitemap(&body)? {
            SitemapDoc::Urls(entries) => Ok(entries),
            SitemapDoc::Index(children) => {
                let children: Vec<&String> = children.iter().take(MAX_CHILD_SITEMAPS).collect();
                let bodies = join_all(children.iter().map(|child| self.get_text(child.as_str()))).await;
                let mut out = Vec::new();
                // one bad child should not discard the others
                for (child, body) in children.into_iter().zip(bodies) {
                    let parsed = body.and_then(|xml| parse_sitemap(&xml));
                    match parsed {
                        Ok(SitemapDoc::Urls(mut entries)) => out.append(&mut entries),
                        Ok(SitemapDoc::Index(_)) => {
                            debug!(target: "sitemap", child = %child, "nested sitemap index ignored")
                        }
                        Err(e) => warn!(target: "sitemap", child = %child, error = ?e, "child sitemap failed"),
                    }
                }
                if out.is_empty() {
                    bail!("sitemap index yielded no urls");
                }
                Ok(out)
            }
        }
    }
}

/* ----------------------------
Cache
---------------------------- */

struct Snapshot {
    entries: Arc<[SitemapEntry]>,
    fetched_at: Option<Instant>,
    last_failure: Option<Instant>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            entries: Arc::from(Vec::new()),
            fetched_at: None,
            last_failure: None,
        }
    }
}

pub struct SitemapCache {
    fetcher: Arc<dyn SitemapFetcher>,
    ttl: Duration,
    retry_backoff: Duration,
    refresh_timeout: Duration,
    state: RwLock<Snapshot>,
    refreshing: AtomicBool,
}

/// Clears the in-flight flag even when the refreshing future is dropped.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SitemapCache {
    pub fn new(fetcher: Arc<dyn SitemapFetcher>, ttl: Duration) -> Self {
        Self {
            fetcher,
            ttl,
            retry_backoff: DEFAULT_RETRY_BACKOFF.min(ttl),
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
            state: RwLock::new(Snapshot::default()),
            refreshing: AtomicBool::new(false),
        }
    }

    /// How long to wait after a failed fetch before trying again.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Upper bound on one refresh, including every child sitemap.
    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    /// Current entries, refreshing first when empty or stale.
    ///
    /// Only the caller that wins the in-flight flag waits for the fetch;
    /// everyone else gets the current snapshot.
    pub async fn entries(&self) -> Arc<[SitemapEntry]> {
        if !self.needs_refresh() {
            return self.snapshot();
        }
        let Some(_flight) = self.try_begin_refresh() else {
            return self.snapshot();
        };
        // another caller may have finished a refresh between the two checks
        if !self.needs_refresh() {
            return self.snapshot();
        }
        let _ = self.fetch_and_swap().await;
        self.snapshot()
    }

    /// Force a refresh now unless one is already running.
    /// Returns the number of entries cached after a successful fetch.
    pub async fn refresh(&self) -> Result<usize> {
        let Some(_flight) = self.try_begin_refresh() else {
            bail!("sitemap refresh already in flight");
        };
        self.fetch_and_swap().await
    }

    /// The cached entries without triggering a refresh.
    pub fn snapshot(&self) -> Arc<[SitemapEntry]> {
        match self.state.read() {
            Ok(s) => s.entries.clone(),
            Err(_) => Arc::from(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn needs_refresh(&self) -> bool {
        let Ok(s) = self.state.read() else {
            return false;
        };
        if s
            .last_failure
            .is_some_and(|t| t.elapsed() < self.retry_backoff)
        {
            return false;
        }
        match s.fetched_at {
            None => true,
            Some(t) => t.elapsed() > self.ttl,
        }
    }

    fn try_begin_refresh(&self) -> Option<InFlight<'_>> {
        self.refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight(&self.refreshing))
    }

    async fn fetch_and_swap(&self) -> Result<usize> {
        counter!("sitemap_refresh_total").increment(1);
        let started = Instant::now();
        let fetched = match tokio::time::timeout(self.refresh_timeout, self.fetcher.fetch()).await {
            Ok(r) => r,
            Err(_) => Err(anyhow!(
                "sitemap refresh timed out after {}ms",
                self.refresh_timeout.as_millis()
            )),
        };
        match fetched {
            Ok(entries) => {
                let n = entries.len();
                if let Ok(mut s) = self.state.write() {
                    s.entries = Arc::from(entries);
                    s.fetched_at = Some(Instant::now());
                    s.last_failure = None;
                }
                gauge!("sitemap_entries").set(n as f64);
                info!(
                    target: "sitemap",
                    entries = n,
                    ms = started.elapsed().as_millis() as u64,
                    "sitemap refreshed"
                );
                Ok(n)
            }
            Err(e) => {
                counter!("sitemap_refresh_errors_total").increment(1);
                if let Ok(mut s) = self.state.write() {
                    s.last_failure = Some(Instant::now());
                }
                warn!(target: "sitemap", error = ?e, "sitemap refresh failed; keeping last snapshot");
                Err(e)
            }
        }
    }
}
