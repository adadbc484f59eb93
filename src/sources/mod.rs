// src/sources/mod.rs
//! Live-source selection for dynamic buckets.
//!
//! Candidates are gathered in a fixed rank order (curated hubs, then the best
//! sitemap matches, then "latest item" pattern guesses), filtered through the
//! domain allowlist, deduplicated by canonical URL and capped.

pub mod patterns;
pub mod urls;

use chrono::NaiveDate;
use metrics::counter;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use tracing::debug;

use crate::config::BucketSpec;
use crate::sitemap::SitemapEntry;
use crate::types::{Candidate, Origin};
use urls::{canonicalize_url, is_allowlisted};

pub const MAX_CANDIDATES: usize = 8;
/// Sitemap matches kept per request.
pub const SITEMAP_TOP: usize = 4;
const BUCKET_WEIGHT: u32 = 2;
const QUERY_WEIGHT: u32 = 1;

static TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-z0-9]+").expect("token regex"));

pub struct DynamicSourceSelector {
    allowlist: Vec<String>,
    max_candidates: usize,
}

impl DynamicSourceSelector {
    pub fn new(allowlist: Vec<String>) -> Self {
        Self {
            allowlist,
            max_candidates: MAX_CANDIDATES,
        }
    }

    pub fn allowlist(&self) -> &[String] {
        &self.allowlist
    }

    /// Ranked, allowlisted, deduplicated candidates for `spec`.
    ///
    /// An empty sitemap is fine: hubs and pattern URLs still come back.
    pub fn select(
        &self,
        spec: &BucketSpec,
        query_text: &str,
        sitemap: &[SitemapEntry],
        today: NaiveDate,
    ) -> Vec<Candidate> {
        let category = spec.bucket.as_str();
        let mut ranked: Vec<Candidate> = Vec::new();

        for hub in &spec.hubs {
            ranked.push(Candidate::live(hub, title_from_url(hub), category, Origin::Curated));
        }

        for entry in top_sitemap_matches(spec, query_text, sitemap, SITEMAP_TOP) {
            let mut c = Candidate::live(
                &entry.url,
                title_from_url(&entry.url),
                category,
                Origin::Sitemap,
            );
            c.lastmod = entry.last_modified.clone();
            ranked.push(c);
        }

        for p in &spec.patterns {
            let url = p.resolve(today);
            ranked.push(Candidate::live(&url, title_from_url(&url), category, Origin::Pattern));
        }

        let gathered = ranked.len();
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(self.max_candidates);
        for c in ranked {
            if !is_allowlisted(&c.url, &self.allowlist) {
                counter!("allowlist_dropped_total", "stage" => "select").increment(1);
                debug!(target: "pipeline", url = %c.url, "candidate outside allowlist dropped");
                continue;
            }
            if !seen.insert(canonicalize_url(&c.url)) {
                continue;
            }
            out.push(c);
            if out.len() == self.max_candidates {
                break;
            }
        }
        debug!(
            target: "pipeline",
            bucket = category,
            gathered,
            selected = out.len(),
            "dynamic sources selected"
        );
        out
    }
}

/// Best `n` sitemap entries by keyword overlap with the URL path.
/// Entries scoring zero are never returned.
pub fn top_sitemap_matches<'a>(
    spec: &BucketSpec,
    query_text: &str,
    sitemap: &'a [SitemapEntry],
    n: usize,
) -> Vec<&'a SitemapEntry> {
    let bucket_terms: HashSet<String> = spec.keywords.iter().flat_map(|k| tokens(k)).collect();
    let query_terms: HashSet<String> = tokens(query_text)
        .into_iter()
        .filter(|t| t.len() > 2)
        .collect();

    let mut scored: Vec<(u32, usize, &SitemapEntry)> = sitemap
        .iter()
        .filter_map(|e| {
            let path = url_path(&e.url);
            let path_tokens: HashSet<String> = tokens(&path).into_iter().collect();
            let score = BUCKET_WEIGHT * overlap(&path_tokens, &bucket_terms)
                + QUERY_WEIGHT * overlap(&path_tokens, &query_terms);
            (score > 0).then_some((score, path.len(), e))
        })
        .collect();

    scored.sort_by(|a, b| {
        b.0.cmp(&a.0)
            .then(a.1.cmp(&b.1))
            .then_with(|| b.2.last_modified.cmp(&a.2.last_modified))
    });
    scored.into_iter().take(n).map(|(_, _, e)| e).collect()
}

fn overlap(path_tokens: &HashSet<String>, terms: &HashSet<String>) -> u32 {
    terms.iter().filter(|t| path_tokens.contains(*t)).count() as u32
}

fn tokens(s: &str) -> Vec<String> {
    let lower = s.to_lowercase();
    TOKEN
        .find_iter(&lower)
        .map(|m| m.as_str().to_string())
        .collect()
}

fn url_path(raw: &str) -> String {
    match url::Url::parse(raw.trim()) {
        Ok(u) => u.path().to_string(),
        Err(_) => raw.trim().to_string(),
    }
}

/// Human label from the last path segment: `/road-closures/` → "Road Closures".
pub fn title_from_url(raw: &str) -> String {
    let path = url_path(raw);
    let slug = path.trim_end_matches('/').rsplit('/').next().unwrap_or_default();
    if slug.is_empty() {
        return urls::hostname(raw).unwrap_or_else(|| raw.trim().to_string());
    }
    slug.split(['-', '_'])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut cs = w.chars();
            match cs.next() {
                Some(f) => f.to_uppercase().chain(cs).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
