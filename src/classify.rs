// src/classify.rs
//! Query routing: greeting short-circuit, dynamic bucket, collection-day
//! lookup, or static category.
//!
//! Order of checks (first hit wins):
//! 1. greeting / acknowledgement (raw text, any language)
//! 2. dynamic buckets, in catalog priority order (English retrieval text)
//! 3. collection-day lookup (curbside term + schedule phrasing or an address,
//!    unless a more specific category such as hazardous waste matches)
//! 4. static category, in catalog priority order, else the default category

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

use crate::config::{Bucket, Catalog};
use crate::llm::Translator;
use crate::types::{Language, Query};

static GREETING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(hi|hello|hey|hiya|greetings|good (morning|afternoon|evening)|how are you|what can you do|what do you do|who are you|what is this|introduce yourself|how can i help|how can you help|bonjour|bonsoir|salut|allo)\b",
    )
    .expect("greeting regex")
});

static ACKNOWLEDGEMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(thanks|thank you|thx|ok|okay|got it|understood|that's helpful|that helps|merci|d'accord)\b")
        .expect("acknowledgement regex")
});

static CURBSIDE_TERMS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(garbage|trash|recycling|green bin|blue box|grey box|curbside|waste collection|garbage collection|organics)\b")
        .expect("curbside regex")
});

static SCHEDULE_TERMS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(when is|when does|when will|what day|which day|collection day|pickup day|pick-up day|garbage day|schedule|calendar|this week|next week|tomorrow|today)\b")
        .expect("schedule regex")
});

static ADDRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d+\s+[a-z][a-z\s]*?\b(?:street|st|avenue|ave|road|rd|drive|dr|lane|ln|boulevard|blvd|way|court|ct|crescent|cres|place|pl))\b")
        .expect("address regex")
});

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?u)\b\w+\b").expect("word regex"));

const GREETING_MAX_WORDS: usize = 6;
const ACK_MAX_WORDS: usize = 4;

/// Words allowed after a greeting or acknowledgement prefix. Anything else
/// means the text carries a question.
const GREETING_FILLER: &[&str] = &[
    "hi", "hello", "hey", "there", "everyone", "all", "folks", "friend", "again", "so", "much",
    "very", "you", "a", "lot", "for", "your", "the", "help", "doing", "today", "how", "are", "is",
    "it", "going", "good", "morning", "afternoon", "evening", "great", "nice", "cool", "perfect",
    "thanks", "thank", "ok", "okay", "that", "this", "what", "who", "can", "do", "i", "me", "bot",
    "assistant", "merci", "beaucoup", "bien", "tout", "le", "monde", "ça", "va", "bonjour",
];

/// Category whose questions may turn into a collection-day lookup.
const COLLECTION_CATEGORY: &str = "waste_collection";

const FRENCH_MARKERS: &[&str] = &[
    "le", "la", "les", "des", "du", "une", "est", "pour", "comment", "je", "où", "quand", "quel",
    "quelle", "quels", "quelles", "et", "mon", "ma", "mes", "sont", "avec", "dans", "sur", "pas", "puis",
    "fermées", "fermée", "déneigement", "autobus", "stationnement", "ordures", "aujourd",
];

/// Where a query goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Route {
    Greeting,
    CollectionLookup { address: Option<String> },
    Dynamic { bucket: Bucket },
    Static { category: String },
}

impl Route {
    pub fn label(&self) -> &'static str {
        match self {
            Route::Greeting => "greeting",
            Route::CollectionLookup { .. } => "collection_lookup",
            Route::Dynamic { .. } => "dynamic",
            Route::Static { .. } => "static",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub route: Route,
    pub is_greeting: bool,
    /// `Bucket::None` for every non-dynamic route.
    pub bucket: Bucket,
    /// Category label used for prompts and fallback links. For dynamic
    /// routes this is the bucket name.
    pub category: String,
    pub detected_language: Language,
    /// English text used for retrieval and routing.
    pub retrieval_text: String,
}

struct CompiledBucket {
    bucket: Bucket,
    terms: Regex,
    context: Option<Regex>,
}

struct CompiledCategory {
    name: String,
    terms: Regex,
}

pub struct QueryClassifier {
    buckets: Vec<CompiledBucket>,
    categories: Vec<CompiledCategory>,
    default_category: String,
}

impl QueryClassifier {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        let buckets = catalog
            .buckets
            .iter()
            .filter_map(|b| {
                let terms = term_regex(&b.terms)?;
                Some(CompiledBucket {
                    bucket: b.bucket,
                    terms,
                    context: term_regex(&b.context_terms),
                })
            })
            .collect();
        let categories = catalog
            .categories
            .iter()
            .filter_map(|c| {
                Some(CompiledCategory {
                    name: c.name.clone(),
                    terms: term_regex(&c.terms)?,
                })
            })
            .collect();
        Self {
            buckets,
            categories,
            default_category: catalog.default_category.clone(),
        }
    }

    /// Full classification. Greetings never reach the translator.
    pub async fn classify(&self, query: &Query, translator: &dyn Translator) -> Classification {
        let detected = detect_language(&query.text);
        if is_greeting(&query.text) {
            return Classification {
                route: Route::Greeting,
                is_greeting: true,
                bucket: Bucket::None,
                category: String::new(),
                detected_language: detected,
                retrieval_text: query.text.clone(),
            };
        }

        let retrieval_text = if query.language != Language::En || detected != Language::En {
            let from = if detected != Language::En {
                detected
            } else {
                query.language
            };
            match translator.to_english(&query.text, from).await {
                Ok(t) if !t.trim().is_empty() => t.trim().to_string(),
                Ok(_) => query.text.clone(),
                Err(e) => {
                    warn!(target: "pipeline", error = %e, "translation failed; routing on raw text");
                    query.text.clone()
                }
            }
        } else {
            query.text.clone()
        };

        let route = self.route_english(&retrieval_text);
        let (bucket, category) = match &route {
            Route::Dynamic { bucket } => (*bucket, bucket.as_str().to_string()),
            Route::Static { category } => (Bucket::None, category.clone()),
            Route::CollectionLookup { .. } => (Bucket::None, "waste_collection".to_string()),
            Route::Greeting => (Bucket::None, String::new()),
        };
        Classification {
            route,
            is_greeting: false,
            bucket,
            category,
            detected_language: detected,
            retrieval_text,
        }
    }

    /// Routing on English text, without the greeting check.
    pub fn route_english(&self, text: &str) -> Route {
        let bucket = self.bucket_for(text);
        if bucket.is_dynamic() {
            return Route::Dynamic { bucket };
        }
        let category = self.matched_category(text);
        let curbside_category = category.map_or(true, |c| c == COLLECTION_CATEGORY);
        if curbside_category && CURBSIDE_TERMS.is_match(text) {
            let address = extract_address(text);
            if SCHEDULE_TERMS.is_match(text) || address.is_some() {
                return Route::CollectionLookup { address };
            }
        }
        Route::Static {
            category: self.category_for(text),
        }
    }

    /// First bucket in priority order whose terms (and context, if any) match.
    pub fn bucket_for(&self, text: &str) -> Bucket {
        self.buckets
            .iter()
            .find(|b| {
                b.terms.is_match(text) && b.context.as_ref().map_or(true, |c| c.is_match(text))
            })
            .map(|b| b.bucket)
            .unwrap_or(Bucket::None)
    }

    pub fn category_for(&self, text: &str) -> String {
        self.matched_category(text)
            .unwrap_or(&self.default_category)
            .to_string()
    }

    fn matched_category(&self, text: &str) -> Option<&str> {
        self.categories
            .iter()
            .find(|c| c.terms.is_match(text))
            .map(|c| c.name.as_str())
    }
}

fn term_regex(terms: &[String]) -> Option<Regex> {
    if terms.is_empty() {
        return None;
    }
    let alts = terms
        .iter()
        .map(|t| regex::escape(t))
        .collect::<Vec<_>>()
        .join("|");
    match Regex::new(&format!(r"(?i)\b(?:{alts})\b")) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(target: "pipeline", error = %e, "skipping unusable term set");
            None
        }
    }
}

fn word_count(text: &str) -> usize {
    WORD.find_iter(text).count()
}

/// Short greeting or bare acknowledgement with nothing but filler after it.
pub fn is_greeting(text: &str) -> bool {
    let words = word_count(text);
    let greeting = GREETING.find(text).filter(|_| words <= GREETING_MAX_WORDS);
    let ack = ACKNOWLEDGEMENT.find(text).filter(|_| words <= ACK_MAX_WORDS);
    greeting
        .or(ack)
        .is_some_and(|m| only_filler(&text[m.end()..]))
}

fn only_filler(rest: &str) -> bool {
    let rest = rest.to_lowercase();
    WORD.find_iter(&rest)
        .all(|w| GREETING_FILLER.contains(&w.as_str()))
}

/// Stopword + diacritic heuristic. Good enough to decide whether to
/// translate before retrieval; not a general language identifier.
pub fn detect_language(text: &str) -> Language {
    let lower = text.to_lowercase();
    let hits = WORD
        .find_iter(&lower)
        .filter(|m| FRENCH_MARKERS.contains(&m.as_str()))
        .count();
    let accents = lower
        .chars()
        .any(|c| matches!(c, 'é' | 'è' | 'ê' | 'à' | 'ç' | 'ù' | 'ô' | 'î' | 'û' | 'ë'));
    if hits >= 2 || (hits >= 1 && accents) {
        Language::Fr
    } else {
        Language::En
    }
}

/// Street address such as "576 Division Street", if present.
pub fn extract_address(text: &str) -> Option<String> {
    let caps = ADDRESS.captures(text)?;
    let addr = caps.get(1)?.as_str().split_whitespace().collect::<Vec<_>>().join(" ");
    (addr.len() > 5).then_some(addr)
}
