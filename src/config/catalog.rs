// src/config/catalog.rs
//! # Routing catalog
//!
//! Priority-ordered tables that drive routing and source selection:
//!
//! - **buckets**: dynamic (live-source) query kinds with their trigger terms,
//!   curated hub URLs, sitemap keywords and "latest item" URL patterns.
//! - **categories**: static-index topics with trigger terms and one curated
//!   official URL used when retrieval surfaces no link.
//!
//! Table order IS the tie-break: the first entry whose terms match wins.
//! A built-in seed covers the City of Kingston; a TOML file can replace it.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{fmt, fs, path::Path};

/// Dynamic-query kind. `None` means "use the static vector index".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    RoadClosures,
    SnowRemoval,
    Transit,
    TransitLostFound,
    LostFoundGeneral,
    None,
}

impl Bucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::RoadClosures => "road_closures",
            Bucket::SnowRemoval => "snow_removal",
            Bucket::Transit => "transit",
            Bucket::TransitLostFound => "transit_lost_found",
            Bucket::LostFoundGeneral => "lost_found_general",
            Bucket::None => "none",
        }
    }

    pub fn is_dynamic(&self) -> bool {
        !matches!(self, Bucket::None)
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recurring-resource URL scheme for a bucket ("this week's traffic report").
///
/// Templates accept `{year}`, `{month}` (lowercase English month name),
/// `{month_num}` (two digits) and `{day}` (no padding).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PatternSpec {
    /// Keyed by the Monday of the current ISO week.
    Weekly { template: String },
    /// Keyed by the first day of the current month.
    Monthly { template: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketSpec {
    pub bucket: Bucket,
    /// Any of these (word-boundary, case-insensitive) triggers the bucket...
    pub terms: Vec<String>,
    /// ...provided one of these also appears, when non-empty.
    #[serde(default)]
    pub context_terms: Vec<String>,
    /// URL-path tokens that make a sitemap entry relevant to this bucket.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Curated official pages, always offered first.
    #[serde(default)]
    pub hubs: Vec<String>,
    #[serde(default)]
    pub patterns: Vec<PatternSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategorySpec {
    pub name: String,
    pub terms: Vec<String>,
    /// Official page injected when no retrieved source carries a link.
    pub official_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub buckets: Vec<BucketSpec>,
    pub categories: Vec<CategorySpec>,
    pub default_category: String,
    pub collection_calendar_url: String,
}

impl Catalog {
    /// Load from `path` when given, otherwise use the built-in seed.
    pub fn load(path: Option<&str>) -> Result<Self> {
        match path {
            Some(p) => Self::load_from_file(p),
            None => Ok(Self::default_seed()),
        }
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading catalog from {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("parsing catalog {}", path.display()))
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let mut cat: Catalog = toml::from_str(s)?;
        cat.normalize();
        cat.validate()?;
        Ok(cat)
    }

    fn normalize(&mut self) {
        for b in &mut self.buckets {
            lower_all(&mut b.terms);
            lower_all(&mut b.context_terms);
            lower_all(&mut b.keywords);
        }
        for c in &mut self.categories {
            c.name = c.name.trim().to_ascii_lowercase();
            lower_all(&mut c.terms);
        }
        self.default_category = self.default_category.trim().to_ascii_lowercase();
    }

    fn validate(&self) -> Result<()> {
        if self.categories.is_empty() {
            bail!("catalog needs at least one category");
        }
        if self.category(&self.default_category).is_none() {
            bail!(
                "default_category '{}' is not a declared category",
                self.default_category
            );
        }
        for b in &self.buckets {
            if b.bucket == Bucket::None {
                bail!("bucket 'none' cannot be declared in the catalog");
            }
            if b.terms.is_empty() {
                bail!("bucket '{}' has no terms", b.bucket);
            }
            if b.hubs.is_empty() {
                bail!("bucket '{}' needs at least one curated hub", b.bucket);
            }
        }
        Ok(())
    }

    pub fn bucket(&self, bucket: Bucket) -> Option<&BucketSpec> {
        self.buckets.iter().find(|b| b.bucket == bucket)
    }

    pub fn category(&self, name: &str) -> Option<&CategorySpec> {
        let name = name.trim().to_ascii_lowercase();
        self.categories.iter().find(|c| c.name == name)
    }

    /// Built-in City of Kingston seed.
    pub fn default_seed() -> Self {
        const SITE: &str = "https://www.cityofkingston.ca";
        let url = |path: &str| format!("{SITE}{path}");
        let v = |xs: &[&str]| xs.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        let buckets = vec![
            BucketSpec {
                bucket: Bucket::TransitLostFound,
                terms: v(&[
                    "lost",
                    "left my",
                    "left behind",
                    "left something",
                    "forgot my",
                    "forgotten",
                    "missing",
                    "lost and found",
                    "lost & found",
                ]),
                context_terms: v(&["bus", "buses", "transit", "terminal", "route"]),
                keywords: v(&["lost", "found", "transit"]),
                hubs: vec![url("/kingston-transit/lost-and-found/")],
                patterns: vec![],
            },
            BucketSpec {
                bucket: Bucket::LostFoundGeneral,
                terms: v(&[
                    "lost and found",
                    "lost & found",
                    "lost my",
                    "lost item",
                    "found item",
                    "found property",
                    "found a wallet",
                    "found a phone",
                    "found keys",
                    "found some keys",
                ]),
                context_terms: vec![],
                keywords: v(&["lost", "found"]),
                hubs: vec![url("/city-hall/contact-us/lost-and-found/")],
                patterns: vec![],
            },
            BucketSpec {
                bucket: Bucket::RoadClosures,
                terms: v(&[
                    "road closure",
                    "road closures",
                    "road closed",
                    "roads closed",
                    "closed road",
                    "closed roads",
                    "street closure",
                    "street closed",
                    "lane closure",
                    "lane closures",
                    "detour",
                    "detours",
                    "roadwork",
                    "road work",
                    "roadworks",
                    "road construction",
                    "construction on",
                    "construction near",
                    "traffic report",
                    "traffic delays",
                    "traffic update",
                    "traffic disruption",
                ]),
                context_terms: vec![],
                keywords: v(&[
                    "road",
                    "roads",
                    "closure",
                    "closures",
                    "traffic",
                    "construction",
                    "detour",
                    "roadwork",
                ]),
                hubs: vec![
                    url("/roads-parking-and-transportation/road-closures-and-traffic/"),
                    url("/roads-parking-and-transportation/construction-projects/"),
                ],
                patterns: vec![PatternSpec::Weekly {
                    template: url("/news/traffic-report-week-of-{month}-{day}-{year}/"),
                }],
            },
            BucketSpec {
                bucket: Bucket::SnowRemoval,
                terms: v(&[
                    "snow",
                    "snowfall",
                    "snow removal",
                    "plow",
                    "plows",
                    "plowing",
                    "plough",
                    "ploughing",
                    "winter parking",
                    "winter control",
                    "sidewalk clearing",
                    "salting",
                ]),
                context_terms: vec![],
                keywords: v(&["snow", "winter", "plow", "plowing", "sidewalk"]),
                hubs: vec![
                    url("/roads-parking-and-transportation/winter-control/"),
                    url("/roads-parking-and-transportation/parking/winter-parking/"),
                ],
                patterns: vec![],
            },
            BucketSpec {
                bucket: Bucket::Transit,
                terms: v(&[
                    "bus",
                    "buses",
                    "transit",
                    "bus route",
                    "bus stop",
                    "bus pass",
                    "express route",
                    "kingston transit",
                    "transpass",
                ]),
                context_terms: vec![],
                keywords: v(&["transit", "bus", "route", "routes", "schedule", "schedules", "fares"]),
                hubs: vec![
                    url("/kingston-transit/"),
                    url("/kingston-transit/routes-and-schedules/"),
                ],
                patterns: vec![],
            },
        ];

        let categories = vec![
            CategorySpec {
                name: "fire_permits".into(),
                terms: v(&["fire permit", "open air fire", "burn", "burning", "fire pit"]),
                official_url: url("/residents/emergency-services/fire-permits/"),
            },
            CategorySpec {
                name: "hazardous_waste".into(),
                terms: v(&["hazardous waste", "karc", "dispose", "batteries", "drop off", "paint"]),
                official_url: url("/garbage-and-recycling/household-hazardous-waste/"),
            },
            CategorySpec {
                name: "property_tax".into(),
                terms: v(&["property tax", "tax payment", "tax due", "tax bill", "pay taxes", "taxes"]),
                official_url: url("/city-hall/taxes/property-tax/"),
            },
            CategorySpec {
                name: "parking".into(),
                terms: v(&[
                    "parking permit",
                    "parking",
                    "permit",
                    "monthly parking",
                    "residential parking",
                ]),
                official_url: url("/roads-parking-and-transportation/parking/"),
            },
            CategorySpec {
                name: "noise".into(),
                terms: v(&["noise", "quiet hours", "bylaw", "nuisance", "complaint"]),
                official_url: url("/city-hall/bylaws/noise/"),
            },
            CategorySpec {
                name: "waste_collection".into(),
                terms: v(&[
                    "blue box",
                    "grey box",
                    "green bin",
                    "what goes",
                    "recycling",
                    "garbage",
                    "waste",
                    "cart",
                    "collection rules",
                ]),
                official_url: url("/garbage-and-recycling/"),
            },
        ];

        Self {
            buckets,
            categories,
            default_category: "waste_collection".into(),
            collection_calendar_url: url("/garbage-and-recycling/collection-calendar/"),
        }
    }
}

fn lower_all(items: &mut Vec<String>) {
    for it in items.iter_mut() {
        *it = it.trim().to_lowercase();
    }
    items.retain(|s| !s.is_empty());
}
