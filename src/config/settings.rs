// src/config/settings.rs
use anyhow::{anyhow, Result};
use std::env;
use std::time::Duration;

pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_PINECONE_API_KEY: &str = "PINECONE_API_KEY";
pub const ENV_PINECONE_INDEX: &str = "PINECONE_INDEX";
pub const ENV_PINECONE_INDEX_HOST: &str = "PINECONE_INDEX_HOST";
pub const ENV_OPENAI_CHAT_MODEL: &str = "OPENAI_CHAT_MODEL";
pub const ENV_OPENAI_EMBED_MODEL: &str = "OPENAI_EMBED_MODEL";
pub const ENV_SITEMAP_URL: &str = "SITEMAP_URL";
pub const ENV_SITEMAP_TTL_SECONDS: &str = "SITEMAP_TTL_SECONDS";
pub const ENV_ALLOWED_DOMAINS: &str = "ALLOWED_DOMAINS";
pub const ENV_ALLOWED_ORIGINS: &str = "ALLOWED_ORIGINS";
pub const ENV_FETCH_TIMEOUT_SECS: &str = "FETCH_TIMEOUT_SECS";
pub const ENV_CATALOG_PATH: &str = "CATALOG_PATH";

pub const DEFAULT_INDEX_NAME: &str = "kingston-policies";
pub const DEFAULT_SITEMAP_URL: &str = "https://www.cityofkingston.ca/sitemap.xml";
pub const DEFAULT_SITEMAP_TTL_SECS: u64 = 6 * 3600;
pub const DEFAULT_ALLOWED_DOMAINS: &str = "cityofkingston.ca";
pub const DEFAULT_ALLOWED_ORIGINS: &str = "http://localhost:3000,http://localhost:5173";
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 8;
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_EMBED_MODEL: &str = "text-embedding-3-small";

/// Runtime settings, read once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub openai_api_key: String,
    pub pinecone_api_key: String,
    pub index_name: String,
    /// Data-plane host; resolved from the index name when absent.
    pub index_host: Option<String>,
    pub chat_model: String,
    pub embed_model: String,
    pub sitemap_url: String,
    pub sitemap_ttl: Duration,
    pub allowed_domains: Vec<String>,
    pub allowed_origins: Vec<String>,
    pub fetch_timeout: Duration,
    pub catalog_path: Option<String>,
}

impl Settings {
    /// Build settings from the process environment.
    ///
    /// Both API keys are required; everything else falls back to defaults.
    pub fn from_env() -> Result<Self> {
        let openai_api_key = env_nonempty(ENV_OPENAI_API_KEY)
            .ok_or_else(|| anyhow!("{ENV_OPENAI_API_KEY} must be set"))?;
        let pinecone_api_key = env_nonempty(ENV_PINECONE_API_KEY)
            .ok_or_else(|| anyhow!("{ENV_PINECONE_API_KEY} must be set"))?;

        Ok(Self {
            openai_api_key,
            pinecone_api_key,
            index_name: env_or(ENV_PINECONE_INDEX, DEFAULT_INDEX_NAME),
            index_host: env_nonempty(ENV_PINECONE_INDEX_HOST),
            chat_model: env_or(ENV_OPENAI_CHAT_MODEL, DEFAULT_CHAT_MODEL),
            embed_model: env_or(ENV_OPENAI_EMBED_MODEL, DEFAULT_EMBED_MODEL),
            sitemap_url: env_or(ENV_SITEMAP_URL, DEFAULT_SITEMAP_URL),
            sitemap_ttl: Duration::from_secs(parse_secs_env(
                env_nonempty(ENV_SITEMAP_TTL_SECONDS),
                DEFAULT_SITEMAP_TTL_SECS,
            )),
            allowed_domains: parse_domain_list(&env_or(
                ENV_ALLOWED_DOMAINS,
                DEFAULT_ALLOWED_DOMAINS,
            )),
            allowed_origins: parse_csv(&env_or(ENV_ALLOWED_ORIGINS, DEFAULT_ALLOWED_ORIGINS)),
            fetch_timeout: Duration::from_secs(
                parse_secs_env(
                    env_nonempty(ENV_FETCH_TIMEOUT_SECS),
                    DEFAULT_FETCH_TIMEOUT_SECS,
                )
                .max(1),
            ),
            catalog_path: env_nonempty(ENV_CATALOG_PATH),
        })
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_nonempty(key).unwrap_or_else(|| default.to_string())
}

// parse optional seconds env; garbage falls back to the default
fn parse_secs_env(raw: Option<String>, default: u64) -> u64 {
    raw.and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

/// Split a comma-separated list, trimming and dropping empties.
pub fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Domain allowlist: lowercase, no scheme, no leading `www.` or dots.
pub fn parse_domain_list(raw: &str) -> Vec<String> {
    let mut out: Vec<String> = parse_csv(raw)
        .into_iter()
        .map(|d| {
            let d = d.to_ascii_lowercase();
            let d = d
                .trim_start_matches("https://")
                .trim_start_matches("http://")
                .trim_end_matches('/')
                .trim_start_matches('.');
            d.strip_prefix("www.").unwrap_or(d).to_string()
        })
        .filter(|d| !d.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}
