// src/sources/urls.rs
//! URL canonicalization and domain allowlist checks.

/// Canonical form used for deduplication: lowercase scheme and host, no
/// query, no fragment, no trailing slash. Unparseable input is trimmed and
/// returned as-is so it still dedups against itself.
pub fn canonicalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    match url::Url::parse(trimmed) {
        Ok(mut u) => {
            u.set_query(None);
            u.set_fragment(None);
            // url::Url lowercases scheme and host already
            u.to_string().trim_end_matches('/').to_string()
        }
        Err(_) => trimmed.trim_end_matches('/').to_string(),
    }
}

/// Lowercased host of an absolute http(s) URL.
pub fn hostname(raw: &str) -> Option<String> {
    let u = url::Url::parse(raw.trim()).ok()?;
    if !matches!(u.scheme(), "http" | "https") {
        return None;
    }
    u.host_str().map(|h| h.trim_end_matches('.').to_ascii_lowercase())
}

/// True when `host` equals an allowlisted domain or is a subdomain of one.
pub fn host_allowed(host: &str, allowlist: &[String]) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    allowlist.iter().any(|d| {
        let d = d.as_str();
        host == d
            || (host.len() > d.len()
                && host.ends_with(d)
                && host.as_bytes()[host.len() - d.len() - 1] == b'.')
    })
}

/// Allowlist check on a full URL. Anything that does not parse as an
/// absolute http(s) URL is rejected.
pub fn is_allowlisted(url: &str, allowlist: &[String]) -> bool {
    hostname(url).is_some_and(|h| host_allowed(&h, allowlist))
}
