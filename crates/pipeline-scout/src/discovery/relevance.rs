//! Pure filters over search-result anchors.
//!
//! Nothing here touches the network: anchors come in as `{href, text}`
//! pairs scraped from a rendered result page and leave as absolute URLs
//! scored against the entity name.

use super::search::SearchEngine;
use serde::{Deserialize, Serialize};
use url::Url;

/// Hosts never worth fetching, matched on the host or any parent domain.
pub const EXCLUDED_HOSTS: &[&str] = &[
    "facebook.com",
    "twitter.com",
    "x.com",
    "linkedin.com",
    "youtube.com",
    "instagram.com",
];

/// Path or link-text words that suggest pipeline content.
pub const PIPELINE_KEYWORDS: &[&str] = &[
    "pipeline",
    "research",
    "development",
    "clinical",
    "drug",
    "product",
    "innovation",
    "science",
    "therapy",
    "pharmaceutical",
];

/// Domain matching ignores entity tokens shorter than this.
const MIN_DOMAIN_TOKEN_LEN: usize = 3;

/// An anchor as scraped from a result page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawAnchor {
    pub href: String,
    #[serde(default)]
    pub text: String,
}

impl RawAnchor {
    pub fn new(href: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            text: text.into(),
        }
    }
}

/// Why an anchor was kept or dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Relevance {
    /// The host names the entity.
    DomainMatch,
    /// Pipeline keyword in path or text, and the text names the entity.
    KeywordMatch,
    Rejected,
}

impl Relevance {
    pub fn is_accepted(&self) -> bool {
        !matches!(self, Relevance::Rejected)
    }
}

/// Lowercased words of the entity name that carry at least one
/// alphanumeric character.
pub fn entity_tokens(entity: &str) -> Vec<String> {
    entity
        .split_whitespace()
        .filter(|w| w.chars().any(char::is_alphanumeric))
        .map(str::to_lowercase)
        .collect()
}

/// Turn a raw href into the absolute URL it really points at.
///
/// Relative links resolve against the engine's home page. Redirect
/// wrappers (`/l/?uddg=` and `/url?q=`) are unwrapped. Returns `None` for
/// fragments, non-http schemes and anything unparsable.
pub fn resolve_href(href: &str, engine: SearchEngine) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let base = Url::parse(engine.home_url()).ok()?;
    let url = base.join(href).ok()?;

    let url = match unwrap_redirect(&url) {
        Some(target) => target,
        None => url,
    };

    matches!(url.scheme(), "http" | "https").then_some(url)
}

fn unwrap_redirect(url: &Url) -> Option<Url> {
    let param = if url.path().starts_with("/l/") || url.path() == "/l" {
        "uddg"
    } else if url.path() == "/url" {
        "q"
    } else {
        return None;
    };
    let (_, target) = url.query_pairs().find(|(k, _)| k == param)?;
    Url::parse(&target).ok()
}

/// Whether `url` points at the search engine itself or a social network.
pub fn is_excluded(url: &Url, engine: SearchEngine) -> bool {
    let Some(host) = url.host_str() else {
        return true;
    };
    let host = host.to_ascii_lowercase();
    EXCLUDED_HOSTS
        .iter()
        .chain(engine.own_hosts())
        .any(|ex| host == *ex || host.ends_with(&format!(".{ex}")))
}

/// Score an absolute URL and its link text against the entity tokens.
pub fn score(url: &Url, text: &str, tokens: &[String]) -> Relevance {
    let host = url.host_str().unwrap_or("").to_ascii_lowercase();
    let stem = host
        .strip_prefix("www.")
        .unwrap_or(&host)
        .split('.')
        .next()
        .unwrap_or("");

    let domain_match = tokens
        .iter()
        .filter(|t| t.chars().count() >= MIN_DOMAIN_TOKEN_LEN)
        .any(|t| host.contains(t.as_str()) || (!stem.is_empty() && t.contains(stem)));
    if domain_match {
        return Relevance::DomainMatch;
    }

    let path = url.path().to_ascii_lowercase();
    let text = text.to_lowercase();
    let has_keyword = PIPELINE_KEYWORDS
        .iter()
        .any(|k| path.contains(k) || text.contains(k));
    if has_keyword && tokens.iter().any(|t| text.contains(t.as_str())) {
        return Relevance::KeywordMatch;
    }

    Relevance::Rejected
}

/// Resolve, exclude, score and dedupe anchors, keeping at most `limit`.
pub fn filter_anchors(
    anchors: &[RawAnchor],
    entity: &str,
    engine: SearchEngine,
    limit: usize,
) -> Vec<String> {
    let tokens = entity_tokens(entity);
    let mut kept: Vec<String> = Vec::new();

    for anchor in anchors {
        if kept.len() >= limit {
            break;
        }
        let Some(url) = resolve_href(&anchor.href, engine) else {
            continue;
        };
        if is_excluded(&url, engine) {
            continue;
        }
        if !score(&url, &anchor.text, &tokens).is_accepted() {
            continue;
        }
        let url = url.to_string();
        if !kept.contains(&url) {
            kept.push(url);
        }
    }

    kept
}
