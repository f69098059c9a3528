//! URL discovery for a named entity.
//!
//! Search results are scraped and filtered first; if fewer than a
//! threshold survive, URLs generated from static domain knowledge are
//! appended. The merged list is deduplicated and capped.

pub mod fallback;
pub mod relevance;
pub mod search;

pub use relevance::{RawAnchor, Relevance};
pub use search::{RenderedSearch, SearchEngine, SearchProvider};

use crate::config::DiscoverySettings;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Where a candidate URL came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateOrigin {
    Search,
    Generated,
}

/// A URL worth trying for an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateUrl {
    pub url: String,
    pub origin: CandidateOrigin,
    /// 1-based position in discovery order.
    pub rank: usize,
}

/// Produces ranked candidate URLs for an entity.
pub struct DiscoveryEngine {
    search: Option<Box<dyn SearchProvider>>,
    settings: DiscoverySettings,
}

impl DiscoveryEngine {
    pub fn new(search: Box<dyn SearchProvider>, settings: DiscoverySettings) -> Self {
        Self {
            search: Some(search),
            settings,
        }
    }

    /// Engine that only uses the static fallback.
    pub fn fallback_only(settings: DiscoverySettings) -> Self {
        Self {
            search: None,
            settings,
        }
    }

    /// Candidate URLs for `entity`, deduplicated, capped, in rank order.
    ///
    /// Never fails: search errors degrade to no search results.
    pub async fn discover(&self, entity: &str) -> Vec<CandidateUrl> {
        let found = self.search_urls(entity).await;

        let mut pairs: Vec<(String, CandidateOrigin)> = found
            .into_iter()
            .map(|u| (u, CandidateOrigin::Search))
            .collect();

        if pairs.len() < self.settings.fallback_threshold {
            let generated = fallback::generate_fallback_urls(entity);
            info!(
                entity,
                found = pairs.len(),
                generated = generated.len(),
                "few search results, appending generated URLs"
            );
            pairs.extend(generated.into_iter().map(|u| (u, CandidateOrigin::Generated)));
        }

        let candidates = merge_candidates(pairs, self.settings.max_candidates);
        info!(entity, candidates = candidates.len(), "discovery complete");
        candidates
    }

    async fn search_urls(&self, entity: &str) -> Vec<String> {
        let Some(search) = &self.search else {
            return Vec::new();
        };
        let query = format!("{entity} Pipeline");
        match search.search(&query).await {
            Ok(anchors) => relevance::filter_anchors(
                &anchors,
                entity,
                search.engine(),
                self.settings.max_search_results,
            ),
            Err(e) => {
                warn!(
                    entity,
                    engine = %search.engine(),
                    error = %format!("{e:#}"),
                    "search failed"
                );
                Vec::new()
            }
        }
    }
}

/// Dedupe by trimmed string, keep first occurrence, cap, assign ranks.
pub fn merge_candidates(pairs: Vec<(String, CandidateOrigin)>, cap: usize) -> Vec<CandidateUrl> {
    let mut out: Vec<CandidateUrl> = Vec::new();
    for (url, origin) in pairs {
        if out.len() >= cap {
            break;
        }
        let url = url.trim();
        if url.is_empty() || out.iter().any(|c| c.url == url) {
            continue;
        }
        out.push(CandidateUrl {
            url: url.to_string(),
            origin,
            rank: out.len() + 1,
        });
    }
    out
}
