//! Search-result scraping through a rendered browser page.
//!
//! No search API is used. The engine's home page is opened, the query is
//! typed key by key, and every anchor on the result page is returned for
//! the pure filters in [`super::relevance`].

use super::relevance::RawAnchor;
use crate::config::DiscoverySettings;
use crate::renderer::{with_context, Renderer};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Collects `{href, text}` for every anchor on the page.
const ANCHORS_SCRIPT: &str = r#"
JSON.stringify(Array.from(document.querySelectorAll('a[href]')).map(a => ({
  href: a.getAttribute('href') || '',
  text: (a.textContent || '').replace(/\s+/g, ' ').trim()
})))
"#;

const SCROLL_MIDDLE_SCRIPT: &str = "window.scrollTo(0, document.body.scrollHeight / 2); true";
const SCROLL_BOTTOM_SCRIPT: &str = "window.scrollTo(0, document.body.scrollHeight); true";

/// Which search surface to scrape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchEngine {
    #[default]
    DuckDuckGo,
    Google,
}

impl SearchEngine {
    pub fn home_url(&self) -> &'static str {
        match self {
            Self::DuckDuckGo => "https://duckduckgo.com",
            Self::Google => "https://www.google.com",
        }
    }

    /// CSS selector of the query input.
    pub fn input_selector(&self) -> &'static str {
        match self {
            Self::DuckDuckGo => r#"input[name="q"]"#,
            Self::Google => r#"textarea[name="q"], input[name="q"]"#,
        }
    }

    /// Hosts belonging to the engine itself.
    pub fn own_hosts(&self) -> &'static [&'static str] {
        match self {
            Self::DuckDuckGo => &["duckduckgo.com"],
            Self::Google => &["google.com", "googleusercontent.com", "gstatic.com"],
        }
    }
}

impl fmt::Display for SearchEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuckDuckGo => f.write_str("duckduckgo"),
            Self::Google => f.write_str("google"),
        }
    }
}

impl FromStr for SearchEngine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "duckduckgo" | "ddg" => Ok(Self::DuckDuckGo),
            "google" => Ok(Self::Google),
            other => Err(format!("unknown search engine: {other}")),
        }
    }
}

/// Source of raw result-page anchors for a query.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn engine(&self) -> SearchEngine;
    async fn search(&self, query: &str) -> Result<Vec<RawAnchor>>;
}

/// Scrapes a search engine's rendered result page.
pub struct RenderedSearch {
    renderer: Arc<dyn Renderer>,
    settings: DiscoverySettings,
}

impl RenderedSearch {
    pub fn new(renderer: Arc<dyn Renderer>, settings: DiscoverySettings) -> Self {
        Self { renderer, settings }
    }
}

#[async_trait]
impl SearchProvider for RenderedSearch {
    fn engine(&self) -> SearchEngine {
        self.settings.engine
    }

    async fn search(&self, query: &str) -> Result<Vec<RawAnchor>> {
        let engine = self.settings.engine;
        let cfg = self.settings.clone();
        let query = query.to_string();

        let raw = with_context(self.renderer.as_ref(), move |ctx| {
            Box::pin(async move {
                ctx.navigate(engine.home_url(), cfg.page_timeout_ms)
                    .await
                    .with_context(|| format!("failed to open {engine}"))?;
                tokio::time::sleep(Duration::from_millis(cfg.home_settle_ms)).await;

                ctx.type_text(engine.input_selector(), &query, cfg.typing_delay_ms)
                    .await?;
                ctx.press_key(engine.input_selector(), "Enter").await?;
                tokio::time::sleep(Duration::from_millis(cfg.results_settle_ms)).await;

                if cfg.scroll_for_more {
                    ctx.execute_js(SCROLL_MIDDLE_SCRIPT).await?;
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    ctx.execute_js(SCROLL_BOTTOM_SCRIPT).await?;
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }

                ctx.execute_js(ANCHORS_SCRIPT).await
            })
        })
        .await?;

        let anchors: Vec<RawAnchor> = match raw {
            serde_json::Value::String(s) => serde_json::from_str(&s)?,
            other => serde_json::from_value(other)?,
        };
        debug!(engine = %engine, anchors = anchors.len(), "search page scraped");
        Ok(anchors)
    }
}
