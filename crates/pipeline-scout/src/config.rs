//! Process configuration.
//!
//! Every knob has a default. [`ScoutConfig::from_env`] overlays `SCOUT_*`
//! and `OPENAI_*` environment variables on top of the defaults; the CLI
//! then overlays its own flags.

use crate::discovery::SearchEngine;
use crate::quota::{CostModel, JsonFileStore, QuotaLimits};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::warn;

/// Browser user agent shared by the HTTP client and the renderer.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
                                      AppleWebKit/537.36 (KHTML, like Gecko) \
                                      Chrome/131.0.0.0 Safari/537.36";

/// Tier 1 / Tier 2 acquisition tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    pub user_agent: String,
    pub http_timeout_ms: u64,
    pub max_redirects: usize,
    /// Tier 1 text shorter than this escalates to Tier 2.
    pub sufficient_chars: usize,
    pub render_timeout_ms: u64,
    /// Fixed wait after navigation for client-side rendering.
    pub settle_ms: u64,
    /// Bounded wait for a pipeline-looking selector. A miss is not fatal.
    pub selector_timeout_ms: u64,
    /// Tier 2 content shorter than this is rejected as too short.
    pub min_rendered_chars: usize,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            http_timeout_ms: 15_000,
            max_redirects: 5,
            sufficient_chars: 2_000,
            render_timeout_ms: 30_000,
            settle_ms: 3_000,
            selector_timeout_ms: 5_000,
            min_rendered_chars: 100,
        }
    }
}

/// Search-page rendering and candidate capping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverySettings {
    pub engine: SearchEngine,
    pub max_candidates: usize,
    pub max_search_results: usize,
    /// Below this many search hits the static fallback is appended.
    pub fallback_threshold: usize,
    pub page_timeout_ms: u64,
    /// Pause on the engine's home page before typing.
    pub home_settle_ms: u64,
    pub typing_delay_ms: u64,
    pub results_settle_ms: u64,
    pub scroll_for_more: bool,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            engine: SearchEngine::DuckDuckGo,
            max_candidates: 8,
            max_search_results: 15,
            fallback_threshold: 2,
            page_timeout_ms: 30_000,
            home_settle_ms: 2_000,
            typing_delay_ms: 100,
            results_settle_ms: 3_000,
            scroll_for_more: true,
        }
    }
}

/// The metered extraction service.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionSettings {
    pub api_base: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    pub max_content_chars: usize,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub timeout_ms: u64,
}

impl std::fmt::Debug for ExtractionSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractionSettings")
            .field("api_base", &self.api_base)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("max_content_chars", &self.max_content_chars)
            .field("temperature", &self.temperature)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            max_content_chars: 20_000,
            temperature: 0.1,
            max_output_tokens: 4_000,
            timeout_ms: 120_000,
        }
    }
}

/// Orchestrator loop knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    pub max_successes: usize,
    /// Acquired content shorter than this is not sent to extraction.
    pub min_content_chars: usize,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            max_successes: 5,
            min_content_chars: 100,
        }
    }
}

/// Browser launch options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub headless: bool,
    pub chromium_path: Option<PathBuf>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            chromium_path: None,
        }
    }
}

/// Everything a run needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoutConfig {
    pub quota: QuotaLimits,
    pub pricing: CostModel,
    pub fetch: FetchSettings,
    pub discovery: DiscoverySettings,
    pub extraction: ExtractionSettings,
    pub run: RunSettings,
    pub browser: BrowserSettings,
    pub ledger_path: PathBuf,
    pub sink_path: PathBuf,
}

impl Default for ScoutConfig {
    fn default() -> Self {
        let base = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".pipeline-scout");
        Self {
            quota: QuotaLimits::default(),
            pricing: CostModel::default(),
            fetch: FetchSettings::default(),
            discovery: DiscoverySettings::default(),
            extraction: ExtractionSettings::default(),
            run: RunSettings::default(),
            browser: BrowserSettings::default(),
            ledger_path: JsonFileStore::default_path(),
            sink_path: base.join("products.jsonl"),
        }
    }
}

impl ScoutConfig {
    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with whatever `lookup` returns.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        overlay(&lookup, "SCOUT_LIMIT_REQUESTS_PER_MINUTE", &mut cfg.quota.requests_per_minute);
        overlay(&lookup, "SCOUT_LIMIT_REQUESTS_PER_DAY", &mut cfg.quota.requests_per_day);
        overlay(&lookup, "SCOUT_LIMIT_REQUESTS_PER_SESSION", &mut cfg.quota.requests_per_session);
        overlay_limit(&lookup, "SCOUT_LIMIT_COST_PER_DAY", &mut cfg.quota.cost_per_day_usd);
        overlay(&lookup, "SCOUT_HTTP_TIMEOUT_MS", &mut cfg.fetch.http_timeout_ms);
        overlay(&lookup, "SCOUT_RENDER_TIMEOUT_MS", &mut cfg.fetch.render_timeout_ms);
        overlay(&lookup, "SCOUT_SELECTOR_TIMEOUT_MS", &mut cfg.fetch.selector_timeout_ms);
        overlay(&lookup, "SCOUT_MAX_CONTENT_LENGTH", &mut cfg.extraction.max_content_chars);
        overlay(&lookup, "SCOUT_MAX_SUCCESSES", &mut cfg.run.max_successes);
        overlay(&lookup, "SCOUT_SEARCH_ENGINE", &mut cfg.discovery.engine);
        overlay(&lookup, "SCOUT_HEADLESS", &mut cfg.browser.headless);

        if let Some(path) = lookup("SCOUT_LEDGER_PATH") {
            cfg.ledger_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("SCOUT_SINK_PATH") {
            cfg.sink_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("SCOUT_CHROMIUM_PATH") {
            cfg.browser.chromium_path = Some(PathBuf::from(path));
        }
        if let Some(key) = lookup("OPENAI_API_KEY").filter(|k| !k.trim().is_empty()) {
            cfg.extraction.api_key = Some(key);
        }
        if let Some(base) = lookup("OPENAI_API_BASE") {
            cfg.extraction.api_base = base.trim_end_matches('/').to_string();
        }
        if let Some(model) = lookup("OPENAI_MODEL") {
            cfg.extraction.model = model;
        }

        cfg
    }
}

fn overlay<F, T>(lookup: &F, key: &str, slot: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => *slot = value,
        Err(_) => warn!(key, value = %raw, "ignoring unparsable configuration value"),
    }
}

/// Like [`overlay`], but a limit must be finite and non-negative.
fn overlay_limit<F>(lookup: &F, key: &str, slot: &mut f64)
where
    F: Fn(&str) -> Option<String>,
{
    let mut value = *slot;
    overlay(lookup, key, &mut value);
    if value.is_finite() && value >= 0.0 {
        *slot = value;
    } else {
        warn!(key, value, "ignoring non-finite or negative limit");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = ScoutConfig::from_lookup(|_| None);
        assert_eq!(cfg.quota.requests_per_minute, 25);
        assert_eq!(cfg.quota.requests_per_day, 500);
        assert_eq!(cfg.quota.requests_per_session, 100);
        assert_eq!(cfg.quota.cost_per_day_usd, 10.0);
        assert_eq!(cfg.fetch.sufficient_chars, 2_000);
        assert_eq!(cfg.discovery.max_candidates, 8);
        assert_eq!(cfg.extraction.max_content_chars, 20_000);
        assert_eq!(cfg.run.max_successes, 5);
    }

    #[test]
    fn test_env_overrides() {
        let cfg = ScoutConfig::from_lookup(lookup_from(&[
            ("SCOUT_LIMIT_REQUESTS_PER_MINUTE", "10"),
            ("SCOUT_LIMIT_COST_PER_DAY", "2.5"),
            ("SCOUT_SEARCH_ENGINE", "google"),
            ("SCOUT_HEADLESS", "false"),
            ("OPENAI_API_BASE", "http://localhost:8080/v1/"),
            ("OPENAI_API_KEY", "sk-test"),
        ]));
        assert_eq!(cfg.quota.requests_per_minute, 10);
        assert_eq!(cfg.quota.cost_per_day_usd, 2.5);
        assert_eq!(cfg.discovery.engine, SearchEngine::Google);
        assert!(!cfg.browser.headless);
        assert_eq!(cfg.extraction.api_base, "http://localhost:8080/v1");
        assert_eq!(cfg.extraction.api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let cfg = ScoutConfig::from_lookup(lookup_from(&[
            ("SCOUT_LIMIT_REQUESTS_PER_DAY", "lots"),
            ("SCOUT_SEARCH_ENGINE", "altavista"),
        ]));
        assert_eq!(cfg.quota.requests_per_day, 500);
        assert_eq!(cfg.discovery.engine, SearchEngine::DuckDuckGo);
    }

    #[test]
    fn test_cost_limit_must_be_finite() {
        for raw in ["NaN", "inf", "-inf", "-1"] {
            let cfg = ScoutConfig::from_lookup(lookup_from(&[("SCOUT_LIMIT_COST_PER_DAY", raw)]));
            assert_eq!(cfg.quota.cost_per_day_usd, 10.0, "{raw} was accepted");
        }
        let cfg = ScoutConfig::from_lookup(lookup_from(&[("SCOUT_LIMIT_COST_PER_DAY", "0")]));
        assert_eq!(cfg.quota.cost_per_day_usd, 0.0);
    }

    #[test]
    fn test_api_key_is_redacted_in_debug() {
        let mut cfg = ScoutConfig::default();
        cfg.extraction.api_key = Some("sk-secret".into());
        let rendered = format!("{cfg:?}");
        assert!(!rendered.contains("sk-secret"));
    }
}
