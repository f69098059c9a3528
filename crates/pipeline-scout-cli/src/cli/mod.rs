//! CLI subcommand implementations for the pipeline-scout binary.

pub mod discover_cmd;
pub mod doctor;
pub mod fetch_cmd;
pub mod quota_cmd;
pub mod run_cmd;

use std::sync::Arc;

use anyhow::Result;
use pipeline_scout::renderer::chromium::ChromiumRenderer;
use pipeline_scout::{NoopRenderer, Renderer, ScoutConfig};
use serde::Serialize;
use tracing::{info, warn};

use crate::GlobalArgs;

/// Environment configuration with command-line flags applied on top.
pub fn load_config(global: &GlobalArgs) -> ScoutConfig {
    apply_overrides(ScoutConfig::from_env(), global)
}

fn apply_overrides(mut config: ScoutConfig, global: &GlobalArgs) -> ScoutConfig {
    if global.headed {
        config.browser.headless = false;
    }
    if let Some(path) = &global.ledger_path {
        config.ledger_path = path.clone();
    }
    if let Some(path) = &global.sink_path {
        config.sink_path = path.clone();
    }
    if let Some(engine) = global.engine {
        config.discovery.engine = engine;
    }
    config
}

/// Launch Chromium, or fall back to HTTP-only mode when it is disabled or
/// cannot start.
pub async fn launch_renderer(config: &ScoutConfig, no_browser: bool) -> Arc<dyn Renderer> {
    if no_browser {
        info!("browser disabled, running HTTP-only");
        return Arc::new(NoopRenderer);
    }
    match ChromiumRenderer::launch(&config.browser, &config.fetch.user_agent).await {
        Ok(renderer) => Arc::new(renderer),
        Err(e) => {
            warn!(error = %format!("{e:#}"), "browser unavailable, running HTTP-only");
            Arc::new(NoopRenderer)
        }
    }
}

pub async fn shutdown_renderer(renderer: &dyn Renderer) {
    if let Err(e) = renderer.shutdown().await {
        warn!(error = %format!("{e:#}"), "browser shutdown failed");
    }
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline_scout::SearchEngine;
    use std::path::PathBuf;

    #[test]
    fn test_flags_override_environment() {
        let base = ScoutConfig::from_lookup(|key| match key {
            "SCOUT_LEDGER_PATH" => Some("/env/ledger.json".into()),
            "SCOUT_SINK_PATH" => Some("/env/products.jsonl".into()),
            _ => None,
        });
        let global = GlobalArgs {
            headed: true,
            ledger_path: Some(PathBuf::from("/flag/ledger.json")),
            engine: Some(SearchEngine::Google),
            ..GlobalArgs::default()
        };

        let config = apply_overrides(base, &global);

        assert!(!config.browser.headless);
        assert_eq!(config.ledger_path, PathBuf::from("/flag/ledger.json"));
        assert_eq!(config.sink_path, PathBuf::from("/env/products.jsonl"));
        assert_eq!(config.discovery.engine, SearchEngine::Google);
    }

    #[test]
    fn test_no_flags_keeps_environment() {
        let base = ScoutConfig::from_lookup(|key| match key {
            "SCOUT_SEARCH_ENGINE" => Some("google".into()),
            _ => None,
        });
        let config = apply_overrides(base.clone(), &GlobalArgs::default());
        assert_eq!(config, base);
    }
}
