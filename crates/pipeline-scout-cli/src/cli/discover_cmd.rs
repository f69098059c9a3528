//! `pipeline-scout discover <entity>`: list candidate URLs only.

use std::sync::Arc;

use anyhow::Result;
use pipeline_scout::discovery::RenderedSearch;
use pipeline_scout::DiscoveryEngine;

use super::{launch_renderer, load_config, print_json, shutdown_renderer};
use crate::GlobalArgs;

pub async fn run(global: &GlobalArgs, entity: &str) -> Result<()> {
    let config = load_config(global);

    if global.no_browser {
        let engine = DiscoveryEngine::fallback_only(config.discovery.clone());
        return print_json(&engine.discover(entity).await);
    }

    let renderer = launch_renderer(&config, false).await;
    let search = RenderedSearch::new(Arc::clone(&renderer), config.discovery.clone());
    let engine = DiscoveryEngine::new(Box::new(search), config.discovery.clone());
    let candidates = engine.discover(entity).await;
    shutdown_renderer(renderer.as_ref()).await;

    print_json(&candidates)
}
