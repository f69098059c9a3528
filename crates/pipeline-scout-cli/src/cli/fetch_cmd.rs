//! `pipeline-scout fetch <url>`: acquire a single page through the cascade.

use anyhow::Result;
use pipeline_scout::acquisition::HttpClient;
use pipeline_scout::{Acquirer, AcquisitionCascade};
use std::sync::Arc;

use super::{launch_renderer, load_config, print_json, shutdown_renderer};
use crate::GlobalArgs;

const PREVIEW_CHARS: usize = 500;

pub async fn run(global: &GlobalArgs, url: &str, full: bool) -> Result<()> {
    let config = load_config(global);
    let renderer = launch_renderer(&config, global.no_browser).await;
    let cascade = AcquisitionCascade::new(
        HttpClient::new(&config.fetch)?,
        Arc::clone(&renderer),
        config.fetch.clone(),
    );

    let outcome = cascade.acquire(url).await;
    shutdown_renderer(renderer.as_ref()).await;

    let mut result = outcome?;
    if !full {
        result.content = preview(&result.content, PREVIEW_CHARS);
    }
    print_json(&result)
}

fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}
