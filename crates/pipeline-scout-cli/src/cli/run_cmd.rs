//! `pipeline-scout run <targets...>`: full discovery, acquisition and
//! extraction for each company.

use std::sync::Arc;

use anyhow::Result;
use pipeline_scout::{Orchestrator, TargetStatus};
use tracing::info;

use super::{launch_renderer, load_config, print_json, shutdown_renderer};
use crate::GlobalArgs;

/// Run the batch and print the run report as JSON on stdout.
pub async fn run(
    global: &GlobalArgs,
    targets: &[String],
    max_successes: Option<usize>,
) -> Result<()> {
    let mut config = load_config(global);
    if let Some(n) = max_successes {
        config.run.max_successes = n;
    }

    let renderer = launch_renderer(&config, global.no_browser).await;
    let report = match Orchestrator::from_config(&config, Arc::clone(&renderer)) {
        Ok(mut orchestrator) => orchestrator.run_batch(targets).await,
        Err(e) => Err(e),
    };
    shutdown_renderer(renderer.as_ref()).await;
    let report = report?;

    let succeeded = report
        .targets
        .iter()
        .filter(|t| t.status == TargetStatus::Success)
        .count();
    info!(
        run_id = %report.run_id,
        succeeded,
        total = report.targets.len(),
        sink = %config.sink_path.display(),
        "batch complete"
    );
    print_json(&report)
}
