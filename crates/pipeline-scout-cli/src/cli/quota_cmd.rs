//! `pipeline-scout quota`: inspect or reset the persistent quota ledger.

use std::sync::Arc;

use anyhow::Result;
use pipeline_scout::quota::{JsonFileStore, SystemClock};
use pipeline_scout::{QuotaGovernor, ScoutConfig};

use super::{load_config, print_json};
use crate::GlobalArgs;

fn open_governor(config: &ScoutConfig) -> QuotaGovernor {
    QuotaGovernor::open(
        config.quota,
        config.pricing,
        Box::new(JsonFileStore::new(config.ledger_path.clone())),
        Arc::new(SystemClock),
    )
}

/// Print daily, session and per-minute usage against the configured limits.
pub fn run_stats(global: &GlobalArgs) -> Result<()> {
    let governor = open_governor(&load_config(global));
    print_json(&governor.stats())
}

/// Print the admission decision a metered call would get right now.
pub fn run_check(global: &GlobalArgs) -> Result<()> {
    let mut governor = open_governor(&load_config(global));
    print_json(&governor.check())
}

pub fn run_reset_session(global: &GlobalArgs) -> Result<()> {
    let config = load_config(global);
    let mut governor = open_governor(&config);
    governor.reset_session()?;
    eprintln!("Session counter reset in {}", config.ledger_path.display());
    print_json(&governor.stats())
}
