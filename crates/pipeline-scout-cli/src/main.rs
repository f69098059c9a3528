// Copyright 2026 Pipeline Scout Contributors
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use pipeline_scout::SearchEngine;

mod cli;

#[derive(Parser)]
#[command(
    name = "pipeline-scout",
    about = "Pipeline Scout: find, fetch and extract drug-pipeline pages",
    version,
    after_help = "Run 'pipeline-scout <command> --help' for details on each command."
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Flags shared by every subcommand. Each overrides the matching
/// `SCOUT_*` environment variable.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Log level (trace, debug, info, warn, error). RUST_LOG wins if set.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Run the browser with a visible window
    #[arg(long, global = true)]
    pub headed: bool,

    /// Never launch a browser; HTTP-only acquisition and generated URLs
    #[arg(long, global = true)]
    pub no_browser: bool,

    /// Path to the persistent quota ledger
    #[arg(long, global = true)]
    pub ledger_path: Option<PathBuf>,

    /// Path to the JSON Lines product sink
    #[arg(long, global = true)]
    pub sink_path: Option<PathBuf>,

    /// Search engine for discovery (duckduckgo, google)
    #[arg(long, global = true)]
    pub engine: Option<SearchEngine>,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover, acquire and extract pipeline products for one or more companies
    Run {
        /// Company names, processed in order
        #[arg(required = true)]
        targets: Vec<String>,
        /// Stop each target after this many successful URLs
        #[arg(long)]
        max_successes: Option<usize>,
    },
    /// List candidate URLs for a company without fetching them
    Discover {
        /// Company name
        entity: String,
    },
    /// Acquire one URL through the HTTP/browser cascade
    Fetch {
        /// URL to acquire
        url: String,
        /// Print the full acquired text instead of a preview
        #[arg(long)]
        full: bool,
    },
    /// Inspect or reset the quota ledger
    Quota {
        #[command(subcommand)]
        action: Option<QuotaAction>,
    },
    /// Check environment and diagnose issues
    Doctor,
    /// Generate shell completion scripts
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish)
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum QuotaAction {
    /// Show daily, session and per-minute usage (default)
    Stats,
    /// Show whether a metered call would be admitted right now
    Check,
    /// Zero the session counter in the stored ledger
    ResetSession,
}

fn init_logging(global: &GlobalArgs) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "pipeline_scout={level},pipeline_scout_cli={level},warn",
            level = global.log_level
        ))
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if global.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.global);

    let global = cli.global;
    let result = match cli.command {
        Commands::Run {
            targets,
            max_successes,
        } => cli::run_cmd::run(&global, &targets, max_successes).await,
        Commands::Discover { entity } => cli::discover_cmd::run(&global, &entity).await,
        Commands::Fetch { url, full } => cli::fetch_cmd::run(&global, &url, full).await,
        Commands::Quota { action } => match action.unwrap_or(QuotaAction::Stats) {
            QuotaAction::Stats => cli::quota_cmd::run_stats(&global),
            QuotaAction::Check => cli::quota_cmd::run_check(&global),
            QuotaAction::ResetSession => cli::quota_cmd::run_reset_session(&global),
        },
        Commands::Doctor => cli::doctor::run(&global).await,
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "pipeline-scout", &mut std::io::stdout());
            Ok(())
        }
    };

    // 0 = success, 1 = error
    if let Err(e) = &result {
        tracing::error!(error = %format!("{e:#}"), "command failed");
        eprintln!("  Error: {e:#}");
        std::process::exit(1);
    }

    result
}
