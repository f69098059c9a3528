//! Environment readiness check.

use std::path::Path;

use anyhow::Result;
use pipeline_scout::quota::{JsonFileStore, LedgerStore};
use pipeline_scout::renderer::chromium::find_chromium;

use super::load_config;
use crate::GlobalArgs;

/// Check Chromium, extraction credentials and the writable paths.
pub async fn run(global: &GlobalArgs) -> Result<()> {
    let config = load_config(global);

    println!("Pipeline Scout Doctor");
    println!("=====================");
    println!();
    println!("OS:   {}", std::env::consts::OS);
    println!("Arch: {}", std::env::consts::ARCH);
    println!();

    let chromium = find_chromium(config.browser.chromium_path.as_deref());
    match &chromium {
        Some(path) => println!("[OK] Chromium found: {}", path.display()),
        None => println!(
            "[!!] Chromium NOT found. Set SCOUT_CHROMIUM_PATH; runs will be HTTP-only."
        ),
    }

    let has_key = config.extraction.api_key.is_some();
    if has_key {
        println!(
            "[OK] Extraction key set (model {}, {})",
            config.extraction.model, config.extraction.api_base
        );
    } else {
        println!("[!!] OPENAI_API_KEY is not set. Extraction calls will fail.");
    }

    let ledger_ok = check_writable("Quota ledger", &config.ledger_path);
    match JsonFileStore::new(config.ledger_path.clone()).load() {
        Ok(Some(ledger)) => println!(
            "[OK] Ledger {}: {} requests on {}",
            config.ledger_path.display(),
            ledger.daily.request_count,
            ledger.daily.date
        ),
        Ok(None) => println!("[--] Ledger not created yet"),
        Err(e) => println!("[!!] Ledger unreadable ({e}); it will be replaced on next run"),
    }
    let sink_ok = check_writable("Product sink", &config.sink_path);

    println!();
    if has_key && ledger_ok && sink_ok {
        println!("Status: READY");
        if chromium.is_none() {
            println!("  Browser tier disabled until Chromium is installed.");
        }
    } else {
        println!("Status: NOT READY");
    }

    Ok(())
}

/// Whether the parent directory of `path` exists (or can be created) and
/// accepts writes.
fn check_writable(label: &str, path: &Path) -> bool {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let marker = dir.join(".pipeline-scout-doctor");
    let ok = std::fs::create_dir_all(dir).is_ok()
        && std::fs::write(&marker, b"ok").is_ok()
        && std::fs::remove_file(&marker).is_ok();
    if ok {
        println!("[OK] {label} path is writable: {}", path.display());
    } else {
        println!("[!!] {label} path is NOT writable: {}", path.display());
    }
    ok
}
