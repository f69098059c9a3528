//! Renderer abstraction for browser-based page rendering.
//!
//! Defines the `Renderer` and `RenderContext` traits that abstract over
//! the browser engine (Chromium via chromiumoxide). Contexts are scoped
//! resources: acquire them through [`with_context`], which closes the
//! context on every exit path.

pub mod chromium;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::warn;

/// Polling interval for [`RenderContext::wait_for_selector`].
const SELECTOR_POLL_MS: u64 = 250;

/// Result of navigating to a URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationResult {
    /// The final URL after any redirects.
    pub final_url: String,
    /// Time taken to load the page in milliseconds.
    pub load_time_ms: u64,
}

/// A browser engine that can create isolated rendering contexts.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Create a new isolated browser context with one page.
    async fn new_context(&self) -> Result<Box<dyn RenderContext>>;
    /// Shut down the browser engine.
    async fn shutdown(&self) -> Result<()>;
    /// Number of currently open contexts.
    fn active_contexts(&self) -> usize;
    /// Whether this renderer can open contexts at all.
    fn is_available(&self) -> bool {
        true
    }
}

/// A single browser context for rendering one page.
#[async_trait]
pub trait RenderContext: Send + Sync {
    /// Navigate to a URL and wait for the load to settle, bounded by `timeout_ms`.
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<NavigationResult>;
    /// Evaluate a JavaScript expression in the page and return its value.
    async fn execute_js(&self, script: &str) -> Result<serde_json::Value>;
    /// Focus the first element matching `selector` and type `text` one key
    /// at a time, pausing roughly `key_delay_ms` between keys.
    async fn type_text(&self, selector: &str, text: &str, key_delay_ms: u64) -> Result<()>;
    /// Press a named key (e.g. `"Enter"`) on the element matching `selector`.
    async fn press_key(&self, selector: &str, key: &str) -> Result<()>;
    /// Close this context and release its browser resources.
    async fn close(self: Box<Self>) -> Result<()>;

    /// Wait until any element matches `selector`. Returns `false` on timeout.
    async fn wait_for_selector(&self, selector: &str, timeout_ms: u64) -> Result<bool> {
        let check = format!(
            "!!document.querySelector({})",
            serde_json::to_string(selector)?
        );
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            if self.execute_js(&check).await?.as_bool().unwrap_or(false) {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(Duration::from_millis(SELECTOR_POLL_MS)).await;
        }
    }
}

/// Run `work` inside a fresh render context, closing it afterwards whether
/// `work` succeeded or not.
pub async fn with_context<T, F>(renderer: &dyn Renderer, work: F) -> Result<T>
where
    F: for<'c> FnOnce(&'c mut (dyn RenderContext + 'static)) -> BoxFuture<'c, Result<T>>,
{
    let mut ctx = renderer.new_context().await?;
    let outcome = work(ctx.as_mut()).await;
    if let Err(e) = ctx.close().await {
        warn!(error = %e, "failed to close render context");
    }
    outcome
}

/// A no-op renderer used when Chromium is unavailable.
///
/// Tier 1 acquisition and the static discovery fallback work without a
/// browser. This stub makes every rendering attempt fail, but everything
/// else still functions.
pub struct NoopRenderer;

#[async_trait]
impl Renderer for NoopRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
        Err(anyhow::anyhow!("Browser not available, HTTP-only mode"))
    }
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
    fn active_contexts(&self) -> usize {
        0
    }
    fn is_available(&self) -> bool {
        false
    }
}
