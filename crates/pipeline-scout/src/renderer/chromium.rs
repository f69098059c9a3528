//! Chromium-based renderer using chromiumoxide.
//!
//! Each [`RenderContext`] is a separate CDP browser context (incognito-like
//! profile) holding one page. Pages are prepared before first navigation:
//! the user agent is overridden, `navigator.webdriver` is hidden, and
//! image/stylesheet/font/media requests are failed at the Fetch layer.
//! Navigation waits for the page's `networkIdle` lifecycle event within the
//! same timeout as the load itself.

use super::{NavigationResult, RenderContext, Renderer};
use crate::config::BrowserSettings;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::fetch::{
    EnableParams, EventRequestPaused, FailRequestParams, RequestPattern, RequestStage,
};
use chromiumoxide::cdp::browser_protocol::network::{
    ErrorReason, ResourceType, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, EventLifecycleEvent, SetLifecycleEventsEnabledParams,
};
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::page::Page;
use futures::{Stream, StreamExt};
use rand::Rng;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Injected before any page script runs.
const STEALTH_SCRIPT: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => false });
Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
window.chrome = window.chrome || { runtime: {} };
"#;

/// Resource types that never carry pipeline text.
const BLOCKED_RESOURCES: [ResourceType; 4] = [
    ResourceType::Image,
    ResourceType::Stylesheet,
    ResourceType::Font,
    ResourceType::Media,
];

/// Find the Chromium binary path.
pub fn find_chromium(explicit: Option<&Path>) -> Option<PathBuf> {
    // 1. Configured path
    if let Some(path) = explicit {
        if path.exists() {
            return Some(path.to_path_buf());
        }
    }

    // 2. SCOUT_CHROMIUM_PATH env
    if let Ok(p) = std::env::var("SCOUT_CHROMIUM_PATH") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    // 3. ~/.pipeline-scout/chromium/
    if let Some(home) = dirs::home_dir() {
        let base = home.join(".pipeline-scout/chromium");
        let candidates = if cfg!(target_os = "macos") {
            vec![
                base.join("chrome-mac-arm64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                base.join("chrome-mac-x64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                base.join("chrome"),
            ]
        } else {
            vec![base.join("chrome-linux64/chrome"), base.join("chrome")]
        };
        for c in candidates {
            if c.exists() {
                return Some(c);
            }
        }
    }

    // 4. System PATH
    for name in ["google-chrome", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    // 5. Common macOS location
    if cfg!(target_os = "macos") {
        let common =
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

/// Chromium-based renderer.
pub struct ChromiumRenderer {
    browser: Arc<Browser>,
    handler: JoinHandle<()>,
    active_count: Arc<AtomicUsize>,
    user_agent: String,
}

impl ChromiumRenderer {
    /// Launch a Chromium instance with automation fingerprints suppressed.
    pub async fn launch(settings: &BrowserSettings, user_agent: &str) -> Result<Self> {
        let chrome_path = find_chromium(settings.chromium_path.as_deref())
            .context("Chromium not found. Install Chrome or set SCOUT_CHROMIUM_PATH.")?;

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-dev-shm-usage")
            .arg("--no-sandbox")
            .arg("--disable-setuid-sandbox")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-default-apps")
            .arg("--disable-extensions")
            .arg("--disable-gpu")
            .arg("--window-size=1920,1080")
            .arg("--lang=en-US");
        builder = if settings.headless {
            builder.arg("--headless=new")
        } else {
            builder.with_head()
        };
        let config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        // Drive the CDP connection for the lifetime of the browser.
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        Ok(Self {
            browser: Arc::new(browser),
            handler,
            active_count: Arc::new(AtomicUsize::new(0)),
            user_agent: user_agent.to_string(),
        })
    }

    async fn dispose(&self, context_id: BrowserContextId) {
        if let Err(e) = self
            .browser
            .execute(DisposeBrowserContextParams::new(context_id))
            .await
        {
            debug!(error = %e, "failed to dispose browser context");
        }
    }
}

impl Drop for ChromiumRenderer {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
        let created = self
            .browser
            .execute(CreateBrowserContextParams::default())
            .await
            .context("failed to create browser context")?;
        let context_id = created.result.browser_context_id.clone();

        let target = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context_id.clone())
            .build()
            .map_err(|e| anyhow::anyhow!("invalid target params: {e}"))?;

        let page = match self.browser.new_page(target).await {
            Ok(page) => page,
            Err(e) => {
                self.dispose(context_id).await;
                return Err(anyhow::Error::new(e).context("failed to create new page"));
            }
        };

        let blocker = match prepare_page(&page, &self.user_agent).await {
            Ok(blocker) => blocker,
            Err(e) => {
                let _ = page.close().await;
                self.dispose(context_id).await;
                return Err(e);
            }
        };

        self.active_count.fetch_add(1, Ordering::Relaxed);

        Ok(Box::new(ChromiumContext {
            page,
            browser: Arc::clone(&self.browser),
            context_id,
            blocker,
            active_count: Arc::clone(&self.active_count),
        }))
    }

    async fn shutdown(&self) -> Result<()> {
        // Browser process is killed when the last handle is dropped.
        self.handler.abort();
        Ok(())
    }

    fn active_contexts(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }
}

/// Apply UA override, stealth script, and resource blocking to a new page.
/// Returns the task that fails blocked requests.
async fn prepare_page(page: &Page, user_agent: &str) -> Result<JoinHandle<()>> {
    page.execute(SetUserAgentOverrideParams::new(user_agent))
        .await
        .context("failed to override user agent")?;
    page.evaluate_on_new_document(AddScriptToEvaluateOnNewDocumentParams::new(STEALTH_SCRIPT))
        .await
        .context("failed to install stealth script")?;
    page.execute(SetLifecycleEventsEnabledParams::new(true))
        .await
        .context("failed to enable lifecycle events")?;

    let mut paused = page
        .event_listener::<EventRequestPaused>()
        .await
        .context("failed to listen for paused requests")?;
    let interceptor = page.clone();
    let blocker = tokio::spawn(async move {
        while let Some(event) = paused.next().await {
            let fail =
                FailRequestParams::new(event.request_id.clone(), ErrorReason::BlockedByClient);
            if let Err(e) = interceptor.execute(fail).await {
                debug!(error = %e, "failed to block request");
            }
        }
    });

    let patterns: Vec<RequestPattern> = BLOCKED_RESOURCES
        .iter()
        .map(|kind| {
            RequestPattern::builder()
                .url_pattern("*")
                .resource_type(kind.clone())
                .request_stage(RequestStage::Request)
                .build()
        })
        .collect();
    if let Err(e) = page
        .execute(EnableParams::builder().patterns(patterns).build())
        .await
    {
        blocker.abort();
        return Err(anyhow::Error::new(e).context("failed to enable request blocking"));
    }

    Ok(blocker)
}

/// Wait for a `networkIdle` lifecycle event that follows a document `init`.
/// Returns `false` if `budget` runs out or the stream ends first.
async fn wait_for_network_idle<S>(names: S, budget: Duration) -> bool
where
    S: Stream<Item = String>,
{
    let mut names = std::pin::pin!(names);
    let idle = async {
        let mut started = false;
        while let Some(name) = names.next().await {
            match name.as_str() {
                "init" => started = true,
                "networkIdle" if started => return true,
                _ => {}
            }
        }
        false
    };
    tokio::time::timeout(budget, idle).await.unwrap_or(false)
}

/// A single Chromium page inside its own browser context.
pub struct ChromiumContext {
    page: Page,
    browser: Arc<Browser>,
    context_id: BrowserContextId,
    blocker: JoinHandle<()>,
    active_count: Arc<AtomicUsize>,
}

#[async_trait]
impl RenderContext for ChromiumContext {
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<NavigationResult> {
        let start = Instant::now();
        let budget = Duration::from_millis(timeout_ms);

        // Subscribe first so the new document's lifecycle events are buffered.
        let lifecycle = self
            .page
            .event_listener::<EventLifecycleEvent>()
            .await
            .context("failed to listen for lifecycle events")?;

        let result = tokio::time::timeout(budget, async {
            self.page.goto(url).await?;
            self.page.wait_for_navigation().await?;
            Ok::<_, chromiumoxide::error::CdpError>(())
        })
        .await;

        match result {
            Ok(Ok(())) => {
                let remaining = budget.saturating_sub(start.elapsed());
                let names = lifecycle.map(|event| event.name.clone());
                if !wait_for_network_idle(names, remaining).await {
                    debug!(url, timeout_ms, "network not idle before timeout, proceeding");
                }

                let final_url = self
                    .page
                    .url()
                    .await
                    .unwrap_or_default()
                    .unwrap_or_else(|| url.to_string());

                Ok(NavigationResult {
                    final_url,
                    load_time_ms: start.elapsed().as_millis() as u64,
                })
            }
            Ok(Err(e)) => bail!("navigation failed: {e}"),
            Err(_) => bail!("navigation timed out after {timeout_ms}ms"),
        }
    }

    async fn execute_js(&self, script: &str) -> Result<serde_json::Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .context("JS execution failed")?;

        result
            .into_value()
            .map_err(|e| anyhow::anyhow!("failed to convert JS result: {e:?}"))
    }

    async fn type_text(&self, selector: &str, text: &str, key_delay_ms: u64) -> Result<()> {
        let element = self
            .page
            .find_element(selector)
            .await
            .with_context(|| format!("no element matches {selector}"))?;
        element.click().await.context("failed to focus input")?;

        for ch in text.chars() {
            element
                .type_str(ch.to_string())
                .await
                .context("failed to type")?;
            let jitter = rand::thread_rng().gen_range(0..=key_delay_ms / 2);
            tokio::time::sleep(Duration::from_millis(key_delay_ms + jitter)).await;
        }
        Ok(())
    }

    async fn press_key(&self, selector: &str, key: &str) -> Result<()> {
        let element = self
            .page
            .find_element(selector)
            .await
            .with_context(|| format!("no element matches {selector}"))?;
        element
            .press_key(key)
            .await
            .with_context(|| format!("failed to press {key}"))?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.active_count.fetch_sub(1, Ordering::Relaxed);
        self.blocker.abort();
        if let Err(e) = self.page.close().await {
            debug!(error = %e, "page close failed");
        }
        if let Err(e) = self
            .browser
            .execute(DisposeBrowserContextParams::new(self.context_id.clone()))
            .await
        {
            warn!(error = %e, "failed to dispose browser context");
        }
        Ok(())
    }
}
