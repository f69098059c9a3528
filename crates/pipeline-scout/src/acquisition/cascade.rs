//! Two-tier acquisition state machine.
//!
//! ```text
//! Tier1Attempted ──Sufficient──────────────────────────▶ done (lightweight)
//!        │
//!        └─Escalate─▶ Tier2Attempted ──Success─▶ done (rendered)
//!                                   └─Failed──▶ AcquisitionError (tier 2)
//! ```

use super::error::{AcquisitionError, AcquisitionErrorKind, AcquisitionMethod};
use super::html_text::char_len;
use super::http_client::{HttpClient, LightweightOutcome};
use super::rendered::render_page;
use crate::config::FetchSettings;
use crate::renderer::Renderer;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Content acquired for one URL.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AcquisitionResult {
    pub url: String,
    pub content: String,
    pub method: AcquisitionMethod,
    /// Length of `content` in chars.
    pub length: usize,
}

impl AcquisitionResult {
    pub fn new(url: &str, content: String, method: AcquisitionMethod) -> Self {
        let length = char_len(&content);
        Self {
            url: url.to_string(),
            content,
            method,
            length,
        }
    }
}

/// Why Tier 1 handed over to Tier 2.
#[derive(Debug, Clone)]
pub enum EscalationCause {
    Insufficient { text: String, chars: usize },
    Failed(AcquisitionError),
}

/// States of one URL's trip through the cascade.
#[derive(Debug)]
enum CascadeState {
    Tier1Attempted(LightweightOutcome),
    Escalate(EscalationCause),
    Tier2Attempted(Result<String, AcquisitionError>),
}

/// Anything that can turn a URL into content.
#[async_trait]
pub trait Acquirer: Send + Sync {
    async fn acquire(&self, url: &str) -> Result<AcquisitionResult, AcquisitionError>;
}

/// HTTP first, browser second.
pub struct AcquisitionCascade {
    http: HttpClient,
    renderer: Arc<dyn Renderer>,
    settings: FetchSettings,
}

impl AcquisitionCascade {
    pub fn new(http: HttpClient, renderer: Arc<dyn Renderer>, settings: FetchSettings) -> Self {
        Self {
            http,
            renderer,
            settings,
        }
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    /// Settle an escalation without a browser. Tier 1's own error stands,
    /// and thin text is kept if it clears the rendered floor.
    fn settle_without_renderer(
        &self,
        url: &str,
        cause: EscalationCause,
    ) -> Result<AcquisitionResult, AcquisitionError> {
        match cause {
            EscalationCause::Failed(e) => {
                warn!(
                    url,
                    tier = "lightweight",
                    kind = %e.kind,
                    "acquisition failed, no renderer: {}",
                    e.message
                );
                Err(e)
            }
            EscalationCause::Insufficient { text, chars } => {
                if chars >= self.settings.min_rendered_chars {
                    let result = AcquisitionResult::new(url, text, AcquisitionMethod::Lightweight);
                    info!(url, chars, method = "lightweight", "thin content kept, no renderer");
                    return Ok(result);
                }
                let e = AcquisitionError::new(
                    AcquisitionErrorKind::TooShort,
                    AcquisitionMethod::Lightweight,
                    url,
                    format!(
                        "{chars} chars, below the {} char floor",
                        self.settings.min_rendered_chars
                    ),
                );
                warn!(
                    url,
                    tier = "lightweight",
                    kind = %e.kind,
                    "acquisition failed: {}",
                    e.message
                );
                Err(e)
            }
        }
    }
}

#[async_trait]
impl Acquirer for AcquisitionCascade {
    async fn acquire(&self, url: &str) -> Result<AcquisitionResult, AcquisitionError> {
        let mut state = CascadeState::Tier1Attempted(self.http.fetch_text(url).await);
        // Each arm either finishes or moves strictly forward, so Tier 2 runs at most once.
        loop {
            state = match state {
                CascadeState::Tier1Attempted(LightweightOutcome::Sufficient(text)) => {
                    let result = AcquisitionResult::new(url, text, AcquisitionMethod::Lightweight);
                    info!(url, chars = result.length, method = "lightweight", "content acquired");
                    return Ok(result);
                }
                CascadeState::Tier1Attempted(LightweightOutcome::Insufficient { text, chars }) => {
                    CascadeState::Escalate(EscalationCause::Insufficient { text, chars })
                }
                CascadeState::Tier1Attempted(LightweightOutcome::Failed(e)) => {
                    CascadeState::Escalate(EscalationCause::Failed(e))
                }
                CascadeState::Escalate(cause) => {
                    if !self.renderer.is_available() {
                        return self.settle_without_renderer(url, cause);
                    }
                    match &cause {
                        EscalationCause::Insufficient { chars, .. } => debug!(
                            url,
                            chars,
                            threshold = self.settings.sufficient_chars,
                            "lightweight content insufficient, escalating"
                        ),
                        EscalationCause::Failed(e) => debug!(
                            url,
                            kind = %e.kind,
                            error = %e.message,
                            "lightweight fetch failed, escalating"
                        ),
                    }
                    let outcome = render_page(self.renderer.as_ref(), &self.settings, url).await;
                    if outcome.is_err() {
                        if let EscalationCause::Failed(e) = &cause {
                            warn!(
                                url,
                                tier = "lightweight",
                                kind = %e.kind,
                                "tier 1 failure: {}",
                                e.message
                            );
                        }
                    }
                    CascadeState::Tier2Attempted(outcome)
                }
                CascadeState::Tier2Attempted(Ok(content)) => {
                    let result = AcquisitionResult::new(url, content, AcquisitionMethod::Rendered);
                    info!(url, chars = result.length, method = "rendered", "content acquired");
                    return Ok(result);
                }
                CascadeState::Tier2Attempted(Err(e)) => {
                    warn!(
                        url,
                        tier = "rendered",
                        kind = %e.kind,
                        "acquisition failed: {}",
                        e.message
                    );
                    return Err(e);
                }
            };
        }
    }
}
