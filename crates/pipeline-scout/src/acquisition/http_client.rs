//! Tier 1: async HTTP client wrapping reqwest.
//!
//! Not a browser, just a GET with a browser user agent, a redirect cap and
//! a timeout. There is no retry: a failed or thin response escalates to
//! Tier 2 instead.

use super::error::{AcquisitionError, AcquisitionErrorKind, AcquisitionMethod};
use super::html_text::{char_len, visible_text};
use crate::config::FetchSettings;
use std::time::{Duration, Instant};
use tracing::debug;

/// Response from an HTTP GET request.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Original requested URL.
    pub url: String,
    /// Final URL after redirects.
    pub final_url: String,
    /// HTTP status code.
    pub status: u16,
    /// Content-Type header, if any.
    pub content_type: Option<String>,
    /// Response body as text.
    pub body: String,
}

/// What Tier 1 made of a URL.
#[derive(Debug, Clone)]
pub enum LightweightOutcome {
    /// Enough visible text to skip rendering.
    Sufficient(String),
    /// Fetched fine but too thin; carries the text and its char count.
    Insufficient { text: String, chars: usize },
    /// Transport or status failure.
    Failed(AcquisitionError),
}

/// HTTP client for Tier 1 acquisition.
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    sufficient_chars: usize,
}

impl HttpClient {
    /// Build a client from the fetch settings.
    pub fn new(settings: &FetchSettings) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.http_timeout_ms))
            .redirect(reqwest::redirect::Policy::limited(settings.max_redirects))
            .user_agent(settings.user_agent.as_str())
            .build()?;

        Ok(Self {
            client,
            sufficient_chars: settings.sufficient_chars,
        })
    }

    /// Perform a single GET. Non-2xx/3xx statuses are errors.
    pub async fn get(&self, url: &str) -> Result<HttpResponse, AcquisitionError> {
        let fail = |kind, message: String| {
            AcquisitionError::new(kind, AcquisitionMethod::Lightweight, url, message)
        };

        let r = self
            .client
            .get(url)
            .header("Accept", "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8")
            .header("Accept-Language", "en-US,en;q=0.9")
            .send()
            .await
            .map_err(|e| fail(AcquisitionErrorKind::from_reqwest(&e), e.to_string()))?;

        let status = r.status().as_u16();
        if let Some(kind) = AcquisitionErrorKind::from_status(status) {
            return Err(fail(kind, format!("HTTP {status}")));
        }

        let final_url = r.url().to_string();
        let content_type = r
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = r
            .text()
            .await
            .map_err(|e| fail(AcquisitionErrorKind::from_reqwest(&e), e.to_string()))?;

        Ok(HttpResponse {
            url: url.to_string(),
            final_url,
            status,
            content_type,
            body,
        })
    }

    /// Fetch `url` and judge whether its visible text is sufficient.
    pub async fn fetch_text(&self, url: &str) -> LightweightOutcome {
        let start = Instant::now();
        let resp = match self.get(url).await {
            Ok(resp) => resp,
            Err(e) => return LightweightOutcome::Failed(e),
        };

        let text = visible_text(&resp.body);
        let chars = char_len(&text);
        debug!(
            url,
            final_url = %resp.final_url,
            status = resp.status,
            chars,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "lightweight fetch complete"
        );

        if chars >= self.sufficient_chars {
            LightweightOutcome::Sufficient(text)
        } else {
            LightweightOutcome::Insufficient { text, chars }
        }
    }
}
