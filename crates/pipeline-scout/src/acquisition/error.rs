//! Failure taxonomy shared by both acquisition tiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalized cause of an acquisition failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AcquisitionErrorKind {
    Timeout,
    DnsNotFound,
    ConnectionRefused,
    HttpForbidden,
    HttpNotFound,
    HttpRateLimited,
    HttpServerError,
    TooShort,
    Unknown,
}

impl AcquisitionErrorKind {
    /// Kind for a non-success HTTP status, `None` for 2xx/3xx.
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            200..=399 => None,
            401 | 403 => Some(Self::HttpForbidden),
            404 | 410 => Some(Self::HttpNotFound),
            429 => Some(Self::HttpRateLimited),
            500..=599 => Some(Self::HttpServerError),
            _ => Some(Self::Unknown),
        }
    }

    /// Classify a transport error message (reqwest chain or a Chromium
    /// `net::ERR_*` string).
    pub fn from_message(message: &str) -> Self {
        let m = message.to_ascii_lowercase();
        if m.contains("timed out") || m.contains("timeout") {
            Self::Timeout
        } else if m.contains("err_name_not_resolved")
            || m.contains("dns error")
            || m.contains("failed to lookup address")
            || m.contains("name or service not known")
            || m.contains("no such host")
        {
            Self::DnsNotFound
        } else if m.contains("connection refused") || m.contains("err_connection_refused") {
            Self::ConnectionRefused
        } else if m.contains("403") {
            Self::HttpForbidden
        } else if m.contains("404") {
            Self::HttpNotFound
        } else if m.contains("429") {
            Self::HttpRateLimited
        } else {
            Self::Unknown
        }
    }

    /// Classify a reqwest error, walking its source chain.
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout;
        }
        if let Some(status) = err.status() {
            if let Some(kind) = Self::from_status(status.as_u16()) {
                return kind;
            }
        }
        let mut chain = err.to_string();
        let mut source = std::error::Error::source(err);
        while let Some(inner) = source {
            chain.push_str(": ");
            chain.push_str(&inner.to_string());
            source = inner.source();
        }
        Self::from_message(&chain)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::DnsNotFound => "dnsNotFound",
            Self::ConnectionRefused => "connectionRefused",
            Self::HttpForbidden => "httpForbidden",
            Self::HttpNotFound => "httpNotFound",
            Self::HttpRateLimited => "httpRateLimited",
            Self::HttpServerError => "httpServerError",
            Self::TooShort => "tooShort",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for AcquisitionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which tier produced a result or failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcquisitionMethod {
    /// Tier 1: plain HTTP GET.
    Lightweight,
    /// Tier 2: browser rendering.
    Rendered,
}

impl fmt::Display for AcquisitionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lightweight => f.write_str("lightweight"),
            Self::Rendered => f.write_str("rendered"),
        }
    }
}

/// A classified failure to acquire one URL.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{tier} acquisition of {url} failed ({kind}): {message}")]
pub struct AcquisitionError {
    pub kind: AcquisitionErrorKind,
    pub tier: AcquisitionMethod,
    pub url: String,
    pub message: String,
}

impl AcquisitionError {
    pub fn new(
        kind: AcquisitionErrorKind,
        tier: AcquisitionMethod,
        url: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            tier,
            url: url.into(),
            message: message.into(),
        }
    }
}
