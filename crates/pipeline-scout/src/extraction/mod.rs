//! Boundary to the metered structured-extraction service.

pub mod openai;

pub use openai::OpenAiExtractor;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Text handed to the service for one URL.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionRequest {
    pub text: String,
    pub source_url: String,
}

/// One product the service found in the text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedProduct {
    #[serde(alias = "molecula", alias = "molecule")]
    pub name: String,
    #[serde(default, alias = "area_terapeutica", alias = "therapeutic_area")]
    pub category: String,
    #[serde(default, alias = "fase_cofepris", alias = "phase")]
    pub stage: String,
}

/// Metered units a call consumed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_units: u64,
    pub output_units: u64,
}

/// Parsed service response.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionResponse {
    pub products: Vec<ExtractedProduct>,
    pub usage: TokenUsage,
}

/// Failure talking to the extraction service.
#[derive(thiserror::Error, Debug, Clone)]
pub enum ExtractionError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Rate limited by provider: {0}")]
    RateLimited(String),

    #[error("Provider quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    /// The call went through but its content could not be parsed. Carries
    /// the usage the call still consumed.
    #[error("Malformed response: {reason}")]
    Malformed {
        reason: String,
        usage: Option<TokenUsage>,
    },
}

impl ExtractionError {
    /// Short machine-readable kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "authentication",
            Self::RateLimited(_) => "rateLimited",
            Self::QuotaExhausted(_) => "quotaExhausted",
            Self::Http { .. } => "http",
            Self::Transport(_) => "transport",
            Self::Malformed { .. } => "malformed",
        }
    }

    /// Whether the orchestrator should just move on to the next URL.
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            Self::Http { .. } | Self::Transport(_) | Self::Malformed { .. }
        )
    }

    /// Usage consumed despite the failure.
    pub fn usage(&self) -> Option<TokenUsage> {
        match self {
            Self::Malformed { usage, .. } => *usage,
            _ => None,
        }
    }
}

/// The metered extraction service.
#[async_trait]
pub trait ExtractionService: Send + Sync {
    async fn extract(
        &self,
        request: &ExtractionRequest,
    ) -> Result<ExtractionResponse, ExtractionError>;
}
