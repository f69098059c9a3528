//! Errors that cross the orchestrator boundary.

use crate::extraction::ExtractionError;
use crate::quota::LedgerError;

/// Errors that can stop a run outright.
#[derive(thiserror::Error, Debug)]
pub enum ScoutError {
    #[error("Quota ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Extraction service error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Result sink error: {0}")]
    Sink(String),
}

/// Convenience result type.
pub type ScoutResult<T> = Result<T, ScoutError>;
