//! Quota governor for the metered extraction service.
//!
//! Three windows gate every metered call: a calendar-day window (requests
//! and estimated spend), a per-process session window, and a sliding
//! 60-second window. The [`QuotaGovernor`] owns the [`ledger::QuotaLedger`]
//! exclusively and persists it after every recorded call.

pub mod clock;
pub mod governor;
pub mod ledger;

pub use clock::{Clock, ManualClock, SystemClock};
pub use governor::{DenialReason, QuotaDecision, QuotaGovernor, QuotaStats};
pub use ledger::{JsonFileStore, LedgerError, LedgerStore, MemoryStore, QuotaLedger};

use serde::{Deserialize, Serialize};

/// Configured ceilings for the three windows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaLimits {
    pub requests_per_minute: u64,
    pub requests_per_day: u64,
    pub requests_per_session: u64,
    pub cost_per_day_usd: f64,
}

impl Default for QuotaLimits {
    fn default() -> Self {
        Self {
            requests_per_minute: 25,
            requests_per_day: 500,
            requests_per_session: 100,
            cost_per_day_usd: 10.0,
        }
    }
}

/// Per-1000-unit prices used to estimate the spend of a call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostModel {
    pub input_cost_per_1k: f64,
    pub output_cost_per_1k: f64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            input_cost_per_1k: 0.000_15,
            output_cost_per_1k: 0.000_6,
        }
    }
}

impl CostModel {
    /// Estimated USD cost of a call that consumed the given token counts.
    pub fn estimate(&self, input_units: u64, output_units: u64) -> f64 {
        (input_units as f64 / 1000.0) * self.input_cost_per_1k
            + (output_units as f64 / 1000.0) * self.output_cost_per_1k
    }
}
