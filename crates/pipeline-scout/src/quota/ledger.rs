//! The quota ledger and its durable storage.
//!
//! The ledger is a single JSON document so that operators can inspect it
//! with `cat`. Writes go to a sibling temp file first and are renamed into
//! place, so a crash mid-write never leaves a truncated ledger behind.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Length of the sliding rate-limit window, in seconds.
pub const MINUTE_WINDOW_SECS: i64 = 60;

/// Errors raised by ledger storage.
#[derive(thiserror::Error, Debug)]
pub enum LedgerError {
    #[error("ledger IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ledger JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Counters for the current local calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyWindow {
    pub date: NaiveDate,
    pub request_count: u64,
    pub estimated_cost_usd: f64,
    pub last_reset: DateTime<Utc>,
}

impl DailyWindow {
    pub fn fresh(date: NaiveDate, now: DateTime<Utc>) -> Self {
        Self {
            date,
            request_count: 0,
            estimated_cost_usd: 0.0,
            last_reset: now,
        }
    }
}

/// Counters for the current process lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionWindow {
    pub request_count: u64,
    pub started_at: DateTime<Utc>,
}

impl SessionWindow {
    pub fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            request_count: 0,
            started_at: now,
        }
    }
}

/// Timestamps of metered calls made in the last 60 seconds, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MinuteWindow {
    pub timestamps: VecDeque<DateTime<Utc>>,
}

impl MinuteWindow {
    /// Drop every entry that is 60 seconds old or older.
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - chrono::Duration::seconds(MINUTE_WINDOW_SECS);
        while let Some(oldest) = self.timestamps.front() {
            if *oldest > cutoff {
                break;
            }
            self.timestamps.pop_front();
        }
    }

    pub fn push(&mut self, instant: DateTime<Utc>) {
        self.timestamps.push_back(instant);
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn oldest(&self) -> Option<DateTime<Utc>> {
        self.timestamps.front().copied()
    }
}

/// Durable counters governing call volume and estimated spend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaLedger {
    pub daily: DailyWindow,
    pub session: SessionWindow,
    pub minute_window: MinuteWindow,
}

impl QuotaLedger {
    pub fn fresh(today: NaiveDate, now: DateTime<Utc>) -> Self {
        Self {
            daily: DailyWindow::fresh(today, now),
            session: SessionWindow::fresh(now),
            minute_window: MinuteWindow::default(),
        }
    }
}

/// Durable home of the ledger.
pub trait LedgerStore: Send + Sync {
    /// Load the stored ledger, or `None` if nothing has been stored yet.
    fn load(&self) -> Result<Option<QuotaLedger>, LedgerError>;

    /// Replace the stored ledger.
    fn save(&self, ledger: &QuotaLedger) -> Result<(), LedgerError>;
}

/// Pretty-printed JSON file on disk.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `~/.pipeline-scout/quota-ledger.json`.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".pipeline-scout")
            .join("quota-ledger.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> LedgerError {
        LedgerError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl LedgerStore for JsonFileStore {
    fn load(&self) -> Result<Option<QuotaLedger>, LedgerError> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_err(e)),
        };
        Ok(Some(serde_json::from_str(&data)?))
    }

    fn save(&self, ledger: &QuotaLedger) -> Result<(), LedgerError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }
        let json = serde_json::to_string_pretty(ledger)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| self.io_err(e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| self.io_err(e))?;
        Ok(())
    }
}

/// In-memory store. Clones share the same slot, so a test can keep a
/// handle while the governor owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    slot: Arc<Mutex<Option<QuotaLedger>>>,
    saves: Arc<Mutex<usize>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed the store, as if a previous process had saved `ledger`.
    pub fn with_ledger(ledger: QuotaLedger) -> Self {
        let store = Self::default();
        *store.slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(ledger);
        store
    }

    /// Last saved ledger.
    pub fn snapshot(&self) -> Option<QuotaLedger> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of `save` calls so far.
    pub fn save_count(&self) -> usize {
        *self.saves.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl LedgerStore for MemoryStore {
    fn load(&self) -> Result<Option<QuotaLedger>, LedgerError> {
        Ok(self.snapshot())
    }

    fn save(&self, ledger: &QuotaLedger) -> Result<(), LedgerError> {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(ledger.clone());
        *self.saves.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(())
    }
}
