//! Gatekeeper for metered calls.

use super::clock::Clock;
use super::ledger::{
    DailyWindow, LedgerError, LedgerStore, MemoryStore, QuotaLedger, SessionWindow,
    MINUTE_WINDOW_SECS,
};
use super::{CostModel, QuotaLimits};
use crate::quota::clock::SystemClock;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Which limit denied a call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DenialReason {
    DailyRequests { used: u64, limit: u64 },
    DailyCost { spent_usd: f64, limit_usd: f64 },
    SessionRequests { used: u64, limit: u64 },
    PerMinute { used: u64, limit: u64 },
}

impl DenialReason {
    /// Only the per-minute window clears on its own.
    pub fn is_self_healing(&self) -> bool {
        matches!(self, DenialReason::PerMinute { .. })
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenialReason::DailyRequests { used, limit } => {
                write!(f, "daily request limit reached: {used}/{limit} requests")
            }
            DenialReason::DailyCost {
                spent_usd,
                limit_usd,
            } => write!(
                f,
                "daily cost limit reached: ${spent_usd:.4}/${limit_usd:.2} USD"
            ),
            DenialReason::SessionRequests { used, limit } => {
                write!(f, "session request limit reached: {used}/{limit} requests")
            }
            DenialReason::PerMinute { used, limit } => {
                write!(f, "rate limit: {used}/{limit} requests in the last minute")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyStats {
    pub date: NaiveDate,
    pub requests: u64,
    pub limit: u64,
    pub remaining: u64,
    pub estimated_cost_usd: f64,
    pub cost_limit_usd: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStats {
    pub requests: u64,
    pub limit: u64,
    pub remaining: u64,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MinuteStats {
    pub requests: u64,
    pub limit: u64,
    pub remaining: u64,
}

/// Read-only view of all three windows and the configured limits.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuotaStats {
    pub daily: DailyStats,
    pub session: SessionStats,
    pub minute_window: MinuteStats,
    pub limits: QuotaLimits,
}

/// Outcome of a single [`QuotaGovernor::check`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuotaDecision {
    pub allowed: bool,
    pub reason: Option<DenialReason>,
    /// Seconds until the per-minute window frees a slot. Only set for
    /// per-minute denials.
    pub wait_seconds: Option<u64>,
    pub snapshot: QuotaStats,
}

/// Owns the quota ledger and decides whether a metered call may proceed.
///
/// All mutation goes through `&mut self`, so a governor shared across
/// tasks needs an outer mutex held across `check` and `record`.
pub struct QuotaGovernor {
    limits: QuotaLimits,
    pricing: CostModel,
    ledger: QuotaLedger,
    store: Box<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
}

impl QuotaGovernor {
    /// Load the ledger from `store` and start a fresh session.
    ///
    /// A stored ledger from an earlier day has its daily window reset. An
    /// unreadable ledger is replaced with a fresh one.
    pub fn open(
        limits: QuotaLimits,
        pricing: CostModel,
        store: Box<dyn LedgerStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let now = clock.now();
        let today = clock.today();

        let ledger = match store.load() {
            Ok(Some(mut stored)) => {
                if stored.daily.date != today {
                    info!(
                        stored_date = %stored.daily.date,
                        today = %today,
                        "new day, resetting daily quota window"
                    );
                    stored.daily = DailyWindow::fresh(today, now);
                }
                stored.session = SessionWindow::fresh(now);
                stored.minute_window.prune(now);
                stored
            }
            Ok(None) => QuotaLedger::fresh(today, now),
            Err(e) => {
                warn!(error = %e, "could not load quota ledger, starting fresh");
                QuotaLedger::fresh(today, now)
            }
        };

        info!(
            per_minute = limits.requests_per_minute,
            per_day = limits.requests_per_day,
            per_session = limits.requests_per_session,
            cost_per_day_usd = limits.cost_per_day_usd,
            "quota limits configured"
        );

        Self {
            limits,
            pricing,
            ledger,
            store,
            clock,
        }
    }

    /// Governor over an in-memory store and the system clock.
    pub fn in_memory(limits: QuotaLimits) -> Self {
        Self::open(
            limits,
            CostModel::default(),
            Box::new(MemoryStore::new()),
            Arc::new(SystemClock),
        )
    }

    pub fn limits(&self) -> &QuotaLimits {
        &self.limits
    }

    /// Evaluate the limits in priority order: daily requests, daily cost,
    /// session requests, per-minute.
    pub fn check(&mut self) -> QuotaDecision {
        let now = self.clock.now();
        self.roll_over(now);
        self.ledger.minute_window.prune(now);

        let snapshot = self.stats();
        let daily = &self.ledger.daily;
        let session = &self.ledger.session;
        let in_window = self.ledger.minute_window.len() as u64;

        let reason = if daily.request_count >= self.limits.requests_per_day {
            Some(DenialReason::DailyRequests {
                used: daily.request_count,
                limit: self.limits.requests_per_day,
            })
        } else if daily.estimated_cost_usd >= self.limits.cost_per_day_usd {
            Some(DenialReason::DailyCost {
                spent_usd: daily.estimated_cost_usd,
                limit_usd: self.limits.cost_per_day_usd,
            })
        } else if session.request_count >= self.limits.requests_per_session {
            Some(DenialReason::SessionRequests {
                used: session.request_count,
                limit: self.limits.requests_per_session,
            })
        } else if in_window >= self.limits.requests_per_minute {
            Some(DenialReason::PerMinute {
                used: in_window,
                limit: self.limits.requests_per_minute,
            })
        } else {
            None
        };

        let wait_seconds = match reason {
            Some(DenialReason::PerMinute { .. }) => Some(self.seconds_until_slot(now)),
            _ => None,
        };

        QuotaDecision {
            allowed: reason.is_none(),
            reason,
            wait_seconds,
            snapshot,
        }
    }

    /// Account for one metered call and persist the ledger.
    pub fn record(
        &mut self,
        input_units: u64,
        output_units: u64,
    ) -> Result<QuotaStats, LedgerError> {
        let now = self.clock.now();
        self.roll_over(now);
        self.ledger.minute_window.prune(now);

        let cost = self.pricing.estimate(input_units, output_units);
        self.ledger.minute_window.push(now);
        self.ledger.daily.request_count += 1;
        self.ledger.daily.estimated_cost_usd += cost;
        self.ledger.session.request_count += 1;

        self.store.save(&self.ledger)?;

        let stats = self.stats();
        debug!(
            input_units,
            output_units,
            cost_usd = cost,
            daily_requests = stats.daily.requests,
            "recorded metered call"
        );
        if stats.daily.requests % 10 == 0 {
            info!(
                daily_requests = stats.daily.requests,
                daily_limit = stats.daily.limit,
                estimated_cost_usd = format!("{:.4}", stats.daily.estimated_cost_usd),
                "metered usage"
            );
        }
        Ok(stats)
    }

    /// Wait out a per-minute denial. Other denials are returned as-is.
    pub async fn await_capacity(&mut self) -> QuotaDecision {
        let decision = self.check();
        let wait = match (&decision.reason, decision.wait_seconds) {
            (Some(reason), Some(wait)) if reason.is_self_healing() => wait,
            _ => return decision,
        };

        info!(wait_seconds = wait, "per-minute quota reached, waiting");
        self.clock.sleep(Duration::from_secs(wait)).await;
        let now = self.clock.now();
        self.ledger.minute_window.prune(now);
        self.check()
    }

    /// Snapshot of the three windows as they would read right now.
    ///
    /// Does not mutate the ledger. A stale daily window reads as empty and
    /// expired minute-window entries are not counted.
    pub fn stats(&self) -> QuotaStats {
        let now = self.clock.now();
        let today = self.clock.today();
        let cutoff = now - chrono::Duration::seconds(MINUTE_WINDOW_SECS);

        let (requests, cost) = if self.ledger.daily.date == today {
            (
                self.ledger.daily.request_count,
                self.ledger.daily.estimated_cost_usd,
            )
        } else {
            (0, 0.0)
        };
        let in_window = self
            .ledger
            .minute_window
            .timestamps
            .iter()
            .filter(|ts| **ts > cutoff)
            .count() as u64;
        let limits = self.limits;

        QuotaStats {
            daily: DailyStats {
                date: today,
                requests,
                limit: limits.requests_per_day,
                remaining: limits.requests_per_day.saturating_sub(requests),
                estimated_cost_usd: cost,
                cost_limit_usd: limits.cost_per_day_usd,
            },
            session: SessionStats {
                requests: self.ledger.session.request_count,
                limit: limits.requests_per_session,
                remaining: limits
                    .requests_per_session
                    .saturating_sub(self.ledger.session.request_count),
                started_at: self.ledger.session.started_at,
            },
            minute_window: MinuteStats {
                requests: in_window,
                limit: limits.requests_per_minute,
                remaining: limits.requests_per_minute.saturating_sub(in_window),
            },
            limits,
        }
    }

    /// Start a new session window and persist.
    pub fn reset_session(&mut self) -> Result<(), LedgerError> {
        self.ledger.session = SessionWindow::fresh(self.clock.now());
        self.store.save(&self.ledger)?;
        info!("quota session reset");
        Ok(())
    }

    fn roll_over(&mut self, now: DateTime<Utc>) {
        let today = self.clock.today();
        if self.ledger.daily.date != today {
            info!(
                previous = %self.ledger.daily.date,
                today = %today,
                "new day, resetting daily quota window"
            );
            self.ledger.daily = DailyWindow::fresh(today, now);
        }
    }

    /// Whole seconds until the oldest in-window call ages out, at least 1.
    fn seconds_until_slot(&self, now: DateTime<Utc>) -> u64 {
        let Some(oldest) = self.ledger.minute_window.oldest() else {
            return 1;
        };
        let window_ms = MINUTE_WINDOW_SECS * 1000;
        let age_ms = (now - oldest).num_milliseconds();
        let remaining_ms = (window_ms - age_ms).max(0) as u64;
        remaining_ms.div_ceil(1000).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::clock::ManualClock;
    use chrono::TimeZone;

    fn noon() -> DateTime<Utc> {
        // Midday in every timezone within +/-11h keeps the local date stable
        // while a test advances the clock by a few minutes.
        let today = chrono::Local::now().date_naive();
        let local_noon = today.and_hms_opt(12, 0, 0).unwrap();
        chrono::Local
            .from_local_datetime(&local_noon)
            .earliest()
            .unwrap()
            .with_timezone(&Utc)
    }

    fn governor_with(
        limits: QuotaLimits,
        store: MemoryStore,
    ) -> (QuotaGovernor, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(noon()));
        let governor = QuotaGovernor::open(
            limits,
            CostModel::default(),
            Box::new(store),
            clock.clone(),
        );
        (governor, clock)
    }

    #[test]
    fn test_fresh_governor_allows() {
        let (mut governor, _clock) = governor_with(QuotaLimits::default(), MemoryStore::new());
        let decision = governor.check();
        assert!(decision.allowed);
        assert!(decision.reason.is_none());
        assert!(decision.wait_seconds.is_none());
        assert_eq!(decision.snapshot.daily.remaining, 500);
    }

    #[tokio::test]
    async fn test_sliding_window_denies_then_recovers() {
        let (mut governor, clock) = governor_with(QuotaLimits::default(), MemoryStore::new());

        for _ in 0..25 {
            assert!(governor.check().allowed);
            governor.record(1000, 200).unwrap();
            clock.advance(Duration::from_millis(400));
        }

        let denied = governor.check();
        assert!(!denied.allowed);
        assert!(matches!(
            denied.reason,
            Some(DenialReason::PerMinute { used: 25, limit: 25 })
        ));
        let wait = denied.wait_seconds.unwrap();
        assert!(wait > 0);
        // First call was 10s ago, so ~50s remain.
        assert_eq!(wait, 50);

        clock.sleep(Duration::from_secs(wait)).await;
        let allowed = governor.check();
        assert!(allowed.allowed);
    }

    #[tokio::test]
    async fn test_await_capacity_waits_out_per_minute_denial() {
        let limits = QuotaLimits {
            requests_per_minute: 2,
            ..QuotaLimits::default()
        };
        let (mut governor, clock) = governor_with(limits, MemoryStore::new());
        governor.record(0, 0).unwrap();
        governor.record(0, 0).unwrap();
        let before = clock.now();

        let decision = governor.await_capacity().await;
        assert!(decision.allowed);
        assert_eq!((clock.now() - before).num_seconds(), 60);
    }

    #[tokio::test]
    async fn test_await_capacity_does_not_wait_out_session_denial() {
        let limits = QuotaLimits {
            requests_per_session: 1,
            ..QuotaLimits::default()
        };
        let (mut governor, clock) = governor_with(limits, MemoryStore::new());
        governor.record(0, 0).unwrap();
        let before = clock.now();

        let decision = governor.await_capacity().await;
        assert!(!decision.allowed);
        assert!(matches!(
            decision.reason,
            Some(DenialReason::SessionRequests { used: 1, limit: 1 })
        ));
        assert_eq!(clock.now(), before);
    }

    #[test]
    fn test_priority_order_daily_before_session() {
        let limits = QuotaLimits {
            requests_per_day: 1,
            requests_per_session: 1,
            requests_per_minute: 1,
            ..QuotaLimits::default()
        };
        let (mut governor, _clock) = governor_with(limits, MemoryStore::new());
        governor.record(0, 0).unwrap();
        let decision = governor.check();
        assert!(matches!(
            decision.reason,
            Some(DenialReason::DailyRequests { .. })
        ));
        assert!(decision.wait_seconds.is_none());
    }

    #[test]
    fn test_cost_limit_denies() {
        let limits = QuotaLimits {
            cost_per_day_usd: 0.001,
            ..QuotaLimits::default()
        };
        let (mut governor, _clock) = governor_with(limits, MemoryStore::new());
        // 10k input tokens = $0.0015
        governor.record(10_000, 0).unwrap();
        let decision = governor.check();
        assert!(matches!(decision.reason, Some(DenialReason::DailyCost { .. })));
        assert!(decision.reason.unwrap().to_string().contains("daily cost limit"));
    }

    #[test]
    fn test_daily_rollover_on_open() {
        let clock = Arc::new(ManualClock::new(noon()));
        let yesterday = clock.today().pred_opt().unwrap();
        let mut stale = QuotaLedger::fresh(yesterday, clock.now());
        stale.daily.request_count = 500;
        let store = MemoryStore::with_ledger(stale);

        let mut governor = QuotaGovernor::open(
            QuotaLimits::default(),
            CostModel::default(),
            Box::new(store),
            clock.clone(),
        );
        let decision = governor.check();
        assert!(decision.allowed);
        assert_eq!(decision.snapshot.daily.requests, 0);
        assert_eq!(decision.snapshot.daily.date, clock.today());
    }

    #[test]
    fn test_daily_rollover_while_running() {
        let limits = QuotaLimits {
            requests_per_day: 2,
            ..QuotaLimits::default()
        };
        let (mut governor, clock) = governor_with(limits, MemoryStore::new());
        governor.record(0, 0).unwrap();
        governor.record(0, 0).unwrap();
        assert!(!governor.check().allowed);

        clock.advance(Duration::from_secs(24 * 3600));
        let decision = governor.check();
        assert!(decision.allowed);
        assert_eq!(decision.snapshot.daily.requests, 0);
    }

    #[test]
    fn test_reopen_starts_session_at_zero_but_keeps_daily() {
        let store = MemoryStore::new();
        let (mut governor, clock) = governor_with(QuotaLimits::default(), store.clone());
        governor.record(100, 10).unwrap();
        governor.record(100, 10).unwrap();
        drop(governor);

        let reopened = QuotaGovernor::open(
            QuotaLimits::default(),
            CostModel::default(),
            Box::new(store),
            clock,
        );
        let stats = reopened.stats();
        assert_eq!(stats.session.requests, 0);
        assert_eq!(stats.daily.requests, 2);
        assert_eq!(stats.minute_window.requests, 2);
    }

    #[test]
    fn test_record_persists_every_call() {
        let store = MemoryStore::new();
        let (mut governor, _clock) = governor_with(QuotaLimits::default(), store.clone());
        governor.record(1, 1).unwrap();
        governor.record(1, 1).unwrap();
        governor.record(1, 1).unwrap();
        assert_eq!(store.save_count(), 3);
        assert_eq!(store.snapshot().unwrap().daily.request_count, 3);
    }

    #[test]
    fn test_stats_does_not_count_expired_entries() {
        let (mut governor, clock) = governor_with(QuotaLimits::default(), MemoryStore::new());
        governor.record(0, 0).unwrap();
        clock.advance(Duration::from_secs(61));
        assert_eq!(governor.stats().minute_window.requests, 0);
        assert_eq!(governor.stats().minute_window.remaining, 25);
    }

    #[test]
    fn test_reset_session() {
        let (mut governor, _clock) = governor_with(QuotaLimits::default(), MemoryStore::new());
        governor.record(0, 0).unwrap();
        governor.reset_session().unwrap();
        assert_eq!(governor.stats().session.requests, 0);
        assert_eq!(governor.stats().daily.requests, 1);
    }
}
