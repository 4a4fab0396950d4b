//! Client-side rate limiting for the reasoning backend.
//!
//! Tracks three independent limits: minimum spacing between calls, a rolling
//! 60-second window, and a calendar-day cap persisted across process runs.
//! Spacing and window violations produce a wait; the daily cap is a hard
//! refusal so the pipeline can fall back without burning quota.

use crate::config::RateLimits;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QuotaError {
    #[error("daily quota exhausted: {used}/{limit} calls used today")]
    DailyExhausted { used: u32, limit: u32 },
}

/// Time source, injectable so limiter tests never sleep.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Persisted daily usage, one record per calendar day (UTC).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyQuota {
    pub date: String,
    pub count: u32,
}

impl DailyQuota {
    fn for_day(now: DateTime<Utc>) -> Self {
        Self {
            date: now.format("%Y-%m-%d").to_string(),
            count: 0,
        }
    }
}

/// Durable storage for the daily counter. Save failures are logged and
/// swallowed: losing the counter is better than losing the run.
pub trait QuotaStore: Send + Sync {
    fn load(&self) -> Option<DailyQuota>;
    fn save(&self, quota: &DailyQuota);
}

/// JSON file store, `{"date": "YYYY-MM-DD", "count": N}`.
#[derive(Debug)]
pub struct FileQuotaStore {
    path: PathBuf,
}

impl FileQuotaStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl QuotaStore for FileQuotaStore {
    fn load(&self) -> Option<DailyQuota> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(quota) => Some(quota),
            Err(e) => {
                tracing::warn!("Ignoring unreadable quota file {:?}: {}", self.path, e);
                None
            }
        }
    }

    fn save(&self, quota: &DailyQuota) {
        let result = serde_json::to_string_pretty(quota)
            .map_err(std::io::Error::other)
            .and_then(|json| std::fs::write(&self.path, json));
        if let Err(e) = result {
            tracing::warn!("Failed to persist quota to {:?}: {}", self.path, e);
        }
    }
}

pub struct RateLimiter {
    limits: RateLimits,
    clock: Box<dyn Clock>,
    store: Box<dyn QuotaStore>,
    recent_calls: VecDeque<DateTime<Utc>>,
    daily: DailyQuota,
}

impl RateLimiter {
    pub fn new(limits: RateLimits, store: Box<dyn QuotaStore>) -> Self {
        Self::with_clock(limits, store, Box::new(SystemClock))
    }

    pub fn with_clock(
        limits: RateLimits,
        store: Box<dyn QuotaStore>,
        clock: Box<dyn Clock>,
    ) -> Self {
        let now = clock.now();
        let today = now.format("%Y-%m-%d").to_string();
        let daily = match store.load() {
            Some(saved) if saved.date == today => saved,
            _ => DailyQuota::for_day(now),
        };
        Self {
            limits,
            clock,
            store,
            recent_calls: VecDeque::new(),
            daily,
        }
    }

    /// How long to wait before the next call is allowed. `Ok(ZERO)` means go
    /// now; `Err` means the daily cap is reached and no wait will help.
    pub fn check(&mut self) -> Result<Duration, QuotaError> {
        let now = self.clock.now();
        self.roll_day(now);

        if self.daily.count >= self.limits.max_per_day {
            return Err(QuotaError::DailyExhausted {
                used: self.daily.count,
                limit: self.limits.max_per_day,
            });
        }

        self.prune(now);

        let mut wait = Duration::ZERO;

        if let Some(last) = self.recent_calls.back() {
            let since_last = (now - *last)
                .to_std()
                .unwrap_or(Duration::ZERO);
            if since_last < self.limits.min_spacing {
                wait = wait.max(self.limits.min_spacing - since_last);
            }
        }

        if self.recent_calls.len() >= self.limits.max_per_minute {
            // Wait until the oldest call in the window ages out.
            let idx = self.recent_calls.len() - self.limits.max_per_minute;
            let oldest = self.recent_calls[idx];
            let until_free = (oldest + chrono::Duration::seconds(60) - now)
                .to_std()
                .unwrap_or(Duration::ZERO);
            wait = wait.max(until_free);
        }

        Ok(wait)
    }

    /// Record a call that was just made, and persist the daily counter.
    pub fn record(&mut self) {
        let now = self.clock.now();
        self.roll_day(now);
        self.recent_calls.push_back(now);
        self.daily.count += 1;
        self.store.save(&self.daily);
        tracing::debug!(
            "API call recorded: {}/{} today",
            self.daily.count,
            self.limits.max_per_day
        );
    }

    pub fn calls_remaining_today(&self) -> u32 {
        self.limits.max_per_day.saturating_sub(self.daily.count)
    }

    fn roll_day(&mut self, now: DateTime<Utc>) {
        let today = now.format("%Y-%m-%d").to_string();
        if self.daily.date != today {
            tracing::info!("New day: resetting daily API counter");
            self.daily = DailyQuota::for_day(now);
            self.store.save(&self.daily);
        }
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        while let Some(front) = self.recent_calls.front() {
            if now - *front >= chrono::Duration::seconds(60) {
                self.recent_calls.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::{Arc, Mutex};

    #[derive(Clone)]
    struct ManualClock(Arc<Mutex<DateTime<Utc>>>);

    impl ManualClock {
        fn at(start: DateTime<Utc>) -> Self {
            Self(Arc::new(Mutex::new(start)))
        }

        fn advance(&self, d: Duration) {
            let mut now = self.0.lock().unwrap();
            *now = *now + chrono::Duration::from_std(d).unwrap();
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    struct NullStore;

    impl QuotaStore for NullStore {
        fn load(&self) -> Option<DailyQuota> {
            None
        }
        fn save(&self, _: &DailyQuota) {}
    }

    fn start_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn limiter(clock: &ManualClock) -> RateLimiter {
        RateLimiter::with_clock(
            RateLimits::default(),
            Box::new(NullStore),
            Box::new(clock.clone()),
        )
    }

    #[test]
    fn test_min_spacing_enforced() {
        let clock = ManualClock::at(start_time());
        let mut rl = limiter(&clock);

        assert_eq!(rl.check().unwrap(), Duration::ZERO);
        rl.record();

        clock.advance(Duration::from_secs(5));
        let wait = rl.check().unwrap();
        assert_eq!(wait, Duration::from_secs(10));

        clock.advance(Duration::from_secs(10));
        assert_eq!(rl.check().unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_rolling_minute_window() {
        let clock = ManualClock::at(start_time());
        let mut rl = RateLimiter::with_clock(
            RateLimits {
                min_spacing: Duration::ZERO,
                max_per_minute: 4,
                max_per_day: 100,
            },
            Box::new(NullStore),
            Box::new(clock.clone()),
        );

        // Four quick calls fill the rolling window.
        for _ in 0..4 {
            assert_eq!(rl.check().unwrap(), Duration::ZERO);
            rl.record();
            clock.advance(Duration::from_secs(1));
        }

        // At t=4s the whole window is occupied; the fifth call must wait
        // until the t=0 call ages past 60s.
        let wait = rl.check().unwrap();
        assert_eq!(wait, Duration::from_secs(56));

        clock.advance(Duration::from_secs(57));
        assert_eq!(rl.check().unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_daily_cap_is_hard_stop() {
        let clock = ManualClock::at(start_time());
        let mut rl = RateLimiter::with_clock(
            RateLimits {
                min_spacing: Duration::ZERO,
                max_per_minute: 1000,
                max_per_day: 3,
            },
            Box::new(NullStore),
            Box::new(clock.clone()),
        );

        for _ in 0..3 {
            rl.check().unwrap();
            rl.record();
            clock.advance(Duration::from_secs(120));
        }

        assert_eq!(rl.calls_remaining_today(), 0);
        let err = rl.check().unwrap_err();
        assert!(matches!(err, QuotaError::DailyExhausted { used: 3, limit: 3 }));
    }

    #[test]
    fn test_day_rollover_resets_counter() {
        let clock = ManualClock::at(start_time());
        let mut rl = RateLimiter::with_clock(
            RateLimits {
                min_spacing: Duration::ZERO,
                max_per_minute: 1000,
                max_per_day: 1,
            },
            Box::new(NullStore),
            Box::new(clock.clone()),
        );

        rl.check().unwrap();
        rl.record();
        assert!(rl.check().is_err());

        clock.advance(Duration::from_secs(24 * 3600));
        assert_eq!(rl.check().unwrap(), Duration::ZERO);
        assert_eq!(rl.calls_remaining_today(), 1);
    }

    #[test]
    fn test_quota_persists_across_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usage.json");
        let clock = ManualClock::at(start_time());

        let mut rl = RateLimiter::with_clock(
            RateLimits::default(),
            Box::new(FileQuotaStore::new(&path)),
            Box::new(clock.clone()),
        );
        rl.record();
        rl.record();

        // A new limiter over the same file picks up today's count.
        let rl2 = RateLimiter::with_clock(
            RateLimits::default(),
            Box::new(FileQuotaStore::new(&path)),
            Box::new(clock.clone()),
        );
        assert_eq!(rl2.calls_remaining_today(), 98);
    }

    #[test]
    fn test_corrupt_quota_file_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usage.json");
        std::fs::write(&path, "not json").unwrap();

        let clock = ManualClock::at(start_time());
        let rl = RateLimiter::with_clock(
            RateLimits::default(),
            Box::new(FileQuotaStore::new(&path)),
            Box::new(clock.clone()),
        );
        assert_eq!(rl.calls_remaining_today(), 100);
    }
}
