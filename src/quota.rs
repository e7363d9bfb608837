//! Daily call-quota tracking, persisted across restarts.

use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Calls made since the last UTC-midnight reset.
/// Serialized as `{"date":"YYYY-MM-DD","calls":n}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaState {
    pub date: NaiveDate,
    pub calls: u64,
}

impl QuotaState {
    pub fn fresh(today: NaiveDate) -> Self {
        Self {
            date: today,
            calls: 0,
        }
    }

    /// Normalize against the current UTC day: a state persisted on an earlier
    /// day resets to zero. Idempotent within a day.
    pub fn normalized(self, today: NaiveDate) -> Self {
        if self.date == today {
            self
        } else {
            Self::fresh(today)
        }
    }
}

/// Durable home for the quota counter, outside the main transactional store.
/// Injected so the orchestrator can be tested against an in-memory fake.
pub trait QuotaStore: Send + Sync {
    fn load(&self) -> Result<Option<QuotaState>>;
    fn save(&self, state: &QuotaState) -> Result<()>;
}

/// JSON file store. A missing or unreadable file yields a fresh state rather
/// than an error, matching how a first run starts.
pub struct FileQuotaStore {
    path: PathBuf,
}

impl FileQuotaStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl QuotaStore for FileQuotaStore {
    fn load(&self) -> Result<Option<QuotaState>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).context("failed to read quota state file"),
        };
        match serde_json::from_str(&content) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                warn!(%e, path = %self.path.display(), "unreadable quota state; starting fresh");
                Ok(None)
            }
        }
    }

    fn save(&self, state: &QuotaState) -> Result<()> {
        let content = serde_json::to_string_pretty(state)?;
        fs::write(&self.path, content).context("failed to write quota state file")?;
        Ok(())
    }
}

struct Inner {
    state: QuotaState,
    store: Box<dyn QuotaStore>,
}

/// Process-wide quota tracker, owned by a single orchestrator. The counter
/// increments by exactly one per dispatched batch attempt and is persisted
/// immediately after each increment, so a crash loses at most one batch's
/// worth of counting.
pub struct QuotaTracker {
    max_calls_per_day: u64,
    inner: Mutex<Inner>,
}

impl QuotaTracker {
    pub fn new(store: Box<dyn QuotaStore>, max_calls_per_day: u64) -> Result<Self> {
        let today = Utc::now().date_naive();
        let state = store
            .load()?
            .unwrap_or_else(|| QuotaState::fresh(today))
            .normalized(today);
        Ok(Self {
            max_calls_per_day,
            inner: Mutex::new(Inner { state, store }),
        })
    }

    pub async fn calls_today(&self) -> u64 {
        let mut inner = self.inner.lock().await;
        let today = Utc::now().date_naive();
        inner.state = inner.state.clone().normalized(today);
        inner.state.calls
    }

    pub async fn exhausted(&self) -> bool {
        self.calls_today().await >= self.max_calls_per_day
    }

    /// Record one dispatched batch attempt, success or failure, and persist.
    pub async fn record_call(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let today = Utc::now().date_naive();
        inner.state = inner.state.clone().normalized(today);
        inner.state.calls += 1;
        let state = inner.state.clone();
        inner.store.save(&state)
    }

    /// Sleep until the next UTC midnight, then persist a zeroed counter for
    /// the new day. Suspends the whole orchestrator, not individual workers.
    pub async fn wait_for_reset(&self) -> Result<()> {
        let sleep_for = until_next_utc_midnight(Utc::now());
        info!(
            hours = format!("{:.2}", sleep_for.as_secs_f64() / 3600.0),
            "daily quota reached; sleeping until reset (00:00 UTC)"
        );
        tokio::time::sleep(sleep_for).await;

        let mut inner = self.inner.lock().await;
        inner.state = QuotaState::fresh(Utc::now().date_naive());
        let state = inner.state.clone();
        inner.store.save(&state)
    }
}

/// Seconds until the next 00:00 UTC, from `now`.
pub fn until_next_utc_midnight(now: chrono::DateTime<Utc>) -> Duration {
    let tomorrow = now.date_naive() + chrono::Days::new(1);
    let midnight = Utc
        .with_ymd_and_hms(tomorrow.year(), tomorrow.month(), tomorrow.day(), 0, 0, 0)
        .single()
        .expect("valid UTC midnight");
    (midnight - now)
        .to_std()
        .unwrap_or(Duration::ZERO)
}
