//! Per-resource "last synced" bookkeeping.
//!
//! Timestamps are epoch milliseconds stored in the `lastUpdates` table, keyed
//! by the resource's table name. A resource that was never synced reads as 0.

use crate::db::StoreManager;
use crate::error::{ErrorKind, Result};
use crate::key::Key;
use crate::schema::Table;
use exn::{OptionExt, ResultExt};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use time::UtcDateTime;
use tracing::{debug, instrument};

/// Source of the current time, in epoch milliseconds.
pub trait Clock: fmt::Debug + Send + Sync {
    fn now_millis(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;
impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        i64::try_from(UtcDateTime::now().unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX)
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock(AtomicI64);
impl ManualClock {
    pub fn new(now_millis: i64) -> Self {
        Self(AtomicI64::new(now_millis))
    }

    pub fn set(&self, now_millis: i64) {
        self.0.store(now_millis, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        let by = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.0.fetch_add(by, Ordering::SeqCst);
    }
}
impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// How long a resource stays fresh after a full sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FreshnessClass {
    /// Frequently changing game state.
    Fast,
    /// Reference data that rarely changes.
    Slow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub fast: Duration,
    pub slow: Duration,
}
impl Default for Thresholds {
    fn default() -> Self {
        Self { fast: Duration::from_secs(5 * 60), slow: Duration::from_secs(60 * 60) }
    }
}
impl Thresholds {
    pub fn of(&self, class: FreshnessClass) -> Duration {
        match class {
            FreshnessClass::Fast => self.fast,
            FreshnessClass::Slow => self.slow,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FreshnessTracker {
    manager: Arc<StoreManager>,
    clock: Arc<dyn Clock>,
}
impl FreshnessTracker {
    pub fn new(manager: Arc<StoreManager>) -> Self {
        Self::with_clock(manager, Arc::new(SystemClock))
    }

    pub fn with_clock(manager: Arc<StoreManager>, clock: Arc<dyn Clock>) -> Self {
        Self { manager, clock }
    }

    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Record that `resource` has just been fully synced.
    ///
    /// The stored timestamp never moves backwards, even if the clock does.
    #[instrument(level = "debug", skip(self))]
    pub async fn record_synced(&self, resource: Table) -> Result<()> {
        let now = self.clock.now_millis();
        self.manager
            .with_store(|store| async move {
                let sql = format!(
                    r#"INSERT INTO "{}" (key, value) VALUES (?, ?)
                       ON CONFLICT (key) DO UPDATE SET value = excluded.value
                       WHERE CAST(excluded.value AS INTEGER) > CAST(value AS INTEGER)"#,
                    Table::LastUpdates
                );
                sqlx::query(&sql)
                    .bind(resource.name())
                    .bind(now.to_string())
                    .execute(store.pool())
                    .await
                    .or_raise(|| ErrorKind::Database)?;
                debug!(now, "recorded sync");
                Ok(())
            })
            .await
    }

    /// Epoch milliseconds of the last full sync of `resource`, or 0.
    pub async fn last_synced(&self, resource: Table) -> Result<i64> {
        let stored = self
            .manager
            .with_store(|store| async move { store.table(Table::LastUpdates).get(&Key::from(resource.name())).await })
            .await?;
        match stored {
            None => Ok(0),
            Some(value) => value.as_i64().ok_or_raise(|| ErrorKind::InvalidData("last update timestamp")),
        }
    }

    /// Whether more than `threshold` has passed since the last full sync.
    pub async fn needs_refresh(&self, resource: Table, threshold: Duration) -> Result<bool> {
        let last = self.last_synced(resource).await?;
        let threshold = i64::try_from(threshold.as_millis()).unwrap_or(i64::MAX);
        Ok(self.clock.now_millis().saturating_sub(last) > threshold)
    }
}
