//! Periodic hourly and daily rollups.
//!
//! Each run covers a fixed window derived from "now": the 24 hourly buckets
//! of the UTC date of `now - 24h`, and the daily bucket for the UTC date of
//! `now - 1 day`. Rollups are write-once in the store, so overlapping or
//! repeated runs never double-count. A bucket whose rollup fails is logged
//! and skipped; the next scheduled run picks it up again.

use std::sync::Arc;

use time::{Date, Duration, OffsetDateTime, UtcOffset};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use heatwatch_store::RollupOutcome;

use crate::traits::TelemetryStore;

/// Summary of one aggregation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregationReport {
    /// Date the hourly pass covered.
    pub hourly_date: Date,
    /// Date the daily pass covered.
    pub daily_date: Date,
    pub hourly_inserted: u32,
    pub hourly_existing: u32,
    pub hourly_empty: u32,
    pub hourly_failed: u32,
    /// `None` if the daily rollup failed.
    pub daily: Option<RollupOutcome>,
}

impl AggregationReport {
    fn new(hourly_date: Date, daily_date: Date) -> Self {
        Self {
            hourly_date,
            daily_date,
            hourly_inserted: 0,
            hourly_existing: 0,
            hourly_empty: 0,
            hourly_failed: 0,
            daily: None,
        }
    }

    /// Buckets that could not be rolled up in this run.
    pub fn failures(&self) -> u32 {
        self.hourly_failed + u32::from(self.daily.is_none())
    }
}

/// UTC date whose hours the hourly pass covers.
pub fn hourly_window(now: OffsetDateTime) -> Date {
    (now - Duration::hours(24)).to_offset(UtcOffset::UTC).date()
}

/// UTC date the daily pass covers ("yesterday").
pub fn daily_target(now: OffsetDateTime) -> Date {
    (now - Duration::days(1)).to_offset(UtcOffset::UTC).date()
}

/// Runs rollups against a shared store.
pub struct Aggregator<S: TelemetryStore> {
    store: Arc<Mutex<S>>,
}

impl<S: TelemetryStore> Clone for Aggregator<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: TelemetryStore> Aggregator<S> {
    pub fn new(store: Arc<Mutex<S>>) -> Self {
        Self { store }
    }

    /// Run both passes for the current time.
    pub async fn run_once(&self) -> AggregationReport {
        self.run_at(OffsetDateTime::now_utc()).await
    }

    /// Run both passes as if the current time were `now`.
    ///
    /// The store lock is taken per bucket, so live ingestion can interleave
    /// with a run.
    pub async fn run_at(&self, now: OffsetDateTime) -> AggregationReport {
        let hourly_date = hourly_window(now);
        let daily_date = daily_target(now);
        let mut report = AggregationReport::new(hourly_date, daily_date);

        for hour in 0..24u8 {
            let outcome = self.store.lock().await.rollup_hour(hourly_date, hour);
            match outcome {
                Ok(RollupOutcome::Inserted { readings }) => {
                    debug!(date = %hourly_date, hour, readings, "Hourly rollup stored");
                    report.hourly_inserted += 1;
                }
                Ok(RollupOutcome::AlreadyPresent) => report.hourly_existing += 1,
                Ok(RollupOutcome::Empty) => report.hourly_empty += 1,
                Err(e) => {
                    warn!(date = %hourly_date, hour, error = %e, "Hourly rollup failed, skipping");
                    report.hourly_failed += 1;
                }
            }
        }

        let daily = self.store.lock().await.rollup_day(daily_date);
        match daily {
            Ok(outcome) => report.daily = Some(outcome),
            Err(e) => warn!(date = %daily_date, error = %e, "Daily rollup failed, skipping"),
        }

        info!(
            hourly_date = %hourly_date,
            inserted = report.hourly_inserted,
            existing = report.hourly_existing,
            empty = report.hourly_empty,
            failed = report.hourly_failed,
            daily = ?report.daily,
            "Aggregation run complete"
        );
        report
    }

    /// Run every `every` until `stop` becomes `true`.
    ///
    /// The first run happens immediately. A run that overruns the period
    /// delays the next tick instead of bursting to catch up.
    pub fn spawn(
        self,
        every: std::time::Duration,
        mut stop: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_secs = every.as_secs(), "Aggregation scheduler started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.run_once().await;
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Aggregation scheduler stopped");
        })
    }
}
