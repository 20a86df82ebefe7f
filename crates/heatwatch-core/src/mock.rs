//! Test doubles with failure injection.
//!
//! [`FaultyStore`] wraps a real [`Store`] and fails selected operations on
//! demand, so tests can check how the engine and the aggregator behave when
//! persistence breaks. [`MockNotifier`] records what it was asked to send.
//!
//! # Example
//!
//! ```
//! use heatwatch_core::mock::FaultyStore;
//! use heatwatch_core::TelemetryStore;
//! use heatwatch_types::Reading;
//! use time::OffsetDateTime;
//!
//! let mut store = FaultyStore::in_memory().unwrap();
//! store.set_fail_writes(true);
//! let reading = Reading::new(OffsetDateTime::now_utc(), 21.0, None);
//! assert!(store.insert_reading(&reading).is_err());
//! ```

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use time::{Date, OffsetDateTime};

use heatwatch_store::{Error as StoreError, Result as StoreResult, RollupOutcome, Store};
use heatwatch_types::{Reading, TriggerType};

use crate::error::NotifyError;
use crate::notify::{Notification, Notifier};
use crate::traits::TelemetryStore;

fn injected(operation: &str) -> StoreError {
    StoreError::Io(std::io::Error::other(format!("injected {operation} failure")))
}

/// A [`Store`] that fails on request.
pub struct FaultyStore {
    inner: Store,
    fail_writes: bool,
    failing_hours: HashSet<(Date, u8)>,
    fail_daily: bool,
    failures: u32,
}

impl std::fmt::Debug for FaultyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaultyStore")
            .field("fail_writes", &self.fail_writes)
            .field("failing_hours", &self.failing_hours)
            .field("fail_daily", &self.fail_daily)
            .field("failures", &self.failures)
            .finish()
    }
}

impl FaultyStore {
    pub fn new(inner: Store) -> Self {
        Self {
            inner,
            fail_writes: false,
            failing_hours: HashSet::new(),
            fail_daily: false,
            failures: 0,
        }
    }

    pub fn in_memory() -> StoreResult<Self> {
        Ok(Self::new(Store::open_in_memory()?))
    }

    /// Fail every reading and episode write.
    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    /// Fail the rollup of one hourly bucket.
    pub fn fail_hour(&mut self, date: Date, hour: u8) {
        self.failing_hours.insert((date, hour));
    }

    pub fn clear_failing_hours(&mut self) {
        self.failing_hours.clear();
    }

    pub fn set_fail_daily(&mut self, fail: bool) {
        self.fail_daily = fail;
    }

    /// How many operations have been failed so far.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn inner(&self) -> &Store {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut Store {
        &mut self.inner
    }

    fn check_write(&mut self, operation: &str) -> StoreResult<()> {
        if self.fail_writes {
            self.failures += 1;
            return Err(injected(operation));
        }
        Ok(())
    }
}

impl TelemetryStore for FaultyStore {
    fn insert_reading(&mut self, reading: &Reading) -> StoreResult<i64> {
        self.check_write("insert_reading")?;
        self.inner.insert_reading(reading)
    }

    fn insert_alert(&mut self, start: OffsetDateTime, temperature: Option<f64>) -> StoreResult<i64> {
        self.check_write("insert_alert")?;
        self.inner.insert_alert(start, temperature)
    }

    fn resolve_alert(
        &mut self,
        id: i64,
        end: OffsetDateTime,
        duration_secs: i64,
        peak_temperature: Option<f64>,
    ) -> StoreResult<usize> {
        self.check_write("resolve_alert")?;
        self.inner.resolve_alert(id, end, duration_secs, peak_temperature)
    }

    fn insert_cooling(
        &mut self,
        activated_at: OffsetDateTime,
        trigger: TriggerType,
    ) -> StoreResult<i64> {
        self.check_write("insert_cooling")?;
        self.inner.insert_cooling(activated_at, trigger)
    }

    fn close_cooling(
        &mut self,
        id: i64,
        deactivated_at: OffsetDateTime,
        duration_secs: i64,
    ) -> StoreResult<usize> {
        self.check_write("close_cooling")?;
        self.inner.close_cooling(id, deactivated_at, duration_secs)
    }

    fn rollup_hour(&mut self, date: Date, hour: u8) -> StoreResult<RollupOutcome> {
        if self.failing_hours.contains(&(date, hour)) {
            self.failures += 1;
            return Err(injected("rollup_hour"));
        }
        self.inner.rollup_hour(date, hour)
    }

    fn rollup_day(&mut self, date: Date) -> StoreResult<RollupOutcome> {
        if self.fail_daily {
            self.failures += 1;
            return Err(injected("rollup_day"));
        }
        self.inner.rollup_day(date)
    }
}

/// A [`Notifier`] that records deliveries and can be told to fail.
#[derive(Debug, Default)]
pub struct MockNotifier {
    sent: Mutex<Vec<Notification>>,
    attempts: AtomicU32,
    should_fail: AtomicBool,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::SeqCst);
    }

    /// Successfully delivered notifications, in order.
    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }

    /// Every call to `send`, including failed ones.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn send(&self, destination: &str, message: &str) -> Result<(), NotifyError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(NotifyError::Rejected("mock failure".to_string()));
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(Notification {
                destination: destination.to_string(),
                message: message.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, datetime};

    #[test]
    fn test_faulty_store_passes_through() {
        let mut store = FaultyStore::in_memory().unwrap();
        let reading = Reading::new(datetime!(2024-05-01 10:00:00 UTC), 21.0, None);
        store.insert_reading(&reading).unwrap();
        assert_eq!(store.inner().count_readings().unwrap(), 1);
        assert_eq!(store.failures(), 0);
    }

    #[test]
    fn test_faulty_store_fails_writes() {
        let mut store = FaultyStore::in_memory().unwrap();
        store.set_fail_writes(true);
        let at = datetime!(2024-05-01 10:00:00 UTC);
        assert!(store.insert_alert(at, Some(38.0)).is_err());
        assert!(store.insert_cooling(at, TriggerType::Auto).is_err());
        assert_eq!(store.failures(), 2);

        store.set_fail_writes(false);
        assert!(store.insert_alert(at, Some(38.0)).is_ok());
    }

    #[test]
    fn test_faulty_store_fails_selected_hour() {
        let mut store = FaultyStore::in_memory().unwrap();
        let day = date!(2024 - 05 - 01);
        store.fail_hour(day, 3);
        assert!(store.rollup_hour(day, 3).is_err());
        assert_eq!(store.rollup_hour(day, 4).unwrap(), RollupOutcome::Empty);

        store.clear_failing_hours();
        assert_eq!(store.rollup_hour(day, 3).unwrap(), RollupOutcome::Empty);
    }

    #[tokio::test]
    async fn test_mock_notifier_records() {
        let notifier = MockNotifier::new();
        notifier.send("+1", "first").await.unwrap();
        notifier.set_should_fail(true);
        assert!(notifier.send("+1", "second").await.is_err());

        assert_eq!(notifier.attempts(), 2);
        assert_eq!(notifier.sent().len(), 1);
        assert_eq!(notifier.sent()[0].message, "first");
    }
}
