//! Trait abstractions over persistence.
//!
//! The engine and the aggregation scheduler only need a handful of writes.
//! [`TelemetryStore`] names them so tests can swap in
//! [`FaultyStore`](crate::mock::FaultyStore) without touching engine code.

use time::{Date, OffsetDateTime};

use heatwatch_store::{Result, RollupOutcome, Store};
use heatwatch_types::{Reading, TriggerType};

/// Persistence operations consumed by the engine and the aggregator.
///
/// Implementations are used behind a `tokio::sync::Mutex`, so every method
/// takes `&mut self` and runs to completion before the lock is released.
pub trait TelemetryStore: Send + 'static {
    /// Append a reading; returns its row id.
    fn insert_reading(&mut self, reading: &Reading) -> Result<i64>;

    /// Insert an open alert episode; returns its row id.
    fn insert_alert(&mut self, start: OffsetDateTime, temperature: Option<f64>) -> Result<i64>;

    /// Resolve the alert row `id`.
    fn resolve_alert(
        &mut self,
        id: i64,
        end: OffsetDateTime,
        duration_secs: i64,
        peak_temperature: Option<f64>,
    ) -> Result<usize>;

    /// Insert an open cooling episode; returns its row id.
    fn insert_cooling(
        &mut self,
        activated_at: OffsetDateTime,
        trigger: TriggerType,
    ) -> Result<i64>;

    /// Close the cooling row `id`.
    fn close_cooling(
        &mut self,
        id: i64,
        deactivated_at: OffsetDateTime,
        duration_secs: i64,
    ) -> Result<usize>;

    /// Roll up one hour, write-once.
    fn rollup_hour(&mut self, date: Date, hour: u8) -> Result<RollupOutcome>;

    /// Roll up one day, write-once.
    fn rollup_day(&mut self, date: Date) -> Result<RollupOutcome>;
}

impl TelemetryStore for Store {
    fn insert_reading(&mut self, reading: &Reading) -> Result<i64> {
        Store::insert_reading(self, reading)
    }

    fn insert_alert(&mut self, start: OffsetDateTime, temperature: Option<f64>) -> Result<i64> {
        Store::insert_alert(self, start, temperature)
    }

    fn resolve_alert(
        &mut self,
        id: i64,
        end: OffsetDateTime,
        duration_secs: i64,
        peak_temperature: Option<f64>,
    ) -> Result<usize> {
        Store::resolve_alert(self, id, end, duration_secs, peak_temperature)
    }

    fn insert_cooling(
        &mut self,
        activated_at: OffsetDateTime,
        trigger: TriggerType,
    ) -> Result<i64> {
        Store::insert_cooling(self, activated_at, trigger)
    }

    fn close_cooling(
        &mut self,
        id: i64,
        deactivated_at: OffsetDateTime,
        duration_secs: i64,
    ) -> Result<usize> {
        Store::close_cooling(self, id, deactivated_at, duration_secs)
    }

    fn rollup_hour(&mut self, date: Date, hour: u8) -> Result<RollupOutcome> {
        Store::rollup_hour(self, date, hour)
    }

    fn rollup_day(&mut self, date: Date) -> Result<RollupOutcome> {
        Store::rollup_day(self, date)
    }
}
