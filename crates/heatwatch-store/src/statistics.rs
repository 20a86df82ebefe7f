//! Period statistics over readings and episodes.

use heatwatch_types::Period;

use crate::error::Result;
use crate::models::{AlertSummary, CoolingSummary, PeriodStatistics, TemperatureSummary};
use crate::store::{Store, lower_bound, upper_bound};

impl Store {
    /// Summary of readings, alerts and cooling for an inclusive period.
    ///
    /// `time_above_secs` sums the durations of resolved alerts that started
    /// in the period; open alerts contribute nothing until they resolve.
    pub fn statistics(&self, period: &Period, threshold: f64) -> Result<PeriodStatistics> {
        let bounds = [lower_bound(period.start), upper_bound(period.end)];

        let (temperature, avg_humidity) = self.conn.query_row(
            "SELECT COUNT(*), AVG(temperature), MIN(temperature), MAX(temperature), AVG(humidity)
             FROM readings WHERE captured_at >= ?1 AND captured_at <= ?2",
            bounds,
            |row| {
                Ok((
                    TemperatureSummary {
                        readings: row.get::<_, i64>(0)? as u64,
                        avg: row.get(1)?,
                        min: row.get(2)?,
                        max: row.get(3)?,
                    },
                    row.get::<_, Option<f64>>(4)?,
                ))
            },
        )?;

        let (alerts, time_above_secs) = self.conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(resolved), 0),
                    AVG(CASE WHEN resolved = 1 THEN duration_secs END),
                    COALESCE(SUM(CASE WHEN resolved = 1 THEN duration_secs END), 0)
             FROM alert_episodes WHERE started_at >= ?1 AND started_at <= ?2",
            bounds,
            |row| {
                Ok((
                    AlertSummary {
                        total: row.get::<_, i64>(0)? as u64,
                        resolved: row.get::<_, i64>(1)? as u64,
                        avg_duration_secs: row.get(2)?,
                    },
                    row.get::<_, i64>(3)?,
                ))
            },
        )?;

        let cooling = self.conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(trigger_type = 'auto'), 0),
                    COALESCE(SUM(trigger_type = 'manual'), 0),
                    AVG(duration_secs)
             FROM cooling_episodes WHERE activated_at >= ?1 AND activated_at <= ?2",
            bounds,
            |row| {
                Ok(CoolingSummary {
                    total: row.get::<_, i64>(0)? as u64,
                    auto: row.get::<_, i64>(1)? as u64,
                    manual: row.get::<_, i64>(2)? as u64,
                    avg_duration_secs: row.get(3)?,
                })
            },
        )?;

        Ok(PeriodStatistics {
            start: period.start,
            end: period.end,
            temperature,
            avg_humidity,
            alerts,
            cooling,
            threshold,
            time_above_secs,
        })
    }
}
