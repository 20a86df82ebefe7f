//! Write-once hourly and daily rollups.
//!
//! Each rollup attempt for one period key runs inside a single immediate
//! transaction: check the key is absent, aggregate the bucket, insert only
//! if the bucket had readings, commit. Rows are never updated, so rerunning
//! a pass over the same window is a no-op.

use rusqlite::{Row, Transaction, TransactionBehavior};
use time::{Date, Duration, OffsetDateTime, Time};
use tracing::debug;

use heatwatch_types::{DailyRollup, HourlyRollup, Stats};

use crate::error::{Error, Result};
use crate::models::RollupOutcome;
use crate::store::Store;

/// Aggregate of the readings in one half-open bucket.
#[derive(Debug)]
struct BucketAggregate {
    count: u64,
    temperature: Option<Stats>,
    humidity: Option<Stats>,
}

fn stats(avg: Option<f64>, min: Option<f64>, max: Option<f64>) -> Option<Stats> {
    match (avg, min, max) {
        (Some(avg), Some(min), Some(max)) => Some(Stats { avg, min, max }),
        _ => None,
    }
}

fn aggregate_readings(
    tx: &Transaction<'_>,
    start: OffsetDateTime,
    end: OffsetDateTime,
) -> Result<BucketAggregate> {
    let aggregate = tx.query_row(
        "SELECT COUNT(*), AVG(temperature), MIN(temperature), MAX(temperature),
                AVG(humidity), MIN(humidity), MAX(humidity)
         FROM readings WHERE captured_at >= ?1 AND captured_at < ?2",
        [start.unix_timestamp(), end.unix_timestamp()],
        |row| {
            Ok(BucketAggregate {
                count: row.get::<_, i64>(0)? as u64,
                temperature: stats(row.get(1)?, row.get(2)?, row.get(3)?),
                humidity: stats(row.get(4)?, row.get(5)?, row.get(6)?),
            })
        },
    )?;
    Ok(aggregate)
}

fn count_in(
    tx: &Transaction<'_>,
    sql: &str,
    start: OffsetDateTime,
    end: OffsetDateTime,
) -> Result<u64> {
    let count: i64 = tx.query_row(
        sql,
        [start.unix_timestamp(), end.unix_timestamp()],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

/// Start instant of `hour` on `date`, in UTC.
pub fn hour_start(date: Date, hour: u8) -> Result<OffsetDateTime> {
    let time = Time::from_hms(hour, 0, 0)?;
    Ok(date.with_time(time).assume_utc())
}

fn optional_stats(row: &Row<'_>, first: usize) -> rusqlite::Result<Option<Stats>> {
    Ok(stats(row.get(first)?, row.get(first + 1)?, row.get(first + 2)?))
}

fn required_stats(row: &Row<'_>, first: usize) -> rusqlite::Result<Stats> {
    Ok(Stats {
        avg: row.get(first)?,
        min: row.get(first + 1)?,
        max: row.get(first + 2)?,
    })
}

impl Store {
    /// Compute and store the rollup for one hour, unless it already exists.
    pub fn rollup_hour(&mut self, date: Date, hour: u8) -> Result<RollupOutcome> {
        let start = hour_start(date, hour)?;
        let end = start + Duration::HOUR;

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM hourly_rollups WHERE date = ?1 AND hour = ?2)",
            rusqlite::params![date, hour],
            |row| row.get(0),
        )?;
        if exists {
            return Ok(RollupOutcome::AlreadyPresent);
        }

        let aggregate = aggregate_readings(&tx, start, end)?;
        let Some(temperature) = aggregate.temperature else {
            return Ok(RollupOutcome::Empty);
        };
        let humidity = aggregate.humidity;

        tx.execute(
            "INSERT INTO hourly_rollups (date, hour, avg_temperature, min_temperature,
                max_temperature, avg_humidity, min_humidity, max_humidity, readings_count,
                created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            rusqlite::params![
                date,
                hour,
                temperature.avg,
                temperature.min,
                temperature.max,
                humidity.map(|h| h.avg),
                humidity.map(|h| h.min),
                humidity.map(|h| h.max),
                aggregate.count as i64,
                OffsetDateTime::now_utc().unix_timestamp(),
            ],
        )?;
        tx.commit()?;

        debug!(%date, hour, readings = aggregate.count, "Stored hourly rollup");
        Ok(RollupOutcome::Inserted {
            readings: aggregate.count,
        })
    }

    /// Compute and store the rollup for one UTC day, unless it already exists.
    ///
    /// Alert and cooling counts cover episodes whose own start falls on the day.
    pub fn rollup_day(&mut self, date: Date) -> Result<RollupOutcome> {
        let start = date.midnight().assume_utc();
        let end = start + Duration::DAY;

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM daily_rollups WHERE date = ?1)",
            [date],
            |row| row.get(0),
        )?;
        if exists {
            return Ok(RollupOutcome::AlreadyPresent);
        }

        let aggregate = aggregate_readings(&tx, start, end)?;
        let Some(temperature) = aggregate.temperature else {
            return Ok(RollupOutcome::Empty);
        };
        let humidity = aggregate.humidity;

        let alerts = count_in(
            &tx,
            "SELECT COUNT(*) FROM alert_episodes WHERE started_at >= ?1 AND started_at < ?2",
            start,
            end,
        )?;
        let cooling = count_in(
            &tx,
            "SELECT COUNT(*) FROM cooling_episodes WHERE activated_at >= ?1 AND activated_at < ?2",
            start,
            end,
        )?;

        tx.execute(
            "INSERT INTO daily_rollups (date, avg_temperature, min_temperature, max_temperature,
                avg_humidity, min_humidity, max_humidity, readings_count, alerts_count,
                cooling_count, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            rusqlite::params![
                date,
                temperature.avg,
                temperature.min,
                temperature.max,
                humidity.map(|h| h.avg),
                humidity.map(|h| h.min),
                humidity.map(|h| h.max),
                aggregate.count as i64,
                alerts as i64,
                cooling as i64,
                OffsetDateTime::now_utc().unix_timestamp(),
            ],
        )?;
        tx.commit()?;

        debug!(%date, readings = aggregate.count, alerts, cooling, "Stored daily rollup");
        Ok(RollupOutcome::Inserted {
            readings: aggregate.count,
        })
    }

    /// Hourly rollups with `from <= date <= to`, ordered by date then hour.
    pub fn hourly_rollups_between(&self, from: Date, to: Date) -> Result<Vec<HourlyRollup>> {
        let mut stmt = self.conn.prepare(
            "SELECT date, hour, avg_temperature, min_temperature, max_temperature,
                    avg_humidity, min_humidity, max_humidity, readings_count
             FROM hourly_rollups WHERE date >= ?1 AND date <= ?2
             ORDER BY date ASC, hour ASC",
        )?;
        let rows = stmt
            .query_map([from, to], |row| {
                Ok(HourlyRollup {
                    date: row.get(0)?,
                    hour: row.get(1)?,
                    temperature: required_stats(row, 2)?,
                    humidity: optional_stats(row, 5)?,
                    readings_count: row.get::<_, i64>(8)? as u64,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Daily rollups with `from <= date <= to`, ordered by date.
    pub fn daily_rollups_between(&self, from: Date, to: Date) -> Result<Vec<DailyRollup>> {
        let mut stmt = self.conn.prepare(
            "SELECT date, avg_temperature, min_temperature, max_temperature,
                    avg_humidity, min_humidity, max_humidity, readings_count,
                    alerts_count, cooling_count
             FROM daily_rollups WHERE date >= ?1 AND date <= ?2
             ORDER BY date ASC",
        )?;
        let rows = stmt
            .query_map([from, to], |row| {
                Ok(DailyRollup {
                    date: row.get(0)?,
                    temperature: required_stats(row, 1)?,
                    humidity: optional_stats(row, 4)?,
                    readings_count: row.get::<_, i64>(7)? as u64,
                    alerts_count: row.get::<_, i64>(8)? as u64,
                    cooling_count: row.get::<_, i64>(9)? as u64,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// The stored hourly rollup for one key, if present.
    pub fn hourly_rollup(&self, date: Date, hour: u8) -> Result<Option<HourlyRollup>> {
        if hour > 23 {
            return Err(Error::InvalidTimestamp(format!("hour {hour} out of range")));
        }
        let rollup = self
            .hourly_rollups_between(date, date)?
            .into_iter()
            .find(|r| r.hour == hour);
        Ok(rollup)
    }

    /// The stored daily rollup for one date, if present.
    pub fn daily_rollup(&self, date: Date) -> Result<Option<DailyRollup>> {
        Ok(self.daily_rollups_between(date, date)?.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heatwatch_types::{Reading, TriggerType};
    use time::macros::{date, datetime};

    fn seed(store: &Store, at: OffsetDateTime, temperature: f64, humidity: Option<f64>) {
        store
            .insert_reading(&Reading::new(at, temperature, humidity))
            .unwrap();
    }

    #[test]
    fn test_hour_start() {
        assert_eq!(
            hour_start(date!(2024 - 05 - 01), 13).unwrap(),
            datetime!(2024-05-01 13:00:00 UTC)
        );
        assert!(hour_start(date!(2024 - 05 - 01), 24).is_err());
    }

    #[test]
    fn test_rollup_hour_aggregates_half_open_bucket() {
        let mut store = Store::open_in_memory().unwrap();
        seed(&store, datetime!(2024-05-01 10:00:00 UTC), 20.0, Some(40.0));
        seed(&store, datetime!(2024-05-01 10:30:00 UTC), 24.0, Some(50.0));
        seed(&store, datetime!(2024-05-01 10:59:59 UTC), 22.0, None);
        // First second of the next bucket
        seed(&store, datetime!(2024-05-01 11:00:00 UTC), 99.0, Some(99.0));

        let outcome = store.rollup_hour(date!(2024 - 05 - 01), 10).unwrap();
        assert_eq!(outcome, RollupOutcome::Inserted { readings: 3 });

        let rollup = store
            .hourly_rollup(date!(2024 - 05 - 01), 10)
            .unwrap()
            .unwrap();
        assert_eq!(rollup.readings_count, 3);
        assert!((rollup.temperature.avg - 22.0).abs() < 1e-9);
        assert_eq!(rollup.temperature.min, 20.0);
        assert_eq!(rollup.temperature.max, 24.0);
        let humidity = rollup.humidity.unwrap();
        assert!((humidity.avg - 45.0).abs() < 1e-9);
        assert_eq!(humidity.max, 50.0);
    }

    #[test]
    fn test_rollup_hour_is_write_once() {
        let mut store = Store::open_in_memory().unwrap();
        seed(&store, datetime!(2024-05-01 10:15:00 UTC), 20.0, None);

        let day = date!(2024 - 05 - 01);
        assert_eq!(
            store.rollup_hour(day, 10).unwrap(),
            RollupOutcome::Inserted { readings: 1 }
        );

        // A late reading does not change an existing row
        seed(&store, datetime!(2024-05-01 10:45:00 UTC), 30.0, None);
        assert_eq!(
            store.rollup_hour(day, 10).unwrap(),
            RollupOutcome::AlreadyPresent
        );

        let rows = store.hourly_rollups_between(day, day).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].readings_count, 1);
        assert!(rows[0].humidity.is_none());
    }

    #[test]
    fn test_rollup_hour_empty_bucket_writes_nothing() {
        let mut store = Store::open_in_memory().unwrap();
        let day = date!(2024 - 05 - 01);
        assert_eq!(store.rollup_hour(day, 4).unwrap(), RollupOutcome::Empty);
        assert_eq!(store.rollup_hour(day, 4).unwrap(), RollupOutcome::Empty);
        assert!(store.hourly_rollups_between(day, day).unwrap().is_empty());
    }

    #[test]
    fn test_rollup_day_counts_episodes_by_start() {
        let mut store = Store::open_in_memory().unwrap();
        let day = date!(2024 - 05 - 01);
        seed(&store, datetime!(2024-05-01 00:00:00 UTC), 20.0, Some(30.0));
        seed(&store, datetime!(2024-05-01 23:59:59 UTC), 30.0, Some(50.0));
        seed(&store, datetime!(2024-05-02 00:00:00 UTC), 90.0, Some(90.0));

        store
            .insert_alert(datetime!(2024-05-01 12:00:00 UTC), Some(38.0))
            .unwrap();
        store
            .insert_alert(datetime!(2024-04-30 23:59:00 UTC), Some(38.0))
            .unwrap();
        store
            .insert_cooling(datetime!(2024-05-01 12:00:00 UTC), TriggerType::Auto)
            .unwrap();
        store
            .insert_cooling(datetime!(2024-05-01 18:00:00 UTC), TriggerType::Manual)
            .unwrap();

        assert_eq!(
            store.rollup_day(day).unwrap(),
            RollupOutcome::Inserted { readings: 2 }
        );
        assert_eq!(store.rollup_day(day).unwrap(), RollupOutcome::AlreadyPresent);

        let rollup = store.daily_rollup(day).unwrap().unwrap();
        assert_eq!(rollup.readings_count, 2);
        assert_eq!(rollup.alerts_count, 1);
        assert_eq!(rollup.cooling_count, 2);
        assert!((rollup.temperature.avg - 25.0).abs() < 1e-9);
        assert_eq!(rollup.humidity.unwrap().min, 30.0);
    }

    #[test]
    fn test_rollup_day_without_readings_ignores_episodes() {
        let mut store = Store::open_in_memory().unwrap();
        store
            .insert_alert(datetime!(2024-05-01 12:00:00 UTC), Some(38.0))
            .unwrap();
        assert_eq!(
            store.rollup_day(date!(2024 - 05 - 01)).unwrap(),
            RollupOutcome::Empty
        );
        assert!(store.daily_rollup(date!(2024 - 05 - 01)).unwrap().is_none());
    }

    #[test]
    fn test_rollups_between_ordering() {
        let mut store = Store::open_in_memory().unwrap();
        for (day, hour) in [(2, 5), (1, 7), (1, 3)] {
            let date = Date::from_calendar_date(2024, time::Month::May, day).unwrap();
            seed(&store, hour_start(date, hour).unwrap(), 20.0, None);
            store.rollup_hour(date, hour).unwrap();
            store.rollup_day(date).unwrap();
        }

        let hourly = store
            .hourly_rollups_between(date!(2024 - 05 - 01), date!(2024 - 05 - 02))
            .unwrap();
        let keys: Vec<(u8, u8)> = hourly.iter().map(|r| (r.date.day(), r.hour)).collect();
        assert_eq!(keys, vec![(1, 3), (1, 7), (2, 5)]);

        let daily = store
            .daily_rollups_between(date!(2024 - 05 - 02), date!(2024 - 05 - 31))
            .unwrap();
        assert_eq!(daily.len(), 1);
        assert_eq!(daily[0].date, date!(2024 - 05 - 02));
    }
}
