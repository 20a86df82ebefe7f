//! Main store implementation.

use std::path::Path;

use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row};
use time::OffsetDateTime;
use tracing::{debug, info};

use heatwatch_types::{Period, Reading, TriggerType};

use crate::error::{Error, Result};
use crate::models::{StoredAlert, StoredCooling, StoredReading};
use crate::queries::ReadingQuery;
use crate::schema;

/// SQLite-based store for readings, episodes and rollups.
pub struct Store {
    pub(crate) conn: Connection,
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!("Opening database at {}", path.display());
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;

        schema::initialize(&conn)?;

        Ok(Self { conn })
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }
}

pub(crate) fn timestamp(value: i64) -> rusqlite::Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(value)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Integer, Box::new(e)))
}

/// Seconds value for an inclusive lower bound; rounds up past sub-second
/// instants, since stored times are whole seconds.
pub(crate) fn lower_bound(instant: OffsetDateTime) -> i64 {
    let secs = instant.unix_timestamp();
    if instant.nanosecond() > 0 {
        secs + 1
    } else {
        secs
    }
}

/// Seconds value for an inclusive upper bound.
pub(crate) fn upper_bound(instant: OffsetDateTime) -> i64 {
    instant.unix_timestamp()
}

fn optional_timestamp(value: Option<i64>) -> rusqlite::Result<Option<OffsetDateTime>> {
    value.map(timestamp).transpose()
}

fn reading_from_row(row: &Row<'_>) -> rusqlite::Result<StoredReading> {
    Ok(StoredReading {
        id: row.get(0)?,
        captured_at: timestamp(row.get(1)?)?,
        temperature: row.get(2)?,
        humidity: row.get(3)?,
    })
}

fn alert_from_row(row: &Row<'_>) -> rusqlite::Result<StoredAlert> {
    Ok(StoredAlert {
        id: row.get(0)?,
        start: timestamp(row.get(1)?)?,
        start_temperature: row.get(2)?,
        peak_temperature: row.get(3)?,
        end: optional_timestamp(row.get(4)?)?,
        duration_secs: row.get(5)?,
        resolved: row.get(6)?,
    })
}

fn cooling_from_row(row: &Row<'_>) -> rusqlite::Result<StoredCooling> {
    let trigger: String = row.get(2)?;
    Ok(StoredCooling {
        id: row.get(0)?,
        activated_at: timestamp(row.get(1)?)?,
        trigger: trigger
            .parse::<TriggerType>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, e.into()))?,
        deactivated_at: optional_timestamp(row.get(3)?)?,
        duration_secs: row.get(4)?,
    })
}

const ALERT_COLUMNS: &str =
    "id, started_at, start_temperature, peak_temperature, ended_at, duration_secs, resolved";
const COOLING_COLUMNS: &str =
    "id, activated_at, trigger_type, deactivated_at, duration_secs";

// Reading operations
impl Store {
    /// Append a reading. Returns the new row id.
    pub fn insert_reading(&self, reading: &Reading) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO readings (captured_at, temperature, humidity) VALUES (?1, ?2, ?3)",
            rusqlite::params![
                reading.captured_at.unix_timestamp(),
                reading.temperature,
                reading.humidity,
            ],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    /// Query readings with filters.
    pub fn query_readings(&self, query: &ReadingQuery) -> Result<Vec<StoredReading>> {
        let sql = query.build_sql();
        let (_, params) = query.build_where();

        debug!("Executing query: {}", sql);

        let mut stmt = self.conn.prepare(&sql)?;
        let readings = stmt
            .query_map(rusqlite::params_from_iter(params), reading_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(readings)
    }

    /// The most recently captured reading, if any.
    pub fn latest_reading(&self) -> Result<Option<StoredReading>> {
        let reading = self
            .conn
            .query_row(
                "SELECT id, captured_at, temperature, humidity FROM readings \
                 ORDER BY captured_at DESC, id DESC LIMIT 1",
                [],
                reading_from_row,
            )
            .optional()?;

        Ok(reading)
    }

    pub fn count_readings(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM readings", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

// Alert episode operations
impl Store {
    /// Insert an unresolved alert episode. Returns the new row id.
    pub fn insert_alert(
        &self,
        start: OffsetDateTime,
        start_temperature: Option<f64>,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO alert_episodes (started_at, start_temperature, peak_temperature, resolved)
             VALUES (?1, ?2, ?2, 0)",
            rusqlite::params![start.unix_timestamp(), start_temperature],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    /// Mark an open alert episode resolved.
    ///
    /// Only unresolved rows are touched; resolving a missing or already
    /// resolved episode yields [`Error::EpisodeNotFound`].
    pub fn resolve_alert(
        &self,
        id: i64,
        end: OffsetDateTime,
        duration_secs: i64,
        peak_temperature: Option<f64>,
    ) -> Result<usize> {
        let changed = self.conn.execute(
            "UPDATE alert_episodes
             SET ended_at = ?2, duration_secs = ?3,
                 peak_temperature = COALESCE(?4, peak_temperature), resolved = 1
             WHERE id = ?1 AND resolved = 0",
            rusqlite::params![id, end.unix_timestamp(), duration_secs, peak_temperature],
        )?;

        if changed == 0 {
            return Err(Error::EpisodeNotFound { kind: "alert", id });
        }
        Ok(changed)
    }

    pub fn get_alert(&self, id: i64) -> Result<Option<StoredAlert>> {
        let sql = format!("SELECT {ALERT_COLUMNS} FROM alert_episodes WHERE id = ?");
        let alert = self
            .conn
            .query_row(&sql, [id], alert_from_row)
            .optional()?;
        Ok(alert)
    }

    /// Alert episodes that started within the period, oldest first.
    pub fn alerts_between(&self, period: &Period) -> Result<Vec<StoredAlert>> {
        let sql = format!(
            "SELECT {ALERT_COLUMNS} FROM alert_episodes
             WHERE started_at >= ?1 AND started_at <= ?2
             ORDER BY started_at ASC, id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let alerts = stmt
            .query_map(
                [lower_bound(period.start), upper_bound(period.end)],
                alert_from_row,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(alerts)
    }
}

// Cooling episode operations
impl Store {
    /// Insert an open cooling episode. Returns the new row id.
    pub fn insert_cooling(&self, activated_at: OffsetDateTime, trigger: TriggerType) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO cooling_episodes (activated_at, trigger_type) VALUES (?1, ?2)",
            rusqlite::params![activated_at.unix_timestamp(), trigger.as_str()],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    /// Close an open cooling episode.
    pub fn close_cooling(
        &self,
        id: i64,
        deactivated_at: OffsetDateTime,
        duration_secs: i64,
    ) -> Result<usize> {
        let changed = self.conn.execute(
            "UPDATE cooling_episodes SET deactivated_at = ?2, duration_secs = ?3
             WHERE id = ?1 AND deactivated_at IS NULL",
            rusqlite::params![id, deactivated_at.unix_timestamp(), duration_secs],
        )?;

        if changed == 0 {
            return Err(Error::EpisodeNotFound { kind: "cooling", id });
        }
        Ok(changed)
    }

    pub fn get_cooling(&self, id: i64) -> Result<Option<StoredCooling>> {
        let sql = format!("SELECT {COOLING_COLUMNS} FROM cooling_episodes WHERE id = ?");
        let episode = self
            .conn
            .query_row(&sql, [id], cooling_from_row)
            .optional()?;
        Ok(episode)
    }

    /// Cooling episodes activated within the period, oldest first.
    pub fn cooling_between(&self, period: &Period) -> Result<Vec<StoredCooling>> {
        let sql = format!(
            "SELECT {COOLING_COLUMNS} FROM cooling_episodes
             WHERE activated_at >= ?1 AND activated_at <= ?2
             ORDER BY activated_at ASC, id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let episodes = stmt
            .query_map(
                [lower_bound(period.start), upper_bound(period.end)],
                cooling_from_row,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(episodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use time::Duration;
    use time::macros::datetime;

    fn reading_at(at: OffsetDateTime, temperature: f64) -> Reading {
        Reading::new(at, temperature, Some(40.0))
    }

    #[test]
    fn test_open_in_memory() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.count_readings().unwrap(), 0);
        assert!(store.latest_reading().unwrap().is_none());
    }

    #[test]
    fn test_open_creates_parent_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("heatwatch.db");
        let store = Store::open(&path).unwrap();
        store
            .insert_reading(&reading_at(datetime!(2024-05-01 10:00:00 UTC), 21.0))
            .unwrap();
        drop(store);

        let reopened = Store::open(&path).unwrap();
        assert_eq!(reopened.count_readings().unwrap(), 1);
    }

    #[test]
    fn test_insert_and_query_readings() {
        let store = Store::open_in_memory().unwrap();
        let base = datetime!(2024-05-01 10:00:00 UTC);
        for i in 0..5 {
            store
                .insert_reading(&reading_at(base + Duration::minutes(i), 20.0 + i as f64))
                .unwrap();
        }

        let all = store.query_readings(&ReadingQuery::new()).unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all[0].temperature, 24.0);

        let window = store
            .query_readings(
                &ReadingQuery::new()
                    .since(base + Duration::minutes(1))
                    .until(base + Duration::minutes(3))
                    .oldest_first(),
            )
            .unwrap();
        let temps: Vec<f64> = window.iter().map(|r| r.temperature).collect();
        assert_eq!(temps, vec![21.0, 22.0, 23.0]);

        let capped = store
            .query_readings(&ReadingQuery::new().oldest_first().limit(2))
            .unwrap();
        assert_eq!(capped.len(), 2);
        assert_eq!(capped[0].temperature, 20.0);
    }

    #[test]
    fn test_sub_second_bounds_stay_inclusive() {
        let store = Store::open_in_memory().unwrap();
        let base = datetime!(2024-05-01 10:00:00 UTC);
        for secs in [0, 1, 2] {
            store
                .insert_reading(&reading_at(base + Duration::seconds(secs), 20.0 + secs as f64))
                .unwrap();
            store.insert_alert(base + Duration::seconds(secs), None).unwrap();
        }

        let since = base + Duration::milliseconds(500);
        let until = base + Duration::milliseconds(1500);
        let readings = store
            .query_readings(&ReadingQuery::new().since(since).until(until))
            .unwrap();
        let temps: Vec<f64> = readings.iter().map(|r| r.temperature).collect();
        assert_eq!(temps, vec![21.0]);

        let alerts = store.alerts_between(&Period::new(since, until).unwrap()).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].start, base + Duration::seconds(1));

        let exact = Period::new(base, base + Duration::seconds(1)).unwrap();
        assert_eq!(store.alerts_between(&exact).unwrap().len(), 2);
    }

    #[test]
    fn test_reading_without_humidity() {
        let store = Store::open_in_memory().unwrap();
        let at = datetime!(2024-05-01 10:00:00 UTC);
        store.insert_reading(&Reading::new(at, 19.5, None)).unwrap();

        let latest = store.latest_reading().unwrap().unwrap();
        assert_eq!(latest.humidity, None);
        assert_eq!(latest.captured_at, at);
        assert_eq!(latest.to_reading().temperature, 19.5);
    }

    #[test]
    fn test_alert_lifecycle() {
        let store = Store::open_in_memory().unwrap();
        let start = datetime!(2024-05-01 10:00:00 UTC);
        let id = store.insert_alert(start, Some(38.0)).unwrap();

        let open = store.get_alert(id).unwrap().unwrap();
        assert!(!open.resolved);
        assert_eq!(open.peak_temperature, Some(38.0));
        assert_eq!(open.end, None);

        store
            .resolve_alert(id, start + Duration::seconds(90), 90, Some(39.4))
            .unwrap();
        let closed = store.get_alert(id).unwrap().unwrap();
        assert!(closed.resolved);
        assert_eq!(closed.duration_secs, Some(90));
        assert_eq!(closed.peak_temperature, Some(39.4));
        assert_eq!(closed.end, Some(start + Duration::seconds(90)));
    }

    #[test]
    fn test_resolved_alert_is_immutable() {
        let store = Store::open_in_memory().unwrap();
        let start = datetime!(2024-05-01 10:00:00 UTC);
        let id = store.insert_alert(start, Some(38.0)).unwrap();
        store.resolve_alert(id, start, 0, None).unwrap();

        let err = store.resolve_alert(id, start, 10, None).unwrap_err();
        assert!(matches!(err, Error::EpisodeNotFound { kind: "alert", .. }));
        assert_eq!(store.get_alert(id).unwrap().unwrap().duration_secs, Some(0));
    }

    #[test]
    fn test_episodes_with_same_start_close_independently() {
        let store = Store::open_in_memory().unwrap();
        let at = datetime!(2024-05-01 10:00:00 UTC);
        let first = store.insert_cooling(at, TriggerType::Auto).unwrap();
        let second = store.insert_cooling(at, TriggerType::Manual).unwrap();

        store.close_cooling(second, at + Duration::seconds(5), 5).unwrap();

        assert!(store.get_cooling(first).unwrap().unwrap().deactivated_at.is_none());
        assert_eq!(
            store.get_cooling(second).unwrap().unwrap().duration_secs,
            Some(5)
        );
    }

    #[test]
    fn test_close_missing_cooling() {
        let store = Store::open_in_memory().unwrap();
        let err = store
            .close_cooling(42, datetime!(2024-05-01 10:00:00 UTC), 0)
            .unwrap_err();
        assert!(matches!(err, Error::EpisodeNotFound { kind: "cooling", id: 42 }));
    }

    #[test]
    fn test_episode_range_queries() {
        let store = Store::open_in_memory().unwrap();
        let base = datetime!(2024-05-01 00:00:00 UTC);
        for day in 0..3 {
            let at = base + Duration::days(day);
            store.insert_alert(at, Some(38.0)).unwrap();
            store.insert_cooling(at, TriggerType::Auto).unwrap();
        }

        let period = Period::new(base + Duration::days(1), base + Duration::days(2)).unwrap();
        let alerts = store.alerts_between(&period).unwrap();
        assert_eq!(alerts.len(), 2);
        assert!(alerts[0].start < alerts[1].start);

        let cooling = store.cooling_between(&period).unwrap();
        assert_eq!(cooling.len(), 2);
        assert_eq!(cooling[0].trigger, TriggerType::Auto);
        assert!(cooling[0].to_episode().is_open());
    }

    #[tokio::test]
    async fn test_store_shared_across_tasks() {
        use std::sync::Arc;
        use tokio::sync::Mutex;

        let store = Arc::new(Mutex::new(Store::open_in_memory().unwrap()));
        let base = datetime!(2024-05-01 10:00:00 UTC);

        let mut handles = Vec::new();
        for i in 0..4 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let guard = store.lock().await;
                guard
                    .insert_reading(&reading_at(base + Duration::seconds(i), 20.0))
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.lock().await.count_readings().unwrap(), 4);
    }
}
