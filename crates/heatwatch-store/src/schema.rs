//! Database schema.

use rusqlite::Connection;

use crate::error::{Error, Result};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema.
///
/// Databases stamped with any other version are refused rather than opened.
pub fn initialize(conn: &Connection) -> Result<()> {
    match get_schema_version(conn)? {
        0 => {
            create_schema_v1(conn)?;
            set_schema_version(conn, SCHEMA_VERSION)?;
        }
        SCHEMA_VERSION => {}
        found => {
            return Err(Error::UnsupportedSchema {
                found,
                supported: SCHEMA_VERSION,
            });
        }
    }

    Ok(())
}

fn get_schema_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='schema_version'",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: i32 =
        conn.query_row("SELECT version FROM schema_version", [], |row| row.get(0))?;

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?)",
        [version],
    )?;
    Ok(())
}

fn create_schema_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL
        );

        -- Raw temperature samples, append-only
        CREATE TABLE IF NOT EXISTS readings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            captured_at INTEGER NOT NULL,
            temperature REAL NOT NULL,
            humidity REAL
        );
        CREATE INDEX IF NOT EXISTS idx_readings_time ON readings(captured_at);

        CREATE TABLE IF NOT EXISTS alert_episodes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            started_at INTEGER NOT NULL,
            start_temperature REAL,
            peak_temperature REAL,
            ended_at INTEGER,
            duration_secs INTEGER,
            resolved INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_alert_episodes_start ON alert_episodes(started_at);

        CREATE TABLE IF NOT EXISTS cooling_episodes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            activated_at INTEGER NOT NULL,
            trigger_type TEXT NOT NULL CHECK (trigger_type IN ('auto', 'manual')),
            deactivated_at INTEGER,
            duration_secs INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_cooling_episodes_start ON cooling_episodes(activated_at);

        -- Rollups are write-once per period key
        CREATE TABLE IF NOT EXISTS hourly_rollups (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            date TEXT NOT NULL,
            hour INTEGER NOT NULL CHECK (hour BETWEEN 0 AND 23),
            avg_temperature REAL NOT NULL,
            min_temperature REAL NOT NULL,
            max_temperature REAL NOT NULL,
            avg_humidity REAL,
            min_humidity REAL,
            max_humidity REAL,
            readings_count INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(date, hour)
        );

        CREATE TABLE IF NOT EXISTS daily_rollups (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            date TEXT NOT NULL UNIQUE,
            avg_temperature REAL NOT NULL,
            min_temperature REAL NOT NULL,
            max_temperature REAL NOT NULL,
            avg_humidity REAL,
            min_humidity REAL,
            max_humidity REAL,
            readings_count INTEGER NOT NULL,
            alerts_count INTEGER NOT NULL,
            cooling_count INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        );
        "#,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_fresh_database() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        for table in [
            "readings",
            "alert_episodes",
            "cooling_episodes",
            "hourly_rollups",
            "daily_rollups",
            "schema_version",
        ] {
            assert!(tables.contains(&table.to_string()), "missing {table}");
        }
    }

    #[test]
    fn test_initialize_is_repeatable() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        initialize(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_unknown_schema_version_is_refused() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        set_schema_version(&conn, SCHEMA_VERSION + 1).unwrap();

        let err = initialize(&conn).unwrap_err();
        assert!(matches!(
            err,
            Error::UnsupportedSchema { found: 2, supported: 1 }
        ));
    }

    #[test]
    fn test_hourly_rollup_key_is_unique() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();

        let insert = "INSERT INTO hourly_rollups (date, hour, avg_temperature, min_temperature, \
                      max_temperature, readings_count, created_at) \
                      VALUES ('2024-05-01', 3, 20.0, 19.0, 21.0, 4, 0)";
        conn.execute(insert, []).unwrap();
        assert!(conn.execute(insert, []).is_err());
    }

    #[test]
    fn test_cooling_trigger_type_is_checked() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO cooling_episodes (activated_at, trigger_type) VALUES (0, 'boost')",
            [],
        );
        assert!(result.is_err());
    }
}
