//! SQLite persistence for heatwatch telemetry.
//!
//! This crate stores raw readings, alert and cooling episodes, and the
//! write-once hourly/daily rollups derived from them. It also answers the
//! range and statistics queries behind the analytics API.
//!
//! # Features
//!
//! - Append-only readings with inclusive time-range queries
//! - Episode rows closed by their own row id
//! - Transactional, idempotent rollups keyed by `(date, hour)` and `date`
//! - Period statistics including cumulative time above threshold
//!
//! # Example
//!
//! ```
//! use heatwatch_store::{RollupOutcome, Store};
//! use heatwatch_types::Reading;
//! use time::macros::{date, datetime};
//!
//! let mut store = Store::open_in_memory()?;
//! store.insert_reading(&Reading::new(datetime!(2024-05-01 09:12:00 UTC), 21.4, Some(48.0)))?;
//!
//! let outcome = store.rollup_hour(date!(2024-05-01), 9)?;
//! assert_eq!(outcome, RollupOutcome::Inserted { readings: 1 });
//! assert_eq!(store.rollup_hour(date!(2024-05-01), 9)?, RollupOutcome::AlreadyPresent);
//! # Ok::<(), heatwatch_store::Error>(())
//! ```

mod error;
mod models;
mod queries;
mod rollup;
mod schema;
mod statistics;
mod store;

pub use error::{Error, Result};
pub use models::{
    AlertSummary, CoolingSummary, PeriodStatistics, RollupOutcome, StoredAlert, StoredCooling,
    StoredReading, TemperatureSummary,
};
pub use queries::ReadingQuery;
pub use rollup::hour_start;
pub use store::Store;

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/heatwatch/data.db`
/// - macOS: `~/Library/Application Support/heatwatch/data.db`
/// - Windows: `C:\Users\<user>\AppData\Local\heatwatch\data.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("heatwatch")
        .join("data.db")
}
