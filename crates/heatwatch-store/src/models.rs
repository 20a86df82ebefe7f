//! Data models for stored data.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use heatwatch_types::{AlertEpisode, CoolingEpisode, Reading, TriggerType};

/// A reading stored in the database.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StoredReading {
    /// Database row ID.
    pub id: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub captured_at: OffsetDateTime,
    pub temperature: f64,
    pub humidity: Option<f64>,
}

impl StoredReading {
    pub fn to_reading(&self) -> Reading {
        Reading::new(self.captured_at, self.temperature, self.humidity)
    }
}

/// An alert episode row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StoredAlert {
    pub id: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub start: OffsetDateTime,
    pub start_temperature: Option<f64>,
    pub peak_temperature: Option<f64>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub end: Option<OffsetDateTime>,
    pub duration_secs: Option<i64>,
    pub resolved: bool,
}

impl StoredAlert {
    pub fn to_episode(&self) -> AlertEpisode {
        AlertEpisode {
            start: self.start,
            start_temperature: self.start_temperature,
            peak_temperature: self.peak_temperature,
            end: self.end,
            duration_secs: self.duration_secs,
            resolved: self.resolved,
        }
    }
}

/// A cooling episode row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCooling {
    pub id: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub activated_at: OffsetDateTime,
    pub trigger: TriggerType,
    #[serde(with = "time::serde::rfc3339::option")]
    pub deactivated_at: Option<OffsetDateTime>,
    pub duration_secs: Option<i64>,
}

impl StoredCooling {
    pub fn to_episode(&self) -> CoolingEpisode {
        CoolingEpisode {
            activated_at: self.activated_at,
            trigger: self.trigger,
            deactivated_at: self.deactivated_at,
            duration_secs: self.duration_secs,
        }
    }
}

/// Result of one rollup attempt for a single bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollupOutcome {
    /// A new row was written covering this many readings.
    Inserted { readings: u64 },
    /// A row for this period key already exists; nothing was written.
    AlreadyPresent,
    /// No readings fell in the bucket; nothing was written.
    Empty,
}

/// Temperature figures over a period.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TemperatureSummary {
    pub avg: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub readings: u64,
}

/// Alert episode figures over a period.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AlertSummary {
    pub total: u64,
    pub resolved: u64,
    pub avg_duration_secs: Option<f64>,
}

/// Cooling episode figures over a period.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CoolingSummary {
    pub total: u64,
    pub auto: u64,
    pub manual: u64,
    pub avg_duration_secs: Option<f64>,
}

/// Derived summary for an arbitrary period.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeriodStatistics {
    #[serde(with = "time::serde::rfc3339")]
    pub start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end: OffsetDateTime,
    pub temperature: TemperatureSummary,
    pub avg_humidity: Option<f64>,
    pub alerts: AlertSummary,
    pub cooling: CoolingSummary,
    /// The alert threshold the figures were reported against.
    pub threshold: f64,
    /// Sum of durations of resolved alerts that started in the period.
    pub time_above_secs: i64,
}
