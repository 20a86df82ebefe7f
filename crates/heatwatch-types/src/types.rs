//! Core data types for readings, episodes and rollups.

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};

use crate::error::InvalidPeriod;

// Calendar dates travel as `YYYY-MM-DD`.
#[cfg(feature = "serde")]
time::serde::format_description!(iso_date, Date, "[year]-[month]-[day]");

/// A single temperature sample, paired with the most recent humidity.
///
/// Readings are append-only: once written they are never updated.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Reading {
    /// When the sample was received.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub captured_at: OffsetDateTime,
    /// Temperature in °C.
    pub temperature: f64,
    /// Relative humidity in percent, if any humidity had been observed yet.
    pub humidity: Option<f64>,
}

impl Reading {
    pub fn new(captured_at: OffsetDateTime, temperature: f64, humidity: Option<f64>) -> Self {
        Self {
            captured_at,
            temperature,
            humidity,
        }
    }
}

/// A bounded interval during which temperature stayed above the threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AlertEpisode {
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub start: OffsetDateTime,
    /// Temperature that opened the episode. `None` when an external alert
    /// signal opened it before any temperature arrived.
    pub start_temperature: Option<f64>,
    /// Highest temperature seen while the episode was open.
    pub peak_temperature: Option<f64>,
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339::option"))]
    pub end: Option<OffsetDateTime>,
    pub duration_secs: Option<i64>,
    pub resolved: bool,
}

impl AlertEpisode {
    /// Open a new, unresolved episode.
    pub fn open(start: OffsetDateTime, temperature: Option<f64>) -> Self {
        Self {
            start,
            start_temperature: temperature,
            peak_temperature: temperature,
            end: None,
            duration_secs: None,
            resolved: false,
        }
    }

    /// Raise the peak if `value` exceeds it.
    pub fn observe_peak(&mut self, value: f64) {
        self.peak_temperature = Some(match self.peak_temperature {
            Some(peak) => peak.max(value),
            None => value,
        });
    }

    /// Close the episode at `end`, clamping to the start if `end` precedes it.
    pub fn resolve(&mut self, end: OffsetDateTime) {
        let (end, secs) = episode_duration(self.start, end);
        self.end = Some(end);
        self.duration_secs = Some(secs);
        self.resolved = true;
    }
}

/// What switched the cooling equipment on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum TriggerType {
    #[default]
    Auto,
    Manual,
}

impl TriggerType {
    /// Storage and wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Auto => "auto",
            TriggerType::Manual => "manual",
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(TriggerType::Auto),
            "manual" => Ok(TriggerType::Manual),
            other => Err(format!("unknown trigger type: {other}")),
        }
    }
}

/// A bounded interval during which the cooling equipment ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CoolingEpisode {
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub activated_at: OffsetDateTime,
    pub trigger: TriggerType,
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339::option"))]
    pub deactivated_at: Option<OffsetDateTime>,
    pub duration_secs: Option<i64>,
}

impl CoolingEpisode {
    pub fn open(activated_at: OffsetDateTime, trigger: TriggerType) -> Self {
        Self {
            activated_at,
            trigger,
            deactivated_at: None,
            duration_secs: None,
        }
    }

    pub fn close(&mut self, at: OffsetDateTime) {
        let (end, secs) = episode_duration(self.activated_at, at);
        self.deactivated_at = Some(end);
        self.duration_secs = Some(secs);
    }

    pub fn is_open(&self) -> bool {
        self.deactivated_at.is_none()
    }
}

/// Average, minimum and maximum of one measured quantity.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Stats {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
}

/// Aggregate of all readings in one hour of one UTC day.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HourlyRollup {
    #[cfg_attr(feature = "serde", serde(with = "iso_date"))]
    pub date: Date,
    /// Hour of day, 0..=23.
    pub hour: u8,
    pub temperature: Stats,
    /// `None` when none of the readings in the bucket carried humidity.
    pub humidity: Option<Stats>,
    pub readings_count: u64,
}

/// Aggregate of one UTC day, with episode counts.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DailyRollup {
    #[cfg_attr(feature = "serde", serde(with = "iso_date"))]
    pub date: Date,
    pub temperature: Stats,
    pub humidity: Option<Stats>,
    pub readings_count: u64,
    /// Alert episodes that started on this day.
    pub alerts_count: u64,
    /// Cooling episodes activated on this day.
    pub cooling_count: u64,
}

/// An inclusive time range `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Period {
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub start: OffsetDateTime,
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub end: OffsetDateTime,
}

impl Period {
    /// Build a period, rejecting one whose start is after its end.
    pub fn new(start: OffsetDateTime, end: OffsetDateTime) -> Result<Self, InvalidPeriod> {
        if start > end {
            return Err(InvalidPeriod);
        }
        Ok(Self { start, end })
    }

    /// The period ending at `end` and spanning `span` before it.
    pub fn ending_at(end: OffsetDateTime, span: time::Duration) -> Self {
        Self {
            start: end - span.abs(),
            end,
        }
    }

    pub fn contains(&self, instant: OffsetDateTime) -> bool {
        self.start <= instant && instant <= self.end
    }
}

/// `instant` with its sub-second part dropped.
///
/// Episodes and readings are persisted at whole-second precision.
pub fn truncate_to_second(instant: OffsetDateTime) -> OffsetDateTime {
    instant - time::Duration::nanoseconds(i64::from(instant.nanosecond()))
}

/// Close instant and whole-second duration for an episode opened at `start`.
///
/// If `end` is before `start` (clock skew between publishers) the episode
/// is closed at `start` with zero duration. Sub-second remainders round to
/// the nearest second.
pub fn episode_duration(start: OffsetDateTime, end: OffsetDateTime) -> (OffsetDateTime, i64) {
    let end = end.max(start);
    let millis = (end - start).whole_milliseconds();
    let secs = (millis as f64 / 1000.0).round() as i64;
    (end, secs)
}
