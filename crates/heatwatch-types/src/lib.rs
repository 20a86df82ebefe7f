//! Shared domain types for heatwatch.
//!
//! This crate holds the data model used by the store, the engine and the
//! service: readings, alert and cooling episodes, rollups, and the typed
//! inbound events produced by bus adapters.
//!
//! # Example
//!
//! ```
//! use heatwatch_types::{AlertEpisode, episode_duration};
//! use time::macros::datetime;
//!
//! let start = datetime!(2024-05-01 10:00:00 UTC);
//! let mut alert = AlertEpisode::open(start, Some(38.2));
//! alert.resolve(datetime!(2024-05-01 10:02:30 UTC));
//! assert_eq!(alert.duration_secs, Some(150));
//! assert_eq!(episode_duration(start, start).1, 0);
//! ```

pub mod error;
pub mod event;
pub mod types;

pub use error::{DecodeError, DecodeResult, InvalidPeriod};
pub use event::InboundEvent;
pub use types::{
    AlertEpisode, CoolingEpisode, DailyRollup, HourlyRollup, Period, Reading, Stats, TriggerType,
    episode_duration, truncate_to_second,
};
