//! Current conditions and the single open alert slot.
//!
//! [`StateTracker`] is pure state: it decides what happened and returns a
//! transition, and the [`Engine`](crate::Engine) performs the side effects
//! (persistence, fan-out, notification) in order.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use heatwatch_types::{AlertEpisode, Reading};

/// Which input is allowed to open and close alert episodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSource {
    /// Temperature samples are compared against the configured threshold.
    /// External alert signals are ignored.
    #[default]
    Threshold,
    /// The device's own alert signal opens and closes episodes. Temperature
    /// samples only raise the open episode's peak.
    Signal,
}

/// What an observation did to the alert slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AlertTransition {
    /// Nothing changed.
    Unchanged,
    /// A new episode was opened.
    Opened(AlertEpisode),
    /// The open episode is still open; its peak is now this value.
    Raised { peak: f64 },
    /// The open episode was closed. `row_id` is the id its row was stored
    /// under, or `None` if that insert failed.
    Resolved {
        episode: AlertEpisode,
        row_id: Option<i64>,
    },
    /// The input is not authoritative under the configured [`AlertSource`].
    Ignored,
}

/// Result of [`StateTracker::observe_temperature`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureObservation {
    /// The reading to persist, paired with the latest humidity.
    pub reading: Reading,
    pub alert: AlertTransition,
}

#[derive(Debug, Clone, Copy)]
struct OpenAlert {
    episode: AlertEpisode,
    row_id: Option<i64>,
}

/// Holds current temperature and humidity plus at most one open alert.
#[derive(Debug, Clone)]
pub struct StateTracker {
    threshold: f64,
    source: AlertSource,
    current_temperature: Option<f64>,
    current_humidity: Option<f64>,
    open: Option<OpenAlert>,
}

impl StateTracker {
    pub fn new(threshold: f64, source: AlertSource) -> Self {
        Self {
            threshold,
            source,
            current_temperature: None,
            current_humidity: None,
            open: None,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn source(&self) -> AlertSource {
        self.source
    }

    pub fn current_temperature(&self) -> Option<f64> {
        self.current_temperature
    }

    pub fn current_humidity(&self) -> Option<f64> {
        self.current_humidity
    }

    /// The open alert episode, if any.
    pub fn open_alert(&self) -> Option<&AlertEpisode> {
        self.open.as_ref().map(|open| &open.episode)
    }

    /// Record a temperature sample and evaluate the alert condition.
    ///
    /// | state | value vs threshold | result |
    /// |-------|--------------------|--------|
    /// | no open alert | above | `Opened` |
    /// | open alert | above | `Raised` |
    /// | open alert | at or below | `Resolved` |
    /// | no open alert | at or below | `Unchanged` |
    ///
    /// Under [`AlertSource::Signal`] only the `Raised` row applies.
    pub fn observe_temperature(&mut self, value: f64, time: OffsetDateTime) -> TemperatureObservation {
        self.current_temperature = Some(value);
        let reading = Reading::new(time, value, self.current_humidity);

        let alert = match self.source {
            AlertSource::Threshold => self.evaluate_threshold(value, time),
            AlertSource::Signal => match self.open.as_mut() {
                Some(open) => raise(open, value),
                None => AlertTransition::Unchanged,
            },
        };

        TemperatureObservation { reading, alert }
    }

    fn evaluate_threshold(&mut self, value: f64, time: OffsetDateTime) -> AlertTransition {
        let above = value > self.threshold;
        match (self.open.as_mut(), above) {
            (None, true) => self.open_episode(time, Some(value)),
            (Some(open), true) => raise(open, value),
            (Some(_), false) => self.close_episode(time),
            (None, false) => AlertTransition::Unchanged,
        }
    }

    pub fn observe_humidity(&mut self, value: f64) {
        self.current_humidity = Some(value);
    }

    /// Apply an externally reported alert state.
    pub fn observe_alert_signal(&mut self, active: bool, time: OffsetDateTime) -> AlertTransition {
        if self.source != AlertSource::Signal {
            return AlertTransition::Ignored;
        }

        match (self.open.is_some(), active) {
            (false, true) => self.open_episode(time, self.current_temperature),
            (true, false) => self.close_episode(time),
            _ => AlertTransition::Unchanged,
        }
    }

    /// Remember the row id the open episode was stored under.
    pub fn attach_alert_row(&mut self, row_id: i64) {
        if let Some(open) = self.open.as_mut() {
            open.row_id = Some(row_id);
        }
    }

    fn open_episode(&mut self, time: OffsetDateTime, temperature: Option<f64>) -> AlertTransition {
        let episode = AlertEpisode::open(time, temperature);
        self.open = Some(OpenAlert {
            episode,
            row_id: None,
        });
        AlertTransition::Opened(episode)
    }

    fn close_episode(&mut self, time: OffsetDateTime) -> AlertTransition {
        match self.open.take() {
            Some(OpenAlert {
                mut episode,
                row_id,
            }) => {
                episode.resolve(time);
                AlertTransition::Resolved { episode, row_id }
            }
            None => AlertTransition::Unchanged,
        }
    }
}

fn raise(open: &mut OpenAlert, value: f64) -> AlertTransition {
    open.episode.observe_peak(value);
    AlertTransition::Raised {
        peak: open.episode.peak_temperature.unwrap_or(value),
    }
}
