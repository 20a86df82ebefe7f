//! Turns raw bus messages into [`InboundEvent`]s.
//!
//! The reference deployment publishes on five topics:
//!
//! | topic | payload | event |
//! |-------|---------|-------|
//! | `industrial/temperature` | number | `TemperatureSample` |
//! | `industrial/humidity` | number | `HumiditySample` |
//! | `industrial/alert` | `HIGH_TEMP_ALERT` / `TEMP_NORMAL` | `AlertSignal` |
//! | `industrial/status/servo` | `ACTIVE` / `INACTIVE`, optional `MANUAL` marker | `CoolingSignal` |
//! | `industrial/status/mode` | `MANUAL` / `AUTO` | none, remembered |
//!
//! Events are stamped with the time the message was received.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use heatwatch_types::{DecodeError, DecodeResult, InboundEvent, TriggerType};

/// Topic names the decoder recognizes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Topics {
    pub temperature: String,
    pub humidity: String,
    pub alert: String,
    pub cooling: String,
    pub mode: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            temperature: "industrial/temperature".to_string(),
            humidity: "industrial/humidity".to_string(),
            alert: "industrial/alert".to_string(),
            cooling: "industrial/status/servo".to_string(),
            mode: "industrial/status/mode".to_string(),
        }
    }
}

impl Topics {
    /// All topics, for subscribing.
    pub fn all(&self) -> [&str; 5] {
        [
            self.temperature.as_str(),
            self.humidity.as_str(),
            self.alert.as_str(),
            self.cooling.as_str(),
            self.mode.as_str(),
        ]
    }
}

/// Stateful decoder; remembers the last reported control mode.
#[derive(Debug, Clone)]
pub struct Decoder {
    topics: Topics,
    mode: TriggerType,
}

impl Decoder {
    pub fn new(topics: Topics) -> Self {
        Self {
            topics,
            mode: TriggerType::Auto,
        }
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// The control mode applied to activations without an explicit marker.
    pub fn mode(&self) -> TriggerType {
        self.mode
    }

    /// Decode a message received now.
    pub fn decode(&mut self, topic: &str, payload: &[u8]) -> DecodeResult<Option<InboundEvent>> {
        self.decode_at(topic, payload, OffsetDateTime::now_utc())
    }

    /// Decode a message received at `time`.
    ///
    /// Returns `Ok(None)` for messages that only update decoder state.
    pub fn decode_at(
        &mut self,
        topic: &str,
        payload: &[u8],
        time: OffsetDateTime,
    ) -> DecodeResult<Option<InboundEvent>> {
        let text = std::str::from_utf8(payload)
            .map_err(|_| DecodeError::NotUtf8 {
                topic: topic.to_string(),
            })?
            .trim();

        if topic == self.topics.temperature {
            let value = parse_number(topic, text)?;
            Ok(Some(InboundEvent::TemperatureSample { value, time }))
        } else if topic == self.topics.humidity {
            let value = parse_number(topic, text)?;
            Ok(Some(InboundEvent::HumiditySample { value, time }))
        } else if topic == self.topics.alert {
            let active = match text.to_ascii_uppercase().as_str() {
                "HIGH_TEMP_ALERT" => true,
                "TEMP_NORMAL" => false,
                _ => return Err(unrecognized(topic, text)),
            };
            Ok(Some(InboundEvent::AlertSignal { active, time }))
        } else if topic == self.topics.cooling {
            let upper = text.to_ascii_uppercase();
            // INACTIVE contains ACTIVE, so test it first
            let active = if upper.starts_with("INACTIVE") {
                false
            } else if upper.starts_with("ACTIVE") {
                true
            } else {
                return Err(unrecognized(topic, text));
            };
            let trigger = if upper.contains("MANUAL") {
                TriggerType::Manual
            } else {
                self.mode
            };
            Ok(Some(InboundEvent::CoolingSignal {
                active,
                trigger,
                time,
            }))
        } else if topic == self.topics.mode {
            self.mode = text
                .parse::<TriggerType>()
                .map_err(|_| unrecognized(topic, text))?;
            Ok(None)
        } else {
            Err(DecodeError::UnknownTopic(topic.to_string()))
        }
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(Topics::default())
    }
}

fn parse_number(topic: &str, text: &str) -> DecodeResult<f64> {
    let value: f64 = text.parse().map_err(|_| DecodeError::NotNumeric {
        topic: topic.to_string(),
        payload: text.to_string(),
    })?;
    if !value.is_finite() {
        return Err(DecodeError::NotFinite {
            topic: topic.to_string(),
            value,
        });
    }
    Ok(value)
}

fn unrecognized(topic: &str, text: &str) -> DecodeError {
    DecodeError::UnrecognizedState {
        topic: topic.to_string(),
        payload: text.to_string(),
    }
}
