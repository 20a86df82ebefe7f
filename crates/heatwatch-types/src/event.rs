//! Typed inbound events, as produced by a bus adapter.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::types::{TriggerType, truncate_to_second};

/// One decoded message from the telemetry bus.
///
/// The engine handles these strictly in arrival order.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "snake_case"))]
pub enum InboundEvent {
    TemperatureSample {
        value: f64,
        #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
        time: OffsetDateTime,
    },
    HumiditySample {
        value: f64,
        #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
        time: OffsetDateTime,
    },
    /// Alert state reported by the device itself.
    AlertSignal {
        active: bool,
        #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
        time: OffsetDateTime,
    },
    /// Cooling equipment switched on or off.
    CoolingSignal {
        active: bool,
        trigger: TriggerType,
        #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
        time: OffsetDateTime,
    },
}

impl InboundEvent {
    /// When the event was observed.
    pub fn time(&self) -> OffsetDateTime {
        match self {
            InboundEvent::TemperatureSample { time, .. }
            | InboundEvent::HumiditySample { time, .. }
            | InboundEvent::AlertSignal { time, .. }
            | InboundEvent::CoolingSignal { time, .. } => *time,
        }
    }

    /// The same event with its time truncated to whole seconds.
    pub fn truncated_to_second(mut self) -> Self {
        match &mut self {
            InboundEvent::TemperatureSample { time, .. }
            | InboundEvent::HumiditySample { time, .. }
            | InboundEvent::AlertSignal { time, .. }
            | InboundEvent::CoolingSignal { time, .. } => *time = truncate_to_second(*time),
        }
        self
    }

    /// Short name used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::TemperatureSample { .. } => "temperature",
            InboundEvent::HumiditySample { .. } => "humidity",
            InboundEvent::AlertSignal { .. } => "alert_signal",
            InboundEvent::CoolingSignal { .. } => "cooling_signal",
        }
    }
}
