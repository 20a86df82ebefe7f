//! Live event fan-out.
//!
//! Every accepted reading and every alert opening is published on a
//! process-wide [`broadcast`] channel. Publishing never blocks: with no
//! subscribers the event is discarded, and a subscriber that falls more
//! than the channel capacity behind loses the oldest events.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::broadcast;

/// Event published to live subscribers (dashboards, WebSocket clients).
///
/// Serialized as `{"type": "temp_update", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
#[non_exhaustive]
pub enum LiveEvent {
    /// A temperature reading was accepted.
    TempUpdate {
        temperature: f64,
        humidity: Option<f64>,
        #[serde(with = "time::serde::rfc3339")]
        timestamp: OffsetDateTime,
    },
    /// An alert episode was opened.
    Alert {
        temperature: Option<f64>,
        #[serde(with = "time::serde::rfc3339")]
        timestamp: OffsetDateTime,
    },
}

/// Receiver for live events.
pub type LiveReceiver = broadcast::Receiver<LiveEvent>;

/// Best-effort publisher for [`LiveEvent`]s.
#[derive(Debug, Clone)]
pub struct LiveFeed {
    sender: broadcast::Sender<LiveEvent>,
}

impl LiveFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> LiveReceiver {
        self.sender.subscribe()
    }

    /// Publish an event; returns how many subscribers it reached.
    pub fn publish(&self, event: LiveEvent) -> usize {
        // No receivers is not an error
        self.sender.send(event).unwrap_or(0)
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for LiveFeed {
    fn default() -> Self {
        Self::new(100)
    }
}
