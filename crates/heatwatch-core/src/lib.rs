//! Ingestion, episode detection and rollup scheduling for heatwatch.
//!
//! This crate is the stateful heart of the system. It consumes typed
//! inbound events (temperature, humidity, alert and cooling signals),
//! keeps the current conditions and the open alert and cooling episodes,
//! persists readings and episodes, fans live updates out to subscribers,
//! and periodically rolls readings up into hourly and daily aggregates.
//!
//! # Features
//!
//! - **Single-writer engine**: one actor task owns all mutable state
//! - **Alert episodes**: threshold or device-signal driven, peak tracking
//! - **Cooling episodes**: edge-triggered, auto/manual trigger tagging
//! - **Live fan-out**: best-effort broadcast of readings and alert openings
//! - **Notifications**: fire-and-forget queue with drop-on-full semantics
//! - **Aggregation**: idempotent hourly/daily rollups on a fixed cadence
//! - **Bus decoding**: topic/payload to event mapping with mode tracking
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use heatwatch_core::{Aggregator, Decoder, Engine, EngineConfig, LiveFeed, engine};
//! use heatwatch_store::Store;
//! use tokio::sync::Mutex;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(Mutex::new(Store::open_in_memory()?));
//! let live = LiveFeed::default();
//! let (handle, _task) = engine::spawn(
//!     Engine::new(EngineConfig::default(), Arc::clone(&store), live.clone(), None),
//!     256,
//! );
//!
//! let mut decoder = Decoder::default();
//! if let Some(event) = decoder.decode("industrial/temperature", b"38.4")? {
//!     handle.submit(event).await?;
//! }
//!
//! let report = Aggregator::new(store).run_once().await;
//! println!("{} hourly rollups written", report.hourly_inserted);
//! # Ok(())
//! # }
//! ```

pub mod aggregation;
pub mod cooling;
pub mod decode;
pub mod engine;
pub mod error;
pub mod events;
pub mod mock;
pub mod notify;
pub mod tracker;
pub mod traits;

pub use aggregation::{AggregationReport, Aggregator};
pub use cooling::{CoolingDetector, CoolingTransition};
pub use decode::{Decoder, Topics};
pub use engine::{Engine, EngineConfig, EngineHandle, EngineState};
pub use error::{Error, NotifyError, Result};
pub use events::{LiveEvent, LiveFeed, LiveReceiver};
pub use notify::{LogNotifier, Notification, NotificationQueue, Notifier};
#[cfg(feature = "webhook")]
pub use notify::WebhookNotifier;
pub use tracker::{AlertSource, AlertTransition, StateTracker};
pub use traits::TelemetryStore;

// Re-export the domain types for convenience
pub use heatwatch_types::{
    AlertEpisode, CoolingEpisode, DecodeError, InboundEvent, Period, Reading, TriggerType,
};
