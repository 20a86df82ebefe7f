//! The ingestion engine.
//!
//! [`Engine`] owns all mutable runtime state (the [`StateTracker`] and the
//! [`CoolingDetector`]) and is driven by one actor task fed through a
//! bounded queue. Each event is handled to completion (state update,
//! persistence, fan-out) before the next one is taken off the queue, so
//! there is exactly one writer of engine state.
//!
//! Event times are truncated to whole seconds on entry, the precision at
//! which readings and episodes are stored.
//!
//! Persistence failures are logged and do not stop state from advancing.
//! Memory and store can therefore diverge after a storage failure; the
//! engine reports this instead of hiding it. Open episodes live only in
//! memory and are not reloaded after a restart.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use heatwatch_core::{AlertSource, Engine, EngineConfig, LiveFeed, engine};
//! use heatwatch_store::Store;
//! use heatwatch_types::InboundEvent;
//! use time::OffsetDateTime;
//! use tokio::sync::Mutex;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(Mutex::new(Store::open_in_memory()?));
//! let config = EngineConfig { threshold: 37.0, alert_source: AlertSource::Threshold };
//! let engine = Engine::new(config, store, LiveFeed::default(), None);
//! let (handle, task) = engine::spawn(engine, 64);
//!
//! handle
//!     .submit(InboundEvent::TemperatureSample { value: 21.5, time: OffsetDateTime::now_utc() })
//!     .await?;
//! drop(handle);
//! task.await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use heatwatch_types::{AlertEpisode, CoolingEpisode, InboundEvent, TriggerType};

use crate::cooling::{CoolingDetector, CoolingTransition};
use crate::error::{Error, Result};
use crate::events::{LiveEvent, LiveFeed};
use crate::notify::NotificationQueue;
use crate::traits::TelemetryStore;
use crate::tracker::{AlertSource, AlertTransition, StateTracker};

/// Settings consumed by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Temperatures strictly above this open an alert.
    pub threshold: f64,
    pub alert_source: AlertSource,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            threshold: 37.0,
            alert_source: AlertSource::Threshold,
        }
    }
}

/// Point-in-time view of engine state, published after every event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineState {
    pub current_temperature: Option<f64>,
    pub current_humidity: Option<f64>,
    pub open_alert: Option<AlertEpisode>,
    pub open_cooling: Option<CoolingEpisode>,
    pub threshold: f64,
    pub alert_source: AlertSource,
    /// Events handled since start.
    pub events_processed: u64,
    /// Store writes that failed since start.
    pub store_failures: u64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_event_at: Option<OffsetDateTime>,
}

/// Single-writer event processor.
pub struct Engine<S: TelemetryStore> {
    tracker: StateTracker,
    cooling: CoolingDetector,
    store: Arc<Mutex<S>>,
    live: LiveFeed,
    notifications: Option<NotificationQueue>,
    state_tx: watch::Sender<EngineState>,
    events_processed: u64,
    store_failures: u64,
    last_event_at: Option<OffsetDateTime>,
}

impl<S: TelemetryStore> Engine<S> {
    pub fn new(
        config: EngineConfig,
        store: Arc<Mutex<S>>,
        live: LiveFeed,
        notifications: Option<NotificationQueue>,
    ) -> Self {
        let tracker = StateTracker::new(config.threshold, config.alert_source);
        let (state_tx, _) = watch::channel(EngineState {
            current_temperature: None,
            current_humidity: None,
            open_alert: None,
            open_cooling: None,
            threshold: config.threshold,
            alert_source: config.alert_source,
            events_processed: 0,
            store_failures: 0,
            last_event_at: None,
        });

        Self {
            tracker,
            cooling: CoolingDetector::new(),
            store,
            live,
            notifications,
            state_tx,
            events_processed: 0,
            store_failures: 0,
            last_event_at: None,
        }
    }

    /// Receiver for the state snapshot published after each event.
    pub fn subscribe_state(&self) -> watch::Receiver<EngineState> {
        self.state_tx.subscribe()
    }

    /// Current state snapshot.
    pub fn state(&self) -> EngineState {
        EngineState {
            current_temperature: self.tracker.current_temperature(),
            current_humidity: self.tracker.current_humidity(),
            open_alert: self.tracker.open_alert().copied(),
            open_cooling: self.cooling.open_episode().copied(),
            threshold: self.tracker.threshold(),
            alert_source: self.tracker.source(),
            events_processed: self.events_processed,
            store_failures: self.store_failures,
            last_event_at: self.last_event_at,
        }
    }

    /// Handle one event to completion.
    pub async fn handle(&mut self, event: InboundEvent) {
        // Stored at whole-second precision; durations must agree with it
        let event = event.truncated_to_second();
        debug!(kind = event.kind(), "Handling event");

        match event {
            InboundEvent::TemperatureSample { value, time } => {
                self.on_temperature(value, time).await
            }
            InboundEvent::HumiditySample { value, .. } => self.tracker.observe_humidity(value),
            InboundEvent::AlertSignal { active, time } => {
                let transition = self.tracker.observe_alert_signal(active, time);
                if transition == AlertTransition::Ignored {
                    debug!(active, "Alert signal ignored, threshold is authoritative");
                }
                self.apply_alert(transition).await;
            }
            InboundEvent::CoolingSignal {
                active,
                trigger,
                time,
            } => self.on_cooling(active, trigger, time).await,
        }

        self.events_processed += 1;
        self.last_event_at = Some(event.time());
        self.state_tx.send_replace(self.state());
    }

    async fn on_temperature(&mut self, value: f64, time: OffsetDateTime) {
        let observation = self.tracker.observe_temperature(value, time);
        let reading = observation.reading;

        let stored = self.store.lock().await.insert_reading(&reading);
        if let Err(e) = stored {
            self.store_failures += 1;
            error!(error = %e, temperature = value, "Failed to store reading");
        }

        self.live.publish(LiveEvent::TempUpdate {
            temperature: reading.temperature,
            humidity: reading.humidity,
            timestamp: reading.captured_at,
        });

        self.apply_alert(observation.alert).await;
    }

    async fn apply_alert(&mut self, transition: AlertTransition) {
        match transition {
            AlertTransition::Opened(episode) => {
                info!(
                    temperature = ?episode.start_temperature,
                    threshold = self.tracker.threshold(),
                    "Alert opened"
                );
                let inserted = self
                    .store
                    .lock()
                    .await
                    .insert_alert(episode.start, episode.start_temperature);
                match inserted {
                    Ok(id) => self.tracker.attach_alert_row(id),
                    Err(e) => {
                        self.store_failures += 1;
                        error!(error = %e, "Failed to store alert episode");
                    }
                }

                self.live.publish(LiveEvent::Alert {
                    temperature: episode.start_temperature,
                    timestamp: episode.start,
                });

                match &self.notifications {
                    Some(queue) => {
                        queue.alert_opened(episode.start_temperature, episode.start);
                    }
                    None => debug!("No notification destination configured, skipping"),
                }
            }
            AlertTransition::Resolved { episode, row_id } => {
                let (Some(end), Some(duration)) = (episode.end, episode.duration_secs) else {
                    return;
                };
                info!(
                    duration_secs = duration,
                    peak = ?episode.peak_temperature,
                    "Alert resolved"
                );
                let Some(id) = row_id else {
                    warn!("Resolved alert was never stored; store and memory have diverged");
                    return;
                };
                let result = self.store.lock().await.resolve_alert(
                    id,
                    end,
                    duration,
                    episode.peak_temperature,
                );
                if let Err(e) = result {
                    self.store_failures += 1;
                    error!(error = %e, id, "Failed to resolve alert episode");
                }
            }
            AlertTransition::Raised { peak } => debug!(peak, "Alert peak updated"),
            AlertTransition::Unchanged | AlertTransition::Ignored => {}
        }
    }

    async fn on_cooling(&mut self, active: bool, trigger: TriggerType, time: OffsetDateTime) {
        match self.cooling.observe(active, trigger, time) {
            CoolingTransition::Activated(episode) => {
                info!(trigger = %episode.trigger, "Cooling activated");
                let inserted = self
                    .store
                    .lock()
                    .await
                    .insert_cooling(episode.activated_at, episode.trigger);
                match inserted {
                    Ok(id) => self.cooling.attach_row(id),
                    Err(e) => {
                        self.store_failures += 1;
                        error!(error = %e, "Failed to store cooling episode");
                    }
                }
            }
            CoolingTransition::Deactivated { episode, row_id } => {
                let (Some(end), Some(duration)) = (episode.deactivated_at, episode.duration_secs)
                else {
                    return;
                };
                info!(duration_secs = duration, "Cooling deactivated");
                let Some(id) = row_id else {
                    warn!("Closed cooling episode was never stored; store and memory have diverged");
                    return;
                };
                let result = self.store.lock().await.close_cooling(id, end, duration);
                if let Err(e) = result {
                    self.store_failures += 1;
                    error!(error = %e, id, "Failed to close cooling episode");
                }
            }
            CoolingTransition::Unchanged => debug!(active, "Cooling state unchanged"),
        }
    }
}

/// Sending side of a running engine.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<InboundEvent>,
    state: watch::Receiver<EngineState>,
}

impl EngineHandle {
    /// Queue an event, waiting for space if the queue is full.
    pub async fn submit(&self, event: InboundEvent) -> Result<()> {
        self.tx.send(event).await.map_err(|_| Error::EngineStopped)
    }

    /// Queue an event without waiting.
    pub fn try_submit(&self, event: InboundEvent) -> Result<()> {
        self.tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => Error::QueueFull,
            mpsc::error::TrySendError::Closed(_) => Error::EngineStopped,
        })
    }

    /// Latest published state.
    pub fn state(&self) -> EngineState {
        self.state.borrow().clone()
    }

    /// Receiver that is notified after every handled event.
    pub fn watch_state(&self) -> watch::Receiver<EngineState> {
        self.state.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Run `engine` as an actor with an inbound queue of `capacity` events.
///
/// The task exits once every [`EngineHandle`] has been dropped and the
/// queue has drained.
pub fn spawn<S: TelemetryStore>(
    mut engine: Engine<S>,
    capacity: usize,
) -> (EngineHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel(capacity.max(1));
    let state = engine.subscribe_state();

    let task = tokio::spawn(async move {
        info!("Engine started");
        while let Some(event) = rx.recv().await {
            engine.handle(event).await;
        }
        info!(
            events = engine.events_processed,
            "Engine stopped, queue closed"
        );
    });

    (EngineHandle { tx, state }, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{FaultyStore, MockNotifier};
    use heatwatch_store::Store;
    use heatwatch_types::Period;
    use time::Duration;
    use time::macros::datetime;

    const T0: OffsetDateTime = datetime!(2024-05-01 10:00:00 UTC);

    fn at(secs: i64) -> OffsetDateTime {
        T0 + Duration::seconds(secs)
    }

    fn temp(value: f64, secs: i64) -> InboundEvent {
        InboundEvent::TemperatureSample {
            value,
            time: at(secs),
        }
    }

    fn engine_with<S: TelemetryStore>(store: S, threshold: f64) -> (Engine<S>, Arc<Mutex<S>>) {
        engine_with_source(store, threshold, AlertSource::Threshold)
    }

    fn engine_with_source<S: TelemetryStore>(
        store: S,
        threshold: f64,
        alert_source: AlertSource,
    ) -> (Engine<S>, Arc<Mutex<S>>) {
        let store = Arc::new(Mutex::new(store));
        let config = EngineConfig {
            threshold,
            alert_source,
        };
        let engine = Engine::new(config, Arc::clone(&store), LiveFeed::new(16), None);
        (engine, store)
    }

    fn everything() -> Period {
        Period::new(at(-86_400), at(86_400)).unwrap()
    }

    #[tokio::test]
    async fn test_threshold_scenario_persists_one_episode() {
        let (mut engine, store) = engine_with(Store::open_in_memory().unwrap(), 25.0);

        for event in [temp(20.0, 0), temp(26.0, 10), temp(27.0, 20), temp(24.0, 30)] {
            engine.handle(event).await;
        }

        let store = store.lock().await;
        assert_eq!(store.count_readings().unwrap(), 4);

        let alerts = store.alerts_between(&everything()).unwrap();
        assert_eq!(alerts.len(), 1);
        let alert = alerts[0];
        assert_eq!(alert.start, at(10));
        assert_eq!(alert.start_temperature, Some(26.0));
        assert_eq!(alert.peak_temperature, Some(27.0));
        assert_eq!(alert.end, Some(at(30)));
        assert_eq!(alert.duration_secs, Some(20));
        assert!(alert.resolved);
        assert!(engine.state().open_alert.is_none());
    }

    #[tokio::test]
    async fn test_sub_second_times_store_consistent_durations() {
        let (mut engine, store) = engine_with(Store::open_in_memory().unwrap(), 25.0);

        for (value, millis) in [(26.0, 900), (24.0, 2_000)] {
            engine
                .handle(InboundEvent::TemperatureSample {
                    value,
                    time: T0 + Duration::milliseconds(millis),
                })
                .await;
        }

        let alerts = store.lock().await.alerts_between(&everything()).unwrap();
        assert_eq!(alerts.len(), 1);
        let alert = alerts[0];
        assert_eq!(alert.start, at(0));
        assert_eq!(alert.end, Some(at(2)));
        let end = alert.end.unwrap();
        assert_eq!(alert.duration_secs, Some((end - alert.start).whole_seconds()));
        assert_eq!(engine.state().last_event_at, Some(at(2)));
    }

    #[tokio::test]
    async fn test_signal_source_persists_signalled_episode() {
        let (mut engine, store) =
            engine_with_source(Store::open_in_memory().unwrap(), 37.0, AlertSource::Signal);
        let signal = |active, secs| InboundEvent::AlertSignal {
            active,
            time: at(secs),
        };

        engine.handle(signal(true, 0)).await;
        {
            let alerts = store.lock().await.alerts_between(&everything()).unwrap();
            assert_eq!(alerts.len(), 1);
            assert_eq!(alerts[0].start_temperature, None);
            assert!(!alerts[0].resolved);
        }

        engine.handle(temp(40.0, 10)).await;
        engine.handle(temp(38.0, 20)).await;
        engine.handle(signal(false, 30)).await;

        let store = store.lock().await;
        let alerts = store.alerts_between(&everything()).unwrap();
        assert_eq!(alerts.len(), 1);
        let alert = alerts[0];
        assert_eq!(alert.start, at(0));
        assert_eq!(alert.start_temperature, None);
        assert_eq!(alert.peak_temperature, Some(40.0));
        assert_eq!(alert.end, Some(at(30)));
        assert_eq!(alert.duration_secs, Some(30));
        assert!(alert.resolved);
        assert_eq!(store.count_readings().unwrap(), 2);
        assert!(engine.state().open_alert.is_none());
    }

    #[tokio::test]
    async fn test_threshold_source_ignores_signals() {
        let (mut engine, store) = engine_with(Store::open_in_memory().unwrap(), 37.0);

        engine
            .handle(InboundEvent::AlertSignal {
                active: true,
                time: at(0),
            })
            .await;
        engine.handle(temp(30.0, 10)).await;
        engine
            .handle(InboundEvent::AlertSignal {
                active: false,
                time: at(20),
            })
            .await;

        let store = store.lock().await;
        assert!(store.alerts_between(&everything()).unwrap().is_empty());
        assert_eq!(store.count_readings().unwrap(), 1);
        assert!(engine.state().open_alert.is_none());
        assert_eq!(engine.state().events_processed, 3);
    }

    #[tokio::test]
    async fn test_reading_carries_latest_humidity() {
        let (mut engine, store) = engine_with(Store::open_in_memory().unwrap(), 37.0);

        engine.handle(temp(20.0, 0)).await;
        engine
            .handle(InboundEvent::HumiditySample {
                value: 55.0,
                time: at(1),
            })
            .await;
        engine.handle(temp(21.0, 2)).await;

        let store = store.lock().await;
        let readings = store
            .query_readings(&heatwatch_store::ReadingQuery::new().oldest_first())
            .unwrap();
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0].humidity, None);
        assert_eq!(readings[1].humidity, Some(55.0));
    }

    #[tokio::test]
    async fn test_cooling_episode_persisted_once() {
        let (mut engine, store) = engine_with(Store::open_in_memory().unwrap(), 37.0);
        let cooling = |active, secs| InboundEvent::CoolingSignal {
            active,
            trigger: TriggerType::Auto,
            time: at(secs),
        };

        engine.handle(cooling(true, 0)).await;
        engine.handle(cooling(true, 5)).await;
        engine.handle(cooling(false, 45)).await;
        engine.handle(cooling(false, 50)).await;

        let episodes = store.lock().await.cooling_between(&everything()).unwrap();
        assert_eq!(episodes.len(), 1);
        assert_eq!(episodes[0].activated_at, at(0));
        assert_eq!(episodes[0].deactivated_at, Some(at(45)));
        assert_eq!(episodes[0].duration_secs, Some(45));
    }

    #[tokio::test]
    async fn test_live_events_published() {
        let (mut engine, _store) = engine_with(Store::open_in_memory().unwrap(), 25.0);
        let mut rx = engine.live.subscribe();

        engine.handle(temp(30.0, 0)).await;

        assert!(matches!(
            rx.recv().await.unwrap(),
            LiveEvent::TempUpdate { temperature, .. } if temperature == 30.0
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            LiveEvent::Alert { temperature: Some(t), .. } if t == 30.0
        ));
    }

    #[tokio::test]
    async fn test_notification_sent_once_per_alert() {
        let store = Arc::new(Mutex::new(Store::open_in_memory().unwrap()));
        let notifier = Arc::new(MockNotifier::new());
        let (queue, delivery) = NotificationQueue::spawn(notifier.clone(), "+15550100", "Lab", 8);
        let mut engine = Engine::new(
            EngineConfig {
                threshold: 25.0,
                alert_source: AlertSource::Threshold,
            },
            store,
            LiveFeed::default(),
            Some(queue),
        );

        for event in [temp(30.0, 0), temp(31.0, 1), temp(20.0, 2), temp(32.0, 3)] {
            engine.handle(event).await;
        }
        drop(engine);
        delivery.await.unwrap();

        let sent = notifier.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].message.contains("30.0°C"));
        assert!(sent[1].message.contains("32.0°C"));
    }

    #[tokio::test]
    async fn test_store_failure_still_advances_state() {
        let mut faulty = FaultyStore::in_memory().unwrap();
        faulty.set_fail_writes(true);
        let (mut engine, store) = engine_with(faulty, 25.0);

        engine.handle(temp(30.0, 0)).await;
        let state = engine.state();
        assert!(state.open_alert.is_some());
        assert_eq!(state.current_temperature, Some(30.0));
        assert_eq!(state.store_failures, 2);

        // Storage recovers; the close has no row to update
        store.lock().await.set_fail_writes(false);
        engine.handle(temp(20.0, 10)).await;
        assert!(engine.state().open_alert.is_none());

        let store = store.lock().await;
        assert!(store.inner().alerts_between(&everything()).unwrap().is_empty());
        assert_eq!(store.inner().count_readings().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_spawned_engine_processes_in_order() {
        let (engine, store) = engine_with(Store::open_in_memory().unwrap(), 25.0);
        let (handle, task) = spawn(engine, 4);

        for event in [temp(20.0, 0), temp(26.0, 10), temp(27.0, 20), temp(24.0, 30)] {
            handle.submit(event).await.unwrap();
        }
        let mut state = handle.watch_state();
        drop(handle);
        task.await.unwrap();

        let final_state = state.borrow_and_update().clone();
        assert_eq!(final_state.events_processed, 4);
        assert_eq!(final_state.current_temperature, Some(24.0));
        assert!(final_state.open_alert.is_none());
        assert_eq!(
            store.lock().await.alerts_between(&everything()).unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_submit_after_stop() {
        let (engine, _store) = engine_with(Store::open_in_memory().unwrap(), 25.0);
        let (handle, task) = spawn(engine, 1);
        task.abort();
        let _ = task.await;

        assert!(!handle.is_running());
        assert!(matches!(
            handle.submit(temp(20.0, 0)).await,
            Err(Error::EngineStopped)
        ));
        assert!(matches!(
            handle.try_submit(temp(20.0, 0)),
            Err(Error::EngineStopped)
        ));
    }

    #[tokio::test]
    async fn test_try_submit_reports_full_queue() {
        let (engine, _store) = engine_with(Store::open_in_memory().unwrap(), 25.0);
        let (handle, task) = spawn(engine, 1);

        // Current-thread runtime: the actor has not run yet
        handle.try_submit(temp(20.0, 0)).unwrap();
        assert!(matches!(
            handle.try_submit(temp(21.0, 1)),
            Err(Error::QueueFull)
        ));

        drop(handle);
        task.await.unwrap();
    }
}
