//! Application state shared across handlers and background tasks.
//!
//! # Live Channel Behavior
//!
//! Live events (temperature updates and alert openings) reach WebSocket
//! clients through a broadcast channel sized by `server.broadcast_buffer`.
//! Publishing never blocks the engine. A client that falls more than the
//! buffer behind loses the oldest events and keeps receiving from there.
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8080"
//! broadcast_buffer = 200
//! ```

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use heatwatch_core::{
    Engine, EngineHandle, LiveFeed, LogNotifier, NotificationQueue, Notifier, WebhookNotifier,
    engine,
};
use heatwatch_store::Store;

use crate::config::{Config, NotificationsConfig};

/// Background tasks started alongside the engine.
#[derive(Debug)]
pub struct EngineTasks {
    engine: JoinHandle<()>,
    delivery: Option<JoinHandle<()>>,
}

impl EngineTasks {
    /// Wait for the engine to drain its queue and for queued notifications
    /// to be delivered. Returns `false` if `timeout` elapsed first.
    ///
    /// Both tasks end only after every [`EngineHandle`] has been dropped.
    pub async fn drain(self, timeout: Duration) -> bool {
        let drained = async {
            let _ = self.engine.await;
            if let Some(delivery) = self.delivery {
                let _ = delivery.await;
            }
        };
        tokio::time::timeout(timeout, drained).await.is_ok()
    }

    pub fn abort(&self) {
        self.engine.abort();
        if let Some(delivery) = &self.delivery {
            delivery.abort();
        }
    }
}

/// Shared application state.
pub struct AppState {
    /// The data store, shared with the engine and the aggregator.
    pub store: Arc<Mutex<Store>>,
    /// Configuration the service was started with.
    pub config: RwLock<Config>,
    /// Sending side of the ingestion engine.
    pub engine: EngineHandle,
    /// Live event fan-out.
    pub live: LiveFeed,
    pub started_at: OffsetDateTime,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl AppState {
    /// Create state around an already running engine.
    pub fn new(
        store: Arc<Mutex<Store>>,
        config: Config,
        engine: EngineHandle,
        live: LiveFeed,
    ) -> Arc<Self> {
        let (stop_tx, stop_rx) = watch::channel(false);
        Arc::new(Self {
            store,
            config: RwLock::new(config),
            engine,
            live,
            started_at: OffsetDateTime::now_utc(),
            stop_tx,
            stop_rx,
        })
    }

    /// Spawn the engine (and notification delivery, if configured) and
    /// build state around it.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(store: Store, config: Config) -> (Arc<Self>, EngineTasks) {
        let store = Arc::new(Mutex::new(store));
        let live = LiveFeed::new(config.server.broadcast_buffer);
        let (notifications, delivery) = match notification_queue(&config.notifications) {
            Some((queue, delivery)) => (Some(queue), Some(delivery)),
            None => (None, None),
        };

        let engine = Engine::new(
            config.engine.engine_config(),
            Arc::clone(&store),
            live.clone(),
            notifications,
        );
        let (handle, engine) = engine::spawn(engine, config.engine.queue_capacity);

        let tasks = EngineTasks { engine, delivery };
        (Self::new(store, config, handle, live), tasks)
    }

    /// Receiver for the shutdown signal, for background tasks.
    pub fn subscribe_stop(&self) -> watch::Receiver<bool> {
        self.stop_rx.clone()
    }

    /// Ask background tasks to stop.
    pub fn signal_stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    pub fn is_stopping(&self) -> bool {
        *self.stop_rx.borrow()
    }
}

/// Build the notification queue described by `config` and start its
/// delivery task, or `None` when notifications are disabled or have no
/// destination.
pub fn notification_queue(
    config: &NotificationsConfig,
) -> Option<(NotificationQueue, JoinHandle<()>)> {
    if !config.enabled {
        info!("Alert notifications disabled");
        return None;
    }
    let Some(destination) = config.destination.as_deref().filter(|d| !d.trim().is_empty()) else {
        warn!("Alert notifications enabled without a destination, skipping");
        return None;
    };

    let notifier: Arc<dyn Notifier> = match &config.webhook_url {
        Some(url) => {
            info!(url = %url, "Delivering alert notifications via webhook");
            Arc::new(WebhookNotifier::new(url.clone()))
        }
        None => {
            info!("No webhook configured, alert notifications will only be logged");
            Arc::new(LogNotifier)
        }
    };

    // Delivery ends once the engine drops the queue
    Some(NotificationQueue::spawn(
        notifier,
        destination,
        config.location.clone(),
        config.queue_capacity,
    ))
}
