//! MQTT subscriber feeding the ingestion engine.
//!
//! Subscribes to the configured telemetry topics, decodes each message with
//! a [`Decoder`] and submits the resulting event to the engine queue.
//! Undecodable messages are logged and dropped.
//!
//! # Example Configuration
//!
//! ```toml
//! [mqtt]
//! broker = "mqtts://broker.example.com"
//! username = "ingest"
//! password = "secret"
//!
//! [mqtt.topics]
//! temperature = "plant/a/temperature"
//! ```
//!
//! # Reconnection
//!
//! The event loop reconnects on its own after connection errors. Topics are
//! resubscribed on every `ConnAck`, since sessions are clean.

use std::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use heatwatch_core::{Decoder, EngineHandle};

use crate::config::{MqttConfig, parse_broker_url};

/// Delay before polling again after a connection error.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// What happened to one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingested {
    /// Decoded and queued for the engine.
    Submitted,
    /// Only updated decoder state.
    Absorbed,
    /// Could not be decoded; dropped.
    Rejected,
    /// The engine is gone.
    EngineStopped,
}

/// Decode one message and hand the event to the engine.
pub async fn ingest(
    decoder: &mut Decoder,
    engine: &EngineHandle,
    topic: &str,
    payload: &[u8],
) -> Ingested {
    match decoder.decode(topic, payload) {
        Ok(Some(event)) => match engine.submit(event).await {
            Ok(()) => Ingested::Submitted,
            Err(e) => {
                error!(error = %e, "Dropping message, engine unavailable");
                Ingested::EngineStopped
            }
        },
        Ok(None) => {
            debug!(topic, mode = %decoder.mode(), "Control mode updated");
            Ingested::Absorbed
        }
        Err(e) => {
            warn!(topic, error = %e, "Dropping undecodable message");
            Ingested::Rejected
        }
    }
}

/// Client id to connect with: the configured one, or a generated one.
pub fn client_id(config: &MqttConfig) -> String {
    if config.client_id.is_empty() {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("heatwatch-{}", &suffix[..8])
    } else {
        config.client_id.clone()
    }
}

/// Start the subscriber. Runs until `stop` turns `true` or the engine stops.
pub fn spawn(
    config: MqttConfig,
    engine: EngineHandle,
    stop: watch::Receiver<bool>,
) -> Result<JoinHandle<()>, String> {
    let (host, port, use_tls) = parse_broker_url(&config.broker)?;

    let mut options = MqttOptions::new(client_id(&config), host, port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive));
    options.set_clean_session(true);
    if let (Some(username), Some(password)) = (&config.username, &config.password) {
        options.set_credentials(username, password);
    }
    if use_tls {
        options.set_transport(rumqttc::Transport::tls_with_default_config());
    }

    info!(broker = %config.broker, "Starting MQTT subscriber");
    Ok(tokio::spawn(run(config, options, engine, stop)))
}

async fn run(
    config: MqttConfig,
    options: MqttOptions,
    engine: EngineHandle,
    mut stop: watch::Receiver<bool>,
) {
    let (client, mut eventloop) = AsyncClient::new(options, 100);
    let mut decoder = Decoder::new(config.topics.clone());

    loop {
        tokio::select! {
            polled = eventloop.poll() => match polled {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    info!(code = ?ack.code, "MQTT connected");
                    for topic in config.topics.all() {
                        if let Err(e) = client.try_subscribe(topic, QoS::AtLeastOnce) {
                            error!(topic, error = %e, "Failed to subscribe");
                        }
                    }
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    debug!(pkid = ack.pkid, "Subscription acknowledged");
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let outcome =
                        ingest(&mut decoder, &engine, &publish.topic, &publish.payload).await;
                    if outcome == Ingested::EngineStopped {
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "MQTT connection error, reconnecting");
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            },
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    info!("MQTT subscriber received stop signal");
                    break;
                }
            }
        }
    }

    if let Err(e) = client.try_disconnect() {
        debug!(error = %e, "Error disconnecting MQTT client");
    }
    info!("MQTT subscriber stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use heatwatch_core::{Engine, EngineConfig, LiveFeed, engine};
    use heatwatch_store::Store;
    use tokio::sync::Mutex;

    fn running_engine() -> (EngineHandle, JoinHandle<()>) {
        let store = Arc::new(Mutex::new(Store::open_in_memory().unwrap()));
        engine::spawn(
            Engine::new(EngineConfig::default(), store, LiveFeed::default(), None),
            8,
        )
    }

    #[tokio::test]
    async fn test_ingest_outcomes() {
        let (engine, task) = running_engine();
        let mut decoder = Decoder::default();

        assert_eq!(
            ingest(&mut decoder, &engine, "industrial/temperature", b"24.5").await,
            Ingested::Submitted
        );
        assert_eq!(
            ingest(&mut decoder, &engine, "industrial/status/mode", b"MANUAL").await,
            Ingested::Absorbed
        );
        assert_eq!(
            ingest(&mut decoder, &engine, "industrial/temperature", b"hot").await,
            Ingested::Rejected
        );
        assert_eq!(
            ingest(&mut decoder, &engine, "industrial/pressure", b"1013").await,
            Ingested::Rejected
        );

        let mut state = engine.watch_state();
        state.wait_for(|s| s.events_processed == 1).await.unwrap();
        assert_eq!(state.borrow().current_temperature, Some(24.5));

        task.abort();
        let _ = task.await;
        assert_eq!(
            ingest(&mut decoder, &engine, "industrial/humidity", b"40").await,
            Ingested::EngineStopped
        );
    }

    #[test]
    fn test_client_id() {
        let mut config = MqttConfig::default();
        let generated = client_id(&config);
        assert!(generated.starts_with("heatwatch-"));
        assert_eq!(generated.len(), "heatwatch-".len() + 8);

        config.client_id = "plant-a".to_string();
        assert_eq!(client_id(&config), "plant-a");
    }

    #[tokio::test]
    async fn test_spawn_rejects_bad_broker() {
        let (engine, task) = running_engine();
        let (_stop_tx, stop_rx) = watch::channel(false);
        let config = MqttConfig {
            broker: "tcp://localhost".to_string(),
            ..MqttConfig::default()
        };
        assert!(spawn(config, engine, stop_rx).is_err());
        task.abort();
    }
}
