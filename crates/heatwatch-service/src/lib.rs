//! MQTT ingestion, analytics REST API and live WebSocket feed for heatwatch.
//!
//! This crate provides a service that:
//! - Subscribes to the telemetry topics on an MQTT broker
//! - Feeds decoded events through the ingestion engine into the local database
//! - Rolls readings up into hourly and daily aggregates on a schedule
//! - Exposes a REST API for querying readings, episodes and statistics
//! - Streams live temperature updates and alerts over WebSocket
//!
//! # REST API Endpoints
//!
//! - `GET /api/health` - Service health check
//! - `GET /api/status` - Engine snapshot and uptime
//! - `GET /api/analytics/temperature/latest` - Most recent reading
//! - `GET /api/analytics/temperature/range` - Readings in a period (default 24h)
//! - `GET /api/analytics/alerts` - Alert episodes (default 7 days)
//! - `GET /api/analytics/cooling` - Cooling episodes (default 7 days)
//! - `GET /api/analytics/statistics` - Period statistics (default 7 days)
//! - `GET /api/analytics/hourly` - Hourly rollups (default 24h)
//! - `GET /api/analytics/daily` - Daily rollups (default 30 days)
//! - `WS /ws` - Live event stream
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/heatwatch/server.toml`:
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8080"
//!
//! [storage]
//! path = "~/.local/share/heatwatch/data.db"
//!
//! [engine]
//! alert_threshold = 37.0
//! alert_source = "threshold"
//!
//! [mqtt]
//! broker = "mqtt://localhost:1883"
//!
//! [notifications]
//! enabled = true
//! destination = "+15550100"
//! webhook_url = "https://sms-gateway.example.com/send"
//! location = "Boiler room"
//! ```

pub mod api;
pub mod config;
pub mod state;
pub mod ws;

#[cfg(feature = "mqtt")]
pub mod mqtt;

pub use config::{
    AggregationConfig, Config, ConfigError, EngineSettings, MqttConfig, NotificationsConfig,
    ServerConfig, StorageConfig, ValidationError,
};
pub use state::{AppState, EngineTasks};

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Full application router: REST API and WebSocket feed.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(api::router())
        .merge(ws::router())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
