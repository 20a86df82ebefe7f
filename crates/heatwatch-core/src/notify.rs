//! Alert notifications.
//!
//! Notifications leave the ingestion path through a bounded queue drained
//! by a dedicated task. Enqueueing never waits: when the queue is full or
//! the task is gone the notification is dropped and logged. Each message
//! is handed to the [`Notifier`] exactly once.

use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::NotifyError;

/// Delivers a message to a destination (phone number, channel, address).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, destination: &str, message: &str) -> Result<(), NotifyError>;
}

/// Writes notifications to the log instead of delivering them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, destination: &str, message: &str) -> Result<(), NotifyError> {
        info!(destination, body = message, "Notification");
        Ok(())
    }
}

/// POSTs `{"to": destination, "body": message}` to an HTTP endpoint,
/// typically an SMS gateway.
#[cfg(feature = "webhook")]
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

#[cfg(feature = "webhook")]
impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[cfg(feature = "webhook")]
#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, destination: &str, message: &str) -> Result<(), NotifyError> {
        let body = serde_json::json!({ "to": destination, "body": message });
        self.client
            .post(&self.url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// A message waiting to be delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub destination: String,
    pub message: String,
}

/// Text sent when an alert opens.
pub fn alert_message(temperature: Option<f64>, location: &str, at: OffsetDateTime) -> String {
    let when = at
        .format(&Rfc3339)
        .unwrap_or_else(|_| at.unix_timestamp().to_string());
    match temperature {
        Some(t) => format!("ALERT: High temperature of {t:.1}°C detected at {location} at {when}."),
        None => format!("ALERT: High temperature detected at {location} at {when}."),
    }
}

/// Producer side of the notification queue.
#[derive(Debug, Clone)]
pub struct NotificationQueue {
    tx: mpsc::Sender<Notification>,
    destination: String,
    location: String,
}

impl NotificationQueue {
    /// Start the delivery task and return the queue feeding it.
    ///
    /// The task ends once every clone of the queue has been dropped.
    pub fn spawn(
        notifier: Arc<dyn Notifier>,
        destination: impl Into<String>,
        location: impl Into<String>,
        capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(deliver(notifier, rx));
        let queue = Self {
            tx,
            destination: destination.into(),
            location: location.into(),
        };
        (queue, handle)
    }

    /// Queue the alert-open message. Returns `false` if it was dropped.
    pub fn alert_opened(&self, temperature: Option<f64>, at: OffsetDateTime) -> bool {
        self.enqueue(Notification {
            destination: self.destination.clone(),
            message: alert_message(temperature, &self.location, at),
        })
    }

    /// Queue a notification without waiting. Returns `false` if it was dropped.
    pub fn enqueue(&self, notification: Notification) -> bool {
        match self.tx.try_send(notification) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!(destination = %dropped.destination, "Notification queue full, dropping");
                false
            }
            Err(mpsc::error::TrySendError::Closed(dropped)) => {
                warn!(destination = %dropped.destination, "Notification task stopped, dropping");
                false
            }
        }
    }
}

async fn deliver(notifier: Arc<dyn Notifier>, mut rx: mpsc::Receiver<Notification>) {
    while let Some(notification) = rx.recv().await {
        match notifier
            .send(&notification.destination, &notification.message)
            .await
        {
            Ok(()) => debug!(destination = %notification.destination, "Notification sent"),
            Err(e) => warn!(
                destination = %notification.destination,
                error = %e,
                "Notification failed"
            ),
        }
    }
    debug!("Notification queue closed");
}
