//! Error types for heatwatch-core.
//!
//! None of these are fatal to the engine. Store failures inside the engine
//! and the aggregator are logged as [`heatwatch_store::Error`] and state
//! still advances; the decoder returns [`heatwatch_types::DecodeError`].
//! Callers only see [`Error`] when they talk to the engine from outside.
//!
//! | Error | Where it surfaces | Effect on engine state |
//! |-------|-------------------|------------------------|
//! | [`Error::QueueFull`] | [`crate::EngineHandle::try_submit`] | event not accepted |
//! | [`Error::EngineStopped`] | [`crate::EngineHandle`] | event not accepted |
//! | [`NotifyError`] | logged by the notification task | none |

use thiserror::Error;

/// Errors that can occur in heatwatch-core.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The engine's inbound queue is at capacity.
    #[error("Engine queue is full")]
    QueueFull,

    /// The engine task has exited.
    #[error("Engine is not running")]
    EngineStopped,
}

/// Delivery failure reported by a [`crate::Notifier`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum NotifyError {
    #[cfg(feature = "webhook")]
    #[error("Webhook request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Notification rejected: {0}")]
    Rejected(String),
}

/// Result type alias using heatwatch-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
