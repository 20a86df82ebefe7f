//! Error types for heatwatch-types.

use thiserror::Error;

/// Errors produced while turning a raw bus message into an [`InboundEvent`].
///
/// A decode error never changes engine state: the message is logged and
/// dropped by whoever called the decoder.
///
/// [`InboundEvent`]: crate::InboundEvent
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum DecodeError {
    /// The message arrived on a topic nobody maps to an event.
    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    /// The payload is not valid UTF-8 text.
    #[error("Payload on {topic} is not valid UTF-8")]
    NotUtf8 { topic: String },

    /// A numeric topic carried something that does not parse as a number.
    #[error("Payload on {topic} is not a number: {payload:?}")]
    NotNumeric { topic: String, payload: String },

    /// The number parsed but is NaN or infinite.
    #[error("Payload on {topic} is not a finite number: {value}")]
    NotFinite { topic: String, value: f64 },

    /// A status topic carried a word outside its vocabulary.
    #[error("Unrecognized state {payload:?} on {topic}")]
    UnrecognizedState { topic: String, payload: String },
}

/// A time range whose start lies after its end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Period start must not be after its end")]
pub struct InvalidPeriod;

/// Result type alias for decoding.
pub type DecodeResult<T> = std::result::Result<T, DecodeError>;
