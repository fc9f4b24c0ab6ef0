//! Event-stream decoder error types.

use tokenflow_stream::StreamError;

/// Errors raised while turning an event stream into data values.
///
/// Malformed wire lines are never errors: lines without a field delimiter
/// and non-numeric `retry` values are ignored.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SseError {
    /// The server sent an `event: error` message.
    #[error("event stream error: {data}")]
    ErrorEvent { data: String },

    /// A `data` payload could not be parsed as JSON.
    #[error("invalid JSON in event data: {reason}")]
    Json { reason: String },

    /// The underlying byte source failed.
    #[error(transparent)]
    Stream(#[from] StreamError),
}

/// Convenience alias used throughout the decoder crate.
pub type Result<T> = std::result::Result<T, SseError>;

impl From<SseError> for StreamError {
    fn from(err: SseError) -> Self {
        match err {
            SseError::Stream(inner) => inner,
            other => StreamError::upstream(other),
        }
    }
}
