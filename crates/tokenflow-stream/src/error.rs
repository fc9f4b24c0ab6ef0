//! Stream error types.
//!
//! Every component of the streaming core surfaces failures through
//! [`StreamError`].  The type is `Clone` because the forking buffer delivers
//! the same upstream failure to every consumer.

/// Unified error type for the streaming core.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    // -- Source errors -------------------------------------------------------
    /// The underlying stream source failed during a pull.
    #[error("stream source error: {reason}")]
    Source { reason: String },

    /// A reader was requested while another reader holds the stream lock.
    #[error("stream is locked to another reader")]
    Locked,

    // -- Merge errors --------------------------------------------------------
    /// Two chunks of incompatible categories were merged.
    #[error("cannot merge {left} and {right}")]
    MergeType {
        /// Category of the accumulated (left-hand) operand.
        left: &'static str,
        /// Category of the incoming (right-hand) operand.
        right: &'static str,
    },

    // -- Cancellation --------------------------------------------------------
    /// A cancellation token fired before the pull resolved.
    #[error("stream cancelled")]
    Cancelled,

    /// No chunk arrived within the configured inactivity window.
    #[error("stream timeout: no chunks received for {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    // -- Generic -------------------------------------------------------------
    /// Catch-all for unexpected internal errors.  Prefer a typed variant
    /// whenever possible.
    #[error("internal stream error: {0}")]
    Internal(String),
}

impl StreamError {
    /// Build a [`StreamError::Source`] from anything displayable.
    pub fn upstream(reason: impl std::fmt::Display) -> Self {
        Self::Source {
            reason: reason.to_string(),
        }
    }
}

/// Convenience alias used throughout the streaming crates.
pub type Result<T> = std::result::Result<T, StreamError>;

impl From<std::io::Error> for StreamError {
    fn from(err: std::io::Error) -> Self {
        Self::upstream(err)
    }
}
