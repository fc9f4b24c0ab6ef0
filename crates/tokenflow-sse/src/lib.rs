//! Incremental event-stream decoding for tokenflow.
//!
//! Turns arbitrarily chunked `text/event-stream` bytes into whole messages,
//! in three stages that can be used separately or composed:
//!
//! - **[`lines`]** -- Byte chunks to lines, across `\n`, `\r\n` and `\r`.
//! - **[`messages`]** -- Lines to [`EventMessage`]s.
//! - **[`decoder`]** -- [`get_bytes`] and the composed
//!   [`EventStreamDecoder`].
//! - **[`stream`]** -- Producers of messages, payloads and JSON values, and
//!   [`event_stream_to_data_stream`].
//! - **[`error`]** -- [`SseError`] via [`thiserror`].

pub mod decoder;
pub mod error;
pub mod lines;
pub mod messages;
pub mod stream;

// Re-export the most commonly used types at the crate root for convenience.
pub use decoder::{EventStreamDecoder, get_bytes, read_messages};
pub use error::{Result, SseError};
pub use lines::{Line, LineDecoder, LineEvent};
pub use messages::{EventMessage, MessageDecoder};
pub use stream::{
    DataIterable, DataStream, EventStream, JsonStream, MetadataCallback,
    event_stream_to_data_stream,
};
