//! Streaming core for tokenflow.
//!
//! This crate provides the machinery that lets one upstream producer of
//! values (model tokens, HTTP response bytes) be forked, re-sequenced
//! through multi-stage pipelines, and folded into accumulated results:
//!
//! - **[`producer`]** -- The [`Producer`] contract: single-pass, pull-based
//!   lazy sequences with early termination, plus bridges to
//!   [`futures::Stream`].
//! - **[`source`]** -- Stream source adapter: a lock-guarded
//!   [`ReadableStream`] and the [`IterableStream`] producer that reads it.
//! - **[`tee`]** -- Forking buffer turning one producer into `n`.
//! - **[`setup`]** -- [`SetupProducer`] and [`pipe_with_setup`] for ordering
//!   stage initialization by data availability.
//! - **[`merge`]** -- The [`Merge`] chunk merger.
//! - **[`cancel`]** -- Cooperative [`CancellationToken`].
//! - **[`config`]** -- [`RunConfig`] threaded through pipeline stages.
//! - **[`error`]** -- [`StreamError`] via [`thiserror`].
//!
//! All producers are `Send` and run on tokio; setup coordination spawns onto
//! the ambient runtime.

pub mod cancel;
pub mod config;
pub mod error;
pub mod merge;
pub mod producer;
pub mod setup;
pub mod source;
pub mod tee;

// Re-export the most commonly used types at the crate root for convenience.
pub use cancel::{CancellationToken, race_with_cancel};
pub use config::RunConfig;
pub use error::{Result, StreamError};
pub use merge::{Merge, merge_all, merge_values};
pub use producer::{
    BoxProducer, IterProducer, Producer, StreamProducer, accumulate, collect, from_iter,
    from_stream, into_stream,
};
pub use setup::{Piped, SetupProducer, SetupSignal, pipe_with_setup};
pub use source::{
    FuturesSource, IterableStream, ProducerSource, PullSource, ReadableStream, ReaderSource,
    StreamReader,
};
pub use tee::{TeeProducer, tee};
