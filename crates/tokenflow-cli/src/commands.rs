//! Subcommand implementations.

use std::io::{self, BufRead, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;
use tokenflow_sse::{EventMessage, EventStream, event_stream_to_data_stream};
use tokenflow_stream::{
    CancellationToken, IterableStream, Producer, SetupProducer, StreamError, merge_all,
};
use tracing::{debug, info, warn};

use crate::cli::DecodeArgs;
use crate::config::CliConfig;
use crate::input;

// ---------------------------------------------------------------------------
// Subcommand: decode
// ---------------------------------------------------------------------------

/// Decode an event stream and write it to `out`.
pub async fn cmd_decode(
    args: &DecodeArgs,
    config: &CliConfig,
    cancel: CancellationToken,
    out: &mut dyn Write,
) -> Result<()> {
    let run = config.run_config(args.timeout_ms, cancel);
    let stream = input::open(&args.input(), config).await?;

    if args.data_only {
        let data = event_stream_to_data_stream(
            stream,
            Some(Box::new(|message: &EventMessage| {
                info!(data = %message.data, "stream metadata");
            })),
        );
        let mut producer = SetupProducer::with_setup(data, log_first_data, run);
        drain(&mut producer, |data| {
            writeln!(out, "{data}").context("failed to write output")
        })
        .await
    } else {
        let events = EventStream::new(IterableStream::new(stream));
        let mut producer = SetupProducer::with_setup(events, log_first_event, run);
        drain(&mut producer, |message| {
            let line = serde_json::to_string(&message).context("failed to encode message")?;
            writeln!(out, "{line}").context("failed to write output")
        })
        .await
    }
}

fn log_first_event(first: Option<&EventMessage>) -> futures::future::Ready<tokenflow_stream::Result<()>> {
    match first {
        Some(message) => debug!(event = %message.event, id = %message.id, "first message decoded"),
        None => debug!("event stream was empty"),
    }
    futures::future::ready(Ok(()))
}

fn log_first_data(first: Option<&String>) -> futures::future::Ready<tokenflow_stream::Result<()>> {
    match first {
        Some(data) => debug!(bytes = data.len(), "first data payload decoded"),
        None => debug!("event stream carried no data"),
    }
    futures::future::ready(Ok(()))
}

/// Pull every value from `producer` into `emit`.
///
/// Cancellation ends the command quietly; any other error, including one
/// from `emit`, terminates the producer before it is returned.
async fn drain<P, F>(producer: &mut SetupProducer<P, ()>, mut emit: F) -> Result<()>
where
    P: Producer + 'static,
    F: FnMut(P::Item) -> Result<()>,
{
    let mut count = 0usize;
    loop {
        let item = match producer.next_value().await {
            Ok(Some(item)) => item,
            Ok(None) => break,
            Err(StreamError::Cancelled) => {
                warn!(count, "decode cancelled");
                producer.terminate().await?;
                return Ok(());
            }
            Err(err) => {
                producer.terminate().await?;
                return Err(err).context("event stream failed");
            }
        };
        if let Err(err) = emit(item) {
            producer.terminate().await?;
            return Err(err);
        }
        count += 1;
    }
    info!(count, "event stream finished");
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: merge
// ---------------------------------------------------------------------------

/// Fold the JSON chunks in `file` (or stdin) and write the result to `out`.
pub fn cmd_merge(file: Option<&Path>, out: &mut dyn Write) -> Result<()> {
    let merged = match file {
        Some(path) => {
            let handle = std::fs::File::open(path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            merge_lines(io::BufReader::new(handle))?
        }
        None => merge_lines(io::stdin().lock())?,
    };

    let rendered = match merged {
        Some(value) => serde_json::to_string_pretty(&value)?,
        None => "null".to_owned(),
    };
    writeln!(out, "{rendered}").context("failed to write output")
}

/// Parse one JSON value per non-blank line and merge them in order.
pub fn merge_lines(reader: impl BufRead) -> Result<Option<Value>> {
    let mut chunks = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line.context("failed to read input")?;
        if line.trim().is_empty() {
            continue;
        }
        let chunk: Value = serde_json::from_str(&line)
            .with_context(|| format!("line {}: invalid JSON", index + 1))?;
        chunks.push(chunk);
    }
    debug!(chunks = chunks.len(), "merging chunks");
    merge_all(chunks).context("chunks could not be merged")
}
