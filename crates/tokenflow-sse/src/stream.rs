//! Decoded event streams as producers.
//!
//! - [`EventStream`] pulls byte chunks and yields whole [`EventMessage`]s.
//! - [`DataStream`] keeps only message payloads: `error` events fail the
//!   stream, `metadata` events go to a callback, and empty payloads are
//!   skipped.
//! - [`JsonStream`] parses each payload as JSON and ends at the `[DONE]`
//!   sentinel used by OpenAI-compatible servers.
//!
//! [`event_stream_to_data_stream`] composes the first two over a
//! [`ReadableStream`] and re-exposes the result as an [`IterableStream`].

use std::collections::VecDeque;

use async_trait::async_trait;
use serde_json::Value;
use tokenflow_stream::{IterableStream, Producer, ProducerSource, PullSource, ReadableStream, Result};

use crate::decoder::EventStreamDecoder;
use crate::error::SseError;
use crate::messages::EventMessage;

/// Data of an `error` event that carried none.
const UNSPECIFIED_ERROR: &str = "Unspecified event streaming error.";

/// Sentinel payload that ends an OpenAI-style stream.
const DONE_SENTINEL: &str = "[DONE]";

// ---------------------------------------------------------------------------
// EventStream
// ---------------------------------------------------------------------------

/// Producer of decoded messages over a producer of byte chunks.
pub struct EventStream<P> {
    source: P,
    decoder: EventStreamDecoder,
    pending: VecDeque<EventMessage>,
    finished: bool,
}

impl<P> EventStream<P>
where
    P: Producer,
    P::Item: AsRef<[u8]>,
{
    /// Decode `source` with a default decoder.
    pub fn new(source: P) -> Self {
        Self::with_decoder(source, EventStreamDecoder::new())
    }

    /// Decode `source` with a configured decoder (id/retry callbacks).
    pub fn with_decoder(source: P, decoder: EventStreamDecoder) -> Self {
        Self {
            source,
            decoder,
            pending: VecDeque::new(),
            finished: false,
        }
    }
}

#[async_trait]
impl<P> Producer for EventStream<P>
where
    P: Producer,
    P::Item: AsRef<[u8]>,
{
    type Item = EventMessage;

    async fn next_value(&mut self) -> Result<Option<EventMessage>> {
        loop {
            if let Some(message) = self.pending.pop_front() {
                return Ok(Some(message));
            }
            if self.finished {
                return Ok(None);
            }

            let pending = &mut self.pending;
            match self.source.next_value().await {
                Ok(Some(chunk)) => {
                    self.decoder
                        .decode(chunk.as_ref(), false, |message| pending.push_back(message));
                }
                Ok(None) => {
                    self.finished = true;
                    self.decoder.decode(&[], true, |message| pending.push_back(message));
                }
                Err(err) => {
                    self.finished = true;
                    return Err(err);
                }
            }
        }
    }

    async fn terminate(&mut self) -> Result<()> {
        self.finished = true;
        self.pending.clear();
        self.source.terminate().await
    }
}

// ---------------------------------------------------------------------------
// DataStream
// ---------------------------------------------------------------------------

/// Callback receiving `metadata` events.
pub type MetadataCallback = Box<dyn FnMut(&EventMessage) + Send>;

/// Producer of message payloads.
pub struct DataStream<P> {
    events: EventStream<P>,
    on_metadata: Option<MetadataCallback>,
}

impl<P> DataStream<P>
where
    P: Producer,
    P::Item: AsRef<[u8]>,
{
    /// Keep only the payloads of `events`.
    pub fn new(events: EventStream<P>) -> Self {
        Self {
            events,
            on_metadata: None,
        }
    }

    /// Deliver `metadata` events to `callback` instead of dropping them.
    pub fn on_metadata(mut self, callback: impl FnMut(&EventMessage) + Send + 'static) -> Self {
        self.on_metadata = Some(Box::new(callback));
        self
    }
}

#[async_trait]
impl<P> Producer for DataStream<P>
where
    P: Producer,
    P::Item: AsRef<[u8]>,
{
    type Item = String;

    async fn next_value(&mut self) -> Result<Option<String>> {
        while let Some(message) = self.events.next_value().await? {
            match message.event.as_str() {
                "error" => {
                    let data = if message.data.is_empty() {
                        UNSPECIFIED_ERROR.to_owned()
                    } else {
                        message.data
                    };
                    tracing::debug!(data = %data, "event stream reported an error");
                    self.events
                        .terminate_with_error(SseError::ErrorEvent { data }.into())
                        .await?;
                }
                "metadata" => {
                    if let Some(on_metadata) = self.on_metadata.as_mut() {
                        on_metadata(&message);
                    }
                }
                _ if !message.data.is_empty() => return Ok(Some(message.data)),
                _ => {}
            }
        }
        Ok(None)
    }

    async fn terminate(&mut self) -> Result<()> {
        self.events.terminate().await
    }
}

// ---------------------------------------------------------------------------
// JsonStream
// ---------------------------------------------------------------------------

/// Producer of JSON values parsed from a producer of payload strings.
pub struct JsonStream<P> {
    data: P,
    done: bool,
}

impl<P: Producer<Item = String>> JsonStream<P> {
    /// Parse every payload of `data`.
    pub fn new(data: P) -> Self {
        Self { data, done: false }
    }
}

#[async_trait]
impl<P: Producer<Item = String>> Producer for JsonStream<P> {
    type Item = Value;

    async fn next_value(&mut self) -> Result<Option<Value>> {
        if self.done {
            return Ok(None);
        }
        let Some(payload) = self.data.next_value().await? else {
            self.done = true;
            return Ok(None);
        };
        if payload.trim() == DONE_SENTINEL {
            self.done = true;
            self.data.terminate().await?;
            return Ok(None);
        }
        match serde_json::from_str(&payload) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                self.done = true;
                let err = SseError::Json {
                    reason: err.to_string(),
                };
                self.data.terminate().await?;
                Err(err.into())
            }
        }
    }

    async fn terminate(&mut self) -> Result<()> {
        self.done = true;
        self.data.terminate().await
    }
}

// ---------------------------------------------------------------------------
// Composition
// ---------------------------------------------------------------------------

/// The producer returned by [`event_stream_to_data_stream`].
pub type DataIterable<S> = IterableStream<ProducerSource<DataStream<IterableStream<S>>>>;

/// Decode the byte stream `stream` and expose only message payloads, as a
/// fresh stream adapter.
///
/// `on_metadata` receives `metadata` events.  Terminating the returned
/// producer cancels `stream` and releases its lock.
pub fn event_stream_to_data_stream<S>(
    stream: ReadableStream<S>,
    on_metadata: Option<MetadataCallback>,
) -> DataIterable<S>
where
    S: PullSource + 'static,
    S::Item: AsRef<[u8]>,
{
    let events = EventStream::new(IterableStream::new(stream));
    let mut data = DataStream::new(events);
    data.on_metadata = on_metadata;
    IterableStream::from_producer(data)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tokenflow_stream::{StreamError, collect, from_iter};

    use super::*;

    fn chunks(parts: &[&str]) -> tokenflow_stream::IterProducer<Vec<u8>> {
        from_iter(parts.iter().map(|p| p.as_bytes().to_vec()).collect::<Vec<_>>())
    }

    #[tokio::test]
    async fn event_stream_yields_messages_across_chunks() {
        let mut events = EventStream::new(chunks(&["event: a\nda", "ta: 1\n\nevent: b\n", "data: 2\n\n"]));
        let messages = collect(&mut events).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!((messages[0].event.as_str(), messages[0].data.as_str()), ("a", "1"));
        assert_eq!((messages[1].event.as_str(), messages[1].data.as_str()), ("b", "2"));
    }

    #[tokio::test]
    async fn event_stream_flushes_on_close() {
        let mut events = EventStream::new(chunks(&["data: partial\n"]));
        let messages = collect(&mut events).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].data, "partial");
    }

    #[tokio::test]
    async fn data_stream_skips_empty_payloads() {
        let events = EventStream::new(chunks(&[": ping\n\n", "event: noop\n\n", "data: x\n\n"]));
        let mut data = DataStream::new(events);
        assert_eq!(collect(&mut data).await.unwrap(), vec!["x"]);
    }

    #[tokio::test]
    async fn data_stream_fails_on_error_event() {
        let events = EventStream::new(chunks(&["data: ok\n\n", "event: error\ndata: overloaded\n\n", "data: never\n\n"]));
        let mut data = DataStream::new(events);
        assert_eq!(data.next_value().await.unwrap().as_deref(), Some("ok"));
        let err = data.next_value().await.unwrap_err();
        assert_eq!(err, StreamError::upstream("event stream error: overloaded"));
        assert_eq!(data.next_value().await.unwrap(), None);
    }

    #[tokio::test]
    async fn error_event_without_data_uses_placeholder() {
        let events = EventStream::new(chunks(&["event: error\n\n"]));
        let mut data = DataStream::new(events);
        let err = data.next_value().await.unwrap_err();
        assert!(err.to_string().contains(UNSPECIFIED_ERROR));
    }

    #[tokio::test]
    async fn error_event_with_blank_data_uses_placeholder() {
        let events = EventStream::new(chunks(&["event: error\ndata:\n\n"]));
        let mut data = DataStream::new(events);
        let err = data.next_value().await.unwrap_err();
        assert_eq!(
            err,
            StreamError::upstream(format!("event stream error: {UNSPECIFIED_ERROR}"))
        );
    }

    #[tokio::test]
    async fn metadata_events_go_to_callback() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let events = EventStream::new(chunks(&["event: metadata\ndata: {\"run_id\":\"r1\"}\n\n", "data: hi\n\n"]));
        let mut data = DataStream::new(events).on_metadata(move |m| sink.lock().unwrap().push(m.data.clone()));
        assert_eq!(collect(&mut data).await.unwrap(), vec!["hi"]);
        assert_eq!(*seen.lock().unwrap(), vec![r#"{"run_id":"r1"}"#]);
    }

    #[tokio::test]
    async fn json_stream_stops_at_done_sentinel() {
        let events = EventStream::new(chunks(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"He\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"y\"}}]}\n\n",
            "data: [DONE]\n\n",
            "data: {\"late\":true}\n\n",
        ]));
        let mut json = JsonStream::new(DataStream::new(events));
        let values = collect(&mut json).await.unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values[1]["choices"][0]["delta"]["content"], "y");
    }

    #[tokio::test]
    async fn json_stream_rejects_invalid_payload() {
        let events = EventStream::new(chunks(&["data: {not json\n\n"]));
        let mut json = JsonStream::new(DataStream::new(events));
        let err = json.next_value().await.unwrap_err();
        assert!(matches!(err, StreamError::Source { ref reason } if reason.starts_with("invalid JSON")));
        assert_eq!(json.next_value().await.unwrap(), None);
    }
}
