//! Integration tests for the tokenflow-sse crate.
//!
//! These tests feed recorded model-streaming responses through the decoder
//! under different chunkings and through the stream adapter.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokenflow_sse::{
    DataStream, EventMessage, EventStream, EventStreamDecoder, JsonStream, MessageDecoder,
    event_stream_to_data_stream,
};
use tokenflow_stream::{
    Producer, PullSource, ReadableStream, Result, StreamError, accumulate, collect,
};

// ═══════════════════════════════════════════════════════════════════════
//  Fixtures
// ═══════════════════════════════════════════════════════════════════════

const ANTHROPIC_STYLE: &str = "event: message_start\r\n\
data: {\"type\":\"message_start\"}\r\n\
\r\n\
: keep-alive\n\
\n\
id: 41\n\
event: content_block_delta\n\
data: {\"text\":\"Hel\"}\n\
\n\
id: 42\n\
event: content_block_delta\n\
data: {\"text\":\"lo\"}\n\
retry: 1500\n\
\n\
event: message_stop\r\
data: {\"type\":\"message_stop\"}\r\
data: trailing\n";

fn decode_chunks(chunks: &[&[u8]]) -> Vec<EventMessage> {
    let mut decoder = EventStreamDecoder::new();
    let mut out = Vec::new();
    for chunk in chunks {
        out.extend(decoder.feed(chunk));
    }
    out.extend(decoder.finish());
    out
}

/// Pull source serving fixed chunks; counts cancels.
struct Chunks {
    chunks: Vec<Vec<u8>>,
    cancels: Arc<AtomicUsize>,
}

impl Chunks {
    fn new(parts: &[&str]) -> Self {
        Self {
            chunks: parts.iter().rev().map(|p| p.as_bytes().to_vec()).collect(),
            cancels: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl PullSource for Chunks {
    type Item = Vec<u8>;

    async fn read(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.chunks.pop())
    }

    async fn cancel(&mut self) -> Result<()> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        self.chunks.clear();
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Chunk-boundary invariance
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn recorded_stream_decodes_as_expected() {
    let messages = decode_chunks(&[ANTHROPIC_STYLE.as_bytes()]);
    let summary: Vec<(&str, &str, &str, Option<u64>)> = messages
        .iter()
        .map(|m| (m.id.as_str(), m.event.as_str(), m.data.as_str(), m.retry))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("", "message_start", "{\"type\":\"message_start\"}", None),
            ("", "", "", None),
            ("41", "content_block_delta", "{\"text\":\"Hel\"}", None),
            ("42", "content_block_delta", "{\"text\":\"lo\"}", Some(1500)),
            (
                "",
                "message_stop",
                "{\"type\":\"message_stop\"}\ntrailing",
                None
            ),
        ]
    );
}

#[test]
fn every_two_way_split_matches_single_chunk() {
    let wire = ANTHROPIC_STYLE.as_bytes();
    let whole = decode_chunks(&[wire]);
    for split in 0..=wire.len() {
        let (head, tail) = wire.split_at(split);
        assert_eq!(decode_chunks(&[head, tail]), whole, "split at {split}");
    }
}

#[test]
fn byte_at_a_time_matches_single_chunk() {
    let wire = ANTHROPIC_STYLE.as_bytes();
    let bytes: Vec<&[u8]> = wire.chunks(1).collect();
    assert_eq!(decode_chunks(&bytes), decode_chunks(&[wire]));
}

#[test]
fn callbacks_observe_id_and_retry() {
    let ids = Arc::new(std::sync::Mutex::new(Vec::new()));
    let retries = Arc::new(std::sync::Mutex::new(Vec::new()));
    let (id_sink, retry_sink) = (Arc::clone(&ids), Arc::clone(&retries));
    let messages = MessageDecoder::new()
        .on_id(move |id| id_sink.lock().unwrap().push(id.to_owned()))
        .on_retry(move |ms| retry_sink.lock().unwrap().push(ms));
    let mut decoder = EventStreamDecoder::with_messages(messages);
    decoder.feed(ANTHROPIC_STYLE.as_bytes());
    decoder.finish();
    assert_eq!(*ids.lock().unwrap(), vec!["41", "42"]);
    assert_eq!(*retries.lock().unwrap(), vec![1500]);
}

// ═══════════════════════════════════════════════════════════════════════
//  Flush
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn flush_completes_only_terminated_fields() {
    let mut decoder = EventStreamDecoder::new();
    assert!(decoder.feed(b"data: kept\ndata: lost").is_empty());
    let messages = decoder.finish();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].data, "kept");
}

#[test]
fn flush_after_blank_line_emits_nothing() {
    let mut decoder = EventStreamDecoder::new();
    assert_eq!(decoder.feed(b"data: x\n\n").len(), 1);
    assert!(decoder.finish().is_empty());
}

// ═══════════════════════════════════════════════════════════════════════
//  Stream adapter
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn data_stream_over_readable_stream() {
    let source = Chunks::new(&[
        "event: metadata\ndata: {\"run_id\":\"r\"}\n\n",
        "data: {\"content\":\"a\"}\n\nda",
        "ta: {\"content\":\"b\"}\n\n",
    ]);
    let stream = ReadableStream::new(source);
    let metadata = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&metadata);
    let mut data = event_stream_to_data_stream(
        stream.clone(),
        Some(Box::new(move |_: &EventMessage| {
            counter.fetch_add(1, Ordering::SeqCst);
        })),
    );

    assert_eq!(
        collect(&mut data).await.unwrap(),
        vec!["{\"content\":\"a\"}", "{\"content\":\"b\"}"]
    );
    assert_eq!(metadata.load(Ordering::SeqCst), 1);
    assert!(!stream.is_locked());
}

#[tokio::test]
async fn terminating_data_stream_cancels_and_releases() {
    let source = Chunks::new(&["data: 1\n\n", "data: 2\n\n", "data: 3\n\n"]);
    let cancels = Arc::clone(&source.cancels);
    let stream = ReadableStream::new(source);
    let mut data = event_stream_to_data_stream(stream.clone(), None);

    assert_eq!(data.next_value().await.unwrap().as_deref(), Some("1"));
    assert!(stream.is_locked());
    data.terminate().await.unwrap();

    assert_eq!(cancels.load(Ordering::SeqCst), 1);
    assert!(!stream.is_locked());
    assert_eq!(data.next_value().await.unwrap(), None);
}

#[tokio::test]
async fn error_event_cancels_upstream() {
    let source = Chunks::new(&["data: 1\n\nevent: error\n\n", "data: 2\n\n"]);
    let cancels = Arc::clone(&source.cancels);
    let stream = ReadableStream::new(source);
    let mut data = event_stream_to_data_stream(stream.clone(), None);

    assert_eq!(data.next_value().await.unwrap().as_deref(), Some("1"));
    let err = data.next_value().await.unwrap_err();
    assert_eq!(
        err,
        StreamError::upstream("event stream error: Unspecified event streaming error.")
    );
    assert_eq!(cancels.load(Ordering::SeqCst), 1);
    assert!(!stream.is_locked());
}

#[tokio::test]
async fn json_deltas_accumulate() {
    let chunks: Vec<Vec<u8>> = [
        "data: {\"content\":\"Hel\",\"usage\":{\"tokens\":1}}\n\n",
        "data: {\"content\":\"lo\",\"usage\":{\"tokens\":2}}\n\n",
        "data: [DONE]\n\n",
    ]
    .iter()
    .map(|s| s.as_bytes().to_vec())
    .collect();
    let events = EventStream::new(tokenflow_stream::from_iter(chunks));
    let mut json = JsonStream::new(DataStream::new(events));
    let merged = accumulate(&mut json).await.unwrap().unwrap();
    assert_eq!(
        merged,
        serde_json::json!({"content": "Hello", "usage": {"tokens": 3}})
    );
}
