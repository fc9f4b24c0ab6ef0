//! The bytes stage and the composed decoder.
//!
//! [`get_bytes`] drains a byte producer into a chunk callback and finishes
//! with an empty chunk carrying the flush flag.  [`EventStreamDecoder`] wires
//! the line and message stages together so callers can feed raw chunks and
//! receive whole messages.

use tokenflow_stream::{Producer, Result};

use crate::lines::{LineDecoder, LineEvent};
use crate::messages::{EventMessage, MessageDecoder};

/// Pull every chunk from `source` into `on_chunk`, then call it once more
/// with an empty chunk and `flush = true`.
///
/// Source errors are returned as-is; the flush call is skipped in that case.
pub async fn get_bytes<P>(source: &mut P, mut on_chunk: impl FnMut(&[u8], bool)) -> Result<()>
where
    P: Producer + ?Sized,
    P::Item: AsRef<[u8]>,
{
    while let Some(chunk) = source.next_value().await? {
        on_chunk(chunk.as_ref(), false);
    }
    on_chunk(&[], true);
    Ok(())
}

/// Line and message stages composed into one incremental decoder.
#[derive(Debug, Default)]
pub struct EventStreamDecoder {
    lines: LineDecoder,
    messages: MessageDecoder,
}

impl EventStreamDecoder {
    /// Create a decoder without id/retry callbacks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a decoder around a configured message stage.
    pub fn with_messages(messages: MessageDecoder) -> Self {
        Self {
            lines: LineDecoder::new(),
            messages,
        }
    }

    /// Feed one chunk, or flush when `flush` is set (the chunk is then
    /// ignored).  Calls `on_message` for every completed message.
    pub fn decode(&mut self, chunk: &[u8], flush: bool, mut on_message: impl FnMut(EventMessage)) {
        let messages = &mut self.messages;
        let on_line = |event: LineEvent<'_>| messages.decode(event, &mut on_message);
        if flush {
            self.lines.flush(on_line);
        } else {
            self.lines.decode(chunk, on_line);
        }
    }

    /// Feed one chunk and collect the messages it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<EventMessage> {
        let mut out = Vec::new();
        self.decode(chunk, false, |message| out.push(message));
        out
    }

    /// Flush and collect the final in-progress message, if any.
    pub fn finish(&mut self) -> Vec<EventMessage> {
        let mut out = Vec::new();
        self.decode(&[], true, |message| out.push(message));
        out
    }
}

/// Drain `source` through `decoder` and return every message, including the
/// one completed by the final flush.
pub async fn read_messages<P>(source: &mut P, decoder: &mut EventStreamDecoder) -> Result<Vec<EventMessage>>
where
    P: Producer + ?Sized,
    P::Item: AsRef<[u8]>,
{
    let mut out = Vec::new();
    get_bytes(source, |chunk, flush| {
        decoder.decode(chunk, flush, |message| out.push(message));
    })
    .await?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use tokenflow_stream::{StreamError, from_iter, from_stream};

    use super::*;

    #[tokio::test]
    async fn get_bytes_flushes_once_at_end() {
        let mut source = from_iter(vec![b"ab".to_vec(), b"c".to_vec()]);
        let mut calls = Vec::new();
        get_bytes(&mut source, |chunk, flush| calls.push((chunk.to_vec(), flush)))
            .await
            .unwrap();
        assert_eq!(
            calls,
            vec![(b"ab".to_vec(), false), (b"c".to_vec(), false), (Vec::new(), true)]
        );
    }

    #[tokio::test]
    async fn get_bytes_stops_on_source_error() {
        let body = futures::stream::iter(vec![
            Ok(b"data: a\n".to_vec()),
            Err(StreamError::upstream("connection reset")),
        ]);
        let mut source = from_stream(body);
        let mut flushed = false;
        let err = get_bytes(&mut source, |_, flush| flushed |= flush)
            .await
            .unwrap_err();
        assert_eq!(err, StreamError::upstream("connection reset"));
        assert!(!flushed);
    }

    #[test]
    fn two_chunk_scenario_yields_one_message() {
        let mut decoder = EventStreamDecoder::new();
        assert!(decoder.feed(b"data: foo\n").is_empty());
        let messages = decoder.feed(b"data: bar\n\n");
        assert_eq!(
            messages,
            vec![EventMessage {
                id: String::new(),
                event: String::new(),
                data: "foo\nbar".into(),
                retry: None,
            }]
        );
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn finish_flushes_message_without_trailing_blank_line() {
        let mut decoder = EventStreamDecoder::new();
        assert!(decoder.feed(b"event: end\ndata: last\n").is_empty());
        let messages = decoder.finish();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].event, "end");
        assert_eq!(messages[0].data, "last");
    }

    #[test]
    fn multibyte_characters_split_across_chunks() {
        let wire = "data: héllo → 世界\n\n".as_bytes();
        for split in 1..wire.len() {
            let mut decoder = EventStreamDecoder::new();
            let mut messages = decoder.feed(&wire[..split]);
            messages.extend(decoder.feed(&wire[split..]));
            assert_eq!(messages.len(), 1, "split at {split}");
            assert_eq!(messages[0].data, "héllo → 世界");
        }
    }

    #[tokio::test]
    async fn read_messages_drains_producer() {
        let mut source = from_iter(vec![
            b"id: 7\nretry: 100\ndata: {\"a\":1}\n\n".to_vec(),
            b"data: tail".to_vec(),
            b"\n".to_vec(),
        ]);
        let mut decoder = EventStreamDecoder::new();
        let messages = read_messages(&mut source, &mut decoder).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, "7");
        assert_eq!(messages[0].retry, Some(100));
        assert_eq!(messages[1].data, "tail");
    }
}
