//! Lines to messages.
//!
//! [`MessageDecoder`] assembles [`EventMessage`]s from the lines produced by
//! the line stage.  A blank line completes the message in progress; a flush
//! completes it only if any field was set.
//!
//! | Field   | Effect                                                 |
//! |---------|--------------------------------------------------------|
//! | `data`  | appended, newline-joined with earlier `data` values    |
//! | `event` | replaces the event name                                |
//! | `id`    | replaces the id and is reported to the id callback     |
//! | `retry` | integer milliseconds; replaces and reported, else ignored |
//!
//! Lines without a field delimiter, or with the delimiter at offset 0, are
//! comments and are ignored, as are unknown field names.

use serde::Serialize;

use crate::lines::LineEvent;

const SPACE: u8 = b' ';

/// A decoded event-stream message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EventMessage {
    /// Last `id` seen in the message, or empty.
    pub id: String,
    /// Last `event` seen in the message, or empty.
    pub event: String,
    /// All `data` values, joined with `\n`.
    pub data: String,
    /// Reconnection delay in milliseconds, if the message set one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<u64>,
}

impl EventMessage {
    /// Whether no field of the message has been set.
    pub fn is_empty(&self) -> bool {
        self.id.is_empty() && self.event.is_empty() && self.data.is_empty() && self.retry.is_none()
    }
}

type IdCallback = Box<dyn FnMut(&str) + Send>;
type RetryCallback = Box<dyn FnMut(u64) + Send>;

/// Incremental message assembler.
#[derive(Default)]
pub struct MessageDecoder {
    message: EventMessage,
    on_id: Option<IdCallback>,
    on_retry: Option<RetryCallback>,
}

impl std::fmt::Debug for MessageDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageDecoder")
            .field("message", &self.message)
            .field("on_id", &self.on_id.is_some())
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

impl MessageDecoder {
    /// Create a decoder without callbacks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Report every `id` field to `callback`.
    pub fn on_id(mut self, callback: impl FnMut(&str) + Send + 'static) -> Self {
        self.on_id = Some(Box::new(callback));
        self
    }

    /// Report every valid `retry` field to `callback`.
    pub fn on_retry(mut self, callback: impl FnMut(u64) + Send + 'static) -> Self {
        self.on_retry = Some(Box::new(callback));
        self
    }

    /// Handle one line event, calling `on_message` when a message completes.
    pub fn decode(&mut self, event: LineEvent<'_>, mut on_message: impl FnMut(EventMessage)) {
        let line = match event {
            LineEvent::Flush => {
                if !self.message.is_empty() {
                    on_message(std::mem::take(&mut self.message));
                }
                return;
            }
            LineEvent::Line(line) => line,
        };

        if line.bytes.is_empty() {
            on_message(std::mem::take(&mut self.message));
            return;
        }

        let field_len = match line.field_len {
            Some(len) if len > 0 => len,
            _ => {
                tracing::trace!("ignoring event-stream comment line");
                return;
            }
        };

        let field = String::from_utf8_lossy(&line.bytes[..field_len]);
        let value_offset = field_len + if line.bytes.get(field_len + 1) == Some(&SPACE) { 2 } else { 1 };
        let value = String::from_utf8_lossy(line.bytes.get(value_offset..).unwrap_or_default());

        match field.as_ref() {
            "data" => {
                if self.message.data.is_empty() {
                    self.message.data = value.into_owned();
                } else {
                    self.message.data.push('\n');
                    self.message.data.push_str(&value);
                }
            }
            "event" => self.message.event = value.into_owned(),
            "id" => {
                self.message.id = value.into_owned();
                if let Some(on_id) = self.on_id.as_mut() {
                    on_id(&self.message.id);
                }
            }
            "retry" => match parse_retry(&value) {
                Some(retry) => {
                    self.message.retry = Some(retry);
                    if let Some(on_retry) = self.on_retry.as_mut() {
                        on_retry(retry);
                    }
                }
                None => tracing::trace!(value = %value, "ignoring non-numeric retry"),
            },
            other => tracing::trace!(field = other, "ignoring unknown event-stream field"),
        }
    }

    /// The message assembled so far.
    pub fn in_progress(&self) -> &EventMessage {
        &self.message
    }
}

/// Parse the leading decimal digits of a `retry` value, after optional
/// leading whitespace.  Returns `None` when there are no digits.
fn parse_retry(value: &str) -> Option<u64> {
    let trimmed = value.trim_start();
    let digits = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .map_or(trimmed, |end| &trimmed[..end]);
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::lines::Line;

    fn feed(decoder: &mut MessageDecoder, raw: &str) -> Vec<EventMessage> {
        let mut out = Vec::new();
        let event = LineEvent::Line(Line {
            bytes: raw.as_bytes(),
            field_len: raw.find(':'),
        });
        decoder.decode(event, |m| out.push(m));
        out
    }

    fn flush(decoder: &mut MessageDecoder) -> Vec<EventMessage> {
        let mut out = Vec::new();
        decoder.decode(LineEvent::Flush, |m| out.push(m));
        out
    }

    #[test]
    fn blank_line_completes_message() {
        let mut d = MessageDecoder::new();
        assert!(feed(&mut d, "data: foo").is_empty());
        assert!(feed(&mut d, "data: bar").is_empty());
        let done = feed(&mut d, "");
        assert_eq!(
            done,
            vec![EventMessage {
                data: "foo\nbar".into(),
                ..EventMessage::default()
            }]
        );
        assert!(d.in_progress().is_empty());
    }

    #[test]
    fn single_space_after_colon_is_stripped_once() {
        let mut d = MessageDecoder::new();
        feed(&mut d, "data:no-space");
        feed(&mut d, "event:  two-spaces");
        let done = feed(&mut d, "");
        assert_eq!(done[0].data, "no-space");
        assert_eq!(done[0].event, " two-spaces");
    }

    #[test]
    fn event_and_id_replace() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut d = MessageDecoder::new().on_id(move |id| sink.lock().unwrap().push(id.to_owned()));
        feed(&mut d, "event: a");
        feed(&mut d, "event: b");
        feed(&mut d, "id: 1");
        feed(&mut d, "id: 2");
        let done = feed(&mut d, "");
        assert_eq!(done[0].event, "b");
        assert_eq!(done[0].id, "2");
        assert_eq!(*seen.lock().unwrap(), vec!["1", "2"]);
    }

    #[test]
    fn retry_parses_integers_and_ignores_garbage() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut d = MessageDecoder::new().on_retry(move |ms| sink.lock().unwrap().push(ms));
        feed(&mut d, "retry: 3000");
        feed(&mut d, "retry: soon");
        feed(&mut d, "retry: 250ms");
        let done = feed(&mut d, "");
        assert_eq!(done[0].retry, Some(250));
        assert_eq!(*seen.lock().unwrap(), vec![3000, 250]);
    }

    #[test]
    fn comments_and_unknown_fields_are_ignored() {
        let mut d = MessageDecoder::new();
        feed(&mut d, ": keep-alive");
        feed(&mut d, "no delimiter here");
        feed(&mut d, "foo: bar");
        assert!(d.in_progress().is_empty());
    }

    #[test]
    fn blank_line_without_fields_emits_empty_message() {
        let mut d = MessageDecoder::new();
        assert_eq!(feed(&mut d, ""), vec![EventMessage::default()]);
    }

    #[test]
    fn flush_emits_only_non_empty_message() {
        let mut d = MessageDecoder::new();
        assert!(flush(&mut d).is_empty());
        feed(&mut d, "data: tail");
        let done = flush(&mut d);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].data, "tail");
        assert!(flush(&mut d).is_empty());
    }

    #[test]
    fn empty_data_value_is_kept_verbatim() {
        let mut d = MessageDecoder::new();
        feed(&mut d, "data:");
        feed(&mut d, "data: x");
        let done = feed(&mut d, "");
        assert_eq!(done[0].data, "x");
    }

    #[test]
    fn retry_omitted_from_json_when_unset() {
        let msg = EventMessage {
            data: "d".into(),
            ..EventMessage::default()
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json, serde_json::json!({"id": "", "event": "", "data": "d"}));
    }
}
