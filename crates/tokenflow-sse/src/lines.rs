//! Byte chunks to lines.
//!
//! [`LineDecoder`] splits arbitrarily chunked bytes into event-stream lines.
//! It recognises `\n`, `\r\n` and a lone `\r` as terminators, and records the
//! offset of the first `:` in each line so the message stage can split the
//! field name from its value without scanning again.
//!
//! A `\r` at the very end of a chunk ends its line immediately; a `\n` that
//! opens the next chunk is then swallowed instead of producing an empty line.

const NEWLINE: u8 = b'\n';
const CARRIAGE_RETURN: u8 = b'\r';
const COLON: u8 = b':';

/// One decoded line, without its terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Line<'a> {
    /// The line's bytes.
    pub bytes: &'a [u8],
    /// Offset of the first `:` in `bytes`, if any.
    pub field_len: Option<usize>,
}

/// Output of the line stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEvent<'a> {
    /// A terminated line.
    Line(Line<'a>),
    /// The byte source closed; finalize whatever is in progress.
    Flush,
}

/// Incremental line splitter.
#[derive(Debug, Default)]
pub struct LineDecoder {
    /// Bytes not yet emitted as part of a complete line.
    buffer: Vec<u8>,
    /// Scan cursor into `buffer`.
    position: usize,
    /// Offset of the first colon in the line being scanned.
    field_len: Option<usize>,
    /// The previous line ended with `\r`; drop a directly following `\n`.
    discard_trailing_newline: bool,
}

impl LineDecoder {
    /// Create a decoder with an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk, calling `on_line` for every line it completes.
    ///
    /// Bytes after the last terminator are retained for the next call.
    pub fn decode(&mut self, chunk: &[u8], mut on_line: impl FnMut(LineEvent<'_>)) {
        self.buffer.extend_from_slice(chunk);
        let len = self.buffer.len();
        let mut line_start = 0;

        while self.position < len {
            if self.discard_trailing_newline {
                if self.buffer[self.position] == NEWLINE {
                    self.position += 1;
                    line_start = self.position;
                }
                self.discard_trailing_newline = false;
            }

            let mut line_end = None;
            while self.position < len && line_end.is_none() {
                match self.buffer[self.position] {
                    COLON if self.field_len.is_none() => {
                        self.field_len = Some(self.position - line_start);
                    }
                    CARRIAGE_RETURN => {
                        self.discard_trailing_newline = true;
                        line_end = Some(self.position);
                    }
                    NEWLINE => line_end = Some(self.position),
                    _ => {}
                }
                self.position += 1;
            }

            let Some(line_end) = line_end else {
                break;
            };
            let field_len = self.field_len.take();
            on_line(LineEvent::Line(Line {
                bytes: &self.buffer[line_start..line_end],
                field_len,
            }));
            line_start = self.position;
        }

        if line_start == len {
            self.buffer.clear();
            self.position = 0;
        } else if line_start != 0 {
            self.buffer.drain(..line_start);
            self.position -= line_start;
        }
    }

    /// Signal that the byte source closed.
    ///
    /// An unterminated trailing line is incomplete and is discarded.
    pub fn flush(&mut self, mut on_line: impl FnMut(LineEvent<'_>)) {
        if !self.buffer.is_empty() {
            tracing::trace!(
                bytes = self.buffer.len(),
                "discarding unterminated event-stream line"
            );
            self.buffer.clear();
            self.position = 0;
            self.field_len = None;
        }
        on_line(LineEvent::Flush);
    }

    /// Number of buffered bytes awaiting a terminator.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}
