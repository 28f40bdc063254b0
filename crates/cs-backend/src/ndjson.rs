//! Newline-delimited JSON framing for the send-message stream.
//!
//! Splits a byte stream on `\n`, decodes each line as UTF-8 and classifies it
//! as one [`StreamRecord`]. Malformed lines are fatal: the stream reports the
//! error once and then ends.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use cs_protocol::{MessageIds, Packet, SessionCreated, StreamRecord, StreamingError};
use futures::Stream;
use serde_json::Value;
use thiserror::Error;

/// A line that could not be turned into a record.
#[derive(Debug, Error)]
pub enum FramingError {
    #[error("line {line}: not valid UTF-8")]
    InvalidUtf8 { line: usize },
    #[error("line {line}: not valid JSON: {source}")]
    InvalidJson {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("line {line}: malformed {shape} record: {source}")]
    InvalidRecord {
        line: usize,
        shape: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("line {line}: record matches no known shape")]
    UnknownShape { line: usize },
}

/// Error yielded by [`NdjsonStream`].
#[derive(Debug, Error)]
pub enum NdjsonError<E> {
    #[error("transport error: {0}")]
    Transport(E),
    #[error(transparent)]
    Framing(#[from] FramingError),
}

/// Parse one raw line (without its newline). Blank lines yield `None`.
pub fn parse_line(line: usize, raw: &[u8]) -> Result<Option<StreamRecord>, FramingError> {
    let text = std::str::from_utf8(raw).map_err(|_| FramingError::InvalidUtf8 { line })?;
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    let value: Value =
        serde_json::from_str(text).map_err(|source| FramingError::InvalidJson { line, source })?;
    classify(line, value).map(Some)
}

/// Decide which record shape a parsed line has.
fn classify(line: usize, value: Value) -> Result<StreamRecord, FramingError> {
    let Some(fields) = value.as_object() else {
        return Err(FramingError::UnknownShape { line });
    };

    let invalid = |shape: &'static str| {
        move |source| FramingError::InvalidRecord {
            line,
            shape,
            source,
        }
    };

    if fields.contains_key("placement") || fields.contains_key("obj") {
        return serde_json::from_value::<Packet>(value)
            .map(StreamRecord::Packet)
            .map_err(invalid("packet"));
    }

    if !fields.contains_key("type")
        && fields.contains_key("user_message_id")
        && fields.contains_key("reserved_assistant_message_id")
    {
        return serde_json::from_value::<MessageIds>(value)
            .map(StreamRecord::MessageIds)
            .map_err(invalid("message id"));
    }

    if fields.contains_key("chat_session_id") {
        return serde_json::from_value::<SessionCreated>(value)
            .map(StreamRecord::SessionCreated)
            .map_err(invalid("session"));
    }

    if fields.contains_key("error") {
        return serde_json::from_value::<StreamingError>(value)
            .map(StreamRecord::StreamError)
            .map_err(invalid("stream error"));
    }

    Err(FramingError::UnknownShape { line })
}

/// Stream wrapper that frames NDJSON records from a byte stream.
pub struct NdjsonStream<S> {
    inner: S,
    buf: BytesMut,
    /// Bytes of `buf` already known to hold no newline.
    scanned: usize,
    line_no: usize,
    pending: VecDeque<StreamRecord>,
    failure: Option<FramingError>,
    finished: bool,
}

impl<S> NdjsonStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buf: BytesMut::new(),
            scanned: 0,
            line_no: 0,
            pending: VecDeque::new(),
            failure: None,
            finished: false,
        }
    }

    /// Lines consumed so far, including blank ones.
    pub fn lines_read(&self) -> usize {
        self.line_no
    }

    /// Parse every complete line in the buffer. Stops at the first bad line.
    fn drain_lines(&mut self) {
        while self.failure.is_none() {
            let Some(offset) = self.buf[self.scanned..].iter().position(|b| *b == b'\n') else {
                self.scanned = self.buf.len();
                break;
            };
            let pos = self.scanned + offset;
            let line = self.buf.split_to(pos + 1);
            self.scanned = 0;
            self.push_line(&line[..pos]);
        }
    }

    fn push_line(&mut self, raw: &[u8]) {
        self.line_no += 1;
        match parse_line(self.line_no, raw) {
            Ok(Some(record)) => self.pending.push_back(record),
            Ok(None) => {}
            Err(e) => {
                self.failure = Some(e);
                self.buf.clear();
                self.scanned = 0;
            }
        }
    }
}

impl<S, E> Stream for NdjsonStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<StreamRecord, NdjsonError<E>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;

        loop {
            // Records parsed before a failure still go out first
            if let Some(record) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(record)));
            }
            if let Some(e) = this.failure.take() {
                this.finished = true;
                return Poll::Ready(Some(Err(NdjsonError::Framing(e))));
            }
            if this.finished {
                return Poll::Ready(None);
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    this.buf.extend_from_slice(&bytes);
                    this.drain_lines();
                }
                Poll::Ready(Some(Err(e))) => {
                    this.finished = true;
                    return Poll::Ready(Some(Err(NdjsonError::Transport(e))));
                }
                Poll::Ready(None) => {
                    // Body closed. A trailing line without newline is still a record.
                    this.finished = true;
                    if !this.buf.is_empty() {
                        let rest = this.buf.split();
                        this.scanned = 0;
                        this.push_line(&rest);
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Create an NDJSON record stream from a byte stream.
pub fn ndjson_stream<S, E>(stream: S) -> NdjsonStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    NdjsonStream::new(stream)
}
