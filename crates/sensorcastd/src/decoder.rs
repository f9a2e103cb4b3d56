//! Byte stream decoders.
//!
//! A decoder turns the raw bytes of one physical source into reading
//! tuples, one tuple per decoded unit, where position `i` of a tuple
//! belongs to the `i`-th sensor of the source's spec.
//!
//! Decoders are `tokio_util` codecs driven by [`FramedRead`], so the
//! reader loop consumes them as a lazy `Stream` that ends on EOF. The
//! [`DecoderKind`] chosen at configuration time is the only thing shared
//! between sources; every connection gets a fresh codec holding nothing
//! but its framing position.
//!
//! # Malformed input
//!
//! Lines that cannot be decoded are skipped with a warning and decoding
//! continues with the next line. Only I/O failures end the sequence.

use bytes::{Buf, BytesMut};
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio_util::codec::{Decoder, FramedRead};
use tracing::{debug, warn};

use sensorcast_core::DecoderKind;

/// Field separator inside a line.
pub const FIELD_DELIMITER: char = ',';

/// Lines longer than this are discarded up to the next newline.
pub const MAX_LINE_LENGTH: usize = 4096;

/// The readings decoded from one unit, in sensor order.
pub type ReadingTuple = Vec<i64>;

/// Errors that end a decoded sequence.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reasons a single line is skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedLine {
    #[error("line is not valid UTF-8")]
    NotUtf8,

    #[error("line is empty")]
    Empty,

    #[error("field {index} is not an integer: {field:?}")]
    InvalidField { index: usize, field: String },
}

/// Wraps a byte source in the decoder selected by `kind`.
pub fn decode<R: AsyncRead>(kind: DecoderKind, source: R) -> FramedRead<R, ReadingsCodec> {
    FramedRead::new(source, ReadingsCodec::new(kind))
}

/// Parses one line (without its terminator) into a reading tuple.
///
/// Surrounding whitespace, including a trailing `\r`, is ignored.
pub fn parse_line(line: &[u8]) -> Result<ReadingTuple, MalformedLine> {
    let text = std::str::from_utf8(line).map_err(|_| MalformedLine::NotUtf8)?;
    let text = text.trim();

    if text.is_empty() {
        return Err(MalformedLine::Empty);
    }

    text.split(FIELD_DELIMITER)
        .enumerate()
        .map(|(index, field)| {
            let field = field.trim();
            field.parse::<i64>().map_err(|_| MalformedLine::InvalidField {
                index,
                field: field.to_string(),
            })
        })
        .collect()
}

/// Codec for one connection to a physical source.
#[derive(Debug, Clone)]
pub struct ReadingsCodec {
    kind: DecoderKind,

    /// Offset already scanned for a newline
    next_index: usize,

    /// Dropping an over-long line until its newline arrives
    discarding: bool,

    /// Lines skipped on this connection
    skipped: u64,
}

impl ReadingsCodec {
    /// Creates a codec for the given decoder.
    pub fn new(kind: DecoderKind) -> Self {
        Self {
            kind,
            next_index: 0,
            discarding: false,
            skipped: 0,
        }
    }

    /// Returns the decoder this codec implements.
    pub fn kind(&self) -> DecoderKind {
        self.kind
    }

    /// Number of malformed or over-long lines skipped so far.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    fn decode_line(&mut self, buf: &mut BytesMut) -> Option<ReadingTuple> {
        loop {
            let newline = buf
                .get(self.next_index..)
                .and_then(|rest| rest.iter().position(|b| *b == b'\n'))
                .map(|offset| self.next_index + offset);

            let Some(end) = newline else {
                if buf.len() > MAX_LINE_LENGTH {
                    // Counted once, however many chunks the line spans.
                    if !self.discarding {
                        self.discard_long(buf.len());
                        self.discarding = true;
                    }
                    buf.clear();
                    self.next_index = 0;
                } else {
                    self.next_index = buf.len();
                }
                return None;
            };

            let line = buf.split_to(end + 1);
            self.next_index = 0;

            if self.discarding {
                self.discarding = false;
                continue;
            }

            if end > MAX_LINE_LENGTH {
                self.discard_long(end);
                continue;
            }

            let body = line.get(..end).unwrap_or_default();
            if let Some(tuple) = self.accept(body) {
                return Some(tuple);
            }
        }
    }

    fn discard_long(&mut self, length: usize) {
        warn!(length, max = MAX_LINE_LENGTH, "Discarding over-long line");
        self.skipped += 1;
    }

    /// Parses a complete line, logging and counting it if malformed.
    fn accept(&mut self, line: &[u8]) -> Option<ReadingTuple> {
        match parse_line(line) {
            Ok(tuple) => Some(tuple),
            Err(MalformedLine::Empty) => {
                debug!("Skipping empty line");
                None
            }
            Err(e) => {
                warn!(
                    line = %String::from_utf8_lossy(line),
                    error = %e,
                    "Skipping malformed line"
                );
                self.skipped += 1;
                None
            }
        }
    }
}

impl Decoder for ReadingsCodec {
    type Item = ReadingTuple;
    type Error = DecodeError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.kind {
            DecoderKind::ReadingsPerLine => Ok(self.decode_line(buf)),
            DecoderKind::Bytes => {
                if buf.has_remaining() {
                    Ok(Some(vec![i64::from(buf.get_u8())]))
                } else {
                    Ok(None)
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(tuple) = self.decode(buf)? {
            return Ok(Some(tuple));
        }

        // A final line without its terminator still counts.
        if self.kind == DecoderKind::ReadingsPerLine && !buf.is_empty() {
            let line = buf.split();
            self.next_index = 0;
            if std::mem::take(&mut self.discarding) {
                return Ok(None);
            }
            if line.len() > MAX_LINE_LENGTH {
                self.discard_long(line.len());
                return Ok(None);
            }
            return Ok(self.accept(&line));
        }

        Ok(None)
    }
}
