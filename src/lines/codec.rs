//! Newline framing for tool output and raw submission input.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a maximum line length and
//! a blank-line filter. Every item the decoder yields is trimmed and
//! non-empty; partial lines stay in the read buffer until their newline
//! arrives (or the stream ends).

use bytes::BytesMut;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Default maximum line length: 1 MiB.
pub const DEFAULT_MAX_LINE_BYTES: usize = 1_048_576;

/// Line decoder that drops blank lines and trims the rest.
#[derive(Debug)]
pub struct LineCodec {
    inner: LinesCodec,
    max_line_bytes: usize,
}

impl LineCodec {
    /// Create a codec with the default [`DEFAULT_MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(DEFAULT_MAX_LINE_BYTES)
    }

    /// Create a codec that rejects lines longer than `max_line_bytes`.
    #[must_use]
    pub fn with_max_length(max_line_bytes: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max_line_bytes),
            max_line_bytes,
        }
    }

    fn non_blank(line: &str) -> Option<String> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_owned())
        }
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.inner.decode(src).map_err(|e| map_codec_error(e, self.max_line_bytes))? {
                None => return Ok(None),
                Some(line) => {
                    if let Some(line) = Self::non_blank(&line) {
                        return Ok(Some(line));
                    }
                }
            }
        }
    }

    /// At end of stream the trailing unterminated fragment counts as a line.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.inner.decode_eof(src).map_err(|e| map_codec_error(e, self.max_line_bytes))? {
                None => return Ok(None),
                Some(line) => {
                    if let Some(line) = Self::non_blank(&line) {
                        return Ok(Some(line));
                    }
                }
            }
        }
    }
}

// ── Private helper ────────────────────────────────────────────────────────────

fn map_codec_error(e: LinesCodecError, max_line_bytes: usize) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::Io(format!("line too long: exceeded {max_line_bytes} bytes"))
        }
        LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
    }
}
