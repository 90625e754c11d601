// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Newline framing for client streams.
//!
//! Lines are raw bytes: UTF-8 validation is left to the entry parser, which
//! tolerates anything. A trailing `\r` is stripped and a final line without a
//! terminator is still yielded when the peer closes the stream.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::Decoder;

use crate::errors::LineCodecError;

/// Default maximum line length, in bytes.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 64 * 1024;

/// Splits a byte stream on `\n` with an upper bound on line length.
#[derive(Debug, Clone)]
pub struct LineCodec {
    max_length: usize,
    // Offset up to which the buffer is known to contain no newline.
    next_index: usize,
}

impl LineCodec {
    #[must_use]
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
        }
    }

    #[must_use]
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    fn take_line(&mut self, src: &mut BytesMut, newline_at: usize) -> Bytes {
        self.next_index = 0;
        let mut line = src.split_to(newline_at + 1);
        line.truncate(newline_at);
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }
        line.freeze()
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE_LENGTH)
    }
}

impl Decoder for LineCodec {
    type Item = Bytes;
    type Error = LineCodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, LineCodecError> {
        // Look one byte past the limit so a newline right at the limit is accepted.
        let read_to = std::cmp::min(self.max_length.saturating_add(1), src.len());
        let newline = src[self.next_index..read_to]
            .iter()
            .position(|b| *b == b'\n');

        match newline {
            Some(offset) => {
                let newline_at = self.next_index + offset;
                Ok(Some(self.take_line(src, newline_at)))
            }
            None if src.len() > self.max_length => {
                Err(LineCodecError::MaxLineLengthExceeded(self.max_length))
            }
            None => {
                self.next_index = read_to;
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, LineCodecError> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        if src.is_empty() {
            return Ok(None);
        }
        self.next_index = 0;
        let mut line = src.split();
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }
        Ok(Some(line.freeze()))
    }
}
