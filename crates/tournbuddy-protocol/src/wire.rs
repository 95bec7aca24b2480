//! Wire format: delimiter-terminated frames.
//!
//! Each message on the wire is:
//!   [payload][DELIMITER]
//!
//! There is no length prefix, checksum, or version byte. The payload never
//! contains the delimiter (see [`Message`]).

use std::ops::Range;

use tournbuddy_types::Message;

use crate::error::ProtocolError;

pub use tournbuddy_types::DELIMITER;

/// Maximum bytes buffered without seeing a delimiter (16 MiB). Prevents
/// allocation bombs from a peer that never terminates a message.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Position of the first `delimiter` inside `buf[range]`, as an index into
/// `buf`. The range is clamped to the buffer.
pub fn find_delimiter(buf: &[u8], delimiter: u8, range: Range<usize>) -> Option<usize> {
    let end = range.end.min(buf.len());
    let start = range.start.min(end);
    buf[start..end]
        .iter()
        .position(|&b| b == delimiter)
        .map(|i| start + i)
}

/// Split the first message off `buf`.
///
/// Returns the bytes before the first delimiter and the bytes after it, or
/// `None` when `buf` holds no complete message yet.
pub fn find_next_message(buf: &[u8], delimiter: u8) -> Option<(&[u8], &[u8])> {
    find_next_message_from(buf, delimiter, 0)
}

/// Like [`find_next_message`], but skips `buf[..offset]`, which the caller
/// already scanned without finding a delimiter.
pub fn find_next_message_from(buf: &[u8], delimiter: u8, offset: usize) -> Option<(&[u8], &[u8])> {
    let end = find_delimiter(buf, delimiter, offset..buf.len())?;
    Some((&buf[..end], &buf[end + 1..]))
}

/// Encode a payload as one frame.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(payload.len() + 1);
    buf.extend_from_slice(payload);
    buf.push(DELIMITER);
    buf
}

/// Encode a message as one frame.
pub fn encode_message(msg: &Message) -> Vec<u8> {
    encode_frame(msg.as_bytes())
}

/// Incremental frame decoder.
///
/// Bytes are fed as they arrive. The decoder remembers how far it has
/// scanned, so a message split over many reads is scanned once in total, and
/// consumed bytes are compacted away only once they make up half the buffer.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    /// Start of the first unconsumed byte.
    start: usize,
    /// `buf[start..scanned]` is known to hold no delimiter.
    scanned: usize,
    max_message_size: usize,
}

impl FrameDecoder {
    /// Create a new decoder with empty buffer.
    pub fn new() -> Self {
        Self::with_max_message_size(MAX_MESSAGE_SIZE)
    }

    pub fn with_max_message_size(max_message_size: usize) -> Self {
        Self {
            buf: Vec::new(),
            start: 0,
            scanned: 0,
            max_message_size,
        }
    }

    /// Feed bytes into the decoder and extract all complete messages, in
    /// arrival order.
    ///
    /// Incomplete data is buffered for the next call.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Message>, ProtocolError> {
        self.compact();
        self.buf.extend_from_slice(bytes);

        let mut messages = Vec::new();
        while let Some(frame) = self.next_frame() {
            messages.push(Message::from_frame(frame));
        }

        let pending = self.buffered();
        if pending > self.max_message_size {
            return Err(ProtocolError::MessageTooLarge {
                size: pending,
                max: self.max_message_size,
            });
        }
        Ok(messages)
    }

    /// Peel one frame off the buffer, resuming the scan where the previous
    /// call stopped.
    fn next_frame(&mut self) -> Option<Vec<u8>> {
        let unconsumed = &self.buf[self.start..];
        let offset = self.scanned - self.start;
        match find_next_message_from(unconsumed, DELIMITER, offset) {
            Some((frame, _)) => {
                let frame = frame.to_vec();
                self.start += frame.len() + 1;
                self.scanned = self.start;
                Some(frame)
            }
            None => {
                self.scanned = self.buf.len();
                None
            }
        }
    }

    fn compact(&mut self) {
        if self.start == self.buf.len() {
            self.buf.clear();
            self.start = 0;
            self.scanned = 0;
        } else if self.start > 0 && self.start * 2 >= self.buf.len() {
            self.buf.drain(..self.start);
            self.scanned -= self.start;
            self.start = 0;
        }
    }

    /// Number of buffered bytes that do not yet form a complete message.
    pub fn buffered(&self) -> usize {
        self.buf.len() - self.start
    }

    /// Returns true if the decoder has buffered partial data.
    pub fn has_partial(&self) -> bool {
        self.buffered() > 0
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
