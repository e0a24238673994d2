//! Newline-delimited JSON framing
//!
//! Bytes are buffered until a `\n` arrives; each complete line is decoded on its own
//! and any trailing partial line stays buffered for the next read.

use crate::network::message::Message;
use bytes::{BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Longest line accepted before the peer is cut off (1 MiB)
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Framing errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed message: {0}")]
    Malformed(String),
    #[error("Line exceeds {0} bytes")]
    LineTooLong(usize),
}

/// Codec for one-JSON-object-per-line framing
#[derive(Debug, Clone)]
pub struct JsonLineCodec {
    max_length: usize,
    /// How far the buffer has already been scanned for a newline
    next_index: usize,
}

impl JsonLineCodec {
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_LENGTH)
    }

    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
        }
    }
}

impl Default for JsonLineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder<Message> for JsonLineCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let data = item
            .to_bytes()
            .map_err(|e| CodecError::Malformed(e.to_string()))?;

        dst.reserve(data.len() + 1);
        dst.put_slice(&data);
        dst.put_u8(b'\n');

        Ok(())
    }
}

impl Decoder for JsonLineCodec {
    type Item = Message;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let newline = src[self.next_index..].iter().position(|b| *b == b'\n');

            let Some(offset) = newline else {
                if src.len() > self.max_length {
                    return Err(CodecError::LineTooLong(self.max_length));
                }
                self.next_index = src.len();
                return Ok(None);
            };

            let line_end = self.next_index + offset;
            self.next_index = 0;

            if line_end > self.max_length {
                return Err(CodecError::LineTooLong(self.max_length));
            }

            let line = src.split_to(line_end + 1);
            let line = trim_line(&line[..line_end]);

            // Blank keep-alive lines carry no frame
            if line.is_empty() {
                continue;
            }

            return Message::from_bytes(line)
                .map(Some)
                .map_err(|e| CodecError::Malformed(e.to_string()));
        }
    }
}

fn trim_line(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let start = line
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(line.len());
    let end = line
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &line[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_lines_stay_buffered() {
        let mut codec = JsonLineCodec::new();
        let mut buf = BytesMut::from(&br#"{"type":"HE"#[..]);

        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(br#"LLO","server_id":"a#b","protocol":"SHARP/1.0"}"#);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"\n{\"type\":\"DA");
        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg, Message::hello("a#b"));
        assert_eq!(&buf[..], br#"{"type":"DA"#);
    }

    #[test]
    fn test_multiple_frames_in_one_read() {
        let mut codec = JsonLineCodec::new();
        let mut buf = BytesMut::from(&b"{\"type\":\"DATA\"}\r\n\n{\"type\":\"END_DATA\"}\n"[..]);

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Message::Data));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Message::EndData));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_malformed_line() {
        let mut codec = JsonLineCodec::new();
        let mut buf = BytesMut::from(&b"not json\n"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn test_line_too_long() {
        let mut codec = JsonLineCodec::with_max_length(16);
        let mut buf = BytesMut::from(&[b'x'; 32][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(CodecError::LineTooLong(16))
        ));
    }

    #[test]
    fn test_encode_appends_newline() {
        let mut codec = JsonLineCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(Message::EndData, &mut buf).unwrap();
        assert_eq!(&buf[..], b"{\"type\":\"END_DATA\"}\n");
    }
}
