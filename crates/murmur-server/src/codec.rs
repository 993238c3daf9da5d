//! Inbound line framing.
//!
//! Splits the client byte stream on `\n` (an optional `\r` before it is
//! dropped). Lines that are too long or not valid UTF-8 are reported as
//! items rather than decoder errors: `FramedRead` ends the stream after any
//! decoder error, which would turn one bad line into a disconnect.

use std::io;

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

/// One framed client line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientLine {
    /// A complete line, without its terminator
    Line(String),
    /// A line longer than the limit; its bytes were discarded
    TooLong,
    /// A line that is not valid UTF-8; its bytes were discarded
    Invalid,
}

/// Newline framing with a length limit that skips oversized and
/// undecodable lines.
#[derive(Debug, Clone)]
pub struct ClientLineCodec {
    max_length: usize,
    /// Discarding the tail of an oversized line until the next `\n`.
    skipping: bool,
    /// Where to resume the newline search in a partial buffer.
    next_index: usize,
}

impl ClientLineCodec {
    /// Create a codec accepting lines up to `max_length` bytes.
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length,
            skipping: false,
            next_index: 0,
        }
    }
}

fn to_line(mut bytes: &[u8]) -> ClientLine {
    if let Some((b'\r', rest)) = bytes.split_last() {
        bytes = rest;
    }
    match std::str::from_utf8(bytes) {
        Ok(text) => ClientLine::Line(text.to_string()),
        Err(_) => ClientLine::Invalid,
    }
}

impl Decoder for ClientLineCodec {
    type Item = ClientLine;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let newline = src[self.next_index..]
                .iter()
                .position(|b| *b == b'\n')
                .map(|offset| self.next_index + offset);

            match newline {
                Some(pos) if self.skipping => {
                    src.advance(pos + 1);
                    self.skipping = false;
                    self.next_index = 0;
                }
                None if self.skipping => {
                    src.clear();
                    self.next_index = 0;
                    return Ok(None);
                }
                Some(pos) => {
                    self.next_index = 0;
                    let line = src.split_to(pos + 1);
                    if pos > self.max_length {
                        return Ok(Some(ClientLine::TooLong));
                    }
                    return Ok(Some(to_line(&line[..pos])));
                }
                None if src.len() > self.max_length => {
                    src.clear();
                    self.skipping = true;
                    self.next_index = 0;
                    return Ok(Some(ClientLine::TooLong));
                }
                None => {
                    self.next_index = src.len();
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        self.next_index = 0;
        if self.skipping || src.is_empty() {
            self.skipping = false;
            src.clear();
            return Ok(None);
        }
        let line = src.split();
        Ok(Some(to_line(&line)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(text: &str) -> Option<ClientLine> {
        Some(ClientLine::Line(text.to_string()))
    }

    #[test]
    fn decode_lines_and_strip_crlf() {
        let mut codec = ClientLineCodec::new(64);
        let mut buf = BytesMut::from("alice\r\n/list\n");

        assert_eq!(codec.decode(&mut buf).unwrap(), line("alice"));
        assert_eq!(codec.decode(&mut buf).unwrap(), line("/list"));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn decode_line_split_across_reads() {
        let mut codec = ClientLineCodec::new(64);
        let mut buf = BytesMut::from("hel");

        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"lo\nworld");
        assert_eq!(codec.decode(&mut buf).unwrap(), line("hello"));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), line("world"));
    }

    #[test]
    fn decode_skips_oversized_line_and_continues() {
        let mut codec = ClientLineCodec::new(8);
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[b'x'; 40]);
        buf.extend_from_slice(b"\nhello\n");

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(ClientLine::TooLong));
        assert_eq!(codec.decode(&mut buf).unwrap(), line("hello"));
    }

    #[test]
    fn decode_accepts_line_at_limit() {
        let mut codec = ClientLineCodec::new(5);
        let mut buf = BytesMut::from("hello\n");

        assert_eq!(codec.decode(&mut buf).unwrap(), line("hello"));
    }

    #[test]
    fn decode_oversized_partial_then_completes() {
        let mut codec = ClientLineCodec::new(8);
        let mut buf = BytesMut::from(&[b'x'; 20][..]);

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(ClientLine::TooLong));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"xxxx\nok\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), line("ok"));
    }

    #[test]
    fn decode_eof_returns_unterminated_line() {
        let mut codec = ClientLineCodec::new(64);
        let mut buf = BytesMut::from("bye");

        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), line("bye"));
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
    }

    #[test]
    fn decode_skips_invalid_utf8_and_continues() {
        let mut codec = ClientLineCodec::new(64);
        let mut buf = BytesMut::from(&b"\xff\xfe\n/list\n"[..]);

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(ClientLine::Invalid));
        assert_eq!(codec.decode(&mut buf).unwrap(), line("/list"));
    }
}
