//! Line framing
//!
//! Splits the inbound byte stream on `\n`. A line that is not UTF-8 or is
//! longer than the limit is reported and skipped; the stream stays usable.

use bytes::BytesMut;

/// Longest accepted line in bytes, terminator excluded
pub const MAX_LINE_LENGTH: usize = 1 << 20;

/// One framed line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// Trimmed text, possibly empty
    Text(String),
    /// Unusable line, with the reason
    Malformed(String),
}

/// Incremental, length-bounded line splitter
#[derive(Debug)]
pub struct LineDecoder {
    max_length: usize,
    /// Bytes at the front of the buffer already searched for a terminator
    scanned: usize,
    /// Dropping the rest of an oversize line
    discarding: bool,
}

impl LineDecoder {
    pub fn new(max_length: usize) -> Self {
        LineDecoder {
            max_length: max_length.max(1),
            scanned: 0,
            discarding: false,
        }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Take the next complete line out of `buf`.
    ///
    /// Never keeps more than `max_length` bytes of an unterminated line:
    /// past that the line is reported once and its remainder discarded.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Option<Line> {
        loop {
            let Some(offset) = buf[self.scanned..].iter().position(|&b| b == b'\n') else {
                return self.hold_partial(buf);
            };
            let end = self.scanned + offset;
            let line = buf.split_to(end + 1);
            self.scanned = 0;
            if std::mem::take(&mut self.discarding) {
                // Tail of an oversize line, already reported
                continue;
            }
            return Some(self.frame(&line[..end]));
        }
    }

    /// Like `decode`, but also yields an unterminated final line once the
    /// peer has closed its side
    pub fn decode_eof(&mut self, buf: &mut BytesMut) -> Option<Line> {
        if let Some(line) = self.decode(buf) {
            return Some(line);
        }
        self.scanned = 0;
        let rest = buf.split();
        if std::mem::take(&mut self.discarding) || rest.is_empty() {
            return None;
        }
        Some(self.frame(&rest))
    }

    fn hold_partial(&mut self, buf: &mut BytesMut) -> Option<Line> {
        if buf.len() <= self.max_length {
            self.scanned = buf.len();
            return None;
        }
        buf.clear();
        self.scanned = 0;
        if self.discarding {
            return None;
        }
        self.discarding = true;
        Some(self.oversize())
    }

    fn frame(&self, bytes: &[u8]) -> Line {
        if bytes.len() > self.max_length {
            return self.oversize();
        }
        match std::str::from_utf8(bytes) {
            Ok(text) => Line::Text(text.trim().to_string()),
            Err(e) => Line::Malformed(format!("line is not valid UTF-8: {}", e)),
        }
    }

    fn oversize(&self) -> Line {
        Line::Malformed(format!("line exceeds {} bytes", self.max_length))
    }
}

impl Default for LineDecoder {
    fn default() -> Self {
        LineDecoder::new(MAX_LINE_LENGTH)
    }
}
