use bytes::{Buf, Bytes, BytesMut};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Splits an append-only byte stream into command lines and raw payloads.
///
/// Scan state (cursor, quote and escape flags) survives between calls, so a
/// line delivered across many `ingest` calls is scanned exactly once.
#[derive(Debug)]
pub struct Tokenizer {
    buf: BytesMut,
    at: usize,
    in_quote: bool,
    in_escape: bool,
}

impl Tokenizer {
    /// Create an empty tokenizer.
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            at: 0,
            in_quote: false,
            in_escape: false,
        }
    }

    /// Append incoming bytes.
    pub fn ingest(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Extract the next line terminated by an unquoted, unescaped `\n`.
    ///
    /// The terminator is not part of the result. Returns `None` while the
    /// line is still incomplete.
    pub fn read_line(&mut self) -> Option<Bytes> {
        let end = self.scan()?;
        let mut line = self.buf.split_to(end + 1);
        line.truncate(end);
        self.reset_scan();
        Some(line.freeze())
    }

    /// Remove the already scanned bytes of an incomplete line.
    ///
    /// Quote and escape state is kept, so a later [`Tokenizer::read_line`]
    /// finds the same terminator it would have found without the removal.
    pub fn take_scanned(&mut self) -> Bytes {
        let scanned = self.buf.split_to(self.at);
        self.at = 0;
        scanned.freeze()
    }

    /// Extract exactly `size` bytes of raw payload plus the byte following it.
    ///
    /// The trailing byte is consumed whatever its value and returned so the
    /// caller can check it is the expected `\n`. Returns `None` until
    /// `size + 1` bytes are buffered.
    pub fn read_raw(&mut self, size: usize) -> Option<(Bytes, u8)> {
        if self.buf.len() <= size {
            return None;
        }

        let payload = self.buf.split_to(size).freeze();
        let terminator = self.buf.get_u8();
        self.reset_scan();
        Some((payload, terminator))
    }

    /// Drop up to `count` buffered bytes, returning how many were dropped.
    pub fn skip(&mut self, count: usize) -> usize {
        let skipped = count.min(self.buf.len());
        self.buf.advance(skipped);
        self.reset_scan();
        skipped
    }

    /// Number of bytes buffered and not yet extracted.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// True if the first buffered byte is `byte`.
    pub fn starts_with(&self, byte: u8) -> bool {
        self.buf.first() == Some(&byte)
    }

    /// True if the scan currently sits inside a quoted span.
    pub fn in_quote(&self) -> bool {
        self.in_quote
    }

    /// Advance the scan to the next line terminator, returning its offset.
    fn scan(&mut self) -> Option<usize> {
        while let Some(&byte) = self.buf.get(self.at) {
            self.at += 1;

            if self.in_escape {
                self.in_escape = false;
                continue;
            }

            match byte {
                b'\\' => self.in_escape = true,
                b'"' => self.in_quote = !self.in_quote,
                b'\n' if !self.in_quote => return Some(self.at - 1),
                _ => {}
            }
        }

        None
    }

    fn reset_scan(&mut self) {
        self.at = 0;
        self.in_quote = false;
        self.in_escape = false;
    }
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_terminated_line() {
        let mut tokenizer = Tokenizer::new();
        tokenizer.ingest(b"command data\nrest");

        assert_eq!(tokenizer.read_line().unwrap().as_ref(), b"command data");
        assert_eq!(tokenizer.pending(), 4);
        assert!(tokenizer.read_line().is_none());
    }

    #[test]
    fn waits_for_terminator() {
        let mut tokenizer = Tokenizer::new();
        tokenizer.ingest(b"comm");
        assert!(tokenizer.read_line().is_none());

        tokenizer.ingest(b"and\n");
        assert_eq!(tokenizer.read_line().unwrap().as_ref(), b"command");
    }

    #[test]
    fn quoted_newline_does_not_terminate() {
        let mut tokenizer = Tokenizer::new();
        tokenizer.ingest(b"command \"foo\nbar\"\n");

        assert_eq!(
            tokenizer.read_line().unwrap().as_ref(),
            b"command \"foo\nbar\""
        );
    }

    #[test]
    fn escaped_newline_does_not_terminate() {
        let mut tokenizer = Tokenizer::new();
        tokenizer.ingest(b"command foo\\\nbar\n");

        assert_eq!(tokenizer.read_line().unwrap().as_ref(), b"command foo\\\nbar");
    }

    #[test]
    fn escaped_quote_does_not_open_quote() {
        let mut tokenizer = Tokenizer::new();
        tokenizer.ingest(b"command \\\"foo\n");

        assert_eq!(tokenizer.read_line().unwrap().as_ref(), b"command \\\"foo");
        assert!(!tokenizer.in_quote());
    }

    #[test]
    fn scan_state_survives_split_escape() {
        let mut tokenizer = Tokenizer::new();
        tokenizer.ingest(b"command foo\\");
        assert!(tokenizer.read_line().is_none());

        tokenizer.ingest(b"\nbar\n");
        assert_eq!(tokenizer.read_line().unwrap().as_ref(), b"command foo\\\nbar");
    }

    #[test]
    fn scan_state_survives_split_quote() {
        let mut tokenizer = Tokenizer::new();
        tokenizer.ingest(b"command \"foo");
        assert!(tokenizer.read_line().is_none());
        assert!(tokenizer.in_quote());

        tokenizer.ingest(b"\n\"\n");
        assert_eq!(tokenizer.read_line().unwrap().as_ref(), b"command \"foo\n\"");
        assert!(!tokenizer.in_quote());
    }

    #[test]
    fn reads_raw_payload_and_terminator() {
        let mut tokenizer = Tokenizer::new();
        tokenizer.ingest(b"12\"4");
        assert!(tokenizer.read_raw(4).is_none());

        tokenizer.ingest(b"\nnext\n");
        let (payload, terminator) = tokenizer.read_raw(4).unwrap();
        assert_eq!(payload.as_ref(), b"12\"4");
        assert_eq!(terminator, b'\n');
        assert_eq!(tokenizer.read_line().unwrap().as_ref(), b"next");
    }

    #[test]
    fn reads_empty_raw_payload() {
        let mut tokenizer = Tokenizer::new();
        tokenizer.ingest(b"\n");

        let (payload, terminator) = tokenizer.read_raw(0).unwrap();
        assert!(payload.is_empty());
        assert_eq!(terminator, b'\n');
        assert_eq!(tokenizer.pending(), 0);
    }

    #[test]
    fn take_scanned_keeps_quote_state() {
        let mut tokenizer = Tokenizer::new();
        tokenizer.ingest(b"garbage \"quo");
        assert!(tokenizer.read_line().is_none());

        assert_eq!(tokenizer.take_scanned().as_ref(), b"garbage \"quo");
        assert_eq!(tokenizer.pending(), 0);
        assert!(tokenizer.in_quote());

        tokenizer.ingest(b"ted\nstill\"\nok\n");
        assert_eq!(tokenizer.read_line().unwrap().as_ref(), b"ted\nstill\"");
        assert_eq!(tokenizer.read_line().unwrap().as_ref(), b"ok");
    }

    #[test]
    fn take_scanned_keeps_unscanned_bytes() {
        let mut tokenizer = Tokenizer::new();
        tokenizer.ingest(b"abc");
        assert!(tokenizer.take_scanned().is_empty());
        assert_eq!(tokenizer.pending(), 3);
        assert!(tokenizer.starts_with(b'a'));
    }

    #[test]
    fn skip_is_bounded_by_buffer() {
        let mut tokenizer = Tokenizer::new();
        tokenizer.ingest(b"abc");

        assert_eq!(tokenizer.skip(10), 3);
        assert_eq!(tokenizer.pending(), 0);
    }
}
