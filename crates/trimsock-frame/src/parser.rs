//! Parsing of a single extracted command line.
//!
//! A line is `name SP data`, where the name is either quoted or runs up to the
//! first unescaped space, and the data is a sequence of quoted and unquoted
//! chunks. A leading `\r` marks the header of a raw block, whose data is the
//! decimal byte count of the payload that follows the line.

use crate::command::Chunk;
use crate::error::{FrameError, Result};

/// Byte marking a raw block header.
pub const RAW_MARKER: u8 = b'\r';

/// Result of parsing one line, before conventions are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLine {
    /// Unescaped command name.
    pub name: String,
    /// Data chunks in line order.
    pub chunks: Vec<Chunk>,
    /// True if the line announces a raw payload.
    pub is_raw_header: bool,
}

impl ParsedLine {
    /// Concatenated chunk text.
    pub fn text(&self) -> String {
        self.chunks.iter().map(|chunk| chunk.text.as_str()).collect()
    }

    /// Interpret the data as the byte count of a raw block.
    pub fn raw_size(&self) -> Result<usize> {
        let text = self.text();
        text.trim()
            .parse::<usize>()
            .map_err(|_| FrameError::InvalidRawSize(text))
    }
}

/// Parse one line, without its terminator.
pub fn parse_line(line: &[u8]) -> Result<ParsedLine> {
    std::str::from_utf8(line)?;

    let mut cursor = LineCursor { line, at: 0 };
    let is_raw_header = cursor.eat(RAW_MARKER);
    let name = cursor.read_name()?;

    let mut chunks = Vec::new();
    while !cursor.at_end() {
        chunks.push(cursor.read_chunk()?);
    }

    Ok(ParsedLine {
        name,
        chunks,
        is_raw_header,
    })
}

/// Decode the byte following a backslash.
pub(crate) fn unescape(byte: u8) -> u8 {
    match byte {
        b'n' => b'\n',
        b'r' => b'\r',
        other => other,
    }
}

struct LineCursor<'a> {
    line: &'a [u8],
    at: usize,
}

impl LineCursor<'_> {
    fn peek(&self) -> Option<u8> {
        self.line.get(self.at).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.at += 1;
        Some(byte)
    }

    fn eat(&mut self, expected: u8) -> bool {
        if self.peek() == Some(expected) {
            self.at += 1;
            true
        } else {
            false
        }
    }

    fn at_end(&self) -> bool {
        self.at >= self.line.len()
    }

    fn read_name(&mut self) -> Result<String> {
        if self.peek() == Some(b'"') {
            let name = self.read_quoted()?;
            match self.bump() {
                None | Some(b' ') => Ok(name),
                Some(other) => Err(FrameError::UnexpectedCharacter {
                    expected: "space after quoted name",
                    found: char::from(other),
                }),
            }
        } else {
            let mut out = Vec::new();
            while let Some(byte) = self.bump() {
                match byte {
                    b' ' => break,
                    b'\\' => out.push(self.bump().map_or(b'\\', unescape)),
                    other => out.push(other),
                }
            }
            into_string(out)
        }
    }

    fn read_chunk(&mut self) -> Result<Chunk> {
        if self.peek() == Some(b'"') {
            Ok(Chunk::quoted(self.read_quoted()?))
        } else {
            Ok(Chunk::unquoted(self.read_unquoted()?))
        }
    }

    fn read_unquoted(&mut self) -> Result<String> {
        let mut out = Vec::new();
        while let Some(byte) = self.peek() {
            match byte {
                b'"' => break,
                b'\\' => {
                    self.at += 1;
                    out.push(self.bump().map_or(b'\\', unescape));
                }
                other => {
                    self.at += 1;
                    out.push(other);
                }
            }
        }
        into_string(out)
    }

    fn read_quoted(&mut self) -> Result<String> {
        // Opening quote.
        self.at += 1;

        let mut out = Vec::new();
        loop {
            match self.bump().ok_or(FrameError::UnterminatedQuote)? {
                b'"' => break,
                b'\\' => out.push(unescape(self.bump().ok_or(FrameError::UnterminatedQuote)?)),
                other => out.push(other),
            }
        }
        into_string(out)
    }
}

fn into_string(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|err| FrameError::InvalidUtf8(err.utf8_error()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> ParsedLine {
        parse_line(line.as_bytes()).unwrap()
    }

    #[test]
    fn parses_simple_name() {
        let parsed = parse("command ");
        assert_eq!(parsed.name, "command");
        assert!(parsed.chunks.is_empty());
        assert!(!parsed.is_raw_header);
    }

    #[test]
    fn parses_name_without_data() {
        let parsed = parse("command");
        assert_eq!(parsed.name, "command");
        assert!(parsed.chunks.is_empty());
    }

    #[test]
    fn parses_quoted_name() {
        let parsed = parse("\"command name\" ");
        assert_eq!(parsed.name, "command name");
        assert!(parsed.chunks.is_empty());
    }

    #[test]
    fn parses_escaped_name() {
        let parsed = parse("com\\nmand\\ x data");
        assert_eq!(parsed.name, "com\nmand x");
        assert_eq!(parsed.text(), "data");
    }

    #[test]
    fn parses_unquoted_chunk() {
        let parsed = parse("command foo bar");
        assert_eq!(parsed.chunks, vec![Chunk::unquoted("foo bar")]);
        assert_eq!(parsed.text(), "foo bar");
    }

    #[test]
    fn parses_quoted_chunk() {
        let parsed = parse("command \"foo bar\"");
        assert_eq!(parsed.chunks, vec![Chunk::quoted("foo bar")]);
    }

    #[test]
    fn parses_mixed_chunks() {
        let parsed = parse("command foo \"bar quix\" baz");
        assert_eq!(
            parsed.chunks,
            vec![
                Chunk::unquoted("foo "),
                Chunk::quoted("bar quix"),
                Chunk::unquoted(" baz"),
            ]
        );
        assert_eq!(parsed.text(), "foo bar quix baz");
    }

    #[test]
    fn unescapes_chunks() {
        let parsed = parse("command da\\nta \"q\\\"uo\\rte\" back\\\\slash");
        assert_eq!(parsed.text(), "da\nta q\"uo\rte back\\slash");
    }

    #[test]
    fn keeps_escaped_quote_in_unquoted_chunk() {
        let parsed = parse("command say\\\"hi");
        assert_eq!(parsed.chunks, vec![Chunk::unquoted("say\"hi")]);
    }

    #[test]
    fn parses_empty_quoted_chunk() {
        let parsed = parse("command \"\"");
        assert_eq!(parsed.chunks, vec![Chunk::quoted("")]);
    }

    #[test]
    fn parses_raw_header() {
        let parsed = parse("\rcommand 4");
        assert!(parsed.is_raw_header);
        assert_eq!(parsed.name, "command");
        assert_eq!(parsed.raw_size().unwrap(), 4);
    }

    #[test]
    fn rejects_invalid_raw_size() {
        let parsed = parse("\rcommand four");
        assert!(matches!(
            parsed.raw_size(),
            Err(FrameError::InvalidRawSize(text)) if text == "four"
        ));
    }

    #[test]
    fn rejects_negative_raw_size() {
        let parsed = parse("\rcommand -4");
        assert!(matches!(parsed.raw_size(), Err(FrameError::InvalidRawSize(_))));
    }

    #[test]
    fn rejects_unterminated_quoted_chunk() {
        let err = parse_line(b"command \"foo").unwrap_err();
        assert!(matches!(err, FrameError::UnterminatedQuote));
    }

    #[test]
    fn rejects_unterminated_quoted_name() {
        let err = parse_line(b"\"command").unwrap_err();
        assert!(matches!(err, FrameError::UnterminatedQuote));
    }

    #[test]
    fn rejects_garbage_after_quoted_name() {
        let err = parse_line(b"\"command\"x data").unwrap_err();
        assert!(matches!(
            err,
            FrameError::UnexpectedCharacter { found: 'x', .. }
        ));
    }

    #[test]
    fn rejects_invalid_utf8() {
        let err = parse_line(b"command \xff\xfe").unwrap_err();
        assert!(matches!(err, FrameError::InvalidUtf8(_)));
    }

    #[test]
    fn keeps_multibyte_text() {
        let parsed = parse("üzenet \"árvíz tűrő\" tükör");
        assert_eq!(parsed.name, "üzenet");
        assert_eq!(parsed.text(), "árvíz tűrő tükör");
    }
}
