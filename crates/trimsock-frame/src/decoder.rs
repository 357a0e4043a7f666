use tracing::{trace, warn};

use crate::command::Command;
use crate::convention::ConventionPipeline;
use crate::error::{FrameError, Result};
use crate::parser::{parse_line, RAW_MARKER};
use crate::tokenizer::Tokenizer;

/// Default maximum command size: 16 KiB.
pub const DEFAULT_MAX_COMMAND_SIZE: usize = 16 * 1024;

/// Bytes kept from the end of an oversized raw header, enough for its size field.
const HEADER_TAIL: usize = 32;

/// Configuration for command decoding and encoding.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum size in bytes of a text line or raw payload. Default: 16 KiB.
    pub max_command_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_command_size: DEFAULT_MAX_COMMAND_SIZE,
        }
    }
}

#[derive(Debug)]
enum State {
    Text,
    /// Dropping an oversized line up to its terminator. `header` keeps the
    /// end of a raw header so its payload can be skipped as well.
    Discard {
        dropped: usize,
        header: Option<Vec<u8>>,
    },
    /// Waiting for the payload announced by a raw header.
    Raw { name: String, size: usize },
    /// Dropping an oversized raw payload and its terminator.
    SkipRaw { remaining: usize },
}

/// Incremental decoder turning a byte stream into commands.
///
/// Bytes may arrive in chunks of any size; the commands produced do not
/// depend on how the stream was split.
#[derive(Debug)]
pub struct Decoder {
    tokenizer: Tokenizer,
    pipeline: ConventionPipeline,
    config: FrameConfig,
    state: State,
}

impl Decoder {
    /// Create a decoder with default configuration and the standard conventions.
    pub fn new() -> Self {
        Self::with_config(FrameConfig::default())
    }

    /// Create a decoder with explicit configuration.
    pub fn with_config(config: FrameConfig) -> Self {
        Self {
            tokenizer: Tokenizer::new(),
            pipeline: ConventionPipeline::standard(),
            config,
            state: State::Text,
        }
    }

    /// Replace the convention pipeline.
    pub fn with_pipeline(mut self, pipeline: ConventionPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Feed bytes and collect every command and error they complete, in order.
    ///
    /// Errors are local to one frame; decoding continues after each of them.
    pub fn ingest(&mut self, data: &[u8]) -> Vec<Result<Command>> {
        self.tokenizer.ingest(data);

        let mut out = Vec::new();
        while self.step(&mut out) {}
        out
    }

    /// Signal end of stream.
    ///
    /// Fails if the stream stopped in the middle of a command. The decoder is
    /// reset either way.
    pub fn finish(&mut self) -> Result<()> {
        let pending = self.tokenizer.pending();
        let result = match self.state {
            State::Discard { dropped, .. } => Err(FrameError::CommandTooLarge {
                size: dropped + pending,
                max: self.config.max_command_size,
            }),
            State::Raw { .. } | State::SkipRaw { .. } => Err(FrameError::UnexpectedEof { pending }),
            State::Text if pending == 0 => Ok(()),
            State::Text if self.tokenizer.in_quote() => Err(FrameError::UnterminatedQuote),
            State::Text => Err(FrameError::UnexpectedEof { pending }),
        };

        self.tokenizer.skip(pending);
        self.state = State::Text;
        result
    }

    /// Update maximum command size for subsequent decoding.
    pub fn set_max_command_size(&mut self, max_command_size: usize) {
        self.config.max_command_size = max_command_size;
    }

    /// Current decoder configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    /// Number of buffered bytes not yet decoded.
    pub fn pending(&self) -> usize {
        self.tokenizer.pending()
    }

    /// Advance by one frame or frame part. Returns `false` once more input is
    /// needed.
    fn step(&mut self, out: &mut Vec<Result<Command>>) -> bool {
        let max = self.config.max_command_size;

        match std::mem::replace(&mut self.state, State::Text) {
            State::Text => match self.tokenizer.read_line() {
                Some(line) if line.len() > max => {
                    let header = line
                        .starts_with(&[RAW_MARKER])
                        .then(|| keep_tail(Vec::new(), &line));
                    self.reject_line(line.len(), header, out);
                    true
                }
                Some(line) => {
                    trace!(len = line.len(), "extracted line");
                    if let Some(item) = self.decode_line(&line) {
                        out.push(item);
                    }
                    true
                }
                None if self.tokenizer.pending() > max => {
                    let pending = self.tokenizer.pending();
                    trace!(pending, max, "discarding oversized command");
                    self.state = State::Discard {
                        dropped: 0,
                        header: self.tokenizer.starts_with(RAW_MARKER).then(Vec::new),
                    };
                    true
                }
                None => false,
            },
            State::Discard { dropped, header } => match self.tokenizer.read_line() {
                Some(rest) => {
                    let header = header.map(|header| keep_tail(header, &rest));
                    self.reject_line(dropped + rest.len(), header, out);
                    true
                }
                None => {
                    let scanned = self.tokenizer.take_scanned();
                    self.state = State::Discard {
                        dropped: dropped + scanned.len(),
                        header: header.map(|header| keep_tail(header, &scanned)),
                    };
                    false
                }
            },
            State::Raw { name, size } => match self.tokenizer.read_raw(size) {
                Some((payload, terminator)) => {
                    trace!(%name, size, "extracted raw payload");
                    out.push(self.pipeline.apply(Command::new(name).with_raw(payload)));
                    if terminator != b'\n' {
                        warn!(found = terminator, "raw payload not terminated by newline");
                        out.push(Err(FrameError::UnexpectedTerminator { found: terminator }));
                    }
                    true
                }
                None => {
                    self.state = State::Raw { name, size };
                    false
                }
            },
            State::SkipRaw { remaining } => {
                let skipped = self.tokenizer.skip(remaining);
                if skipped < remaining {
                    self.state = State::SkipRaw {
                        remaining: remaining - skipped,
                    };
                    return false;
                }
                true
            }
        }
    }

    /// Parse one line. Raw headers switch state and produce nothing yet.
    fn decode_line(&mut self, line: &[u8]) -> Option<Result<Command>> {
        let parsed = match parse_line(line) {
            Ok(parsed) => parsed,
            Err(err) => return Some(Err(err)),
        };

        if !parsed.is_raw_header {
            return Some(self.pipeline.apply(Command::from_parsed(parsed)));
        }

        let size = match parsed.raw_size() {
            Ok(size) => size,
            Err(err) => return Some(Err(err)),
        };
        let max = self.config.max_command_size;
        if size > max {
            warn!(size, max, name = %parsed.name, "skipping oversized raw payload");
            self.state = State::SkipRaw {
                remaining: size.saturating_add(1),
            };
            return Some(Err(FrameError::RawTooLarge { size, max }));
        }

        self.state = State::Raw {
            name: parsed.name,
            size,
        };
        None
    }

    /// Report an oversized line once its terminator is reached. A raw header
    /// still announces a payload, which is skipped instead of read as text.
    fn reject_line(
        &mut self,
        size: usize,
        header: Option<Vec<u8>>,
        out: &mut Vec<Result<Command>>,
    ) {
        let max = self.config.max_command_size;
        warn!(size, max, "dropping oversized command");

        match header.as_deref().and_then(announced_size) {
            Some(raw) => {
                self.state = State::SkipRaw {
                    remaining: raw.saturating_add(1),
                };
                if raw > max {
                    out.push(Err(FrameError::RawTooLarge { size: raw, max }));
                } else {
                    out.push(Err(FrameError::CommandTooLarge { size, max }));
                }
            }
            None => out.push(Err(FrameError::CommandTooLarge { size, max })),
        }
    }
}

/// Append `bytes` and keep only the last [`HEADER_TAIL`] bytes.
fn keep_tail(mut tail: Vec<u8>, bytes: &[u8]) -> Vec<u8> {
    tail.extend_from_slice(&bytes[bytes.len().saturating_sub(HEADER_TAIL)..]);
    let excess = tail.len().saturating_sub(HEADER_TAIL);
    tail.drain(..excess);
    tail
}

/// Byte count at the end of a raw header, if it parses.
fn announced_size(header: &[u8]) -> Option<usize> {
    let end = header.iter().rposition(|byte| !byte.is_ascii_whitespace())? + 1;
    let start = header[..end]
        .iter()
        .rposition(|&byte| byte == b' ')
        .map_or(0, |at| at + 1);
    std::str::from_utf8(&header[start..end]).ok()?.parse().ok()
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
