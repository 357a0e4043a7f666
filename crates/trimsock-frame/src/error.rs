/// Errors that can occur while decoding or encoding trimsock commands.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// A text command exceeds the configured maximum size.
    #[error("command too large ({size} bytes, max {max})")]
    CommandTooLarge { size: usize, max: usize },

    /// A raw block header announces more bytes than allowed.
    #[error("raw payload too large ({size} bytes, max {max})")]
    RawTooLarge { size: usize, max: usize },

    /// A raw block header does not carry a valid byte count.
    #[error("invalid raw payload size: {0:?}")]
    InvalidRawSize(String),

    /// Raw payload was not followed by a newline.
    #[error("expected newline after raw payload, got {found:#04x}")]
    UnexpectedTerminator { found: u8 },

    /// The parser found a character it did not expect.
    #[error("expected {expected}, got {found:?}")]
    UnexpectedCharacter { expected: &'static str, found: char },

    /// A quoted name or chunk was never closed.
    #[error("unterminated quoted string")]
    UnterminatedQuote,

    /// Input ended in the middle of a command.
    #[error("unexpected end of input ({pending} bytes pending)")]
    UnexpectedEof { pending: usize },

    /// A command name mixes request, response and stream separators.
    #[error("ambiguous command name {0:?}")]
    AmbiguousName(String),

    /// A text line is not valid UTF-8.
    #[error("command line is not valid UTF-8")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// An I/O error occurred while reading or writing commands.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete command was received.
    #[error("connection closed")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;

/// Errors raised by the `require_*` accessors on [`crate::Command`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// The command carries neither a request nor a stream id.
    #[error("no request or stream id is present")]
    MissingId,

    /// The command has no params, or not the expected amount.
    #[error("command requires {}", param_amount(.0))]
    MissingParams(Option<usize>),

    /// The requested param index is out of range.
    #[error("command has no param at index {0}")]
    MissingParam(usize),

    /// The command has no raw payload.
    #[error("command has no raw data")]
    MissingRaw,

    /// The command has no text payload.
    #[error("command has no text data")]
    MissingText,
}

fn param_amount(amount: &Option<usize>) -> String {
    match amount {
        Some(n) => format!("{n} params"),
        None => "params".to_string(),
    }
}
