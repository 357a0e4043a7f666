use std::collections::HashMap;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::CommandError;
use crate::parser::ParsedLine;

/// A single quoted or unquoted span of command data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Unescaped chunk text.
    pub text: String,
    /// True if the chunk was written in quotes.
    pub is_quoted: bool,
}

impl Chunk {
    /// Create a quoted chunk.
    pub fn quoted(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_quoted: true,
        }
    }

    /// Create an unquoted chunk.
    pub fn unquoted(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_quoted: false,
        }
    }
}

/// Command payload: either text chunks or an exact-length binary block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Text data, kept as chunks so quoting survives re-serialization.
    Text(Vec<Chunk>),
    /// Raw binary data.
    Raw(Bytes),
}

impl Payload {
    /// True if the payload carries no data.
    pub fn is_empty(&self) -> bool {
        match self {
            Payload::Text(chunks) => chunks.iter().all(|chunk| chunk.text.is_empty()),
            Payload::Raw(raw) => raw.is_empty(),
        }
    }
}

impl Default for Payload {
    fn default() -> Self {
        Payload::Text(Vec::new())
    }
}

/// Request, response and stream tagging of a command.
///
/// Every tagged variant carries its correlation id. An empty id is a valid id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Kind {
    /// No conventions apply.
    #[default]
    Simple,
    /// Request awaiting a response (`name?id`).
    Request(String),
    /// Successful response (`name.id`).
    SuccessResponse(String),
    /// Error response (`name!id`).
    ErrorResponse(String),
    /// Stream data (`name|id data`).
    StreamChunk(String),
    /// Stream end marker (`name|id` without data).
    StreamEnd(String),
}

impl Kind {
    /// The correlation id, if the kind is tagged.
    pub fn id(&self) -> Option<&str> {
        match self {
            Kind::Simple => None,
            Kind::Request(id)
            | Kind::SuccessResponse(id)
            | Kind::ErrorResponse(id)
            | Kind::StreamChunk(id)
            | Kind::StreamEnd(id) => Some(id),
        }
    }

    /// The character separating the name from the id on the wire.
    pub fn separator(&self) -> Option<char> {
        match self {
            Kind::Simple => None,
            Kind::Request(_) => Some('?'),
            Kind::SuccessResponse(_) => Some('.'),
            Kind::ErrorResponse(_) => Some('!'),
            Kind::StreamChunk(_) | Kind::StreamEnd(_) => Some('|'),
        }
    }
}

/// One trimsock command, the in-memory form of a frame.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Command {
    /// Command name, without the correlation suffix once conventions ran.
    pub name: String,
    /// Text or raw payload.
    pub payload: Payload,
    /// Parameters derived from `payload`; never serialized on their own.
    pub(crate) params: Option<Vec<String>>,
    pub(crate) kv_params: Option<Vec<(String, String)>>,
    /// Request/response/stream tagging.
    pub kind: Kind,
}

impl Command {
    /// Create a simple command without data.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub(crate) fn from_parsed(parsed: ParsedLine) -> Self {
        Self {
            name: parsed.name,
            payload: Payload::Text(parsed.chunks),
            ..Self::default()
        }
    }

    /// Set the data to a single text value.
    ///
    /// Text containing a space is sent quoted, so it stays one parameter.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        let chunks = if text.is_empty() {
            Vec::new()
        } else if text.contains(' ') {
            vec![Chunk::quoted(text)]
        } else {
            vec![Chunk::unquoted(text)]
        };
        self.payload = Payload::Text(chunks);
        self.params = None;
        self.kv_params = None;
        self
    }

    /// Set the data chunks verbatim.
    ///
    /// Previously derived params are dropped; the conventions rebuild them
    /// when the command is decoded.
    pub fn with_chunks(mut self, chunks: Vec<Chunk>) -> Self {
        self.payload = Payload::Text(chunks);
        self.params = None;
        self.kv_params = None;
        self
    }

    /// Set the data to a list of space-separated parameters.
    pub fn with_params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let params: Vec<String> = params.into_iter().map(Into::into).collect();
        let mut chunks = Vec::new();
        for (idx, param) in params.iter().enumerate() {
            if idx > 0 {
                push_merged(&mut chunks, Chunk::unquoted(" "));
            }
            let needs_quotes =
                param.is_empty() || param.contains(' ') || param.contains('=');
            if needs_quotes {
                chunks.push(Chunk::quoted(param.clone()));
            } else {
                push_merged(&mut chunks, Chunk::unquoted(param.clone()));
            }
        }

        self.payload = Payload::Text(chunks);
        self.params = (params.len() >= 2).then_some(params);
        self.kv_params = None;
        self
    }

    /// Set raw binary data.
    pub fn with_raw(mut self, raw: impl Into<Bytes>) -> Self {
        self.payload = Payload::Raw(raw.into());
        self.params = None;
        self.kv_params = None;
        self
    }

    /// Set the request/response/stream tagging.
    pub fn with_kind(mut self, kind: Kind) -> Self {
        self.kind = kind;
        self
    }

    /// Tag as a request with the given id.
    pub fn request(self, id: impl Into<String>) -> Self {
        self.with_kind(Kind::Request(id.into()))
    }

    /// Tag as a success response with the given id.
    pub fn success(self, id: impl Into<String>) -> Self {
        self.with_kind(Kind::SuccessResponse(id.into()))
    }

    /// Tag as an error response with the given id.
    pub fn error(self, id: impl Into<String>) -> Self {
        self.with_kind(Kind::ErrorResponse(id.into()))
    }

    /// Tag as a stream chunk with the given id.
    pub fn stream_chunk(self, id: impl Into<String>) -> Self {
        self.with_kind(Kind::StreamChunk(id.into()))
    }

    /// Tag as a stream end marker with the given id.
    pub fn stream_end(self, id: impl Into<String>) -> Self {
        self.with_kind(Kind::StreamEnd(id.into()))
    }

    /// Concatenated text data, or `None` for raw commands.
    pub fn text(&self) -> Option<String> {
        match &self.payload {
            Payload::Text(chunks) => Some(chunks.iter().map(|chunk| chunk.text.as_str()).collect()),
            Payload::Raw(_) => None,
        }
    }

    /// Data chunks, or `None` for raw commands.
    pub fn chunks(&self) -> Option<&[Chunk]> {
        match &self.payload {
            Payload::Text(chunks) => Some(chunks),
            Payload::Raw(_) => None,
        }
    }

    /// Raw data, or `None` for text commands.
    pub fn raw(&self) -> Option<&Bytes> {
        match &self.payload {
            Payload::Raw(raw) => Some(raw),
            Payload::Text(_) => None,
        }
    }

    /// Parameters, present when the data holds at least two of them.
    pub fn params(&self) -> Option<&[String]> {
        self.params.as_deref()
    }

    /// Key-value parameters in order, duplicates retained.
    pub fn kv_params(&self) -> Option<&[(String, String)]> {
        self.kv_params.as_deref()
    }

    /// Key-value parameters as a map; the last occurrence of a key wins.
    pub fn kv_map(&self) -> Option<HashMap<&str, &str>> {
        self.kv_params.as_ref().map(|pairs| {
            pairs
                .iter()
                .map(|(key, value)| (key.as_str(), value.as_str()))
                .collect()
        })
    }

    /// Stream or request id, whichever is present.
    pub fn id(&self) -> Option<&str> {
        self.kind.id()
    }

    pub fn is_request(&self) -> bool {
        matches!(self.kind, Kind::Request(_))
    }

    pub fn is_success_response(&self) -> bool {
        matches!(self.kind, Kind::SuccessResponse(_))
    }

    pub fn is_error_response(&self) -> bool {
        matches!(self.kind, Kind::ErrorResponse(_))
    }

    /// Success or error response.
    pub fn is_response(&self) -> bool {
        self.is_success_response() || self.is_error_response()
    }

    pub fn is_stream_chunk(&self) -> bool {
        matches!(self.kind, Kind::StreamChunk(_))
    }

    pub fn is_stream_end(&self) -> bool {
        matches!(self.kind, Kind::StreamEnd(_))
    }

    /// Stream chunk or stream end.
    pub fn is_stream(&self) -> bool {
        self.is_stream_chunk() || self.is_stream_end()
    }

    /// True if no further commands are expected with the same id.
    pub fn is_closing(&self) -> bool {
        self.is_response() || self.is_stream_end()
    }

    /// True if the command is neither a request, a response nor a stream item.
    pub fn is_simple(&self) -> bool {
        self.kind == Kind::Simple
    }

    pub fn is_raw(&self) -> bool {
        matches!(self.payload, Payload::Raw(_))
    }

    pub fn require_id(&self) -> Result<&str, CommandError> {
        self.id().ok_or(CommandError::MissingId)
    }

    /// Return the params, optionally checking their count.
    pub fn require_params(&self, amount: Option<usize>) -> Result<&[String], CommandError> {
        match (&self.params, amount) {
            (Some(params), None) => Ok(params),
            (Some(params), Some(n)) if params.len() == n => Ok(params),
            _ => Err(CommandError::MissingParams(amount)),
        }
    }

    pub fn require_param(&self, index: usize) -> Result<&str, CommandError> {
        self.require_params(None)?
            .get(index)
            .map(String::as_str)
            .ok_or(CommandError::MissingParam(index))
    }

    pub fn require_raw(&self) -> Result<&Bytes, CommandError> {
        self.raw().ok_or(CommandError::MissingRaw)
    }

    pub fn require_text(&self) -> Result<String, CommandError> {
        self.text().ok_or(CommandError::MissingText)
    }

    /// Name as it appears on the wire, including separator and id.
    pub fn wire_name(&self) -> String {
        match (self.kind.separator(), self.kind.id()) {
            (Some(separator), Some(id)) => format!("{}{separator}{id}", self.name),
            _ => self.name.clone(),
        }
    }

    /// Serialize into a complete frame.
    pub fn serialize(&self) -> Bytes {
        let mut dst = BytesMut::new();
        self.serialize_into(&mut dst);
        dst.freeze()
    }

    /// Append the serialized frame to `dst`.
    ///
    /// ```text
    /// text:  name SP data NL      (or `name NL` without data)
    /// raw:   CR name SP length NL bytes NL
    /// ```
    pub fn serialize_into(&self, dst: &mut BytesMut) {
        let mut name = String::new();
        write_name(&self.wire_name(), &mut name);

        match &self.payload {
            Payload::Raw(raw) if !raw.is_empty() => {
                let header = format!("{name} {}\n", raw.len());
                dst.reserve(header.len() + raw.len() + 2);
                dst.put_u8(b'\r');
                dst.put_slice(header.as_bytes());
                dst.put_slice(raw);
                dst.put_u8(b'\n');
            }
            Payload::Raw(_) => {
                dst.put_slice(name.as_bytes());
                dst.put_slice(b" \n");
            }
            Payload::Text(chunks) => {
                let mut data = String::new();
                for chunk in chunks {
                    write_chunk(chunk, &mut data);
                }

                dst.reserve(name.len() + data.len() + 2);
                dst.put_slice(name.as_bytes());
                if !data.is_empty() {
                    dst.put_u8(b' ');
                    dst.put_slice(data.as_bytes());
                }
                dst.put_u8(b'\n');
            }
        }
    }
}

fn push_merged(chunks: &mut Vec<Chunk>, chunk: Chunk) {
    match chunks.last_mut() {
        Some(last) if !last.is_quoted && !chunk.is_quoted => last.text.push_str(&chunk.text),
        _ => chunks.push(chunk),
    }
}

/// Escape `text` for use in a name or chunk.
///
/// Spaces are left alone; whether they need quoting depends on context.
pub fn escape(text: &str, out: &mut String) {
    for ch in text.chars() {
        match ch {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            other => out.push(other),
        }
    }
}

fn write_quoted(text: &str, out: &mut String) {
    out.push('"');
    escape(text, out);
    out.push('"');
}

fn write_name(name: &str, out: &mut String) {
    if name.contains(' ') {
        write_quoted(name, out);
    } else {
        escape(name, out);
    }
}

fn write_chunk(chunk: &Chunk, out: &mut String) {
    if chunk.is_quoted {
        write_quoted(&chunk.text, out);
    } else {
        escape(&chunk.text, out);
    }
}
