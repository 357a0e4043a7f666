//! Line-oriented command framing for the trimsock protocol.
//!
//! Every command is either a text line or a raw block:
//! - `name data\n`, where data is a mix of quoted and unquoted chunks
//! - `\rname size\n` followed by exactly `size` bytes and a `\n`
//!
//! Names may carry a request, response or stream id (`get?1`, `.1`, `!1`,
//! `feed|1`). The [`Decoder`] handles arbitrary chunking of the input, so
//! no buffer management is needed in user code.

pub mod command;
pub mod convention;
pub mod decoder;
pub mod error;
pub mod parser;
pub mod reader;
pub mod tokenizer;
pub mod writer;

pub use command::{escape, Chunk, Command, Kind, Payload};
pub use convention::{
    Convention, ConventionPipeline, KeyValueConvention, MultiparamConvention,
    RequestResponseConvention, StreamConvention,
};
pub use decoder::{Decoder, FrameConfig, DEFAULT_MAX_COMMAND_SIZE};
pub use error::{CommandError, FrameError, Result};
pub use parser::{parse_line, ParsedLine};
pub use reader::CommandReader;
pub use tokenizer::Tokenizer;
pub use writer::CommandWriter;
