//! Conventions derive higher-level semantics from a parsed command.
//!
//! The standard pipeline runs, in order:
//! 1. [`MultiparamConvention`]: split data into `params`
//! 2. [`KeyValueConvention`]: extract `key=value` pairs
//! 3. [`RequestResponseConvention`]: `name?id`, `name.id` and `name!id`
//! 4. [`StreamConvention`]: `name|id`
//!
//! Conventions only add derived fields. The payload is never touched.

use std::fmt;

use crate::command::{Command, Kind, Payload};
use crate::error::{FrameError, Result};

const REQUEST_SEPARATORS: [char; 3] = ['?', '.', '!'];
const STREAM_SEPARATOR: char = '|';

/// A pure transform applied to every decoded command.
pub trait Convention: Send + Sync {
    /// Derive fields from `command`, or reject it.
    fn process(&self, command: Command) -> Result<Command>;
}

/// Split text data into parameters.
///
/// Quoted chunks are one parameter each; unquoted chunks are split on spaces.
/// `params` is only set when there are at least two parameters.
#[derive(Debug, Default, Clone, Copy)]
pub struct MultiparamConvention;

impl Convention for MultiparamConvention {
    fn process(&self, mut command: Command) -> Result<Command> {
        let Payload::Text(chunks) = &command.payload else {
            return Ok(command);
        };

        let params: Vec<String> = chunks
            .iter()
            .flat_map(|chunk| {
                if chunk.is_quoted {
                    vec![chunk.text.clone()]
                } else {
                    split_words(&chunk.text).map(str::to_string).collect()
                }
            })
            .collect();

        if params.len() >= 2 {
            command.params = Some(params);
        }
        Ok(command)
    }
}

/// Extract `key=value` pairs from text data.
///
/// Either side of the `=` may be quoted. Tokens that are not part of a pair
/// stay as parameters, again only when at least two of them remain.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyValueConvention;

#[derive(Debug, PartialEq, Eq)]
enum Token {
    Text(String),
    Equals,
}

impl Convention for KeyValueConvention {
    fn process(&self, mut command: Command) -> Result<Command> {
        let Payload::Text(chunks) = &command.payload else {
            return Ok(command);
        };

        let mut tokens = Vec::new();
        for chunk in chunks {
            if chunk.is_quoted {
                tokens.push(Token::Text(chunk.text.clone()));
                continue;
            }
            for word in split_words(&chunk.text) {
                match word.split_once('=') {
                    Some((key, value)) => {
                        if !key.is_empty() {
                            tokens.push(Token::Text(key.to_string()));
                        }
                        tokens.push(Token::Equals);
                        if !value.is_empty() {
                            tokens.push(Token::Text(value.to_string()));
                        }
                    }
                    None => tokens.push(Token::Text(word.to_string())),
                }
            }
        }

        let mut pairs = Vec::new();
        let mut rest = Vec::new();
        let mut tokens = tokens.into_iter().peekable();
        while let Some(token) = tokens.next() {
            match token {
                Token::Text(key) if tokens.peek() == Some(&Token::Equals) => {
                    tokens.next();
                    match tokens.next_if(|next| matches!(next, Token::Text(_))) {
                        Some(Token::Text(value)) => pairs.push((key, value)),
                        _ => {
                            rest.push(key);
                            rest.push("=".to_string());
                        }
                    }
                }
                Token::Text(text) => rest.push(text),
                Token::Equals => rest.push("=".to_string()),
            }
        }

        if pairs.is_empty() {
            return Ok(command);
        }

        command.kv_params = Some(pairs);
        command.params = (rest.len() >= 2).then_some(rest);
        Ok(command)
    }
}

/// Tag requests (`?`), success responses (`.`) and error responses (`!`).
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestResponseConvention;

impl Convention for RequestResponseConvention {
    fn process(&self, mut command: Command) -> Result<Command> {
        if command.kind != Kind::Simple {
            return Ok(command);
        }
        let Some(at) = command.name.find(REQUEST_SEPARATORS) else {
            return Ok(command);
        };
        ensure_unambiguous(&command.name)?;

        let (separator, id) = split_name(&mut command.name, at);
        command.kind = match separator {
            '?' => Kind::Request(id),
            '.' => Kind::SuccessResponse(id),
            _ => Kind::ErrorResponse(id),
        };
        Ok(command)
    }
}

/// Tag stream chunks and stream ends (`|`).
///
/// A stream command with data is a chunk; one without data ends the stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct StreamConvention;

impl Convention for StreamConvention {
    fn process(&self, mut command: Command) -> Result<Command> {
        if command.kind != Kind::Simple {
            return Ok(command);
        }
        let Some(at) = command.name.find(STREAM_SEPARATOR) else {
            return Ok(command);
        };
        ensure_unambiguous(&command.name)?;

        let (_, id) = split_name(&mut command.name, at);
        command.kind = if command.payload.is_empty() {
            Kind::StreamEnd(id)
        } else {
            Kind::StreamChunk(id)
        };
        Ok(command)
    }
}

/// Ordered set of conventions applied to each decoded command.
pub struct ConventionPipeline {
    conventions: Vec<Box<dyn Convention>>,
}

impl ConventionPipeline {
    /// Pipeline with every standard convention, in order.
    pub fn standard() -> Self {
        Self {
            conventions: vec![
                Box::new(MultiparamConvention),
                Box::new(KeyValueConvention),
                Box::new(RequestResponseConvention),
                Box::new(StreamConvention),
            ],
        }
    }

    /// Pipeline that leaves commands as parsed.
    pub fn none() -> Self {
        Self {
            conventions: Vec::new(),
        }
    }

    /// Append a convention to run after the existing ones.
    pub fn with(mut self, convention: impl Convention + 'static) -> Self {
        self.conventions.push(Box::new(convention));
        self
    }

    /// Run every convention over `command`.
    pub fn apply(&self, command: Command) -> Result<Command> {
        self.conventions
            .iter()
            .try_fold(command, |command, convention| convention.process(command))
    }

    pub fn len(&self) -> usize {
        self.conventions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conventions.is_empty()
    }
}

impl Default for ConventionPipeline {
    fn default() -> Self {
        Self::standard()
    }
}

impl fmt::Debug for ConventionPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConventionPipeline")
            .field("conventions", &self.conventions.len())
            .finish()
    }
}

fn split_words(text: &str) -> impl Iterator<Item = &str> {
    text.split(' ').filter(|word| !word.is_empty())
}

/// A name may carry only one kind of separator.
fn ensure_unambiguous(name: &str) -> Result<()> {
    let mut seen: Option<char> = None;
    for ch in name.chars() {
        if !REQUEST_SEPARATORS.contains(&ch) && ch != STREAM_SEPARATOR {
            continue;
        }
        match seen {
            Some(first) if first != ch => return Err(FrameError::AmbiguousName(name.to_string())),
            _ => seen = Some(ch),
        }
    }
    Ok(())
}

/// Split `name` at the separator at byte offset `at`, leaving the base name.
fn split_name(name: &mut String, at: usize) -> (char, String) {
    let mut tail = name.split_off(at);
    let id = tail.split_off(1);
    let separator = tail.chars().next().unwrap_or(STREAM_SEPARATOR);
    (separator, id)
}
