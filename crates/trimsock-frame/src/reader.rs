use std::collections::VecDeque;
use std::io::{ErrorKind, Read};

use crate::command::Command;
use crate::decoder::{Decoder, FrameConfig};
use crate::error::{FrameError, Result};

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete commands from any `Read` stream.
///
/// Handles partial reads internally, so callers always get complete commands.
pub struct CommandReader<T> {
    inner: T,
    decoder: Decoder,
    ready: VecDeque<Result<Command>>,
}

impl<T: Read> CommandReader<T> {
    /// Create a new command reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new command reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self::with_decoder(inner, Decoder::with_config(config))
    }

    /// Create a command reader around a preconfigured decoder.
    pub fn with_decoder(inner: T, decoder: Decoder) -> Self {
        Self {
            inner,
            decoder,
            ready: VecDeque::new(),
        }
    }

    /// Read the next complete command (blocking).
    ///
    /// Decode errors are returned in stream order; reading can continue
    /// after them. Returns `Err(FrameError::ConnectionClosed)` at a clean EOF,
    /// or the truncation error if the stream ended mid-command.
    pub fn read_command(&mut self) -> Result<Command> {
        loop {
            if let Some(item) = self.ready.pop_front() {
                return item;
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                self.decoder.finish()?;
                return Err(FrameError::ConnectionClosed);
            }

            self.ready.extend(self.decoder.ingest(&chunk[..read]));
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Update maximum command size for subsequent decoding.
    pub fn set_max_command_size(&mut self, max_command_size: usize) {
        self.decoder.set_max_command_size(max_command_size);
    }

    /// Current reader configuration.
    pub fn config(&self) -> &FrameConfig {
        self.decoder.config()
    }
}

impl<T: Read> Iterator for CommandReader<T> {
    type Item = Result<Command>;

    /// Yields commands until the stream closes cleanly.
    fn next(&mut self) -> Option<Self::Item> {
        match self.read_command() {
            Err(FrameError::ConnectionClosed) => None,
            item => Some(item),
        }
    }
}
