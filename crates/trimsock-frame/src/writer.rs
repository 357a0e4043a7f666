use std::io::{ErrorKind, Write};

use bytes::BytesMut;

use crate::command::{Command, Payload};
use crate::decoder::FrameConfig;
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete commands to any `Write` stream.
pub struct CommandWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Write> CommandWriter<T> {
    /// Create a new command writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new command writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Serialize and write a complete command (blocking).
    ///
    /// Commands the peer would reject as too large are refused before
    /// anything is written.
    pub fn write_command(&mut self, command: &Command) -> Result<()> {
        self.buf.clear();
        command.serialize_into(&mut self.buf);

        let max = self.config.max_command_size;
        match &command.payload {
            Payload::Raw(raw) if raw.len() > max => {
                return Err(FrameError::RawTooLarge {
                    size: raw.len(),
                    max,
                });
            }
            Payload::Text(_) if self.buf.len() - 1 > max => {
                return Err(FrameError::CommandTooLarge {
                    size: self.buf.len() - 1,
                    max,
                });
            }
            _ => {}
        }

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
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

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Update maximum command size for subsequent writes.
    pub fn set_max_command_size(&mut self, max_command_size: usize) {
        self.config.max_command_size = max_command_size;
    }

    /// Current writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::decoder::Decoder;

    fn written(writer: CommandWriter<Cursor<Vec<u8>>>) -> Vec<u8> {
        writer.into_inner().into_inner()
    }

    #[test]
    fn write_single_command() {
        let mut writer = CommandWriter::new(Cursor::new(Vec::<u8>::new()));

        writer
            .write_command(&Command::new("hello").with_text("world"))
            .unwrap();

        assert_eq!(written(writer), b"hello world\n");
    }

    #[test]
    fn write_multiple_commands() {
        let mut writer = CommandWriter::new(Cursor::new(Vec::<u8>::new()));

        writer.write_command(&Command::new("one")).unwrap();
        writer
            .write_command(&Command::new("two").with_raw(&b"2"[..]))
            .unwrap();
        writer
            .write_command(&Command::new("").with_text("3").success("x"))
            .unwrap();

        assert_eq!(written(writer), b"one\n\rtwo 1\n2\n.x 3\n");
    }

    #[test]
    fn text_too_large_rejected() {
        let cfg = FrameConfig {
            max_command_size: 8,
        };
        let mut writer = CommandWriter::with_config(Cursor::new(Vec::<u8>::new()), cfg);

        let err = writer
            .write_command(&Command::new("cmd").with_text("oversized"))
            .unwrap_err();
        assert!(matches!(err, FrameError::CommandTooLarge { size: 13, max: 8 }));
        assert!(written(writer).is_empty());
    }

    #[test]
    fn text_at_limit_accepted() {
        let cfg = FrameConfig {
            max_command_size: 8,
        };
        let mut writer = CommandWriter::with_config(Cursor::new(Vec::<u8>::new()), cfg);

        writer
            .write_command(&Command::new("cmd").with_text("1234"))
            .unwrap();
        assert_eq!(written(writer), b"cmd 1234\n");
    }

    #[test]
    fn raw_too_large_rejected() {
        let cfg = FrameConfig {
            max_command_size: 4,
        };
        let mut writer = CommandWriter::with_config(Cursor::new(Vec::<u8>::new()), cfg);

        let err = writer
            .write_command(&Command::new("blob").with_raw(vec![0u8; 5]))
            .unwrap_err();
        assert!(matches!(err, FrameError::RawTooLarge { size: 5, max: 4 }));

        writer.set_max_command_size(5);
        assert_eq!(writer.config().max_command_size, 5);
        writer
            .write_command(&Command::new("blob").with_raw(vec![0u8; 5]))
            .unwrap();
    }

    #[test]
    fn flush_propagates() {
        let sink = FlushTrackingWriter::default();
        let flag = Arc::clone(&sink.flushed);
        let mut writer = CommandWriter::new(sink);

        writer.write_command(&Command::new("x")).unwrap();

        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn accessors_and_into_inner() {
        let cursor = Cursor::new(Vec::<u8>::new());
        let mut writer = CommandWriter::new(cursor);

        let _ = writer.get_ref();
        let _ = writer.get_mut();
        let _inner = writer.into_inner();
    }

    #[test]
    fn handles_interrupted_write_and_flush() {
        let writer_impl = InterruptedWriteThenFlush {
            wrote_once: false,
            flush_interrupted: false,
            data: Vec::new(),
        };

        let mut writer = CommandWriter::new(writer_impl);
        writer.write_command(&Command::new("retry")).unwrap();

        let inner = writer.into_inner();
        assert_eq!(inner.data, b"retry\n");
    }

    #[test]
    fn handles_would_block_write_and_flush() {
        let writer_impl = WouldBlockWriteThenFlush {
            wrote_once: false,
            flush_would_block: false,
            data: Vec::new(),
        };

        let mut writer = CommandWriter::new(writer_impl);
        writer.write_command(&Command::new("retry")).unwrap();

        let inner = writer.into_inner();
        assert_eq!(inner.data, b"retry\n");
    }

    #[test]
    fn handles_short_writes() {
        let mut writer = CommandWriter::new(OneByteWriter { data: Vec::new() });
        writer
            .write_command(&Command::new("slow").with_text("a b"))
            .unwrap();

        assert_eq!(writer.into_inner().data, b"slow \"a b\"\n");
    }

    #[test]
    fn connection_closed_when_write_returns_zero() {
        let mut writer = CommandWriter::new(ZeroWriter);
        let err = writer.write_command(&Command::new("x")).unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[derive(Default)]
    struct FlushTrackingWriter {
        flushed: Arc<AtomicBool>,
        data: Vec<u8>,
    }

    impl Write for FlushTrackingWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.flushed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct InterruptedWriteThenFlush {
        wrote_once: bool,
        flush_interrupted: bool,
        data: Vec<u8>,
    }

    impl Write for InterruptedWriteThenFlush {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if !self.wrote_once {
                self.wrote_once = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            if !self.flush_interrupted {
                self.flush_interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            Ok(())
        }
    }

    struct WouldBlockWriteThenFlush {
        wrote_once: bool,
        flush_would_block: bool,
        data: Vec<u8>,
    }

    impl Write for WouldBlockWriteThenFlush {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if !self.wrote_once {
                self.wrote_once = true;
                return Err(std::io::Error::from(ErrorKind::WouldBlock));
            }
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            if !self.flush_would_block {
                self.flush_would_block = true;
                return Err(std::io::Error::from(ErrorKind::WouldBlock));
            }
            Ok(())
        }
    }

    struct OneByteWriter {
        data: Vec<u8>,
    }

    impl Write for OneByteWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            match buf.first() {
                Some(&byte) => {
                    self.data.push(byte);
                    Ok(1)
                }
                None => Ok(0),
            }
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn written_bytes_decode() {
        let mut writer = CommandWriter::new(Cursor::new(Vec::<u8>::new()));

        writer
            .write_command(&Command::new("feed").with_text("z").stream_chunk("9"))
            .unwrap();

        let mut decoder = Decoder::new();
        let decoded = decoder.ingest(&written(writer));
        let command = decoded.into_iter().next().unwrap().unwrap();
        assert_eq!(command.name, "feed");
        assert!(command.is_stream_chunk());
        assert_eq!(command.text().unwrap(), "z");
    }
}
