//! Minimal blocking echo server: accepts one TCP client and echoes commands.
//!
//! Requests are answered with a success response carrying the same data;
//! every other command is written back unchanged.
//!
//! Run with:
//!   cargo run --example echo-server
//!
//! In another terminal:
//!   printf 'hello?1 world\n' | nc 127.0.0.1 8890

use std::net::TcpListener;

use trimsock::frame::{CommandReader, CommandWriter, FrameError};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_target(false)
        .try_init();

    let listener = TcpListener::bind("127.0.0.1:8890")?;
    eprintln!("Listening on {}", listener.local_addr()?);

    let (stream, addr) = listener.accept()?;
    eprintln!("Client connected: {addr}");

    let mut reader = CommandReader::new(stream.try_clone()?);
    let mut writer = CommandWriter::new(stream);

    loop {
        let command = match reader.read_command() {
            Ok(command) => command,
            Err(FrameError::ConnectionClosed) => {
                eprintln!("Client disconnected");
                break;
            }
            Err(e @ FrameError::Io(_)) => return Err(e.into()),
            Err(e) => {
                eprintln!("Dropped malformed command: {e}");
                continue;
            }
        };

        let answer = match command.id() {
            Some(id) if command.is_request() => {
                let mut answer = command.clone();
                answer.name.clear();
                answer.success(id)
            }
            _ => command,
        };
        writer.write_command(&answer)?;
    }

    Ok(())
}
