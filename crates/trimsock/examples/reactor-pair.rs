//! Two reactors wired back to back in memory.
//!
//! The "server" answers `sum` requests and streams a countdown for `count`;
//! the "client" issues both and prints what comes back.
//!
//! Run with:
//!   cargo run --example reactor-pair

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;

use bytes::Bytes;
use futures_util::StreamExt;
use trimsock::frame::Command;
use trimsock::reactor::{Exchange, HandlerResult, Reactor};

/// Frames written by one side and not yet delivered to the other.
type Wire = Rc<RefCell<VecDeque<Bytes>>>;

fn endpoint(outbox: &Wire) -> Reactor<&'static str> {
    let outbox = Rc::clone(outbox);
    Reactor::new(move |_peer: &&'static str, frame: Bytes| -> io::Result<()> {
        outbox.borrow_mut().push_back(frame);
        Ok(())
    })
}

async fn sum(command: Command, exchange: Exchange<&'static str>) -> HandlerResult {
    let mut total = 0i64;
    for param in command.require_params(None)? {
        total += param.parse::<i64>()?;
    }
    exchange.reply(Command::new("").with_text(total.to_string()))?;
    Ok(())
}

async fn count(command: Command, exchange: Exchange<&'static str>) -> HandlerResult {
    let from: u32 = command.require_text()?.parse()?;
    for n in (1..=from).rev() {
        exchange.stream(Command::new("").with_text(n.to_string()))?;
    }
    exchange.finish_stream()?;
    Ok(())
}

/// Deliver queued frames in both directions until the wires are quiet.
async fn pump(
    client: &Reactor<&'static str>,
    to_client: &Wire,
    server: &Reactor<&'static str>,
    to_server: &Wire,
) {
    loop {
        client.run_until_stalled().await;
        server.run_until_stalled().await;
        let outgoing: Vec<Bytes> = to_server.borrow_mut().drain(..).collect();
        let incoming: Vec<Bytes> = to_client.borrow_mut().drain(..).collect();
        if outgoing.is_empty() && incoming.is_empty() {
            return;
        }
        for frame in outgoing {
            for err in server.ingest(&frame, "client") {
                tracing::warn!(error = %err, "server rejected frame");
            }
        }
        for frame in incoming {
            for err in client.ingest(&frame, "server") {
                tracing::warn!(error = %err, "client rejected frame");
            }
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_target(false)
        .try_init();

    let to_server = Wire::default();
    let to_client = Wire::default();

    let server = endpoint(&to_client).on("sum", sum).on("count", count);
    let client = endpoint(&to_server);

    let request = client.request("server", Command::new("sum").with_params(["1", "2", "39"]))?;
    let reply = request.on_reply();
    pump(&client, &to_client, &server, &to_server).await;
    println!("sum = {}", reply.await?.text().unwrap_or_default());

    let countdown = client.request("server", Command::new("count").with_text("3"))?;
    let chunks = countdown.chunks();
    pump(&client, &to_client, &server, &to_server).await;
    let items: Vec<_> = chunks.collect().await;
    for item in items {
        println!("count: {}", item?.text().unwrap_or_default());
    }

    Ok(())
}
