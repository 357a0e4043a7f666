use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;

use bytes::Bytes;
use futures_util::StreamExt;
use trimsock::frame::Command;
use trimsock::reactor::{
    sequential_ids, Exchange, ExchangeError, HandlerResult, Reactor, ReactorError,
};

type Sent = Rc<RefCell<Vec<(u32, String)>>>;

fn recording() -> (Reactor<u32>, Sent) {
    let sent = Sent::default();
    let sink = Rc::clone(&sent);
    let reactor = Reactor::new(move |connection: &u32, frame: Bytes| -> io::Result<()> {
        let frame = String::from_utf8_lossy(&frame).into_owned();
        sink.borrow_mut().push((*connection, frame));
        Ok(())
    });
    (reactor, sent)
}

#[tokio::test]
async fn ping_exchange_is_resolved_by_reply_on_same_connection() {
    let (reactor, _sent) = recording();
    let replies = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&replies);
    let reactor = reactor.on("ping", move |_command: Command, exchange: Exchange<u32>| {
        let sink = Rc::clone(&sink);
        async move {
            let reply = exchange.on_reply().await?;
            sink.borrow_mut().push(reply);
            HandlerResult::Ok(())
        }
    });

    assert!(reactor.ingest(b"ping?AB12 hello\n", 7).is_empty());
    reactor.run_until_stalled().await;
    assert_eq!(reactor.open_exchanges(), 1);

    assert!(reactor.ingest(b".AB12 pong\n", 7).is_empty());
    reactor.run_until_stalled().await;

    {
        let replies = replies.borrow();
        assert_eq!(replies.len(), 1);
        assert!(replies[0].is_success_response());
        assert_eq!(replies[0].id(), Some("AB12"));
        assert_eq!(replies[0].text().as_deref(), Some("pong"));
    }
    assert_eq!(reactor.open_exchanges(), 0);

    let errors = reactor.ingest(b".AB12 pong\n", 7);
    assert!(matches!(
        errors.as_slice(),
        [ReactorError::UnknownExchange { id }] if id == "AB12"
    ));
}

#[tokio::test]
async fn stream_chunks_arrive_in_order_across_ingest_calls() {
    let (reactor, _sent) = recording();
    let received = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&received);
    let reactor = reactor.on("feed", move |_command: Command, exchange: Exchange<u32>| {
        let sink = Rc::clone(&sink);
        async move {
            let mut chunks = Box::pin(exchange.chunks());
            while let Some(chunk) = chunks.next().await {
                sink.borrow_mut().push(chunk?.text().unwrap_or_default());
            }
            HandlerResult::Ok(())
        }
    });

    assert!(reactor.ingest(b"feed|Z9 a\n", 1).is_empty());
    reactor.run_until_stalled().await;
    assert!(reactor.ingest(b"feed|Z9 b\nfee", 1).is_empty());
    reactor.run_until_stalled().await;
    assert!(reactor.ingest(b"d|Z9 \n", 1).is_empty());
    reactor.run_until_stalled().await;

    assert_eq!(*received.borrow(), vec!["a".to_string(), "b".to_string()]);
    assert_eq!(reactor.open_exchanges(), 0);
}

#[tokio::test]
async fn suspended_handler_does_not_block_other_exchanges() {
    let (reactor, sent) = recording();
    let reactor = reactor
        .on("proxy", |command: Command, exchange: Exchange<u32>| async move {
            let key = command.require_text()?;
            let lookup = Command::new("lookup").with_text(key).request("p1");
            let lookup = exchange.send_to(2, lookup)?;
            let value = lookup.on_reply().await?;
            exchange.reply(Command::new("").with_text(value.text().unwrap_or_default()))?;
            HandlerResult::Ok(())
        })
        .on("other", |_command: Command, exchange: Exchange<u32>| async move {
            exchange.reply(Command::new("").with_text("done"))?;
            HandlerResult::Ok(())
        });

    assert!(reactor.ingest(b"proxy?1 k\n", 1).is_empty());
    reactor.run_until_stalled().await;
    assert!(reactor.ingest(b"other?2\n", 1).is_empty());
    reactor.run_until_stalled().await;
    assert!(reactor.ingest(b".p1 v\n", 2).is_empty());
    reactor.run_until_stalled().await;

    assert_eq!(
        *sent.borrow(),
        vec![
            (2, "lookup?p1 k\n".to_string()),
            (1, ".2 done\n".to_string()),
            (1, ".1 v\n".to_string()),
        ]
    );
    assert_eq!(reactor.open_exchanges(), 0);
}

#[tokio::test]
async fn closed_exchange_rejects_further_replies() {
    let (reactor, sent) = recording();
    let outcome = Rc::new(RefCell::new(None));
    let sink = Rc::clone(&outcome);
    let reactor = reactor.on("once", move |_command: Command, exchange: Exchange<u32>| {
        let sink = Rc::clone(&sink);
        async move {
            exchange.reply(Command::new("").with_text("first"))?;
            let second = exchange.reply(Command::new("").with_text("second"));
            *sink.borrow_mut() = Some(second);
            HandlerResult::Ok(())
        }
    });

    assert!(reactor.ingest(b"once?x\n", 1).is_empty());
    reactor.run_until_stalled().await;

    assert!(matches!(*outcome.borrow(), Some(Err(ExchangeError::Closed))));
    assert_eq!(sent.borrow().len(), 1);
}

/// Frames written by one side, waiting to be delivered to the other.
type Wire = Rc<RefCell<VecDeque<Bytes>>>;

fn endpoint(outbox: &Wire) -> Reactor<u32> {
    let outbox = Rc::clone(outbox);
    Reactor::new(move |_peer: &u32, frame: Bytes| -> io::Result<()> {
        outbox.borrow_mut().push_back(frame);
        Ok(())
    })
}

async fn pump(left: &Reactor<u32>, to_left: &Wire, right: &Reactor<u32>, to_right: &Wire) {
    loop {
        left.run_until_stalled().await;
        right.run_until_stalled().await;
        let for_right: Vec<Bytes> = to_right.borrow_mut().drain(..).collect();
        let for_left: Vec<Bytes> = to_left.borrow_mut().drain(..).collect();
        if for_right.is_empty() && for_left.is_empty() {
            return;
        }
        for frame in for_right {
            assert!(right.ingest(&frame, 0).is_empty());
        }
        for frame in for_left {
            assert!(left.ingest(&frame, 0).is_empty());
        }
    }
}

#[tokio::test]
async fn two_reactors_talk_over_a_wire() {
    let to_client = Wire::default();
    let to_server = Wire::default();

    let server = endpoint(&to_client)
        .on("echo", |command: Command, exchange: Exchange<u32>| async move {
            exchange.reply(Command::new("").with_text(command.require_text()?))?;
            HandlerResult::Ok(())
        })
        .on("count", |command: Command, exchange: Exchange<u32>| async move {
            let from: u32 = command.require_text()?.parse()?;
            for n in (1..=from).rev() {
                exchange.stream(Command::new("").with_text(n.to_string()))?;
            }
            exchange.finish_stream()?;
            HandlerResult::Ok(())
        });
    let client = endpoint(&to_server).with_id_generator(sequential_ids("c"));

    let echo = client
        .request(0, Command::new("echo").with_text("two words"))
        .unwrap();
    let reply = echo.on_reply();
    pump(&client, &to_client, &server, &to_server).await;
    assert_eq!(reply.await.unwrap().text().as_deref(), Some("two words"));

    let countdown = client
        .request(0, Command::new("count").with_text("3"))
        .unwrap();
    pump(&client, &to_client, &server, &to_server).await;
    let items: Vec<String> = countdown
        .chunks()
        .map(|item| item.unwrap().text().unwrap_or_default())
        .collect()
        .await;
    assert_eq!(items, vec!["3", "2", "1"]);

    assert_eq!(client.open_exchanges(), 0);
    assert_eq!(server.open_exchanges(), 0);
}
