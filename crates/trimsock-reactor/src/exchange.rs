//! One correlated conversation with a peer.
//!
//! An exchange buffers every command routed to it in one of three FIFO queues
//! (plain commands, responses, stream items). A consumer either takes the
//! oldest queued item or registers a one-shot waiter that the next matching
//! push resolves.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::oneshot;
use tracing::trace;
use trimsock_frame::Command;

use crate::error::ExchangeError;
use crate::reactor::{Connection, Core, Reactor};

/// Outcome of waiting on an exchange.
pub type Delivered = Result<Command, ExchangeError>;

type Waiter = oneshot::Sender<Delivered>;

struct State {
    open: bool,
    plain: VecDeque<Command>,
    replies: VecDeque<Command>,
    stream: VecDeque<Command>,
    plain_waiters: VecDeque<Waiter>,
    reply_waiters: VecDeque<Waiter>,
    stream_waiters: VecDeque<Waiter>,
}

impl State {
    fn new() -> Self {
        Self {
            open: true,
            plain: VecDeque::new(),
            replies: VecDeque::new(),
            stream: VecDeque::new(),
            plain_waiters: VecDeque::new(),
            reply_waiters: VecDeque::new(),
            stream_waiters: VecDeque::new(),
        }
    }
}

struct Inner<C> {
    source: C,
    origin: Option<Command>,
    core: Weak<Core<C>>,
    state: RefCell<State>,
}

/// Handle to one exchange. Clones share the same state.
pub struct Exchange<C> {
    inner: Rc<Inner<C>>,
}

impl<C> Clone for Exchange<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<C: Connection> Exchange<C> {
    pub(crate) fn new(source: C, origin: Option<Command>, core: Weak<Core<C>>) -> Self {
        Self {
            inner: Rc::new(Inner {
                source,
                origin,
                core,
                state: RefCell::new(State::new()),
            }),
        }
    }

    /// Exchange opened by a command from the peer. A request or stream chunk
    /// is queued as its first item, so consumers see it like any later one.
    pub(crate) fn incoming(source: C, command: Command, core: Weak<Core<C>>) -> Self {
        let seed = (!command.is_simple()).then(|| command.clone());
        let exchange = Self::new(source, Some(command), core);
        if let Some(seed) = seed {
            exchange.push(seed);
        }
        exchange
    }

    /// Connection this exchange talks to.
    pub fn source(&self) -> &C {
        &self.inner.source
    }

    /// Command that opened the exchange.
    pub fn command(&self) -> Option<&Command> {
        self.inner.origin.as_ref()
    }

    /// Correlation id, if the opening command carried one.
    pub fn id(&self) -> Option<&str> {
        self.inner.origin.as_ref().and_then(Command::id)
    }

    pub fn is_open(&self) -> bool {
        self.inner.state.borrow().open
    }

    /// True if replies and stream items can be sent back.
    pub fn can_reply(&self) -> bool {
        self.id().is_some()
    }

    /// True if both handles refer to the same exchange.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Route an incoming command to the oldest matching waiter, or queue it.
    ///
    /// Responses and stream ends close the exchange.
    pub(crate) fn push(&self, command: Command) {
        let closing = command.is_closing();
        {
            let mut guard = self.inner.state.borrow_mut();
            let state = &mut *guard;

            if command.is_response() {
                let leftover = match deliver(&mut state.reply_waiters, command) {
                    Some(command) if command.is_error_response() => {
                        deliver(&mut state.stream_waiters, command)
                    }
                    leftover => leftover,
                };
                state.replies.extend(leftover);
            } else if command.is_stream() {
                let leftover = deliver(&mut state.stream_waiters, command);
                state.stream.extend(leftover);
            } else {
                let leftover = deliver(&mut state.plain_waiters, command);
                state.plain.extend(leftover);
            }
        }

        if closing {
            self.close();
        }
    }

    /// Close the exchange, failing every pending waiter with
    /// [`ExchangeError::Closed`] and freeing its registry entry.
    pub(crate) fn close(&self) {
        let waiters = {
            let mut state = self.inner.state.borrow_mut();
            if !state.open {
                return;
            }
            state.open = false;
            (
                std::mem::take(&mut state.plain_waiters),
                std::mem::take(&mut state.reply_waiters),
                std::mem::take(&mut state.stream_waiters),
            )
        };
        drop(waiters);

        trace!(source = ?self.inner.source, id = ?self.id(), "exchange closed");
        if let (Some(core), Some(id)) = (self.inner.core.upgrade(), self.id()) {
            core.forget(&self.inner.source, id, self);
        }
    }

    /// Next plain command sent on this exchange.
    pub fn on_command(&self) -> Delivery {
        let mut state = self.inner.state.borrow_mut();
        let queued = state.plain.pop_front();
        consume(&mut state, queued.map(Ok), Channel::Plain)
    }

    /// The response to this exchange.
    ///
    /// An error response resolves to [`ExchangeError::Failed`].
    pub fn on_reply(&self) -> Delivery {
        let mut state = self.inner.state.borrow_mut();
        let queued = state.replies.pop_front();
        consume(&mut state, queued.map(outcome), Channel::Reply)
    }

    /// Next stream chunk or stream end.
    ///
    /// An error response ends the stream with [`ExchangeError::Failed`].
    pub fn on_stream(&self) -> Delivery {
        let mut state = self.inner.state.borrow_mut();
        let queued = match state.stream.pop_front() {
            Some(command) => Some(command),
            None => state
                .replies
                .iter()
                .position(Command::is_error_response)
                .and_then(|at| state.replies.remove(at)),
        };
        consume(&mut state, queued.map(outcome), Channel::Stream)
    }

    /// Stream chunks until the stream ends.
    ///
    /// The end marker is not yielded. A failure is yielded once, after which
    /// the stream is over.
    pub fn chunks(&self) -> impl Stream<Item = Delivered> + 'static {
        futures_util::stream::unfold(Some(self.clone()), |exchange| async move {
            let Some(exchange) = exchange else {
                return None;
            };
            match exchange.on_stream().await {
                Ok(command) if command.is_stream_end() => None,
                Ok(command) => Some((Ok(command), Some(exchange))),
                Err(err) => Some((Err(err), None)),
            }
        })
    }

    /// Send a command to this exchange's connection, opening a new exchange.
    pub fn send(&self, command: Command) -> Result<Exchange<C>, ExchangeError> {
        self.send_to(self.inner.source.clone(), command)
    }

    /// Send a command to another connection, opening a new exchange.
    pub fn send_to(&self, target: C, command: Command) -> Result<Exchange<C>, ExchangeError> {
        self.reactor()?.send_command(target, command)
    }

    /// Send `command` as a request with a freshly generated id.
    pub fn request(&self, command: Command) -> Result<Exchange<C>, ExchangeError> {
        let reactor = self.reactor()?;
        let id = reactor.next_id();
        reactor.send_command(self.inner.source.clone(), command.request(id))
    }

    /// Answer with a success response and close the exchange.
    pub fn reply(&self, command: Command) -> Result<(), ExchangeError> {
        let id = self.reply_id()?;
        self.write(&unnamed(command).success(id))?;
        self.close();
        Ok(())
    }

    /// Answer with an error response and close the exchange.
    pub fn fail(&self, command: Command) -> Result<(), ExchangeError> {
        let id = self.reply_id()?;
        self.write(&unnamed(command).error(id))?;
        self.close();
        Ok(())
    }

    /// Send one stream chunk.
    pub fn stream(&self, command: Command) -> Result<(), ExchangeError> {
        let id = self.reply_id()?;
        self.write(&unnamed(command).stream_chunk(id))
    }

    /// Send the stream end marker and close the exchange.
    pub fn finish_stream(&self) -> Result<(), ExchangeError> {
        let id = self.reply_id()?;
        self.write(&Command::new("").stream_end(id))?;
        self.close();
        Ok(())
    }

    /// Reply if possible, otherwise send `command` as is.
    pub fn reply_or_send(&self, command: Command) -> Result<(), ExchangeError> {
        if self.can_reply() {
            self.reply(command)
        } else {
            self.send(command).map(drop)
        }
    }

    /// Fail if possible, otherwise send `command` as is.
    pub fn fail_or_send(&self, command: Command) -> Result<(), ExchangeError> {
        if self.can_reply() {
            self.fail(command)
        } else {
            self.send(command).map(drop)
        }
    }

    fn reply_id(&self) -> Result<String, ExchangeError> {
        let id = self.id().ok_or(ExchangeError::NotRepliable)?;
        if !self.is_open() {
            return Err(ExchangeError::Closed);
        }
        Ok(id.to_string())
    }

    fn write(&self, command: &Command) -> Result<(), ExchangeError> {
        self.reactor()?.write_to(&self.inner.source, command)
    }

    fn reactor(&self) -> Result<Reactor<C>, ExchangeError> {
        self.inner
            .core
            .upgrade()
            .map(Reactor::from_core)
            .ok_or(ExchangeError::Detached)
    }
}

impl<C: fmt::Debug> fmt::Debug for Exchange<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exchange")
            .field("source", &self.inner.source)
            .field("id", &self.inner.origin.as_ref().and_then(Command::id))
            .field("open", &self.inner.state.borrow().open)
            .finish()
    }
}

#[derive(Clone, Copy)]
enum Channel {
    Plain,
    Reply,
    Stream,
}

/// Future resolving to the next command a consumer asked for.
#[must_use = "futures do nothing unless polled"]
pub struct Delivery(DeliveryState);

enum DeliveryState {
    Ready(Option<Delivered>),
    Waiting(oneshot::Receiver<Delivered>),
}

impl Future for Delivery {
    type Output = Delivered;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().0 {
            DeliveryState::Ready(item) => {
                Poll::Ready(item.take().unwrap_or(Err(ExchangeError::Closed)))
            }
            // A dropped sender means the exchange closed before delivering.
            DeliveryState::Waiting(rx) => Pin::new(rx)
                .poll(cx)
                .map(|received| received.unwrap_or(Err(ExchangeError::Closed))),
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.0 {
            DeliveryState::Ready(_) => "ready",
            DeliveryState::Waiting(_) => "waiting",
        };
        f.debug_tuple("Delivery").field(&state).finish()
    }
}

fn consume(state: &mut State, queued: Option<Delivered>, channel: Channel) -> Delivery {
    if let Some(item) = queued {
        return Delivery(DeliveryState::Ready(Some(item)));
    }
    if !state.open {
        return Delivery(DeliveryState::Ready(Some(Err(ExchangeError::Closed))));
    }

    let (tx, rx) = oneshot::channel();
    match channel {
        Channel::Plain => state.plain_waiters.push_back(tx),
        Channel::Reply => state.reply_waiters.push_back(tx),
        Channel::Stream => state.stream_waiters.push_back(tx),
    }
    Delivery(DeliveryState::Waiting(rx))
}

fn outcome(command: Command) -> Delivered {
    if command.is_error_response() {
        Err(ExchangeError::Failed(Box::new(command)))
    } else {
        Ok(command)
    }
}

/// Hand `command` to the oldest live waiter. Returns it if nobody took it.
fn deliver(waiters: &mut VecDeque<Waiter>, command: Command) -> Option<Command> {
    let mut item = outcome(command);
    while let Some(waiter) = waiters.pop_front() {
        match waiter.send(item) {
            Ok(()) => return None,
            Err(returned) => item = returned,
        }
    }

    match item {
        Ok(command) => Some(command),
        Err(ExchangeError::Failed(command)) => Some(*command),
        Err(_) => None,
    }
}

fn unnamed(mut command: Command) -> Command {
    command.name.clear();
    command
}
