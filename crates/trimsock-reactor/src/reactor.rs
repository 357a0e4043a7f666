use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::io;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use bytes::Bytes;
use futures_util::future::{poll_fn, FutureExt, LocalBoxFuture};
use futures_util::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, trace, warn};
use trimsock_frame::{Command, Decoder, FrameConfig};

use crate::error::{ExchangeError, ReactorError, Result};
use crate::exchange::Exchange;
use crate::id::{random_ids, IdGenerator, DEFAULT_ID_LENGTH};
use crate::registry::ExchangeMap;

/// Connection handle used to tell peers apart.
pub trait Connection: Clone + Eq + Hash + fmt::Debug + 'static {}

impl<T> Connection for T where T: Clone + Eq + Hash + fmt::Debug + 'static {}

/// Write side of a connection.
pub trait FrameSink<C> {
    /// Write one serialized frame to `connection`.
    fn write(&self, connection: &C, frame: Bytes) -> io::Result<()>;
}

impl<C, F> FrameSink<C> for F
where
    F: Fn(&C, Bytes) -> io::Result<()>,
{
    fn write(&self, connection: &C, frame: Bytes) -> io::Result<()> {
        self(connection, frame)
    }
}

/// Error raised by a handler or filter.
pub type HandlerError = Box<dyn std::error::Error>;

pub type HandlerResult = std::result::Result<(), HandlerError>;

type HandlerFn<C> = Rc<dyn Fn(Command, Exchange<C>) -> LocalBoxFuture<'static, HandlerResult>>;
type FilterFn<C> =
    Rc<dyn Fn(Command, Exchange<C>, Next<C>) -> LocalBoxFuture<'static, HandlerResult>>;
type ErrorHandlerFn<C> = Rc<dyn Fn(Command, Exchange<C>, HandlerError)>;

/// Reactor configuration.
#[derive(Debug, Clone)]
pub struct ReactorConfig {
    /// Decoder settings applied to every connection.
    pub frame: FrameConfig,
    /// Length of generated request ids. Default: 16.
    pub id_length: usize,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            id_length: DEFAULT_ID_LENGTH,
        }
    }
}

pub(crate) struct Core<C> {
    sink: Box<dyn FrameSink<C>>,
    config: ReactorConfig,
    handlers: RefCell<HashMap<String, HandlerFn<C>>>,
    unknown: RefCell<Option<HandlerFn<C>>>,
    on_error: RefCell<Option<ErrorHandlerFn<C>>>,
    filters: RefCell<Rc<Vec<FilterFn<C>>>>,
    generate_id: RefCell<IdGenerator>,
    decoders: RefCell<HashMap<C, Decoder>>,
    exchanges: RefCell<ExchangeMap<C>>,
    tasks: RefCell<FuturesUnordered<LocalBoxFuture<'static, ()>>>,
    driver: RefCell<Option<Waker>>,
}

impl<C: Connection> Core<C> {
    /// Drop the registry entry of a closed exchange.
    pub(crate) fn forget(&self, connection: &C, id: &str, exchange: &Exchange<C>) {
        self.exchanges.borrow_mut().remove(connection, id, exchange);
    }
}

/// Routes incoming commands to handlers and open exchanges.
///
/// The reactor is single-threaded. Handlers are kept inside the reactor and
/// make progress while [`Reactor::run`] or [`Reactor::run_until_stalled`] is
/// awaited, on any executor. Cloning is cheap and yields a handle to the
/// same reactor.
pub struct Reactor<C> {
    core: Rc<Core<C>>,
}

impl<C> Clone for Reactor<C> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
        }
    }
}

impl<C: Connection> Reactor<C> {
    /// Create a reactor writing through `sink`, with default configuration.
    pub fn new(sink: impl FrameSink<C> + 'static) -> Self {
        Self::with_config(sink, ReactorConfig::default())
    }

    /// Create a reactor with explicit configuration.
    pub fn with_config(sink: impl FrameSink<C> + 'static, config: ReactorConfig) -> Self {
        let generate_id = random_ids(config.id_length);
        Self {
            core: Rc::new(Core {
                sink: Box::new(sink),
                config,
                handlers: RefCell::new(HashMap::new()),
                unknown: RefCell::new(None),
                on_error: RefCell::new(None),
                filters: RefCell::new(Rc::new(Vec::new())),
                generate_id: RefCell::new(generate_id),
                decoders: RefCell::new(HashMap::new()),
                exchanges: RefCell::new(ExchangeMap::new()),
                tasks: RefCell::new(FuturesUnordered::new()),
                driver: RefCell::new(None),
            }),
        }
    }

    pub(crate) fn from_core(core: Rc<Core<C>>) -> Self {
        Self { core }
    }

    /// Handle commands named `name`.
    pub fn on<F, Fut>(self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Command, Exchange<C>) -> Fut + 'static,
        Fut: Future<Output = HandlerResult> + 'static,
    {
        self.core
            .handlers
            .borrow_mut()
            .insert(name.into(), boxed_handler(handler));
        self
    }

    /// Handle commands no other handler is registered for.
    pub fn on_unknown<F, Fut>(self, handler: F) -> Self
    where
        F: Fn(Command, Exchange<C>) -> Fut + 'static,
        Fut: Future<Output = HandlerResult> + 'static,
    {
        *self.core.unknown.borrow_mut() = Some(boxed_handler(handler));
        self
    }

    /// Receive errors returned by handlers and filters.
    pub fn on_error<F>(self, handler: F) -> Self
    where
        F: Fn(Command, Exchange<C>, HandlerError) + 'static,
    {
        *self.core.on_error.borrow_mut() = Some(Rc::new(handler));
        self
    }

    /// Run `filter` before handlers, after any filters added earlier.
    ///
    /// A filter continues dispatch by calling [`Next::run`]; returning
    /// without doing so stops the command from reaching its handler.
    pub fn with_filter<F, Fut>(self, filter: F) -> Self
    where
        F: Fn(Command, Exchange<C>, Next<C>) -> Fut + 'static,
        Fut: Future<Output = HandlerResult> + 'static,
    {
        let filter: FilterFn<C> =
            Rc::new(move |command: Command, exchange: Exchange<C>, next: Next<C>| {
                filter(command, exchange, next).boxed_local()
            });
        {
            let mut filters = self.core.filters.borrow_mut();
            Rc::make_mut(&mut *filters).push(filter);
        }
        self
    }

    /// Replace the generator used for outgoing request ids.
    pub fn with_id_generator(self, generator: IdGenerator) -> Self {
        *self.core.generate_id.borrow_mut() = generator;
        self
    }

    /// Current configuration.
    pub fn config(&self) -> &ReactorConfig {
        &self.core.config
    }

    /// Number of handlers that have not finished yet.
    pub fn running_handlers(&self) -> usize {
        self.core.tasks.borrow().len()
    }

    /// Drive handlers forever.
    ///
    /// Meant to be raced against the transport's read loop, for example in
    /// `tokio::select!`.
    pub async fn run(&self) {
        poll_fn(|cx| {
            self.poll_handlers(cx);
            Poll::<()>::Pending
        })
        .await
    }

    /// Drive every handler until none of them can make progress, then return.
    pub async fn run_until_stalled(&self) {
        poll_fn(|cx| {
            self.poll_handlers(cx);
            Poll::Ready(())
        })
        .await
    }

    /// Number of open, registered exchanges.
    pub fn open_exchanges(&self) -> usize {
        self.core.exchanges.borrow().len()
    }

    /// Feed bytes received on `connection`.
    ///
    /// Commands are dispatched in arrival order. Decode errors and commands
    /// that could not be routed are returned; handler errors never are.
    #[must_use = "ingest errors should be logged or acted upon"]
    pub fn ingest(&self, data: &[u8], connection: C) -> Vec<ReactorError> {
        let items = {
            let mut decoders = self.core.decoders.borrow_mut();
            decoders
                .entry(connection.clone())
                .or_insert_with(|| Decoder::with_config(self.core.config.frame.clone()))
                .ingest(data)
        };

        let mut errors = Vec::new();
        for item in items {
            let result = item
                .map_err(ReactorError::from)
                .and_then(|command| self.route(command, &connection));
            if let Err(err) = result {
                warn!(?connection, error = %err, "failed to process command");
                errors.push(err);
            }
        }
        errors
    }

    /// Send `command` to `target` and return its exchange.
    ///
    /// Commands with an id reuse the open exchange for that id, if any.
    pub fn send(&self, target: C, command: Command) -> Result<Exchange<C>> {
        Ok(self.send_command(target, command)?)
    }

    /// Send `command` as a request with a freshly generated id.
    pub fn request(&self, target: C, command: Command) -> Result<Exchange<C>> {
        let id = self.next_id();
        self.send(target, command.request(id))
    }

    /// Forget a connection, closing all of its exchanges.
    ///
    /// Fails if the connection stopped in the middle of a command.
    pub fn disconnect(&self, connection: &C) -> Result<()> {
        let decoder = self.core.decoders.borrow_mut().remove(connection);
        let exchanges = self.core.exchanges.borrow_mut().remove_connection(connection);
        debug!(?connection, exchanges = exchanges.len(), "connection removed");

        for exchange in exchanges {
            exchange.close();
        }

        match decoder {
            Some(mut decoder) => Ok(decoder.finish()?),
            None => Ok(()),
        }
    }

    pub(crate) fn send_command(
        &self,
        target: C,
        command: Command,
    ) -> std::result::Result<Exchange<C>, ExchangeError> {
        self.write_to(&target, &command)?;

        let Some(id) = command.id().map(str::to_string) else {
            return Ok(Exchange::new(target, Some(command), Rc::downgrade(&self.core)));
        };
        let existing = self.core.exchanges.borrow().get(&target, &id);
        let closing = command.is_closing();
        if let Some(existing) = existing {
            if closing {
                existing.close();
            }
            return Ok(existing);
        }

        let exchange = Exchange::new(target.clone(), Some(command), Rc::downgrade(&self.core));
        if closing {
            exchange.close();
        } else {
            self.core
                .exchanges
                .borrow_mut()
                .insert(target, id, exchange.clone());
        }
        Ok(exchange)
    }

    pub(crate) fn write_to(
        &self,
        target: &C,
        command: &Command,
    ) -> std::result::Result<(), ExchangeError> {
        trace!(connection = ?target, name = %command.wire_name(), "writing command");
        self.core
            .sink
            .write(target, command.serialize())
            .map_err(ExchangeError::Write)
    }

    pub(crate) fn next_id(&self) -> String {
        let generate_id = self.core.generate_id.borrow().clone();
        generate_id()
    }

    /// Open a new exchange or continue an existing one.
    fn route(&self, command: Command, connection: &C) -> Result<()> {
        let Some(id) = command.id().map(str::to_string) else {
            self.open(command, connection);
            return Ok(());
        };

        let existing = self.core.exchanges.borrow().get(connection, &id);
        match existing {
            Some(_) if command.is_request() => Err(ReactorError::DuplicateExchange { id }),
            Some(exchange) => {
                trace!(?connection, %id, "continuing exchange");
                exchange.push(command);
                Ok(())
            }
            None if command.is_request() || command.is_stream_chunk() => {
                self.open(command, connection);
                Ok(())
            }
            None => Err(ReactorError::UnknownExchange { id }),
        }
    }

    fn open(&self, command: Command, connection: &C) {
        let exchange = Exchange::incoming(
            connection.clone(),
            command.clone(),
            Rc::downgrade(&self.core),
        );
        if let Some(id) = command.id().filter(|_| !command.is_closing()) {
            self.core
                .exchanges
                .borrow_mut()
                .insert(connection.clone(), id.to_string(), exchange.clone());
        }

        self.dispatch(command, exchange);
    }

    /// Poll handlers until all of them are pending. Handlers dispatched while
    /// polling are picked up in the same call.
    fn poll_handlers(&self, cx: &mut Context<'_>) {
        *self.core.driver.borrow_mut() = Some(cx.waker().clone());

        loop {
            let mut tasks = std::mem::take(&mut *self.core.tasks.borrow_mut());
            while let Poll::Ready(Some(())) = tasks.poll_next_unpin(cx) {}

            let mut slot = self.core.tasks.borrow_mut();
            let dispatched = std::mem::replace(&mut *slot, tasks);
            if dispatched.is_empty() {
                return;
            }
            slot.extend(dispatched);
        }
    }

    /// Queue the filter chain and handler for a new exchange.
    fn dispatch(&self, command: Command, exchange: Exchange<C>) {
        let handler = self
            .core
            .handlers
            .borrow()
            .get(&command.name)
            .cloned()
            .or_else(|| self.core.unknown.borrow().clone());
        let handler = handler.unwrap_or_else(|| {
            debug!(name = %command.name, "no handler for command");
            boxed_handler(|_, _| async { HandlerResult::Ok(()) })
        });

        let next = Next {
            filters: self.core.filters.borrow().clone(),
            index: 0,
            handler,
        };
        let on_error = self.core.on_error.borrow().clone();

        debug!(name = %command.name, id = ?command.id(), "dispatching command");
        let task = async move {
            let Err(err) = next.run(command.clone(), exchange.clone()).await else {
                return;
            };
            match on_error {
                Some(on_error) => on_error(command, exchange, err),
                None => warn!(name = %command.name, error = %err, "command handler failed"),
            }
        };
        self.core.tasks.borrow_mut().push(task.boxed_local());

        let driver = self.core.driver.borrow().clone();
        if let Some(driver) = driver {
            driver.wake();
        }
    }
}

impl<C> fmt::Debug for Reactor<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactor")
            .field("config", &self.core.config)
            .field("handlers", &self.core.handlers.borrow().len())
            .field("filters", &self.core.filters.borrow().len())
            .finish()
    }
}

/// The rest of a filter chain, ending in the command's handler.
pub struct Next<C> {
    filters: Rc<Vec<FilterFn<C>>>,
    index: usize,
    handler: HandlerFn<C>,
}

impl<C: Connection> Next<C> {
    /// Pass the command on to the next filter, or to the handler.
    pub async fn run(self, command: Command, exchange: Exchange<C>) -> HandlerResult {
        match self.filters.get(self.index).cloned() {
            Some(filter) => {
                let next = Next {
                    index: self.index + 1,
                    ..self
                };
                filter(command, exchange, next).await
            }
            None => (self.handler)(command, exchange).await,
        }
    }
}

impl<C> fmt::Debug for Next<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("remaining", &self.filters.len().saturating_sub(self.index))
            .finish()
    }
}

fn boxed_handler<C, F, Fut>(handler: F) -> HandlerFn<C>
where
    C: Connection,
    F: Fn(Command, Exchange<C>) -> Fut + 'static,
    Fut: Future<Output = HandlerResult> + 'static,
{
    Rc::new(move |command: Command, exchange: Exchange<C>| handler(command, exchange).boxed_local())
}
