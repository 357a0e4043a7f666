//! Exchange tracking and command dispatch for the trimsock protocol.
//!
//! A [`Reactor`] is transport agnostic: feed it the bytes received on each
//! connection with [`Reactor::ingest`], and it writes outgoing frames
//! through a [`FrameSink`]. Commands carrying a request or stream id are
//! grouped into [`Exchange`]s, so a handler can answer a request, stream
//! chunks back, or wait for the peer's next message on the same id.
//!
//! Handlers are stored in the reactor itself and advance while
//! [`Reactor::run`] or [`Reactor::run_until_stalled`] is awaited. Any
//! single-threaded executor works; no spawning is involved.

pub mod error;
pub mod exchange;
pub mod id;
pub mod reactor;
pub mod registry;

pub use error::{ExchangeError, ReactorError, Result};
pub use exchange::{Delivered, Delivery, Exchange};
pub use id::{random_id, random_ids, sequential_ids, IdGenerator, DEFAULT_ID_LENGTH};
pub use reactor::{
    Connection, FrameSink, HandlerError, HandlerResult, Next, Reactor, ReactorConfig,
};
pub use registry::ExchangeMap;
