use trimsock_frame::{Command, FrameError};

/// Errors raised by exchange operations.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    /// The originating command carries no id to reply or stream to.
    #[error("exchange has no request or stream id to reply to")]
    NotRepliable,

    /// The exchange was closed before a matching command arrived.
    #[error("exchange is closed")]
    Closed,

    /// The peer answered with an error response.
    #[error("peer responded with an error: {}", .0.text().unwrap_or_default())]
    Failed(Box<Command>),

    /// The reactor owning this exchange has been dropped.
    #[error("exchange is detached from its reactor")]
    Detached,

    /// Writing to the connection failed.
    #[error("write failed: {0}")]
    Write(#[source] std::io::Error),
}

impl ExchangeError {
    /// The error response carried by [`ExchangeError::Failed`].
    pub fn response(&self) -> Option<&Command> {
        match self {
            ExchangeError::Failed(command) => Some(command),
            _ => None,
        }
    }
}

/// Errors raised while ingesting data into a reactor.
#[derive(Debug, thiserror::Error)]
pub enum ReactorError {
    /// Frame-level decoding error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// A continuation command refers to no open exchange.
    #[error("unknown exchange id {id:?}")]
    UnknownExchange { id: String },

    /// A request reuses the id of an exchange that is still open.
    #[error("exchange id {id:?} is already in use")]
    DuplicateExchange { id: String },

    /// Exchange-level error.
    #[error("exchange error: {0}")]
    Exchange(#[from] ExchangeError),
}

pub type Result<T> = std::result::Result<T, ReactorError>;
