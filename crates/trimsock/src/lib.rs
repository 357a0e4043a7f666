//! Lightweight line-oriented command protocol.
//!
//! trimsock commands are single text lines (`name data\n`) or length-prefixed
//! raw blocks. Names may carry a request, response or stream id, which lets
//! both sides hold several request/reply and streaming conversations over one
//! byte stream.
//!
//! # Crate Structure
//!
//! - [`frame`]: command model, incremental decoder and blocking adapters
//! - [`reactor`]: exchange tracking and handler dispatch (behind `reactor` feature)

/// Re-export frame types.
pub mod frame {
    pub use trimsock_frame::*;
}

/// Re-export reactor types (requires `reactor` feature).
#[cfg(feature = "reactor")]
pub mod reactor {
    pub use trimsock_reactor::*;
}

pub use trimsock_frame::{Command, FrameError};
